// decorator.rs — layout-preserving composition of feature algorithms.
//
// A decorator owns exactly one wrapped algorithm and keeps one invariant:
//
//   decorator.descriptor_size == decorated.descriptor_size
//   decorator.extra_size      == decorated.extra_size
//
// at all times. Construction may only GROW the shared layout (an outer
// stage can add extra/descriptor bytes to every record, never take them
// away from an inner stage that already claims them), and the decorated
// algorithm's sizes are overwritten to match as soon as the decorator is
// built. A chain of decorators is therefore a singly-linked ownership
// chain that always agrees on one record layout, with the terminal
// detector sizing the records it actually writes.
//
// Derived decorators (see gpu/orientation.rs) embed a
// `FeatureAlgorithmDecorator` and add GPU work around the pass-through
// `run`; the layout bookkeeping lives here so they never replicate it.

use crate::algorithm::{validate_sizes, FeatureAlgorithm, FeatureError};
use crate::gpu::device::GpuDevice;
use crate::gpu::encoded::{KeypointReadback, KeypointTexture};
use crate::gpu::image::GpuImage;

/// Wraps a feature algorithm, enforcing and propagating the shared record
/// layout (`descriptor_size`, `extra_size`) across the chain.
pub struct FeatureAlgorithmDecorator {
    decorated: Box<dyn FeatureAlgorithm>,
    descriptor_size: usize,
    extra_size: usize,
}

impl std::fmt::Debug for FeatureAlgorithmDecorator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureAlgorithmDecorator")
            .field("descriptor_size", &self.descriptor_size)
            .field("extra_size", &self.extra_size)
            .finish_non_exhaustive()
    }
}

impl FeatureAlgorithmDecorator {
    /// Wrap `decorated`, requesting the given layout sizes.
    ///
    /// A requested size of 0 means "inherit the decorated algorithm's
    /// current value" — each field resolves independently, so a decorator
    /// that only grows `extra_size` passes 0 for the descriptor.
    ///
    /// Fails with [`FeatureError::InvalidComposition`] if a resolved size
    /// is smaller than the decorated algorithm's current one (composition
    /// may only grow the layout), or [`FeatureError::InvalidSize`] if a
    /// size violates the process-wide convention. Nothing is mutated on
    /// failure. On success the decorated algorithm's sizes are overwritten
    /// to match the decorator's, establishing the invariant.
    pub fn new(
        decorated: Box<dyn FeatureAlgorithm>,
        descriptor_size: usize,
        extra_size: usize,
    ) -> Result<Self, FeatureError> {
        // 0 means inherit; resolve before any validation.
        let descriptor_size = if descriptor_size == 0 {
            decorated.descriptor_size()
        } else {
            descriptor_size
        };
        let extra_size = if extra_size == 0 {
            decorated.extra_size()
        } else {
            extra_size
        };

        validate_sizes(descriptor_size, extra_size)?;
        if descriptor_size < decorated.descriptor_size() {
            return Err(FeatureError::InvalidComposition {
                field: "descriptor_size",
                requested: descriptor_size,
                current: decorated.descriptor_size(),
            });
        }
        if extra_size < decorated.extra_size() {
            return Err(FeatureError::InvalidComposition {
                field: "extra_size",
                requested: extra_size,
                current: decorated.extra_size(),
            });
        }

        let mut decorated = decorated;
        decorated.set_descriptor_size(descriptor_size);
        decorated.set_extra_size(extra_size);

        Ok(FeatureAlgorithmDecorator {
            decorated,
            descriptor_size,
            extra_size,
        })
    }

    /// Check that the layout invariant still holds.
    ///
    /// The invariant can only break through direct mutation of the
    /// decorated algorithm (via [`decorated_mut`](Self::decorated_mut));
    /// `download` calls this before delegating so a tampered chain fails
    /// fast instead of decoding records with the wrong layout.
    pub fn verify_layout(&self) -> Result<(), FeatureError> {
        if self.extra_size != self.decorated.extra_size() {
            return Err(FeatureError::LayoutMismatch {
                field: "extra_size",
                expected: self.extra_size,
                actual: self.decorated.extra_size(),
            });
        }
        if self.descriptor_size != self.decorated.descriptor_size() {
            return Err(FeatureError::LayoutMismatch {
                field: "descriptor_size",
                expected: self.descriptor_size,
                actual: self.decorated.descriptor_size(),
            });
        }
        Ok(())
    }

    /// The decorated algorithm, for introspection and chain assembly.
    pub fn decorated(&self) -> &dyn FeatureAlgorithm {
        self.decorated.as_ref()
    }

    /// Mutable access to the decorated algorithm. Mutating its size
    /// attributes directly breaks the layout invariant; prefer the
    /// decorator's setters, which cascade.
    pub fn decorated_mut(&mut self) -> &mut dyn FeatureAlgorithm {
        self.decorated.as_mut()
    }
}

impl FeatureAlgorithm for FeatureAlgorithmDecorator {
    /// Pass-through delegation. Derived decorators inject their GPU work
    /// before/after this call.
    fn run(&self, gpu: &GpuDevice, input: &GpuImage) -> Result<KeypointTexture, FeatureError> {
        self.decorated.run(gpu, input)
    }

    /// Verify the layout invariant, then delegate verbatim — `flags` is
    /// forwarded unchanged and the decorated algorithm's result is
    /// returned as-is.
    fn download(
        &self,
        gpu: &GpuDevice,
        encoded: &KeypointTexture,
        flags: u8,
    ) -> Result<KeypointReadback, FeatureError> {
        self.verify_layout()?;
        self.decorated.download(gpu, encoded, flags)
    }

    fn descriptor_size(&self) -> usize {
        self.descriptor_size
    }

    fn extra_size(&self) -> usize {
        self.extra_size
    }

    /// Store the new size and synchronously cascade it to the decorated
    /// algorithm. No bound re-validation beyond the process-wide
    /// multiple-of-4 convention.
    fn set_descriptor_size(&mut self, bytes: usize) {
        debug_assert!(bytes % 4 == 0, "descriptor_size must be a multiple of 4");
        self.descriptor_size = bytes;
        self.decorated.set_descriptor_size(bytes);
    }

    fn set_extra_size(&mut self, bytes: usize) {
        debug_assert!(bytes % 4 == 0, "extra_size must be a multiple of 4");
        self.extra_size = bytes;
        self.decorated.set_extra_size(bytes);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
