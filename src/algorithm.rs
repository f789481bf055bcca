// algorithm.rs — the composable feature algorithm contract.
//
// Every detection/description stage implements `FeatureAlgorithm`:
//   run      — enqueue GPU work, produce an encoded keypoint texture
//   download — start an asynchronous GPU→host readback of that texture
// plus the two layout attributes (`descriptor_size`, `extra_size`) that
// every stage in a chain must agree on. The decorator in decorator.rs does
// the agreeing; this module defines the contract and the error type.
//
// All violations here are precondition violations: a misconfigured
// pipeline, not a transient fault. They are surfaced as typed errors at
// construction or call time, before any GPU work is enqueued, and callers
// should treat them as fatal for that pipeline configuration.

use std::fmt;

use crate::globals::MAX_DESCRIPTOR_SIZE;
use crate::gpu::device::{GpuDevice, GpuError};
use crate::gpu::encoded::{KeypointReadback, KeypointTexture};
use crate::gpu::image::GpuImage;

// ---------------------------------------------------------------------------
// FeatureAlgorithm
// ---------------------------------------------------------------------------

/// A GPU feature detection/description stage.
///
/// Implementations own no textures — the input frame and the encoded
/// keypoint texture are borrowed for the duration of each call, and the
/// `GpuDevice` must not be retained beyond it. The encoded texture
/// produced by [`run`](FeatureAlgorithm::run) is fresh each invocation.
///
/// `descriptor_size` and `extra_size` are byte counts, each a non-negative
/// multiple of 4, with `descriptor_size <= MAX_DESCRIPTOR_SIZE`. Setting
/// either changes the record layout the stage expects from `run` and
/// `download` from that point on. Callers must not mutate sizes while a
/// `run`/`download` on the same chain is outstanding — configure the chain
/// fully before first use.
pub trait FeatureAlgorithm {
    /// Execute the stage's GPU work on `input`, returning a texture of
    /// encoded keypoint records. Must not mutate `input`. May return
    /// before the enqueued GPU work completes.
    fn run(&self, gpu: &GpuDevice, input: &GpuImage) -> Result<KeypointTexture, FeatureError>;

    /// Start a non-blocking GPU→host readback of `encoded`, to be decoded
    /// with this stage's layout. `flags` (a `DOWNLOAD_*` bitmask) is
    /// forwarded verbatim to the decoder.
    ///
    /// Fails with [`FeatureError::LayoutMismatch`] if this stage's declared
    /// sizes disagree with the layout `encoded` was produced with.
    fn download(
        &self,
        gpu: &GpuDevice,
        encoded: &KeypointTexture,
        flags: u8,
    ) -> Result<KeypointReadback, FeatureError>;

    /// Descriptor size in bytes (multiple of 4, at most `MAX_DESCRIPTOR_SIZE`).
    fn descriptor_size(&self) -> usize;

    /// Extra per-keypoint data size in bytes (multiple of 4).
    fn extra_size(&self) -> usize;

    /// Set the descriptor size. `bytes` must be a multiple of 4.
    fn set_descriptor_size(&mut self, bytes: usize);

    /// Set the extra data size. `bytes` must be a multiple of 4.
    fn set_extra_size(&mut self, bytes: usize);
}

/// Validate a `(descriptor_size, extra_size)` pair against the
/// process-wide layout convention: both multiples of 4, descriptor no
/// larger than `MAX_DESCRIPTOR_SIZE`.
pub fn validate_sizes(descriptor_size: usize, extra_size: usize) -> Result<(), FeatureError> {
    if descriptor_size % 4 != 0 || descriptor_size > MAX_DESCRIPTOR_SIZE {
        return Err(FeatureError::InvalidSize {
            field: "descriptor_size",
            bytes: descriptor_size,
        });
    }
    if extra_size % 4 != 0 {
        return Err(FeatureError::InvalidSize {
            field: "extra_size",
            bytes: extra_size,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors of the feature algorithm core.
///
/// `InvalidComposition`, `LayoutMismatch` and `InvalidSize` indicate a
/// misconfigured pipeline and are fatal for that configuration. The
/// remaining variants propagate lower-level GPU/transfer failures through
/// the call chain unchanged.
#[derive(Debug)]
pub enum FeatureError {
    /// A decorator tried to shrink the shared record layout. Composition
    /// may only grow `descriptor_size`/`extra_size`, never reduce them.
    InvalidComposition {
        field: &'static str,
        requested: usize,
        current: usize,
    },
    /// Two parties that must agree on the record layout disagree: a
    /// decorator vs. its decorated algorithm, or an algorithm vs. the
    /// texture it was asked to download.
    LayoutMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A size attribute violates the process-wide convention (not a
    /// multiple of 4, or descriptor above `MAX_DESCRIPTOR_SIZE`).
    InvalidSize { field: &'static str, bytes: usize },
    /// The requested keypoint capacity does not fit in a texture within
    /// `MAX_TEXTURE_LENGTH` for the given record size.
    CapacityTooLarge { capacity: usize, record_size: usize },
    /// The downloaded byte stream ended inside a record.
    TruncatedStream {
        offset: usize,
        needed: usize,
        available: usize,
    },
    /// Mapping the readback buffer failed.
    Readback(wgpu::BufferAsyncError),
    /// GPU device initialization/configuration error.
    Gpu(GpuError),
}

impl fmt::Display for FeatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureError::InvalidComposition { field, requested, current } => write!(
                f,
                "invalid composition: requested {field} = {requested} is smaller than the \
                 decorated algorithm's current value {current} (layout can only grow)"
            ),
            FeatureError::LayoutMismatch { field, expected, actual } => write!(
                f,
                "record layout mismatch: {field} expected {expected}, found {actual}"
            ),
            FeatureError::InvalidSize { field, bytes } => write!(
                f,
                "invalid {field}: {bytes} bytes (must be a multiple of 4; descriptors are \
                 capped at {MAX_DESCRIPTOR_SIZE} bytes)"
            ),
            FeatureError::CapacityTooLarge { capacity, record_size } => write!(
                f,
                "keypoint capacity {capacity} with record size {record_size} does not fit \
                 in an encodable texture"
            ),
            FeatureError::TruncatedStream { offset, needed, available } => write!(
                f,
                "truncated keypoint stream at byte {offset}: record needs {needed} bytes, \
                 {available} available"
            ),
            FeatureError::Readback(e) => write!(f, "keypoint readback failed: {e}"),
            FeatureError::Gpu(e) => write!(f, "gpu error: {e}"),
        }
    }
}

impl std::error::Error for FeatureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FeatureError::Readback(e) => Some(e),
            FeatureError::Gpu(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GpuError> for FeatureError {
    fn from(e: GpuError) -> Self {
        FeatureError::Gpu(e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_sizes_accepts_word_multiples() {
        assert!(validate_sizes(0, 0).is_ok());
        assert!(validate_sizes(32, 8).is_ok());
        assert!(validate_sizes(MAX_DESCRIPTOR_SIZE, 256).is_ok());
    }

    #[test]
    fn test_validate_sizes_rejects_non_word_multiples() {
        assert!(matches!(
            validate_sizes(3, 0),
            Err(FeatureError::InvalidSize { field: "descriptor_size", bytes: 3 })
        ));
        assert!(matches!(
            validate_sizes(0, 6),
            Err(FeatureError::InvalidSize { field: "extra_size", bytes: 6 })
        ));
    }

    #[test]
    fn test_validate_sizes_rejects_oversized_descriptor() {
        assert!(matches!(
            validate_sizes(MAX_DESCRIPTOR_SIZE + 4, 0),
            Err(FeatureError::InvalidSize { field: "descriptor_size", .. })
        ));
    }

    #[test]
    fn test_error_display_is_informative() {
        let e = FeatureError::InvalidComposition {
            field: "descriptor_size",
            requested: 16,
            current: 32,
        };
        let msg = e.to_string();
        assert!(msg.contains("descriptor_size"));
        assert!(msg.contains("16"));
        assert!(msg.contains("32"));
    }
}
