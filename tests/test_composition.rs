// tests/test_composition.rs — Integration tests for algorithm composition.
//
// These tests exercise the decorator contract without touching a GPU: a
// host-side mock stands in for the decorated detector, and the tests check
// the layout negotiation that happens at construction time — inheritance,
// grow-only enforcement, setter cascades — plus the layout verification
// that `download` performs before delegating.

use glint::algorithm::validate_sizes;
use glint::encoding::record_size;
use glint::globals::MAX_DESCRIPTOR_SIZE;
use glint::gpu::device::GpuDevice;
use glint::gpu::encoded::{KeypointReadback, KeypointTexture};
use glint::gpu::image::GpuImage;
use glint::{FeatureAlgorithm, FeatureAlgorithmDecorator, FeatureError};

use std::cell::Cell;
use std::rc::Rc;

/// A stand-in detector with a configurable layout. `run`/`download` are
/// never reached by these tests — composition fails (or succeeds) before
/// any GPU work would be enqueued.
struct MockDetector {
    descriptor_size: usize,
    extra_size: usize,
}

impl MockDetector {
    fn with_layout(descriptor_size: usize, extra_size: usize) -> Box<Self> {
        Box::new(MockDetector { descriptor_size, extra_size })
    }
}

impl FeatureAlgorithm for MockDetector {
    fn run(&self, _gpu: &GpuDevice, _input: &GpuImage) -> Result<KeypointTexture, FeatureError> {
        unreachable!("composition tests never run GPU work")
    }

    fn download(
        &self,
        _gpu: &GpuDevice,
        _encoded: &KeypointTexture,
        _flags: u8,
    ) -> Result<KeypointReadback, FeatureError> {
        unreachable!("composition tests never run GPU work")
    }

    fn descriptor_size(&self) -> usize {
        self.descriptor_size
    }

    fn extra_size(&self) -> usize {
        self.extra_size
    }

    fn set_descriptor_size(&mut self, bytes: usize) {
        self.descriptor_size = bytes;
    }

    fn set_extra_size(&mut self, bytes: usize) {
        self.extra_size = bytes;
    }
}

/// Like `MockDetector`, but with its layout in a shared cell so tests can
/// inspect it after ownership moved into a (failed) decorator.
struct SharedLayoutDetector {
    layout: Rc<Cell<(usize, usize)>>,
}

impl FeatureAlgorithm for SharedLayoutDetector {
    fn run(&self, _gpu: &GpuDevice, _input: &GpuImage) -> Result<KeypointTexture, FeatureError> {
        unreachable!("composition tests never run GPU work")
    }

    fn download(
        &self,
        _gpu: &GpuDevice,
        _encoded: &KeypointTexture,
        _flags: u8,
    ) -> Result<KeypointReadback, FeatureError> {
        unreachable!("composition tests never run GPU work")
    }

    fn descriptor_size(&self) -> usize {
        self.layout.get().0
    }

    fn extra_size(&self) -> usize {
        self.layout.get().1
    }

    fn set_descriptor_size(&mut self, bytes: usize) {
        self.layout.set((bytes, self.layout.get().1));
    }

    fn set_extra_size(&mut self, bytes: usize) {
        self.layout.set((self.layout.get().0, bytes));
    }
}

// ===== Construction: inheritance and growth =====

#[test]
fn zero_sizes_inherit_from_decorated() {
    let det = MockDetector::with_layout(32, 8);
    let deco = FeatureAlgorithmDecorator::new(det, 0, 0).unwrap();

    assert_eq!(deco.descriptor_size(), 32);
    assert_eq!(deco.extra_size(), 8);
    assert_eq!(record_size(deco.descriptor_size(), deco.extra_size()), 48);
}

#[test]
fn inheritance_resolves_per_field() {
    // Only the descriptor inherits; the extra size is an explicit grow.
    let det = MockDetector::with_layout(32, 8);
    let deco = FeatureAlgorithmDecorator::new(det, 0, 16).unwrap();

    assert_eq!(deco.descriptor_size(), 32);
    assert_eq!(deco.extra_size(), 16);
    // The grow cascaded down to the decorated detector.
    assert_eq!(deco.decorated().extra_size(), 16);
}

#[test]
fn equal_sizes_are_a_valid_composition() {
    let det = MockDetector::with_layout(32, 8);
    let deco = FeatureAlgorithmDecorator::new(det, 32, 8).unwrap();

    assert_eq!(deco.descriptor_size(), 32);
    assert_eq!(deco.extra_size(), 8);
    assert!(deco.verify_layout().is_ok());
}

#[test]
fn growth_cascades_to_decorated() {
    let det = MockDetector::with_layout(16, 0);
    let deco = FeatureAlgorithmDecorator::new(det, 64, 8).unwrap();

    assert_eq!(deco.decorated().descriptor_size(), 64);
    assert_eq!(deco.decorated().extra_size(), 8);
}

// ===== Construction: rejections =====

#[test]
fn shrinking_the_descriptor_is_rejected() {
    let det = MockDetector::with_layout(32, 8);
    let err = FeatureAlgorithmDecorator::new(det, 16, 8).unwrap_err();

    assert!(matches!(
        err,
        FeatureError::InvalidComposition {
            field: "descriptor_size",
            requested: 16,
            current: 32,
        }
    ));
}

#[test]
fn shrinking_the_extra_size_is_rejected() {
    let det = MockDetector::with_layout(32, 16);
    let err = FeatureAlgorithmDecorator::new(det, 32, 4).unwrap_err();

    assert!(matches!(
        err,
        FeatureError::InvalidComposition {
            field: "extra_size",
            requested: 4,
            current: 16,
        }
    ));
}

#[test]
fn rejection_happens_before_any_mutation() {
    // extra_size = 4 would shrink the detector's 8, so the whole
    // construction fails and the otherwise-valid descriptor grow must not
    // have been applied either. The shared cell outlives the consumed Box
    // and lets us observe the detector's layout after the failure.
    let layout = Rc::new(Cell::new((32usize, 8usize)));
    let det = Box::new(SharedLayoutDetector { layout: Rc::clone(&layout) });

    let err = FeatureAlgorithmDecorator::new(det, 64, 4).unwrap_err();
    assert!(matches!(
        err,
        FeatureError::InvalidComposition { field: "extra_size", requested: 4, current: 8 }
    ));
    assert_eq!(layout.get(), (32, 8), "failed construction must not mutate");
}

#[test]
fn invalid_sizes_are_rejected() {
    let det = MockDetector::with_layout(0, 0);
    let err = FeatureAlgorithmDecorator::new(det, 34, 0).unwrap_err();
    assert!(matches!(
        err,
        FeatureError::InvalidSize { field: "descriptor_size", bytes: 34 }
    ));

    let det = MockDetector::with_layout(0, 0);
    let err = FeatureAlgorithmDecorator::new(det, MAX_DESCRIPTOR_SIZE + 64, 0).unwrap_err();
    assert!(matches!(err, FeatureError::InvalidSize { field: "descriptor_size", .. }));

    let det = MockDetector::with_layout(0, 0);
    let err = FeatureAlgorithmDecorator::new(det, 0, 6).unwrap_err();
    assert!(matches!(err, FeatureError::InvalidSize { field: "extra_size", bytes: 6 }));
}

// ===== Post-construction: setters and verification =====

#[test]
fn setter_cascade_is_synchronous() {
    let det = MockDetector::with_layout(0, 0);
    let mut deco = FeatureAlgorithmDecorator::new(det, 32, 0).unwrap();

    deco.set_extra_size(8);
    assert_eq!(deco.extra_size(), 8);
    assert_eq!(deco.decorated().extra_size(), 8);

    deco.set_descriptor_size(64);
    assert_eq!(deco.descriptor_size(), 64);
    assert_eq!(deco.decorated().descriptor_size(), 64);
    assert!(deco.verify_layout().is_ok());
}

#[test]
fn verify_layout_catches_out_of_band_tampering() {
    // `download` calls verify_layout() before delegating (decorator.rs),
    // so a failure here is exactly what keeps a mismatched download from
    // ever reaching the decorated algorithm. Exercising download itself
    // needs a live device; the GPU integration tests cover that path.
    let det = MockDetector::with_layout(0, 0);
    let mut deco = FeatureAlgorithmDecorator::new(det, 32, 8).unwrap();

    // Mutating the decorated stage directly bypasses the cascade and
    // desynchronizes the chain.
    deco.decorated_mut().set_descriptor_size(16);

    let err = deco.verify_layout().unwrap_err();
    assert!(matches!(
        err,
        FeatureError::LayoutMismatch {
            field: "descriptor_size",
            expected: 32,
            actual: 16,
        }
    ));
}

// ===== Nested chains =====

#[test]
fn nested_decorators_agree_on_one_layout() {
    let det = MockDetector::with_layout(0, 0);
    let inner = FeatureAlgorithmDecorator::new(det, 32, 0).unwrap();
    let outer = FeatureAlgorithmDecorator::new(Box::new(inner), 64, 8).unwrap();

    assert_eq!(outer.descriptor_size(), 64);
    assert_eq!(outer.extra_size(), 8);
    assert_eq!(outer.decorated().descriptor_size(), 64);
    assert_eq!(outer.decorated().extra_size(), 8);
    assert!(outer.verify_layout().is_ok());
}

#[test]
fn nested_decorator_cannot_shrink_the_chain() {
    let det = MockDetector::with_layout(0, 0);
    let inner = FeatureAlgorithmDecorator::new(det, 64, 8).unwrap();
    let err = FeatureAlgorithmDecorator::new(Box::new(inner), 32, 8).unwrap_err();

    assert!(matches!(
        err,
        FeatureError::InvalidComposition {
            field: "descriptor_size",
            requested: 32,
            current: 64,
        }
    ));
}

// ===== Layout convention =====

#[test]
fn record_sizes_stay_word_aligned() {
    for desc in (0..=MAX_DESCRIPTOR_SIZE).step_by(4) {
        for extra in (0..=32).step_by(4) {
            assert!(validate_sizes(desc, extra).is_ok());
            assert_eq!(record_size(desc, extra) % 4, 0);
        }
    }
    assert_eq!(record_size(0, 0), 8);
    assert_eq!(record_size(32, 8), 48);
}
