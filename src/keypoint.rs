// keypoint.rs — host-side keypoint value type.
//
// This is what `download` ultimately produces: the decoded, structured form
// of one GPU-resident keypoint record. The encoded form lives in a
// 16-bit-per-channel texture; see encoding.rs for the byte layout and the
// pure conversion functions.

use crate::globals::{KPF_DISCARD, KPF_ORIENTED};

/// A detected keypoint, decoded to host memory.
///
/// Positions are sub-pixel (13.3 fixed point on the GPU, converted to f32
/// here). `rotation` is only meaningful when [`Keypoint::is_oriented`]
/// returns true. `extra` and `descriptor` carry the auxiliary and
/// descriptor bytes of the record, sized by the pipeline's negotiated
/// layout — empty vectors for a bare detector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Keypoint {
    /// Sub-pixel x coordinate, in pixels of the octave-0 image.
    pub x: f32,
    /// Sub-pixel y coordinate.
    pub y: f32,
    /// Detector response in [0, 1]. Higher = stronger.
    pub score: f32,
    /// Scale-space layer index (0 = original resolution, half-octave steps).
    pub octave: u8,
    /// Orientation in radians, in [-pi, pi). Valid only when oriented.
    pub rotation: f32,
    /// Flag bitmask (`KPF_*` constants in globals.rs).
    pub flags: u8,
    /// Auxiliary per-keypoint bytes (`extra_size` of the pipeline layout).
    pub extra: Vec<u8>,
    /// Descriptor bytes (`descriptor_size` of the pipeline layout).
    pub descriptor: Vec<u8>,
}

impl Keypoint {
    /// Scale of the pyramid layer this keypoint was detected at.
    /// Octaves advance in half-octave steps, so scale = sqrt(2)^octave.
    pub fn scale(&self) -> f32 {
        std::f32::consts::SQRT_2.powi(self.octave as i32)
    }

    /// Whether the rotation byte of this keypoint is valid.
    pub fn is_oriented(&self) -> bool {
        self.flags & KPF_ORIENTED != 0
    }

    /// Whether this keypoint is soft-deleted and due to be dropped.
    pub fn is_discarded(&self) -> bool {
        self.flags & KPF_DISCARD != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals::KPF_NONE;

    #[test]
    fn test_scale_per_octave() {
        let kp = Keypoint { octave: 0, ..Default::default() };
        assert_eq!(kp.scale(), 1.0);

        let kp = Keypoint { octave: 2, ..Default::default() };
        assert!((kp.scale() - 2.0).abs() < 1e-6);

        let kp = Keypoint { octave: 4, ..Default::default() };
        assert!((kp.scale() - 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_flag_queries() {
        let kp = Keypoint { flags: KPF_NONE, ..Default::default() };
        assert!(!kp.is_oriented());
        assert!(!kp.is_discarded());

        let kp = Keypoint { flags: KPF_ORIENTED | KPF_DISCARD, ..Default::default() };
        assert!(kp.is_oriented());
        assert!(kp.is_discarded());
    }
}
