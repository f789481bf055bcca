// encoding.rs — the fixed-point keypoint record protocol.
//
// BYTE LAYOUT (bit-exact, shared with the WGSL kernels)
// ──────────────────────────────────────────────────────
//   record = header(8) ++ extra(extra_size) ++ descriptor(descriptor_size)
//   header = x_fix:u16le | y_fix:u16le | octave:u8 | rotation:u8
//          | score:u8    | flags:u8
//
// Coordinates are 13.3 fixed point: 13 integer bits (pixel), 3 fractional
// bits (eighths of a pixel). The x channel doubles as the stream control
// channel: 0xFFFF terminates the list, 0xFFFE marks a vacant slot that is
// skipped. Both codepoints sit above the largest encodable coordinate
// (8190 + 7/8 → 65527), so real keypoints can never collide with them.
//
// The total record size is always a multiple of 4 — records are 32-bit
// word aligned, which is what lets the GPU encoder write them into an
// array<u32> storage buffer with each word owned by exactly one record.
//
// Everything in this module is pure: byte slices in, keypoints out, no
// GPU. The readback path in gpu/encoded.rs funnels into decode_stream();
// tests and benches drive it directly.

use crate::globals::{
    DOWNLOAD_INCLUDE_DISCARDED, FIX_RESOLUTION, KPF_DISCARD, KPX_END_OF_LIST, KPX_VACANT,
    MAX_TEXTURE_LENGTH, MIN_KEYPOINT_SIZE,
};
use crate::algorithm::FeatureError;
use crate::keypoint::Keypoint;

// ---------------------------------------------------------------------------
// Fixed-point conversion
// ---------------------------------------------------------------------------

/// Convert a pixel coordinate to 13.3 fixed point, clamped to the
/// representable range `[0, MAX_TEXTURE_LENGTH]`.
pub fn to_fixed(v: f32) -> u16 {
    let clamped = v.clamp(0.0, MAX_TEXTURE_LENGTH as f32);
    (clamped * FIX_RESOLUTION).round() as u16
}

/// Convert a 13.3 fixed-point coordinate back to pixels.
pub fn from_fixed(fix: u16) -> f32 {
    fix as f32 / FIX_RESOLUTION
}

/// Quantize an angle in radians to the 256-step rotation byte over
/// [-pi, pi).
pub fn rotation_to_byte(radians: f32) -> u8 {
    use std::f32::consts::PI;
    // Wrap into [-pi, pi) first so out-of-range inputs stay meaningful.
    let wrapped = (radians + PI).rem_euclid(2.0 * PI) - PI;
    let step = (wrapped + PI) / (2.0 * PI) * 256.0;
    (step.round() as u32 % 256) as u8
}

/// Dequantize a rotation byte back to radians in [-pi, pi).
pub fn rotation_from_byte(byte: u8) -> f32 {
    use std::f32::consts::PI;
    byte as f32 / 256.0 * (2.0 * PI) - PI
}

/// Quantize a detector response in [0, 1] to the score byte.
pub fn score_to_byte(score: f32) -> u8 {
    (score.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Dequantize a score byte back to [0, 1].
pub fn score_from_byte(byte: u8) -> f32 {
    byte as f32 / 255.0
}

// ---------------------------------------------------------------------------
// Record layout
// ---------------------------------------------------------------------------

/// Total byte size of one encoded record for the given layout.
/// Always a multiple of 4 when the sizes obey the process-wide convention.
pub fn record_size(descriptor_size: usize, extra_size: usize) -> usize {
    MIN_KEYPOINT_SIZE + extra_size + descriptor_size
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode a packed keypoint byte stream into host-side keypoints.
///
/// Scans records of `record_size(descriptor_size, extra_size)` bytes until
/// the end-of-list sentinel or the end of the buffer. Vacant slots are
/// skipped. `KPF_DISCARD`-flagged records are dropped unless `flags`
/// contains `DOWNLOAD_INCLUDE_DISCARDED`.
///
/// Fails with [`FeatureError::TruncatedStream`] if the buffer ends inside
/// a record that has already started.
pub fn decode_stream(
    bytes: &[u8],
    descriptor_size: usize,
    extra_size: usize,
    flags: u8,
) -> Result<Vec<Keypoint>, FeatureError> {
    let rs = record_size(descriptor_size, extra_size);
    let mut keypoints = Vec::new();
    let mut off = 0;

    while off + 2 <= bytes.len() {
        let x_fix = u16::from_le_bytes([bytes[off], bytes[off + 1]]);
        if x_fix == KPX_END_OF_LIST {
            break;
        }
        if off + rs > bytes.len() {
            return Err(FeatureError::TruncatedStream {
                offset: off,
                needed: rs,
                available: bytes.len() - off,
            });
        }
        if x_fix == KPX_VACANT {
            off += rs;
            continue;
        }

        let y_fix = u16::from_le_bytes([bytes[off + 2], bytes[off + 3]]);
        let octave = bytes[off + 4];
        let rotation = bytes[off + 5];
        let score = bytes[off + 6];
        let kp_flags = bytes[off + 7];

        if kp_flags & KPF_DISCARD != 0 && flags & DOWNLOAD_INCLUDE_DISCARDED == 0 {
            off += rs;
            continue;
        }

        let extra_start = off + MIN_KEYPOINT_SIZE;
        let desc_start = extra_start + extra_size;
        keypoints.push(Keypoint {
            x: from_fixed(x_fix),
            y: from_fixed(y_fix),
            score: score_from_byte(score),
            octave,
            rotation: rotation_from_byte(rotation),
            flags: kp_flags,
            extra: bytes[extra_start..desc_start].to_vec(),
            descriptor: bytes[desc_start..off + rs].to_vec(),
        });
        off += rs;
    }

    Ok(keypoints)
}

// ---------------------------------------------------------------------------
// Encoding (host side)
// ---------------------------------------------------------------------------

/// Encode keypoints into a packed byte stream with the given layout,
/// terminated by one end-of-list record (all 0xFF bytes).
///
/// `extra`/`descriptor` buffers shorter than the declared sizes are
/// zero-padded; longer ones are truncated. This is the host-side twin of
/// the GPU encode kernel — used by tests, benches, and synthetic
/// pipelines that inject keypoint sets without running a detector.
pub fn encode_stream(keypoints: &[Keypoint], descriptor_size: usize, extra_size: usize) -> Vec<u8> {
    let rs = record_size(descriptor_size, extra_size);
    let mut bytes = Vec::with_capacity((keypoints.len() + 1) * rs);

    for kp in keypoints {
        bytes.extend_from_slice(&to_fixed(kp.x).to_le_bytes());
        bytes.extend_from_slice(&to_fixed(kp.y).to_le_bytes());
        bytes.push(kp.octave);
        bytes.push(rotation_to_byte(kp.rotation));
        bytes.push(score_to_byte(kp.score));
        bytes.push(kp.flags);
        push_sized(&mut bytes, &kp.extra, extra_size);
        push_sized(&mut bytes, &kp.descriptor, descriptor_size);
    }

    // Terminator record: x channel reads as KPX_END_OF_LIST.
    bytes.extend(std::iter::repeat(0xFF).take(rs));
    bytes
}

/// Append `data` truncated/zero-padded to exactly `size` bytes.
fn push_sized(bytes: &mut Vec<u8>, data: &[u8], size: usize) {
    let n = data.len().min(size);
    bytes.extend_from_slice(&data[..n]);
    bytes.extend(std::iter::repeat(0u8).take(size - n));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::globals::{DOWNLOAD_NONE, KPF_NONE, KPF_ORIENTED};

    #[test]
    fn test_fixed_point_round_trip() {
        // Eighth-of-a-pixel positions survive the round trip exactly.
        for v in [0.0f32, 0.125, 1.0, 7.875, 100.5, 8190.0] {
            assert_eq!(from_fixed(to_fixed(v)), v, "round trip of {v}");
        }
    }

    #[test]
    fn test_fixed_point_clamps_to_domain() {
        assert_eq!(to_fixed(-5.0), 0);
        assert_eq!(to_fixed(99999.0), to_fixed(8190.0));
        // The clamped maximum stays below both sentinels.
        assert!(to_fixed(99999.0) < KPX_VACANT);
    }

    #[test]
    fn test_fixed_point_rounds_to_nearest_eighth() {
        // 0.06 px is closer to 0/8 than to 1/8.
        assert_eq!(to_fixed(0.06), 0);
        // 0.07 px rounds up to 1/8.
        assert_eq!(to_fixed(0.07), 1);
        assert_eq!(from_fixed(to_fixed(3.14)), 3.125);
    }

    #[test]
    fn test_rotation_byte_round_trip() {
        use std::f32::consts::PI;
        for b in [0u8, 1, 64, 128, 192, 255] {
            let r = rotation_from_byte(b);
            assert!((-PI..PI).contains(&r));
            assert_eq!(rotation_to_byte(r), b);
        }
    }

    #[test]
    fn test_record_size() {
        assert_eq!(record_size(0, 0), 8);
        // The canonical layout: 32-byte descriptor + 8 extra bytes.
        assert_eq!(record_size(32, 8), 48);
        assert_eq!(record_size(32, 8) % 4, 0);
    }

    fn sample_keypoints() -> Vec<Keypoint> {
        vec![
            Keypoint {
                x: 10.5,
                y: 20.125,
                score: score_from_byte(200),
                octave: 0,
                rotation: rotation_from_byte(0),
                flags: KPF_NONE,
                extra: vec![1, 2, 3, 4, 5, 6, 7, 8],
                descriptor: (0u8..32).collect(),
            },
            Keypoint {
                x: 8190.0,
                y: 0.0,
                score: score_from_byte(255),
                octave: 3,
                rotation: rotation_from_byte(64),
                flags: KPF_ORIENTED,
                extra: vec![9, 9, 9, 9, 0, 0, 0, 0],
                descriptor: vec![0xAB; 32],
            },
        ]
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let kps = sample_keypoints();
        let stream = encode_stream(&kps, 32, 8);
        // Two records plus the terminator.
        assert_eq!(stream.len(), 3 * 48);

        let decoded = decode_stream(&stream, 32, 8, DOWNLOAD_NONE).unwrap();
        assert_eq!(decoded, kps);
    }

    #[test]
    fn test_decode_stops_at_end_of_list() {
        let kps = sample_keypoints();
        let mut stream = encode_stream(&kps, 32, 8);
        // Garbage after the terminator must be ignored.
        stream.extend_from_slice(&[0x42; 96]);
        let decoded = decode_stream(&stream, 32, 8, DOWNLOAD_NONE).unwrap();
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn test_decode_skips_vacant_slots() {
        let kps = sample_keypoints();
        let mut stream = encode_stream(&kps, 32, 8);
        // Turn the first record into a vacant slot.
        stream[0..2].copy_from_slice(&KPX_VACANT.to_le_bytes());
        let decoded = decode_stream(&stream, 32, 8, DOWNLOAD_NONE).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].x, 8190.0);
    }

    #[test]
    fn test_decode_drops_discarded_by_default() {
        let mut kps = sample_keypoints();
        kps[0].flags |= KPF_DISCARD;
        let stream = encode_stream(&kps, 32, 8);

        let decoded = decode_stream(&stream, 32, 8, DOWNLOAD_NONE).unwrap();
        assert_eq!(decoded.len(), 1);
        assert!(!decoded[0].is_discarded());

        let all = decode_stream(&stream, 32, 8, DOWNLOAD_INCLUDE_DISCARDED).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].is_discarded());
    }

    #[test]
    fn test_decode_without_terminator_reads_to_buffer_end() {
        // A full-capacity stream may lack the terminator record.
        let kps = sample_keypoints();
        let stream = encode_stream(&kps, 32, 8);
        let decoded = decode_stream(&stream[..2 * 48], 32, 8, DOWNLOAD_NONE).unwrap();
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn test_decode_truncated_record_fails() {
        let kps = sample_keypoints();
        let stream = encode_stream(&kps, 32, 8);
        // Cut inside the second record.
        let err = decode_stream(&stream[..48 + 20], 32, 8, DOWNLOAD_NONE).unwrap_err();
        assert!(matches!(
            err,
            FeatureError::TruncatedStream { offset: 48, needed: 48, available: 20 }
        ));
    }

    #[test]
    fn test_encode_pads_and_truncates_payloads() {
        let kp = Keypoint {
            x: 1.0,
            y: 1.0,
            extra: vec![7, 7],            // shorter than extra_size = 4
            descriptor: vec![1; 100],     // longer than descriptor_size = 8
            ..Default::default()
        };
        let stream = encode_stream(&[kp], 8, 4);
        let decoded = decode_stream(&stream, 8, 4, DOWNLOAD_NONE).unwrap();
        assert_eq!(decoded[0].extra, vec![7, 7, 0, 0]);
        assert_eq!(decoded[0].descriptor, vec![1; 8]);
    }

    #[test]
    fn test_zero_layout_header_only() {
        let kp = Keypoint { x: 5.0, y: 6.0, ..Default::default() };
        let stream = encode_stream(&[kp.clone()], 0, 0);
        assert_eq!(stream.len(), 16); // one record + terminator
        let decoded = decode_stream(&stream, 0, 0, DOWNLOAD_NONE).unwrap();
        assert_eq!(decoded.len(), 1);
        assert!(decoded[0].extra.is_empty());
        assert!(decoded[0].descriptor.is_empty());
        assert_eq!(decoded[0].x, 5.0);
        assert_eq!(decoded[0].y, 6.0);
    }
}
