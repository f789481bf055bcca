// globals.rs — process-wide encoding constants.
//
// Every feature algorithm and decorator in this crate agrees on record
// layout and coordinate range through these constants alone — there is no
// runtime negotiation. They are read-only for the lifetime of the process.
//
// The keypoint encoding packs sub-pixel coordinates into 16-bit texture
// channels as 13.3 fixed point: 3 fractional bits, 13 integer bits, with
// two codepoints (0xFFFE, 0xFFFF) reserved as stream sentinels. That is
// where the slightly odd MAX_TEXTURE_LENGTH = 2^13 - 2 comes from.

// ---------------------------------------------------------------------------
// Image pyramids & scale-space
// ---------------------------------------------------------------------------

/// Maximum number of pyramid layers, not counting intra-layers
/// (scaling factor 1 between consecutive layers).
pub const PYRAMID_MAX_LEVELS: usize = 7;

/// Maximum number of pyramid layers counting half-octave intra-layers
/// (scaling factor sqrt(2)).
pub const PYRAMID_MAX_OCTAVES: usize = 2 * PYRAMID_MAX_LEVELS - 1;

/// Maximum supported scale for a pyramid layer.
pub const PYRAMID_MAX_SCALE: f32 = 2.0;

// ---------------------------------------------------------------------------
// Fixed-point math
// ---------------------------------------------------------------------------

/// Fractional bits used when storing coordinates in a 16-bit channel.
/// `MAX_TEXTURE_LENGTH` depends on this.
pub const FIX_BITS: u32 = 3;

/// Fixed-point resolution: one pixel = `FIX_RESOLUTION` encoded steps.
pub const FIX_RESOLUTION: f32 = (1u32 << FIX_BITS) as f32;

// ---------------------------------------------------------------------------
// Texture limits
// ---------------------------------------------------------------------------

/// Largest representable pixel coordinate. A 16-bit channel holds an
/// integer-plus-fraction coordinate; `FIX_BITS` are reserved for the
/// fraction and 2 codepoints for the stream sentinels below, which leaves
/// `2^13 - 2 = 8190`.
pub const MAX_TEXTURE_LENGTH: u32 = (1u32 << (16 - FIX_BITS)) - 2;

/// Sentinel in the x channel of a record header: end of the keypoint list.
pub const KPX_END_OF_LIST: u16 = 0xFFFF;

/// Sentinel in the x channel of a record header: vacant slot, skip one
/// record and keep scanning.
pub const KPX_VACANT: u16 = 0xFFFE;

// ---------------------------------------------------------------------------
// Keypoints
// ---------------------------------------------------------------------------

/// Maximum descriptor size in bytes. Must be divisible by 4.
pub const MAX_DESCRIPTOR_SIZE: usize = 64;

/// Size of a keypoint header in bytes: x_fix:u16 | y_fix:u16 | octave:u8 |
/// rotation:u8 | score:u8 | flags:u8. Must be divisible by 4.
pub const MIN_KEYPOINT_SIZE: usize = 8;

/// Flag: no special flags.
pub const KPF_NONE: u8 = 0x00;

/// Flag: the keypoint carries a valid orientation (rotation byte is valid).
pub const KPF_ORIENTED: u8 = 0x01;

/// Flag: soft-delete marker — the keypoint must be dropped before or
/// during the next processing frame.
pub const KPF_DISCARD: u8 = 0x80;

// ---------------------------------------------------------------------------
// Download flags
// ---------------------------------------------------------------------------

/// Download flag: default behavior (discarded keypoints are dropped).
pub const DOWNLOAD_NONE: u8 = 0x00;

/// Download flag: keep `KPF_DISCARD`-flagged keypoints in the decoded
/// output instead of dropping them. Used by cleanup stages that need to
/// see what they are about to discard.
pub const DOWNLOAD_INCLUDE_DISCARDED: u8 = 0x01;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
