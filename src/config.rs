//! Engine-wide tunable constants.
//!
//! Hosts can override most of these at runtime (cache budget, thumbnail
//! geometry); the constants are the defaults a fresh [`Editing`](crate::Editing)
//! starts with.

// === Timeline ===
/// Highest usable channel index. Channel 0 is reserved, so valid strip
/// channels are 1..=MAX_CHANNELS.
pub const MAX_CHANNELS: i32 = 128;

// === Frame cache ===
/// Default frame-cache byte budget (512 MiB).
pub const DEFAULT_CACHE_BYTES: usize = 512 * 1024 * 1024;

// === Render ===
/// Fallback render size when the host does not specify one.
pub const DEFAULT_DIM: (usize, usize) = (1920, 1080);

// === Thumbnails ===
/// Longest side of a generated thumbnail, in pixels.
pub const THUMB_MAX_DIM: usize = 256;
/// Timeline frames per thumbnail bucket; one thumbnail represents this
/// many consecutive frames of a strip.
pub const THUMB_FRAME_STEP: i64 = 25;
/// Entry cap for the thumbnail cache (thumbnails are small; count-bounded
/// rather than byte-bounded).
pub const THUMB_CACHE_ENTRIES: usize = 1024;

// === Proxies ===
/// JPEG quality for generated proxy frames.
pub const DEFAULT_PROXY_QUALITY: u8 = 85;
