//! Decoder collaborator boundary.
//!
//! The engine never reads media files itself; atomic strips get their pixels
//! from whatever implements [`Decoder`]. Implementations may keep their own
//! decode caches and are shared with the thumbnail and proxy workers via
//! `Arc`, so the trait requires `Send + Sync`.

use std::sync::Arc;

use crate::entities::frame::ImageBuffer;
use crate::entities::strip::Strip;

/// Supplies decoded pixels for atomic strips.
///
/// `frame` is in the strip's timeline-level coordinates; `size` is the
/// requested output resolution (implementations may decode natively and
/// scale, or decode a matching proxy). `None` means the backing media is
/// missing; the pipeline substitutes a placeholder and keeps going.
pub trait Decoder: Send + Sync {
    fn decode(&self, strip: &Strip, frame: i64, size: (usize, usize)) -> Option<ImageBuffer>;
}

impl<T: Decoder + ?Sized> Decoder for Arc<T> {
    fn decode(&self, strip: &Strip, frame: i64, size: (usize, usize)) -> Option<ImageBuffer> {
        (**self).decode(strip, frame, size)
    }
}
