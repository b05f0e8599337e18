//! Pixel buffer shared between the render pipeline and the caches.
//!
//! Buffers are RGBA8 and immutable once produced: clones share the pixel
//! allocation, so cache handoffs and redundant cache writes are cheap and
//! race-free. Missing media is a buffer like any other, just flagged and
//! filled with a recognizable pattern.

use std::sync::Arc;

use rayon::prelude::*;

/// Checker cell size of the missing-media pattern, in pixels.
const MISSING_CHECKER: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageBuffer {
    width: usize,
    height: usize,
    /// Row-major RGBA8, `width * height * 4` bytes.
    data: Arc<Vec<u8>>,
    missing: bool,
}

impl ImageBuffer {
    /// Wrap an existing RGBA8 buffer. `data.len()` must equal `w * h * 4`.
    pub fn from_raw(width: usize, height: usize, data: Vec<u8>) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        debug_assert_eq!(data.len(), width * height * 4);
        let mut data = data;
        data.resize(width * height * 4, 0);
        Self {
            width,
            height,
            data: Arc::new(data),
            missing: false,
        }
    }

    /// Uniform fill.
    pub fn solid(width: usize, height: usize, rgba: [u8; 4]) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let mut data = Vec::with_capacity(width * height * 4);
        for _ in 0..width * height {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            data: Arc::new(data),
            missing: false,
        }
    }

    /// Fully transparent buffer ("nothing visible here").
    pub fn transparent(width: usize, height: usize) -> Self {
        Self::solid(width, height, [0, 0, 0, 0])
    }

    /// The stand-in rendered for absent media: a magenta/grey checker.
    /// Flagged so callers can tell it apart from real content.
    pub fn missing_placeholder(width: usize, height: usize) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let mut data = vec![0u8; width * height * 4];
        for y in 0..height {
            for x in 0..width {
                let cell = (x / MISSING_CHECKER + y / MISSING_CHECKER) % 2;
                let rgba: [u8; 4] = if cell == 0 {
                    [255, 0, 255, 255]
                } else {
                    [40, 40, 40, 255]
                };
                let i = (y * width + x) * 4;
                data[i..i + 4].copy_from_slice(&rgba);
            }
        }
        Self {
            width,
            height,
            data: Arc::new(data),
            missing: true,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn is_missing(&self) -> bool {
        self.missing
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Pixel bytes held by this buffer, for cache accounting.
    pub fn mem(&self) -> usize {
        self.data.len()
    }

    pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        let i = (y.min(self.height - 1) * self.width + x.min(self.width - 1)) * 4;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    /// Nearest-neighbor resample. Rows run in parallel; good enough for
    /// proxies and thumbnails where decode dominates anyway.
    pub fn scaled_to(&self, width: usize, height: usize) -> ImageBuffer {
        let width = width.max(1);
        let height = height.max(1);
        if (width, height) == (self.width, self.height) {
            return self.clone();
        }
        let mut out = vec![0u8; width * height * 4];
        out.par_chunks_mut(width * 4)
            .enumerate()
            .for_each(|(y, row)| {
                let sy = (y * self.height) / height;
                for x in 0..width {
                    let sx = (x * self.width) / width;
                    let s = (sy * self.width + sx) * 4;
                    row[x * 4..x * 4 + 4].copy_from_slice(&self.data[s..s + 4]);
                }
            });
        ImageBuffer {
            width,
            height,
            data: Arc::new(out),
            missing: self.missing,
        }
    }

    /// Downscale so the longest side is `max_dim`, keeping aspect.
    /// Buffers already small enough are returned as-is.
    pub fn thumbnail(&self, max_dim: usize) -> ImageBuffer {
        let long = self.width.max(self.height);
        if long <= max_dim {
            return self.clone();
        }
        let w = (self.width * max_dim) / long;
        let h = (self.height * max_dim) / long;
        self.scaled_to(w, h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_fill_and_accounting() {
        let buf = ImageBuffer::solid(8, 4, [10, 20, 30, 255]);
        assert_eq!(buf.dim(), (8, 4));
        assert_eq!(buf.mem(), 8 * 4 * 4);
        assert_eq!(buf.pixel(3, 2), [10, 20, 30, 255]);
        assert!(!buf.is_missing());
    }

    #[test]
    fn missing_placeholder_is_flagged_and_patterned() {
        let buf = ImageBuffer::missing_placeholder(64, 64);
        assert!(buf.is_missing());
        // First cell magenta, adjacent cell grey.
        assert_eq!(buf.pixel(0, 0), [255, 0, 255, 255]);
        assert_eq!(buf.pixel(MISSING_CHECKER, 0), [40, 40, 40, 255]);
        // Deterministic: two placeholders are byte-identical.
        assert_eq!(buf, ImageBuffer::missing_placeholder(64, 64));
    }

    #[test]
    fn clone_shares_pixels() {
        let a = ImageBuffer::solid(16, 16, [1, 2, 3, 4]);
        let b = a.clone();
        assert!(Arc::ptr_eq(&a.data, &b.data));
    }

    #[test]
    fn scaled_to_nearest_neighbor() {
        // Left half red, right half blue.
        let mut data = Vec::new();
        for _y in 0..2 {
            for x in 0..8 {
                if x < 4 {
                    data.extend_from_slice(&[255, 0, 0, 255]);
                } else {
                    data.extend_from_slice(&[0, 0, 255, 255]);
                }
            }
        }
        let buf = ImageBuffer::from_raw(8, 2, data);
        let half = buf.scaled_to(4, 1);
        assert_eq!(half.dim(), (4, 1));
        assert_eq!(half.pixel(0, 0), [255, 0, 0, 255]);
        assert_eq!(half.pixel(3, 0), [0, 0, 255, 255]);
    }

    #[test]
    fn scaled_to_same_size_is_shared() {
        let buf = ImageBuffer::solid(10, 10, [9, 9, 9, 255]);
        let same = buf.scaled_to(10, 10);
        assert!(Arc::ptr_eq(&buf.data, &same.data));
    }

    #[test]
    fn thumbnail_keeps_aspect() {
        let buf = ImageBuffer::solid(1920, 1080, [0, 0, 0, 255]);
        let th = buf.thumbnail(256);
        assert_eq!(th.width(), 256);
        assert_eq!(th.height(), 144);
        let small = ImageBuffer::solid(100, 50, [0, 0, 0, 255]);
        assert_eq!(small.thumbnail(256).dim(), (100, 50));
    }

    #[test]
    fn scaling_preserves_missing_flag() {
        let buf = ImageBuffer::missing_placeholder(64, 64);
        assert!(buf.scaled_to(32, 32).is_missing());
    }
}
