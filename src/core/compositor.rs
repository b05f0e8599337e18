//! Effect pixel math collaborator.
//!
//! The render pipeline owns the traversal (which inputs to evaluate, at what
//! frame) and hands the combination step to an [`EffectCompositor`].
//! [`CpuCompositor`] is the built-in software backend: simple per-pixel math
//! so the crate works and tests without an external implementation. Pixel
//! quality is not contractual, traversal correctness is.

use crate::entities::effects::EffectType;
use crate::entities::frame::ImageBuffer;

/// Combines rendered inputs into an effect's output. Pure function of its
/// arguments.
pub trait EffectCompositor {
    /// `input1`/`input2` are whatever the early-out policy required; absent
    /// required inputs have already been replaced by placeholders upstream.
    fn combine(
        &self,
        effect: EffectType,
        factor: f32,
        input1: Option<&ImageBuffer>,
        input2: Option<&ImageBuffer>,
        size: (usize, usize),
    ) -> ImageBuffer;
}

/// Software compositor. Works everywhere, no context required.
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuCompositor;

impl CpuCompositor {
    fn fit(buf: Option<&ImageBuffer>, size: (usize, usize)) -> ImageBuffer {
        match buf {
            Some(b) => b.scaled_to(size.0, size.1),
            None => ImageBuffer::missing_placeholder(size.0, size.1),
        }
    }

    fn per_pixel(
        a: &ImageBuffer,
        b: &ImageBuffer,
        size: (usize, usize),
        f: impl Fn([u8; 4], [u8; 4]) -> [u8; 4],
    ) -> ImageBuffer {
        let (w, h) = size;
        let mut out = vec![0u8; w * h * 4];
        for y in 0..h {
            for x in 0..w {
                let px = f(a.pixel(x, y), b.pixel(x, y));
                let i = (y * w + x) * 4;
                out[i..i + 4].copy_from_slice(&px);
            }
        }
        ImageBuffer::from_raw(w, h, out)
    }

    fn lerp(a: u8, b: u8, t: f32) -> u8 {
        (a as f32 + (b as f32 - a as f32) * t).round().clamp(0.0, 255.0) as u8
    }
}

impl EffectCompositor for CpuCompositor {
    fn combine(
        &self,
        effect: EffectType,
        factor: f32,
        input1: Option<&ImageBuffer>,
        input2: Option<&ImageBuffer>,
        size: (usize, usize),
    ) -> ImageBuffer {
        let t = factor.clamp(0.0, 1.0);
        match effect {
            EffectType::SolidColor { rgba } => ImageBuffer::solid(size.0, size.1, rgba),

            // Traversal-owned types: by the time combine() is called the
            // pipeline has already reduced them to a single input.
            EffectType::Speed | EffectType::Adjustment => Self::fit(input1, size),

            EffectType::Glow => {
                let a = Self::fit(input1, size);
                Self::per_pixel(&a, &a, size, |p, _| {
                    [
                        Self::lerp(p[0], 255, t * (p[0] as f32 / 255.0)),
                        Self::lerp(p[1], 255, t * (p[1] as f32 / 255.0)),
                        Self::lerp(p[2], 255, t * (p[2] as f32 / 255.0)),
                        p[3],
                    ]
                })
            }

            EffectType::Cross => {
                let a = Self::fit(input1, size);
                let b = Self::fit(input2, size);
                Self::per_pixel(&a, &b, size, |p, q| {
                    [
                        Self::lerp(p[0], q[0], t),
                        Self::lerp(p[1], q[1], t),
                        Self::lerp(p[2], q[2], t),
                        Self::lerp(p[3], q[3], t),
                    ]
                })
            }

            EffectType::GammaCross => {
                let a = Self::fit(input1, size);
                let b = Self::fit(input2, size);
                let g = |v: u8| (v as f32 / 255.0).powf(2.2);
                let inv = |v: f32| (v.max(0.0).powf(1.0 / 2.2) * 255.0).round().min(255.0) as u8;
                Self::per_pixel(&a, &b, size, |p, q| {
                    [
                        inv(g(p[0]) + (g(q[0]) - g(p[0])) * t),
                        inv(g(p[1]) + (g(q[1]) - g(p[1])) * t),
                        inv(g(p[2]) + (g(q[2]) - g(p[2])) * t),
                        Self::lerp(p[3], q[3], t),
                    ]
                })
            }

            EffectType::Add => {
                let a = Self::fit(input1, size);
                let b = Self::fit(input2, size);
                Self::per_pixel(&a, &b, size, |p, q| {
                    let add = |x: u8, y: u8| {
                        (x as f32 + y as f32 * t).min(255.0) as u8
                    };
                    [add(p[0], q[0]), add(p[1], q[1]), add(p[2], q[2]), p[3]]
                })
            }

            EffectType::Subtract => {
                let a = Self::fit(input1, size);
                let b = Self::fit(input2, size);
                Self::per_pixel(&a, &b, size, |p, q| {
                    let sub = |x: u8, y: u8| {
                        (x as f32 - y as f32 * t).max(0.0) as u8
                    };
                    [sub(p[0], q[0]), sub(p[1], q[1]), sub(p[2], q[2]), p[3]]
                })
            }

            EffectType::Multiply => {
                let a = Self::fit(input1, size);
                let b = Self::fit(input2, size);
                Self::per_pixel(&a, &b, size, |p, q| {
                    let mul = |x: u8, y: u8| {
                        let m = (x as f32 / 255.0) * (y as f32 / 255.0) * 255.0;
                        Self::lerp(x, m as u8, t)
                    };
                    [mul(p[0], q[0]), mul(p[1], q[1]), mul(p[2], q[2]), p[3]]
                })
            }

            EffectType::AlphaOver => {
                let a = Self::fit(input1, size);
                let b = Self::fit(input2, size);
                Self::per_pixel(&a, &b, size, |p, q| {
                    let alpha = (q[3] as f32 / 255.0) * t;
                    [
                        Self::lerp(p[0], q[0], alpha),
                        Self::lerp(p[1], q[1], alpha),
                        Self::lerp(p[2], q[2], alpha),
                        p[3].max((q[3] as f32 * t) as u8),
                    ]
                })
            }

            EffectType::Wipe => {
                let a = Self::fit(input1, size);
                let b = Self::fit(input2, size);
                let edge = (size.0 as f32 * t) as usize;
                let (w, h) = size;
                let mut out = vec![0u8; w * h * 4];
                for y in 0..h {
                    for x in 0..w {
                        let px = if x < edge { b.pixel(x, y) } else { a.pixel(x, y) };
                        let i = (y * w + x) * 4;
                        out[i..i + 4].copy_from_slice(&px);
                    }
                }
                ImageBuffer::from_raw(w, h, out)
            }
        }
    }
}
