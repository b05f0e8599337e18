//! Recursive frame evaluation.
//!
//! `render_frame` composites one frame of the active timeline level: pick the
//! topmost visible strip at the requested frame, evaluate it (recursing into
//! meta timelines and effect inputs), and cache every intermediate under its
//! own key so partial invalidation keeps upstream work. Missing media never
//! fails a render; the pipeline substitutes a placeholder and keeps going.
//!
//! The traversal runs on the caller's thread. Re-entry into a strip already
//! being evaluated (possible through adjustment walks over a graph an older
//! file smuggled a cycle into) is cut with a placeholder rather than
//! recursing forever.

use std::collections::HashSet;

use log::{debug, warn};

use crate::entities::editing::Editing;
use crate::entities::effects::{EarlyOut, EffectType};
use crate::entities::frame::ImageBuffer;
use crate::entities::strip::{Strip, StripId, StripKind, StripOps};

use super::compositor::EffectCompositor;
use super::decode::Decoder;
use super::frame_cache::{CacheLayer, CacheScope, FrameKey};

/// Everything one render request needs besides the timeline itself.
pub struct RenderContext<'a> {
    pub decoder: &'a dyn Decoder,
    pub effects: &'a dyn EffectCompositor,
    /// Output resolution; every returned buffer matches it.
    pub size: (usize, usize),
    /// 0 picks the topmost visible strip; >0 restricts the pick to that
    /// channel at the rendered level.
    pub channel_filter: i32,
}

/// Per-request traversal state.
struct RenderState {
    in_flight: HashSet<StripId>,
}

impl Editing {
    /// Composite one frame of the currently active level.
    pub fn render_frame(&self, frame: i64, ctx: &RenderContext) -> ImageBuffer {
        let owner = self.active_owner();
        let final_key = FrameKey {
            scope: CacheScope::Level(owner),
            frame,
            size: ctx.size,
            channel_filter: ctx.channel_filter,
            layer: CacheLayer::Final,
        };
        if let Some(hit) = self.frame_cache().get(&final_key) {
            return hit;
        }

        let mut state = RenderState {
            in_flight: HashSet::new(),
        };
        let out = self.composite_level(owner, frame, ctx.channel_filter, ctx, &mut state);
        self.frame_cache().put(final_key, out.clone());
        out
    }

    /// Topmost eligible strip of one level, or nothing to show.
    fn composite_level(
        &self,
        owner: Option<StripId>,
        frame: i64,
        filter: i32,
        ctx: &RenderContext,
        state: &mut RenderState,
    ) -> ImageBuffer {
        match self.topmost_at(owner, frame, None, filter) {
            Some(id) => self.evaluate_strip(id, frame, ctx, state),
            None => ImageBuffer::transparent(ctx.size.0, ctx.size.1),
        }
    }

    /// The strip that wins a level at `frame`: visual, unmuted (strip and
    /// channel), spanning the frame, highest channel. `below` restricts the
    /// pick to channels strictly under it (adjustment walks).
    fn topmost_at(
        &self,
        owner: Option<StripId>,
        frame: i64,
        below: Option<i32>,
        filter: i32,
    ) -> Option<StripId> {
        let channels = self.level_channels(owner);
        let mut best: Option<(i32, StripId)> = None;
        for id in self.level_seqbase(owner) {
            let Some(strip) = self.arena().get(&id) else {
                continue;
            };
            if !strip.kind().is_visual() || strip.muted() || !strip.contains_frame(frame) {
                continue;
            }
            let ch = strip.channel();
            if channels.is_muted(ch) {
                continue;
            }
            if filter > 0 && ch != filter {
                continue;
            }
            if below.is_some_and(|limit| ch >= limit) {
                continue;
            }
            if best.is_none_or(|(b, _)| ch >= b) {
                best = Some((ch, id));
            }
        }
        best.map(|(_, id)| id)
    }

    /// One strip's output at `frame` (level-local coordinates of the level
    /// that contains the strip).
    fn evaluate_strip(
        &self,
        id: StripId,
        frame: i64,
        ctx: &RenderContext,
        state: &mut RenderState,
    ) -> ImageBuffer {
        let Some(strip) = self.arena().get(&id) else {
            return ImageBuffer::missing_placeholder(ctx.size.0, ctx.size.1);
        };
        if !state.in_flight.insert(id) {
            warn!("evaluation re-entered strip '{}', cutting recursion", strip.name());
            return ImageBuffer::missing_placeholder(ctx.size.0, ctx.size.1);
        }

        let key = FrameKey {
            scope: CacheScope::Strip(id),
            frame,
            size: ctx.size,
            channel_filter: ctx.channel_filter,
            layer: CacheLayer::Composited,
        };
        let out = match self.frame_cache().get(&key) {
            Some(hit) => hit,
            None => {
                let computed = match strip.kind() {
                    StripKind::Meta(_) => self.evaluate_meta(strip, frame, ctx, state),
                    StripKind::Effect(_) => self.evaluate_effect(strip, frame, ctx, state),
                    StripKind::Color(c) => ImageBuffer::solid(ctx.size.0, ctx.size.1, c.rgba),
                    _ => self.evaluate_atomic(strip, frame, ctx),
                };
                self.frame_cache().put(key, computed.clone());
                computed
            }
        };

        state.in_flight.remove(&id);
        out
    }

    /// Decode an atomic strip through the collaborator, with the raw and
    /// fitted results cached separately.
    fn evaluate_atomic(&self, strip: &Strip, frame: i64, ctx: &RenderContext) -> ImageBuffer {
        if !strip.kind().is_visual() {
            return ImageBuffer::transparent(ctx.size.0, ctx.size.1);
        }
        if self.presence().is_missing(strip) {
            debug!("media missing for '{}', using placeholder", strip.name());
            return ImageBuffer::missing_placeholder(ctx.size.0, ctx.size.1);
        }

        let raw_key = FrameKey {
            scope: CacheScope::Strip(strip.id()),
            frame,
            size: ctx.size,
            channel_filter: ctx.channel_filter,
            layer: CacheLayer::Raw,
        };
        let raw = match self.frame_cache().get(&raw_key) {
            Some(hit) => hit,
            None => match ctx.decoder.decode(strip, frame, ctx.size) {
                Some(buf) => {
                    self.frame_cache().put(raw_key, buf.clone());
                    buf
                }
                None => return ImageBuffer::missing_placeholder(ctx.size.0, ctx.size.1),
            },
        };

        if raw.dim() == ctx.size {
            return raw;
        }
        let pre_key = FrameKey {
            layer: CacheLayer::Preprocessed,
            ..raw_key
        };
        match self.frame_cache().get(&pre_key) {
            Some(hit) => hit,
            None => {
                let fitted = raw.scaled_to(ctx.size.0, ctx.size.1);
                self.frame_cache().put(pre_key, fitted.clone());
                fitted
            }
        }
    }

    /// A meta strip renders its nested timeline, with parent frames mapped
    /// to its local zero-based clock and clamped to its content.
    fn evaluate_meta(
        &self,
        strip: &Strip,
        frame: i64,
        ctx: &RenderContext,
        state: &mut RenderState,
    ) -> ImageBuffer {
        let local = (frame - strip.start()).clamp(0, strip.len().saturating_sub(1).max(0));
        self.composite_level(Some(strip.id()), local, 0, ctx, state)
    }

    fn evaluate_effect(
        &self,
        strip: &Strip,
        frame: i64,
        ctx: &RenderContext,
        state: &mut RenderState,
    ) -> ImageBuffer {
        let Some(effect) = strip.as_effect() else {
            return ImageBuffer::missing_placeholder(ctx.size.0, ctx.size.1);
        };
        let kind = effect.effect;
        let factor = effect.factor();

        if kind == EffectType::Adjustment {
            let under = self.evaluate_adjustment(strip, frame, ctx, state);
            return ctx
                .effects
                .combine(kind, factor, Some(&under), None, ctx.size);
        }

        let policy = kind.early_out(factor);
        let arity = kind.input_count();
        let need1 = arity >= 1 && !matches!(policy, EarlyOut::NoInputNeeded | EarlyOut::Input2Only);
        let need2 = arity >= 2 && !matches!(policy, EarlyOut::NoInputNeeded | EarlyOut::Input1Only);

        let input_frame_1 = if kind == EffectType::Speed {
            self.speed_remap(strip, frame, factor)
        } else {
            frame
        };

        let in1 = if need1 {
            Some(self.render_input(effect.input1(), input_frame_1, ctx, state))
        } else {
            None
        };
        let in2 = if need2 {
            Some(self.render_input(effect.input2(), frame, ctx, state))
        } else {
            None
        };

        match policy {
            EarlyOut::Input1Only if arity == 2 => in1
                .unwrap_or_else(|| ImageBuffer::missing_placeholder(ctx.size.0, ctx.size.1)),
            EarlyOut::Input2Only => in2
                .unwrap_or_else(|| ImageBuffer::missing_placeholder(ctx.size.0, ctx.size.1)),
            _ => ctx
                .effects
                .combine(kind, factor, in1.as_ref(), in2.as_ref(), ctx.size),
        }
    }

    fn render_input(
        &self,
        input: Option<StripId>,
        frame: i64,
        ctx: &RenderContext,
        state: &mut RenderState,
    ) -> ImageBuffer {
        match input {
            Some(id) => self.evaluate_strip(id, frame, ctx, state),
            None => ImageBuffer::missing_placeholder(ctx.size.0, ctx.size.1),
        }
    }

    /// Speed plays its input with the clock scaled around the effect's own
    /// left handle.
    fn speed_remap(&self, strip: &Strip, frame: i64, factor: f32) -> i64 {
        let origin = strip.left_handle();
        origin + ((frame - origin) as f32 * factor).floor() as i64
    }

    /// Adjustment shows whatever sits on lower channels: first the channels
    /// strictly below it at its own level, and when that is empty, below the
    /// containing meta at the parent level, repeating up to the root. Frames
    /// are not remapped on the way up.
    fn evaluate_adjustment(
        &self,
        strip: &Strip,
        frame: i64,
        ctx: &RenderContext,
        state: &mut RenderState,
    ) -> ImageBuffer {
        let mut owner = self.owner_meta_of(strip.id());
        let mut limit = strip.channel();
        loop {
            if let Some(target) = self.topmost_at(owner, frame, Some(limit), 0) {
                return self.evaluate_strip(target, frame, ctx, state);
            }
            match owner {
                Some(meta_id) => {
                    let Some(meta) = self.arena().get(&meta_id) else {
                        return ImageBuffer::transparent(ctx.size.0, ctx.size.1);
                    };
                    limit = meta.channel();
                    owner = self.owner_meta_of(meta_id);
                }
                None => return ImageBuffer::transparent(ctx.size.0, ctx.size.1),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use tempfile::NamedTempFile;

    use crate::core::compositor::CpuCompositor;

    use super::*;

    /// Decoder stub: solid color per strip name, every call recorded.
    #[derive(Default)]
    struct ScriptedDecoder {
        colors: HashMap<String, [u8; 4]>,
        calls: Mutex<Vec<(String, i64)>>,
    }

    impl ScriptedDecoder {
        fn with(colors: &[(&str, [u8; 4])]) -> Self {
            Self {
                colors: colors
                    .iter()
                    .map(|(n, c)| (n.to_string(), *c))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls_for(&self, name: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(n, _)| n == name)
                .count()
        }

        fn frames_for(&self, name: &str) -> Vec<i64> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(n, _)| n == name)
                .map(|(_, f)| *f)
                .collect()
        }
    }

    impl Decoder for ScriptedDecoder {
        fn decode(&self, strip: &Strip, frame: i64, size: (usize, usize)) -> Option<ImageBuffer> {
            self.calls
                .lock()
                .unwrap()
                .push((strip.name().to_string(), frame));
            let rgba = self.colors.get(strip.name()).copied()?;
            Some(ImageBuffer::solid(size.0, size.1, rgba))
        }
    }

    fn ctx<'a>(decoder: &'a ScriptedDecoder, effects: &'a CpuCompositor) -> RenderContext<'a> {
        RenderContext {
            decoder,
            effects,
            size: (8, 8),
            channel_filter: 0,
        }
    }

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    #[test]
    fn topmost_visible_strip_wins() {
        let mut ed = Editing::new();
        ed.add_strip(Strip::color("red", RED, 1, 0, 10)).unwrap();
        ed.add_strip(Strip::color("blue", BLUE, 2, 0, 10)).unwrap();

        let dec = ScriptedDecoder::default();
        let fx = CpuCompositor;
        let out = ed.render_frame(5, &ctx(&dec, &fx));
        assert_eq!(out.pixel(0, 0), BLUE);
        // Color strips never touch the decoder.
        assert!(dec.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn channel_filter_restricts_the_pick() {
        let mut ed = Editing::new();
        ed.add_strip(Strip::color("red", RED, 1, 0, 10)).unwrap();
        ed.add_strip(Strip::color("blue", BLUE, 2, 0, 10)).unwrap();

        let dec = ScriptedDecoder::default();
        let fx = CpuCompositor;
        let mut c = ctx(&dec, &fx);
        c.channel_filter = 1;
        assert_eq!(ed.render_frame(5, &c).pixel(0, 0), RED);
        c.channel_filter = 3;
        assert_eq!(ed.render_frame(5, &c).pixel(0, 0)[3], 0);
    }

    #[test]
    fn muted_strip_and_muted_channel_are_skipped() {
        let mut ed = Editing::new();
        ed.add_strip(Strip::color("red", RED, 1, 0, 10)).unwrap();
        let blue = ed.add_strip(Strip::color("blue", BLUE, 2, 0, 10)).unwrap();

        let dec = ScriptedDecoder::default();
        let fx = CpuCompositor;
        ed.set_muted(blue, true).unwrap();
        assert_eq!(ed.render_frame(5, &ctx(&dec, &fx)).pixel(0, 0), RED);

        ed.set_muted(blue, false).unwrap();
        ed.set_channel_muted(2, true).unwrap();
        assert_eq!(ed.render_frame(5, &ctx(&dec, &fx)).pixel(0, 0), RED);
    }

    #[test]
    fn empty_frame_renders_transparent() {
        let mut ed = Editing::new();
        ed.add_strip(Strip::color("red", RED, 1, 0, 10)).unwrap();
        let dec = ScriptedDecoder::default();
        let fx = CpuCompositor;
        let out = ed.render_frame(50, &ctx(&dec, &fx));
        assert_eq!(out.pixel(0, 0)[3], 0);
        assert!(!out.is_missing());
    }

    #[test]
    fn early_out_never_touches_the_skipped_input() {
        let a_file = NamedTempFile::new().unwrap();
        let b_file = NamedTempFile::new().unwrap();
        let mut ed = Editing::new();
        let a = ed
            .add_strip(Strip::movie("a", a_file.path(), 1, 0, 10))
            .unwrap();
        let b = ed
            .add_strip(Strip::movie("b", b_file.path(), 2, 0, 10))
            .unwrap();
        let cross = ed
            .add_strip(Strip::effect("cross", EffectType::Cross, 3, 0, 10))
            .unwrap();
        ed.set_effect_input(cross, 1, Some(a)).unwrap();
        ed.set_effect_input(cross, 2, Some(b)).unwrap();
        ed.set_effect_factor(cross, 0.0).unwrap();

        let dec = ScriptedDecoder::with(&[("a", RED), ("b", BLUE)]);
        let fx = CpuCompositor;
        let out = ed.render_frame(5, &ctx(&dec, &fx));
        assert_eq!(out.pixel(0, 0), RED);
        assert_eq!(dec.calls_for("a"), 1);
        assert_eq!(dec.calls_for("b"), 0);

        // At factor 1 the other side passes through untouched.
        ed.set_effect_factor(cross, 1.0).unwrap();
        let out = ed.render_frame(5, &ctx(&dec, &fx));
        assert_eq!(out.pixel(0, 0), BLUE);
        assert_eq!(dec.calls_for("a"), 1);
    }

    #[test]
    fn cross_blends_between_inputs() {
        let a_file = NamedTempFile::new().unwrap();
        let b_file = NamedTempFile::new().unwrap();
        let mut ed = Editing::new();
        let a = ed
            .add_strip(Strip::movie("a", a_file.path(), 1, 0, 10))
            .unwrap();
        let b = ed
            .add_strip(Strip::movie("b", b_file.path(), 2, 0, 10))
            .unwrap();
        let cross = ed
            .add_strip(Strip::effect("cross", EffectType::Cross, 3, 0, 10))
            .unwrap();
        ed.set_effect_input(cross, 1, Some(a)).unwrap();
        ed.set_effect_input(cross, 2, Some(b)).unwrap();
        ed.set_effect_factor(cross, 0.5).unwrap();

        let dec = ScriptedDecoder::with(&[("a", [0, 0, 0, 255]), ("b", [200, 0, 0, 255])]);
        let fx = CpuCompositor;
        let out = ed.render_frame(5, &ctx(&dec, &fx));
        assert_eq!(out.pixel(0, 0)[0], 100);
    }

    #[test]
    fn missing_required_input_becomes_a_placeholder() {
        let mut ed = Editing::new();
        let cross = ed
            .add_strip(Strip::effect("cross", EffectType::Cross, 1, 0, 10))
            .unwrap();
        ed.set_effect_factor(cross, 0.0).unwrap();

        let dec = ScriptedDecoder::default();
        let fx = CpuCompositor;
        let out = ed.render_frame(5, &ctx(&dec, &fx));
        assert!(out.is_missing());
    }

    #[test]
    fn missing_media_becomes_a_placeholder() {
        let mut ed = Editing::new();
        ed.add_strip(Strip::movie("gone", "/no/such/file.mp4", 1, 0, 10))
            .unwrap();
        let dec = ScriptedDecoder::with(&[("gone", RED)]);
        let fx = CpuCompositor;
        let out = ed.render_frame(5, &ctx(&dec, &fx));
        assert!(out.is_missing());
        // The decoder is never asked for media known to be absent.
        assert_eq!(dec.calls_for("gone"), 0);
    }

    #[test]
    fn speed_remaps_the_input_clock() {
        let file = NamedTempFile::new().unwrap();
        let mut ed = Editing::new();
        let clip = ed
            .add_strip(Strip::movie("clip", file.path(), 1, 0, 100))
            .unwrap();
        let speed = ed
            .add_strip(Strip::effect("speed", EffectType::Speed, 2, 0, 100))
            .unwrap();
        ed.set_effect_input(speed, 1, Some(clip)).unwrap();
        ed.set_effect_factor(speed, 2.0).unwrap();

        let dec = ScriptedDecoder::with(&[("clip", RED)]);
        let fx = CpuCompositor;
        ed.render_frame(7, &ctx(&dec, &fx));
        assert_eq!(dec.frames_for("clip"), vec![14]);
    }

    #[test]
    fn meta_remaps_parent_frames_to_local_and_clamps() {
        let mut ed = Editing::new();
        let meta = ed.add_strip(Strip::meta("group", 1, 10, 5)).unwrap();
        ed.meta_enter(meta).unwrap();
        ed.add_strip(Strip::color("inner", RED, 1, 0, 3)).unwrap();
        ed.meta_exit().unwrap();

        let dec = ScriptedDecoder::default();
        let fx = CpuCompositor;
        // Parent frame 12 -> local 2, inside the child's span.
        assert_eq!(ed.render_frame(12, &ctx(&dec, &fx)).pixel(0, 0), RED);
        // Parent frame 14 -> local 4, past the child: transparent, but the
        // clamp keeps it a valid local frame.
        assert_eq!(ed.render_frame(14, &ctx(&dec, &fx)).pixel(0, 0)[3], 0);
    }

    #[test]
    fn adjustment_walks_below_then_up_through_meta_levels() {
        let mut ed = Editing::new();
        ed.add_strip(Strip::color("backdrop", RED, 1, 0, 50)).unwrap();
        let meta = ed.add_strip(Strip::meta("group", 2, 0, 50)).unwrap();
        ed.meta_enter(meta).unwrap();
        let adj = ed
            .add_strip(Strip::effect("adjust", EffectType::Adjustment, 1, 0, 50))
            .unwrap();
        ed.meta_exit().unwrap();

        let dec = ScriptedDecoder::default();
        let fx = CpuCompositor;
        // Nothing below the adjustment inside the meta, so it reaches the
        // parent level and picks up the backdrop under the meta's channel.
        assert_eq!(ed.render_frame(5, &ctx(&dec, &fx)).pixel(0, 0), RED);

        // With a sibling below it inside the meta, the walk stops there.
        ed.meta_enter(meta).unwrap();
        ed.move_strip(adj, 2, 0).unwrap();
        ed.add_strip(Strip::color("local", BLUE, 1, 0, 50)).unwrap();
        ed.meta_exit().unwrap();
        assert_eq!(ed.render_frame(5, &ctx(&dec, &fx)).pixel(0, 0), BLUE);
    }

    #[test]
    fn rendering_inside_a_meta_uses_its_local_clock() {
        let mut ed = Editing::new();
        let meta = ed.add_strip(Strip::meta("group", 1, 10, 5)).unwrap();
        ed.meta_enter(meta).unwrap();
        ed.add_strip(Strip::color("inner", RED, 1, 0, 3)).unwrap();

        let dec = ScriptedDecoder::default();
        let fx = CpuCompositor;
        // Active level is the meta's inside; frame 1 is local.
        assert_eq!(ed.render_frame(1, &ctx(&dec, &fx)).pixel(0, 0), RED);
    }

    #[test]
    fn cached_frames_skip_decoding_until_invalidated() {
        let file = NamedTempFile::new().unwrap();
        let mut ed = Editing::new();
        let clip = ed
            .add_strip(Strip::movie("clip", file.path(), 1, 0, 10))
            .unwrap();

        let dec = ScriptedDecoder::with(&[("clip", RED)]);
        let fx = CpuCompositor;
        ed.render_frame(5, &ctx(&dec, &fx));
        ed.render_frame(5, &ctx(&dec, &fx));
        assert_eq!(dec.calls_for("clip"), 1);

        ed.move_strip(clip, 1, 0).unwrap();
        ed.render_frame(5, &ctx(&dec, &fx));
        assert_eq!(dec.calls_for("clip"), 2);
    }

    #[test]
    fn sibling_edit_does_not_evict_unrelated_strips() {
        let a_file = NamedTempFile::new().unwrap();
        let mut ed = Editing::new();
        ed.add_strip(Strip::movie("a", a_file.path(), 1, 0, 10))
            .unwrap();
        let b = ed.add_strip(Strip::color("b", BLUE, 2, 20, 10)).unwrap();

        let dec = ScriptedDecoder::with(&[("a", RED)]);
        let fx = CpuCompositor;
        ed.render_frame(5, &ctx(&dec, &fx));
        assert_eq!(dec.calls_for("a"), 1);

        // Moving the unrelated strip drops level composites but keeps the
        // other strip's decoded frames.
        ed.move_strip(b, 2, 25).unwrap();
        ed.render_frame(5, &ctx(&dec, &fx));
        assert_eq!(dec.calls_for("a"), 1);
    }
}
