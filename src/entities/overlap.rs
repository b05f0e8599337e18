//! Overlap detection and resolution for one timeline level.
//!
//! Placement is best-effort, never an error: a strip that would collide with
//! a sibling on its channel is shuffled to the nearest free channel (ties go
//! to the lower channel), and when every channel is taken it is pushed
//! forward in time on its original channel instead. Callers own cache
//! invalidation; this module only moves the strip.

use log::debug;

use crate::config::MAX_CHANNELS;

use super::editing::StripArena;
use super::strip::StripId;

fn spans_collide(a: (i64, i64), b: (i64, i64)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

/// Sibling placement rectangles, skipping `skip` (and ids that vanished from
/// the arena, which are stale seqbase entries and never collide).
fn sibling_rects(arena: &StripArena, seqbase: &[StripId], skip: StripId) -> Vec<(i32, (i64, i64))> {
    seqbase
        .iter()
        .filter(|sid| **sid != skip)
        .filter_map(|sid| arena.get(sid))
        .map(|s| (s.channel(), s.span()))
        .collect()
}

/// True if `id`'s `[left_handle, right_handle) × {channel}` rectangle
/// intersects any sibling in the same list. Siblings only: children of meta
/// strips and strips on other channels never count.
pub fn test_overlap(arena: &StripArena, seqbase: &[StripId], id: StripId) -> bool {
    let Some(strip) = arena.get(&id) else {
        return false;
    };
    let span = strip.span();
    let channel = strip.channel();
    sibling_rects(arena, seqbase, id)
        .iter()
        .any(|(ch, s)| *ch == channel && spans_collide(*s, span))
}

/// Relocate `id` until it no longer overlaps a sibling. Returns true when the
/// placement changed. Idempotent: resolving an already-clear placement does
/// nothing.
pub fn resolve_overlap(arena: &mut StripArena, seqbase: &[StripId], id: StripId) -> bool {
    if !test_overlap(arena, seqbase, id) {
        return false;
    }
    let rects = sibling_rects(arena, seqbase, id);
    let Some((orig_channel, span)) = arena.get(&id).map(|s| (s.channel(), s.span())) else {
        return false;
    };

    // Nearest free channel at the current time span; at equal distance the
    // lower channel wins.
    let free_at = |ch: i32| {
        !rects
            .iter()
            .any(|(c, s)| *c == ch && spans_collide(*s, span))
    };
    let max_dist = (orig_channel - 1).max(MAX_CHANNELS - orig_channel);
    for dist in 1..=max_dist {
        for ch in [orig_channel - dist, orig_channel + dist] {
            if (1..=MAX_CHANNELS).contains(&ch) && free_at(ch) {
                if let Some(strip) = arena.get_mut(&id) {
                    strip.channel = ch;
                    debug!("overlap: moved '{}' to channel {}", strip.name(), ch);
                }
                return true;
            }
        }
    }

    // Every channel is occupied for this span: stay on the original channel
    // and jump past the occupying strips' right edge, repeating until clear.
    while let Some(strip) = arena.get_mut(&id) {
        let span = strip.span();
        let push_to = rects
            .iter()
            .filter(|(c, s)| *c == orig_channel && spans_collide(*s, span))
            .map(|(_, s)| s.1)
            .max();
        let Some(push_to) = push_to else {
            break;
        };
        strip.start += push_to - span.0;
        debug!(
            "overlap: no free channel, pushed '{}' to frame {}",
            strip.name(),
            push_to
        );
    }
    true
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::entities::strip::Strip;

    use super::*;

    fn place(arena: &mut StripArena, seqbase: &mut Vec<StripId>, strip: Strip) -> StripId {
        let id = strip.id();
        arena.insert(id, strip);
        seqbase.push(id);
        id
    }

    fn clip(name: &str, channel: i32, start: i64, len: i64) -> Strip {
        Strip::movie(name, "/media/clip.mp4", channel, start, len)
    }

    #[test]
    fn adjacent_spans_do_not_overlap() {
        let mut arena = BTreeMap::new();
        let mut base = Vec::new();
        place(&mut arena, &mut base, clip("a", 1, 0, 10));
        let b = place(&mut arena, &mut base, clip("b", 1, 10, 10));
        assert!(!test_overlap(&arena, &base, b));
    }

    #[test]
    fn same_span_other_channel_does_not_overlap() {
        let mut arena = BTreeMap::new();
        let mut base = Vec::new();
        place(&mut arena, &mut base, clip("a", 1, 0, 10));
        let b = place(&mut arena, &mut base, clip("b", 2, 0, 10));
        assert!(!test_overlap(&arena, &base, b));
    }

    /// Three strips on channel 1 at [0,10), [10,20), [5,15): the third must
    /// relocate (channel 2 is the nearest free lane) and afterwards no two
    /// strips on any channel overlap.
    #[test]
    fn colliding_strip_relocates_to_next_channel() {
        let mut arena = BTreeMap::new();
        let mut base = Vec::new();
        place(&mut arena, &mut base, clip("a", 1, 0, 10));
        place(&mut arena, &mut base, clip("b", 1, 10, 10));
        let c = place(&mut arena, &mut base, clip("c", 1, 5, 10));

        assert!(test_overlap(&arena, &base, c));
        assert!(resolve_overlap(&mut arena, &base, c));
        assert_eq!(arena[&c].channel(), 2);
        assert_eq!(arena[&c].span(), (5, 15));
        for id in &base {
            assert!(!test_overlap(&arena, &base, *id));
        }
    }

    #[test]
    fn resolution_is_idempotent() {
        let mut arena = BTreeMap::new();
        let mut base = Vec::new();
        place(&mut arena, &mut base, clip("a", 1, 0, 10));
        let b = place(&mut arena, &mut base, clip("b", 1, 5, 10));
        assert!(resolve_overlap(&mut arena, &base, b));
        let placed = (arena[&b].channel(), arena[&b].span());
        assert!(!resolve_overlap(&mut arena, &base, b));
        assert_eq!((arena[&b].channel(), arena[&b].span()), placed);
    }

    #[test]
    fn nearest_channel_wins_over_lower() {
        let mut arena = BTreeMap::new();
        let mut base = Vec::new();
        // Channels 1..=3 occupied over [0,10); channel 4 free.
        place(&mut arena, &mut base, clip("a", 1, 0, 10));
        place(&mut arena, &mut base, clip("b", 2, 0, 10));
        place(&mut arena, &mut base, clip("c", 3, 0, 10));
        let d = place(&mut arena, &mut base, clip("d", 3, 2, 5));
        resolve_overlap(&mut arena, &mut base, d);
        // Distance 1 from channel 3: channel 2 occupied, channel 4 free.
        assert_eq!(arena[&d].channel(), 4);
    }

    #[test]
    fn equal_distance_prefers_lower_channel() {
        let mut arena = BTreeMap::new();
        let mut base = Vec::new();
        place(&mut arena, &mut base, clip("a", 3, 0, 10));
        let b = place(&mut arena, &mut base, clip("b", 3, 0, 10));
        resolve_overlap(&mut arena, &base, b);
        // Channels 2 and 4 both free at distance 1; lower wins.
        assert_eq!(arena[&b].channel(), 2);
    }

    #[test]
    fn full_column_falls_back_to_time_shift() {
        let mut arena = BTreeMap::new();
        let mut base = Vec::new();
        for ch in 1..=MAX_CHANNELS {
            place(&mut arena, &mut base, clip(&format!("bg{ch}"), ch, 0, 100));
        }
        let s = place(&mut arena, &mut base, clip("late", 5, 10, 20));
        assert!(resolve_overlap(&mut arena, &base, s));
        // Original channel kept, pushed past the blocker's right edge.
        assert_eq!(arena[&s].channel(), 5);
        assert_eq!(arena[&s].left_handle(), 100);
        assert!(!test_overlap(&arena, &base, s));
    }

    #[test]
    fn time_shift_clears_consecutive_blockers() {
        let mut arena = BTreeMap::new();
        let mut base = Vec::new();
        for ch in 1..=MAX_CHANNELS {
            place(&mut arena, &mut base, clip(&format!("bg{ch}"), ch, 0, 100));
        }
        // A second blocker further along the original channel.
        place(&mut arena, &mut base, clip("tail", 5, 100, 50));
        let s = place(&mut arena, &mut base, clip("late", 5, 10, 20));
        resolve_overlap(&mut arena, &base, s);
        assert_eq!(arena[&s].channel(), 5);
        assert_eq!(arena[&s].left_handle(), 150);
        assert!(!test_overlap(&arena, &base, s));
    }
}
