//! Timeline channels: the numbered lanes strips sit on.
//!
//! Every timeline level (the root and each meta strip) owns one
//! [`ChannelSet`]. Index 0 is reserved and never holds strips; usable
//! indices are dense from 1 up to [`MAX_CHANNELS`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::MAX_CHANNELS;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineChannel {
    pub name: String,
    /// Hides every strip on this channel from evaluation.
    pub muted: bool,
    /// Blocks edits to strips on this channel. Evaluation ignores it.
    pub locked: bool,
}

impl TimelineChannel {
    fn numbered(index: usize) -> Self {
        Self {
            name: format!("Channel {index}"),
            muted: false,
            locked: false,
        }
    }
}

/// One level's channel registry.
///
/// Carries a stable id so reverse lookups (which meta strip owns this
/// registry?) work without holding a reference into the graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSet {
    set_id: Uuid,
    channels: Vec<TimelineChannel>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self {
            set_id: Uuid::new_v4(),
            channels: vec![TimelineChannel::numbered(0)],
        }
    }

    pub fn set_id(&self) -> Uuid {
        self.set_id
    }

    /// Highest channel index currently present (0 when only the reserved
    /// channel exists).
    pub fn max_index(&self) -> i32 {
        self.channels.len() as i32 - 1
    }

    /// Grow the registry so `index` exists, clamped to [1, MAX_CHANNELS].
    /// Returns the clamped index.
    pub fn ensure_channel(&mut self, index: i32) -> i32 {
        let index = index.clamp(1, MAX_CHANNELS);
        while self.max_index() < index {
            let next = self.channels.len();
            self.channels.push(TimelineChannel::numbered(next));
        }
        index
    }

    pub fn channel(&self, index: i32) -> Option<&TimelineChannel> {
        if index < 1 {
            return None;
        }
        self.channels.get(index as usize)
    }

    pub(crate) fn channel_mut(&mut self, index: i32) -> Option<&mut TimelineChannel> {
        if index < 1 {
            return None;
        }
        self.channels.get_mut(index as usize)
    }

    /// Channel mute state; channels that do not exist yet are unmuted.
    pub fn is_muted(&self, index: i32) -> bool {
        self.channel(index).is_some_and(|c| c.muted)
    }

    /// Channel lock state; channels that do not exist yet are unlocked.
    pub fn is_locked(&self, index: i32) -> bool {
        self.channel(index).is_some_and(|c| c.locked)
    }

    /// All channels including the reserved index 0.
    pub fn channels(&self) -> &[TimelineChannel] {
        &self.channels
    }
}

impl Default for ChannelSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_zero_is_reserved() {
        let set = ChannelSet::new();
        assert_eq!(set.max_index(), 0);
        assert!(set.channel(0).is_none());
        assert!(set.channel(-3).is_none());
    }

    #[test]
    fn ensure_channel_grows_with_default_names() {
        let mut set = ChannelSet::new();
        assert_eq!(set.ensure_channel(3), 3);
        assert_eq!(set.max_index(), 3);
        assert_eq!(set.channel(2).unwrap().name, "Channel 2");
        // Idempotent.
        assert_eq!(set.ensure_channel(3), 3);
        assert_eq!(set.max_index(), 3);
    }

    #[test]
    fn ensure_channel_clamps_to_bounds() {
        let mut set = ChannelSet::new();
        assert_eq!(set.ensure_channel(0), 1);
        assert_eq!(set.ensure_channel(MAX_CHANNELS + 50), MAX_CHANNELS);
        assert_eq!(set.max_index(), MAX_CHANNELS);
    }

    #[test]
    fn mute_and_lock_flags() {
        let mut set = ChannelSet::new();
        set.ensure_channel(2);
        assert!(!set.is_muted(2));
        set.channel_mut(2).unwrap().muted = true;
        set.channel_mut(2).unwrap().locked = true;
        assert!(set.is_muted(2));
        assert!(set.is_locked(2));
        // Unknown channels behave as unmuted/unlocked.
        assert!(!set.is_muted(99));
        assert!(!set.is_locked(99));
    }

    #[test]
    fn set_ids_are_distinct() {
        assert_ne!(ChannelSet::new().set_id(), ChannelSet::new().set_id());
    }
}
