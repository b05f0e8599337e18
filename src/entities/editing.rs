//! Editing: the root of one timeline.
//!
//! Owns the strip arena, the top-level strip list and channel registry, the
//! meta-stack navigator, the lazily rebuilt lookup index and all caches.
//! Strips reference each other by [`StripId`] only; every structural edit
//! goes through methods here so lock checks, cycle validation, overlap
//! resolution, lookup invalidation and targeted cache invalidation happen in
//! one place.
//!
//! This type is single-threaded by design. The only background work it owns
//! is the proxy job and the thumbnail pool, and both communicate through
//! channels polled from the owning thread.

use std::collections::{BTreeMap, HashSet};
use std::cell::RefCell;
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::frame_cache::{CacheScope, FrameCache};
use crate::core::presence::PresenceCache;
use crate::core::proxy::ProxyJob;
use crate::core::thumbs::ThumbCache;
use crate::error::{Result, SpliceError};
use crate::events::{EditEvent, EventSender};

use super::channel::ChannelSet;
use super::lookup::LookupIndex;
use super::overlap::{resolve_overlap, test_overlap};
use super::strip::{Strip, StripId, StripKind};

/// The strip pool. BTreeMap keeps iteration deterministic, which keeps
/// name generation and serialization stable.
pub type StripArena = BTreeMap<StripId, Strip>;

/// One level of "currently open for editing" nesting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetaStackEntry {
    /// The meta strip whose inside is being edited.
    pub strip: StripId,
    /// The meta strip's display span in parent-timeline frames at entry
    /// time, so exiting can restore the parent view.
    pub parent_view: (i64, i64),
}

#[derive(Serialize, Deserialize)]
pub struct Editing {
    strips: StripArena,
    seqbase: Vec<StripId>,
    channels: ChannelSet,

    #[serde(skip)]
    meta_stack: Vec<MetaStackEntry>,
    #[serde(skip)]
    lookup: RefCell<LookupIndex>,
    #[serde(skip)]
    frame_cache: FrameCache,
    #[serde(skip)]
    thumbs: ThumbCache,
    #[serde(skip)]
    presence: PresenceCache,
    #[serde(skip)]
    proxy: Option<ProxyJob>,
    #[serde(skip)]
    events: EventSender,
}

impl Default for Editing {
    fn default() -> Self {
        Self::new()
    }
}

impl Editing {
    pub fn new() -> Self {
        Self::with_events(EventSender::dummy())
    }

    pub fn with_events(events: EventSender) -> Self {
        Self {
            strips: StripArena::new(),
            seqbase: Vec::new(),
            channels: ChannelSet::new(),
            meta_stack: Vec::new(),
            lookup: RefCell::new(LookupIndex::default()),
            frame_cache: FrameCache::default(),
            thumbs: ThumbCache::default(),
            presence: PresenceCache::default(),
            proxy: None,
            events,
        }
    }

    pub fn set_event_sender(&mut self, events: EventSender) {
        self.events = events;
    }

    // === Accessors ===

    pub fn arena(&self) -> &StripArena {
        &self.strips
    }

    pub fn strip(&self, id: StripId) -> Result<&Strip> {
        self.strips.get(&id).ok_or(SpliceError::StripNotFound(id))
    }

    fn strip_mut(&mut self, id: StripId) -> Result<&mut Strip> {
        self.strips
            .get_mut(&id)
            .ok_or(SpliceError::StripNotFound(id))
    }

    pub fn root_seqbase(&self) -> &[StripId] {
        &self.seqbase
    }

    pub fn root_channels(&self) -> &ChannelSet {
        &self.channels
    }

    pub fn frame_cache(&self) -> &FrameCache {
        &self.frame_cache
    }

    pub fn thumbs_mut(&mut self) -> &mut ThumbCache {
        &mut self.thumbs
    }

    pub fn presence(&self) -> &PresenceCache {
        &self.presence
    }

    pub(crate) fn events(&self) -> &EventSender {
        &self.events
    }

    pub(crate) fn proxy_slot(&mut self) -> &mut Option<ProxyJob> {
        &mut self.proxy
    }

    // === Lookup queries ===

    fn with_lookup<R>(&self, f: impl FnOnce(&LookupIndex) -> R) -> R {
        let mut lookup = self.lookup.borrow_mut();
        lookup.ensure_built(&self.strips, &self.seqbase, &self.channels);
        f(&lookup)
    }

    pub fn strip_by_name(&self, name: &str) -> Option<StripId> {
        self.with_lookup(|l| l.strip_by_name(name))
    }

    /// Every strip (at any nesting level) referencing the given media file.
    pub fn strips_by_source(&self, path: &Path) -> Vec<StripId> {
        self.with_lookup(|l| l.strips_by_source(path).to_vec())
    }

    /// Containing meta strip, or `None` for top-level strips.
    pub fn owner_meta_of(&self, id: StripId) -> Option<StripId> {
        self.with_lookup(|l| l.owner_of(id))
    }

    pub fn meta_owning_channel_set(&self, set_id: Uuid) -> Option<Option<StripId>> {
        self.with_lookup(|l| l.channel_set_owner(set_id))
    }

    // === Levels ===

    /// Child list of the level owned by `owner` (`None` = root).
    pub(crate) fn level_seqbase(&self, owner: Option<StripId>) -> Vec<StripId> {
        match owner {
            None => self.seqbase.clone(),
            Some(id) => self
                .strips
                .get(&id)
                .and_then(|s| s.as_meta())
                .map(|m| m.seqbase().to_vec())
                .unwrap_or_default(),
        }
    }

    pub(crate) fn level_channels(&self, owner: Option<StripId>) -> &ChannelSet {
        match owner.and_then(|id| self.strips.get(&id)).and_then(|s| s.as_meta()) {
            Some(meta) => meta.channels(),
            None => &self.channels,
        }
    }

    fn push_to_level(&mut self, owner: Option<StripId>, id: StripId) {
        match owner {
            None => self.seqbase.push(id),
            Some(meta_id) => {
                if let Some(meta) = self.strips.get_mut(&meta_id).and_then(|s| s.as_meta_mut()) {
                    meta.seqbase.push(id);
                }
            }
        }
    }

    fn insert_into_level_after(&mut self, owner: Option<StripId>, after: StripId, id: StripId) {
        let insert = |base: &mut Vec<StripId>| {
            let at = base.iter().position(|s| *s == after).map(|i| i + 1);
            base.insert(at.unwrap_or(base.len()), id);
        };
        match owner {
            None => insert(&mut self.seqbase),
            Some(meta_id) => {
                if let Some(meta) = self.strips.get_mut(&meta_id).and_then(|s| s.as_meta_mut()) {
                    insert(&mut meta.seqbase);
                }
            }
        }
    }

    fn remove_from_level(&mut self, owner: Option<StripId>, id: StripId) {
        match owner {
            None => self.seqbase.retain(|s| *s != id),
            Some(meta_id) => {
                if let Some(meta) = self.strips.get_mut(&meta_id).and_then(|s| s.as_meta_mut()) {
                    meta.seqbase.retain(|s| *s != id);
                }
            }
        }
    }

    fn ensure_level_channel(&mut self, owner: Option<StripId>, index: i32) -> i32 {
        match owner {
            None => self.channels.ensure_channel(index),
            Some(meta_id) => match self.strips.get_mut(&meta_id).and_then(|s| s.as_meta_mut()) {
                Some(meta) => meta.channels.ensure_channel(index),
                None => index,
            },
        }
    }

    // === Meta-stack navigator ===

    pub fn meta_stack_depth(&self) -> usize {
        self.meta_stack.len()
    }

    pub fn meta_stack(&self) -> &[MetaStackEntry] {
        &self.meta_stack
    }

    /// Level currently open for editing: `None` = the root timeline.
    pub fn active_owner(&self) -> Option<StripId> {
        self.meta_stack.last().map(|e| e.strip)
    }

    /// Child list of the stack top, or the root list when the stack is empty.
    pub fn active_seqbase(&self) -> &[StripId] {
        match self.meta_stack.last() {
            Some(entry) => self
                .strips
                .get(&entry.strip)
                .and_then(|s| s.as_meta())
                .map(|m| m.seqbase())
                .unwrap_or(&[]),
            None => &self.seqbase,
        }
    }

    pub fn active_channels(&self) -> &ChannelSet {
        self.level_channels(self.active_owner())
    }

    /// Open a meta strip for editing. Visibility of its content flips
    /// between "composited from outside" and "expanded", so its cache
    /// entries drop.
    pub fn meta_enter(&mut self, id: StripId) -> Result<()> {
        let strip = self.strip(id)?;
        if !strip.is_meta() {
            return Err(SpliceError::NotMeta(id));
        }
        let parent_view = strip.span();
        self.meta_stack.push(MetaStackEntry {
            strip: id,
            parent_view,
        });
        self.invalidate_strip_caches(id);
        self.events.emit(EditEvent::MetaEntered(id));
        debug!("meta: entered '{}'", self.strips[&id].name());
        Ok(())
    }

    /// Leave the innermost open meta strip, returning it (callers typically
    /// re-select it). Exiting the root is a caller error.
    pub fn meta_exit(&mut self) -> Result<StripId> {
        let entry = self
            .meta_stack
            .pop()
            .ok_or_else(|| SpliceError::invalid_state("meta stack is empty"))?;
        self.invalidate_strip_caches(entry.strip);
        self.events.emit(EditEvent::MetaExited(entry.strip));
        Ok(entry.strip)
    }

    // === Edit operations ===

    /// Place a strip at the active level. The name is uniquified, the target
    /// channel is grown into existence, and the placement is shuffled clear
    /// of siblings before committing.
    pub fn add_strip(&mut self, mut strip: Strip) -> Result<StripId> {
        let owner = self.active_owner();
        let channel = self.ensure_level_channel(owner, strip.channel());
        if self.level_channels(owner).is_locked(channel) {
            return Err(SpliceError::Locked(strip.id()));
        }

        strip.channel = channel;
        strip.name = self.uniquify_name(&strip.name);
        let id = strip.id();
        self.strips.insert(id, strip);
        self.push_to_level(owner, id);

        let base = self.level_seqbase(owner);
        resolve_overlap(&mut self.strips, &base, id);
        debug_assert!(!test_overlap(&self.strips, &base, id));

        self.lookup.borrow_mut().invalidate();
        self.invalidate_level(owner);
        self.events.emit(EditEvent::StripAdded(id));
        info!("added strip '{}'", self.strips[&id].name());
        Ok(id)
    }

    /// Delete a strip. Meta strips take their whole subtree with them;
    /// effect inputs that pointed at anything removed are cleared, never
    /// left dangling.
    pub fn remove_strip(&mut self, id: StripId) -> Result<()> {
        self.ensure_unlocked(id)?;
        let owner = self.owner_meta_of(id);

        let mut doomed = HashSet::new();
        self.collect_subtree(id, &mut doomed);

        // Invalidate before the graph changes so dependents still resolve.
        self.invalidate_strip_caches(id);

        // The navigator must not point into the removed subtree.
        if let Some(pos) = self.meta_stack.iter().position(|e| doomed.contains(&e.strip)) {
            self.meta_stack.truncate(pos);
        }

        self.remove_from_level(owner, id);
        for gone in &doomed {
            self.strips.remove(gone);
            self.thumbs.invalidate_strip(*gone);
            self.presence.invalidate_strip(*gone);
        }
        for strip in self.strips.values_mut() {
            if let Some(effect) = strip.as_effect_mut() {
                if effect.input1.is_some_and(|i| doomed.contains(&i)) {
                    effect.input1 = None;
                }
                if effect.input2.is_some_and(|i| doomed.contains(&i)) {
                    effect.input2 = None;
                }
            }
        }

        self.lookup.borrow_mut().invalidate();
        self.invalidate_level(owner);
        self.events.emit(EditEvent::StripRemoved(id));
        Ok(())
    }

    fn collect_subtree(&self, id: StripId, out: &mut HashSet<StripId>) {
        if !out.insert(id) {
            return;
        }
        if let Some(meta) = self.strips.get(&id).and_then(|s| s.as_meta()) {
            for child in meta.seqbase() {
                self.collect_subtree(*child, out);
            }
        }
    }

    /// Move a strip to a new channel/start, shuffled clear of siblings.
    pub fn move_strip(&mut self, id: StripId, channel: i32, start: i64) -> Result<()> {
        self.ensure_unlocked(id)?;
        let owner = self.owner_meta_of(id);
        let channel = self.ensure_level_channel(owner, channel);
        if self.level_channels(owner).is_locked(channel) {
            return Err(SpliceError::Locked(id));
        }

        let strip = self.strip_mut(id)?;
        strip.channel = channel;
        strip.start = start;

        let base = self.level_seqbase(owner);
        resolve_overlap(&mut self.strips, &base, id);

        self.invalidate_strip_caches(id);
        self.events.emit(EditEvent::StripChanged(id));
        Ok(())
    }

    /// Adjust trim offsets. The span may grow, so the result is shuffled
    /// clear of siblings like any other placement change.
    pub fn trim_strip(&mut self, id: StripId, offset_left: i64, offset_right: i64) -> Result<()> {
        self.ensure_unlocked(id)?;
        let strip = self.strip_mut(id)?;
        strip.offset_left = offset_left;
        strip.offset_right = offset_right;

        let owner = self.owner_meta_of(id);
        let base = self.level_seqbase(owner);
        resolve_overlap(&mut self.strips, &base, id);

        self.invalidate_strip_caches(id);
        self.events.emit(EditEvent::StripChanged(id));
        Ok(())
    }

    /// Deep-copy a strip (meta subtrees get fresh ids throughout) next to
    /// the original, then shuffle the copy clear.
    pub fn duplicate_strip(&mut self, id: StripId) -> Result<StripId> {
        self.ensure_unlocked(id)?;
        let owner = self.owner_meta_of(id);

        let copy_id = self.clone_subtree(id);
        self.insert_into_level_after(owner, id, copy_id);
        let base = self.level_seqbase(owner);
        resolve_overlap(&mut self.strips, &base, copy_id);

        self.lookup.borrow_mut().invalidate();
        self.invalidate_level(owner);
        self.events.emit(EditEvent::StripAdded(copy_id));
        Ok(copy_id)
    }

    /// Deep-copy with fresh ids throughout. Inputs of copied effects follow
    /// the copy where the input was copied too; references out of the
    /// subtree stay as they were.
    fn clone_subtree(&mut self, id: StripId) -> StripId {
        let mut remap = BTreeMap::new();
        let copy_id = self.deep_copy(id, &mut remap);
        for new_id in remap.values() {
            if let Some(effect) = self.strips.get_mut(new_id).and_then(|s| s.as_effect_mut()) {
                if let Some(i1) = effect.input1 {
                    effect.input1 = Some(remap.get(&i1).copied().unwrap_or(i1));
                }
                if let Some(i2) = effect.input2 {
                    effect.input2 = Some(remap.get(&i2).copied().unwrap_or(i2));
                }
            }
        }
        copy_id
    }

    fn deep_copy(&mut self, id: StripId, remap: &mut BTreeMap<StripId, StripId>) -> StripId {
        let mut copy = self.strips[&id].clone();
        copy.reissue_id();
        copy.name = self.uniquify_name(&copy.name);
        let copy_id = copy.id();
        remap.insert(id, copy_id);

        if let StripKind::Meta(ref mut meta) = copy.kind {
            let children = std::mem::take(&mut meta.seqbase);
            self.strips.insert(copy_id, copy);
            let mut new_children = Vec::with_capacity(children.len());
            for child in children {
                if self.strips.contains_key(&child) {
                    new_children.push(self.deep_copy(child, remap));
                }
            }
            if let Some(meta) = self.strips.get_mut(&copy_id).and_then(|s| s.as_meta_mut()) {
                meta.seqbase = new_children;
            }
        } else {
            self.strips.insert(copy_id, copy);
        }
        copy_id
    }

    /// Soft split at a timeline frame strictly inside the displayed span:
    /// the original keeps the left part (trimmed on the right), a fresh copy
    /// shows the right part. Content is untouched, only offsets move.
    pub fn split_strip(&mut self, id: StripId, frame: i64) -> Result<StripId> {
        self.ensure_unlocked(id)?;
        let (start, len, span) = {
            let strip = self.strip(id)?;
            (strip.start(), strip.len(), strip.span())
        };
        if frame <= span.0 || frame >= span.1 {
            return Err(SpliceError::invalid_state(format!(
                "split frame {frame} outside span {span:?}"
            )));
        }

        let owner = self.owner_meta_of(id);
        // Deep copy: a split meta must not share children with the original.
        let right_id = self.clone_subtree(id);
        if let Some(right) = self.strips.get_mut(&right_id) {
            right.offset_left = frame - start;
        }
        self.insert_into_level_after(owner, id, right_id);

        if let Some(left) = self.strips.get_mut(&id) {
            left.offset_right = start + len - frame;
        }

        self.lookup.borrow_mut().invalidate();
        self.invalidate_strip_caches(id);
        self.invalidate_level(owner);
        self.events.emit(EditEvent::StripAdded(right_id));
        Ok(right_id)
    }

    pub fn set_muted(&mut self, id: StripId, muted: bool) -> Result<()> {
        self.strip_mut(id)?.muted = muted;
        self.invalidate_strip_caches(id);
        self.events.emit(EditEvent::StripChanged(id));
        Ok(())
    }

    pub fn set_locked(&mut self, id: StripId, locked: bool) -> Result<()> {
        self.strip_mut(id)?.locked = locked;
        self.events.emit(EditEvent::StripChanged(id));
        Ok(())
    }

    pub fn set_selected(&mut self, id: StripId, selected: bool) -> Result<()> {
        self.strip_mut(id)?.selected = selected;
        Ok(())
    }

    pub fn rename_strip(&mut self, id: StripId, name: impl Into<String>) -> Result<()> {
        self.ensure_unlocked(id)?;
        let name = name.into();
        let unique = if self.strip(id)?.name() == name {
            name
        } else {
            self.uniquify_name(&name)
        };
        self.strip_mut(id)?.name = unique;
        self.lookup.borrow_mut().invalidate();
        self.events.emit(EditEvent::StripChanged(id));
        Ok(())
    }

    /// Rewire an effect input. Rejected when the assignment would make the
    /// effect (directly or transitively) an input of itself; the graph is
    /// unchanged on rejection.
    pub fn set_effect_input(
        &mut self,
        effect_id: StripId,
        slot: u8,
        input: Option<StripId>,
    ) -> Result<()> {
        if !self.strip(effect_id)?.is_effect() {
            return Err(SpliceError::NotEffect(effect_id));
        }
        if let Some(input_id) = input {
            self.strip(input_id)?;
            if input_id == effect_id || self.depends_on(input_id, effect_id) {
                return Err(SpliceError::GraphCycle(effect_id));
            }
        }
        let effect = self
            .strip_mut(effect_id)?
            .as_effect_mut()
            .ok_or(SpliceError::NotEffect(effect_id))?;
        match slot {
            1 => effect.input1 = input,
            2 => effect.input2 = input,
            _ => {
                return Err(SpliceError::invalid_state(format!(
                    "effect input slot {slot} (expected 1 or 2)"
                )));
            }
        }
        self.invalidate_strip_caches(effect_id);
        self.events.emit(EditEvent::StripChanged(effect_id));
        Ok(())
    }

    pub fn set_effect_factor(&mut self, id: StripId, factor: f32) -> Result<()> {
        let effect = self
            .strip_mut(id)?
            .as_effect_mut()
            .ok_or(SpliceError::NotEffect(id))?;
        effect.factor = factor;
        self.invalidate_strip_caches(id);
        self.events.emit(EditEvent::StripChanged(id));
        Ok(())
    }

    /// Reparent a strip into a meta strip's nested timeline. Rejected when
    /// containment would become cyclic (a meta inside itself, or inside an
    /// effect chain that feeds it).
    pub fn move_to_meta(&mut self, id: StripId, meta_id: StripId) -> Result<()> {
        self.ensure_unlocked(id)?;
        if !self.strip(meta_id)?.is_meta() {
            return Err(SpliceError::NotMeta(meta_id));
        }
        if id == meta_id || self.depends_on(id, meta_id) {
            return Err(SpliceError::GraphCycle(meta_id));
        }

        let old_owner = self.owner_meta_of(id);
        self.remove_from_level(old_owner, id);
        let channel = self.strips[&id].channel();
        self.ensure_level_channel(Some(meta_id), channel);
        self.push_to_level(Some(meta_id), id);

        self.lookup.borrow_mut().invalidate();
        let base = self.level_seqbase(Some(meta_id));
        resolve_overlap(&mut self.strips, &base, id);

        self.invalidate_level(old_owner);
        self.invalidate_level(Some(meta_id));
        self.events.emit(EditEvent::StripChanged(id));
        Ok(())
    }

    // === Channel registry edits (active level) ===

    pub fn set_channel_muted(&mut self, index: i32, muted: bool) -> Result<()> {
        let owner = self.active_owner();
        self.level_channel_mut(owner, index)?.muted = muted;
        self.invalidate_level(owner);
        self.events.emit(EditEvent::ChannelsChanged);
        Ok(())
    }

    pub fn set_channel_locked(&mut self, index: i32, locked: bool) -> Result<()> {
        let owner = self.active_owner();
        self.level_channel_mut(owner, index)?.locked = locked;
        self.events.emit(EditEvent::ChannelsChanged);
        Ok(())
    }

    pub fn rename_channel(&mut self, index: i32, name: impl Into<String>) -> Result<()> {
        let owner = self.active_owner();
        self.level_channel_mut(owner, index)?.name = name.into();
        self.events.emit(EditEvent::ChannelsChanged);
        Ok(())
    }

    fn level_channel_mut(
        &mut self,
        owner: Option<StripId>,
        index: i32,
    ) -> Result<&mut super::channel::TimelineChannel> {
        let index = self.ensure_level_channel(owner, index);
        let channels = match owner {
            None => &mut self.channels,
            Some(meta_id) => {
                &mut self
                    .strips
                    .get_mut(&meta_id)
                    .and_then(|s| s.as_meta_mut())
                    .ok_or(SpliceError::NotMeta(meta_id))?
                    .channels
            }
        };
        channels
            .channel_mut(index)
            .ok_or_else(|| SpliceError::invalid_state(format!("no channel {index}")))
    }

    // === Validation helpers ===

    fn ensure_unlocked(&self, id: StripId) -> Result<()> {
        let strip = self.strip(id)?;
        if strip.locked() {
            return Err(SpliceError::Locked(id));
        }
        let owner = self.owner_meta_of(id);
        if self.level_channels(owner).is_locked(strip.channel()) {
            return Err(SpliceError::Locked(id));
        }
        Ok(())
    }

    /// True when `target` is reachable from `start` through dependency
    /// edges: effect inputs and meta containment.
    fn depends_on(&self, start: StripId, target: StripId) -> bool {
        let mut stack = vec![start];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            let Some(strip) = self.strips.get(&id) else {
                continue;
            };
            match strip.kind() {
                StripKind::Effect(e) => {
                    stack.extend(e.input1());
                    stack.extend(e.input2());
                }
                StripKind::Meta(m) => stack.extend(m.seqbase().iter().copied()),
                _ => {}
            }
        }
        false
    }

    /// Unique-name policy: "Clip" collides into "Clip.001", "Clip.002", ...
    fn uniquify_name(&self, desired: &str) -> String {
        let taken = |name: &str| self.strips.values().any(|s| s.name() == name);
        if !taken(desired) {
            return desired.to_string();
        }
        let base = match desired.rsplit_once('.') {
            Some((stem, suffix)) if suffix.chars().all(|c| c.is_ascii_digit()) => stem,
            _ => desired,
        };
        for n in 1.. {
            let candidate = format!("{base}.{n:03}");
            if !taken(&candidate) {
                return candidate;
            }
        }
        unreachable!()
    }

    // === Cache invalidation ===

    /// Everything whose composited output changes when `id` changes: the
    /// strip itself, every effect that (transitively) consumes it, every
    /// ancestor meta.
    fn dependents_of(&self, id: StripId) -> HashSet<StripId> {
        let mut deps = HashSet::from([id]);
        // Adjustment effects read arbitrary lower channels without declared
        // edges, so any change can reach them.
        deps.extend(
            self.strips
                .values()
                .filter(|s| {
                    matches!(s.kind(), StripKind::Effect(e)
                        if e.effect == super::effects::EffectType::Adjustment)
                })
                .map(|s| s.id()),
        );
        loop {
            let mut grew = false;
            for strip in self.strips.values() {
                if deps.contains(&strip.id()) {
                    continue;
                }
                let consumes = match strip.kind() {
                    StripKind::Effect(e) => {
                        e.input1().is_some_and(|i| deps.contains(&i))
                            || e.input2().is_some_and(|i| deps.contains(&i))
                    }
                    StripKind::Meta(m) => m.seqbase().iter().any(|c| deps.contains(c)),
                    _ => false,
                };
                if consumes {
                    deps.insert(strip.id());
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }
        deps
    }

    /// Targeted invalidation for a content/placement change of one strip.
    pub(crate) fn invalidate_strip_caches(&mut self, id: StripId) {
        let deps = self.dependents_of(id);
        let mut scopes: HashSet<CacheScope> = HashSet::new();
        for dep in &deps {
            scopes.insert(CacheScope::Strip(*dep));
            scopes.insert(CacheScope::Level(self.owner_meta_of(*dep)));
        }
        self.frame_cache.invalidate_where(|k| scopes.contains(&k.scope));
        self.thumbs.invalidate_strip(id);
        self.presence.invalidate_strip(id);
    }

    /// Structural invalidation: a level's membership changed, so the
    /// level's composite identity (and every ancestor's) is stale.
    fn invalidate_level(&mut self, owner: Option<StripId>) {
        let mut scopes = HashSet::from([CacheScope::Level(owner)]);
        let mut cursor = owner;
        while let Some(meta_id) = cursor {
            scopes.insert(CacheScope::Strip(meta_id));
            cursor = self.owner_meta_of(meta_id);
            scopes.insert(CacheScope::Level(cursor));
        }
        self.frame_cache.invalidate_where(|k| scopes.contains(&k.scope));
    }

    // === Media presence ===

    pub fn is_media_missing(&self, id: StripId) -> Result<bool> {
        Ok(self.presence.is_missing(self.strip(id)?))
    }

    /// Strips (at any level) whose backing media is missing, for UI listing.
    pub fn missing_strips(&self) -> Vec<StripId> {
        self.strips
            .values()
            .filter(|s| self.presence.is_missing(s))
            .map(|s| s.id())
            .collect()
    }

    /// An external asset changed on disk: re-probe every strip that
    /// references it.
    pub fn invalidate_asset(&mut self, path: &Path) {
        let ids = self.strips_by_source(path);
        self.presence.invalidate_asset(path, &ids);
        for id in ids {
            self.invalidate_strip_caches(id);
        }
    }

    // === Persistence hooks ===

    /// Serialize the persistent model (strips, placement, channels, proxy
    /// settings). Runtime state is rebuilt on load.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let editing: Editing = serde_json::from_str(json)?;
        Ok(editing)
    }
}
