//! Derived lookup tables over the strip graph.
//!
//! Never authoritative: every graph mutation flips the dirty flag and the
//! next query rebuilds from the arena. Rebuild cost is one walk of the whole
//! tree, which is cheap next to any render.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::debug;
use uuid::Uuid;

use super::channel::ChannelSet;
use super::editing::StripArena;
use super::strip::{StripId, StripOps};

#[derive(Debug, Default)]
pub struct LookupIndex {
    valid: bool,
    by_name: HashMap<String, StripId>,
    by_source: HashMap<PathBuf, Vec<StripId>>,
    /// child strip -> containing meta strip.
    owner: HashMap<StripId, StripId>,
    /// channel-set id -> owning meta strip (None = the root registry).
    channel_owner: HashMap<Uuid, Option<StripId>>,
}

impl LookupIndex {
    /// Mark stale. Called on every strip-graph mutation.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Rebuild from the arena if stale.
    pub fn ensure_built(
        &mut self,
        arena: &StripArena,
        root_seqbase: &[StripId],
        root_channels: &ChannelSet,
    ) {
        if self.valid {
            return;
        }
        self.by_name.clear();
        self.by_source.clear();
        self.owner.clear();
        self.channel_owner.clear();
        self.channel_owner.insert(root_channels.set_id(), None);

        let mut stack: Vec<(Option<StripId>, Vec<StripId>)> =
            vec![(None, root_seqbase.to_vec())];
        while let Some((owner, ids)) = stack.pop() {
            for id in ids {
                let Some(strip) = arena.get(&id) else {
                    continue;
                };
                self.by_name.insert(strip.name().to_string(), id);
                if let Some(path) = strip.kind().source_path() {
                    self.by_source.entry(path.to_path_buf()).or_default().push(id);
                }
                if let Some(meta_id) = owner {
                    self.owner.insert(id, meta_id);
                }
                if let Some(meta) = strip.as_meta() {
                    self.channel_owner
                        .insert(meta.channels().set_id(), Some(id));
                    stack.push((Some(id), meta.seqbase().to_vec()));
                }
            }
        }
        self.valid = true;
        debug!("lookup: rebuilt index over {} strips", self.by_name.len());
    }

    pub fn strip_by_name(&self, name: &str) -> Option<StripId> {
        self.by_name.get(name).copied()
    }

    /// Strips referencing the given media file, anywhere in the tree.
    pub fn strips_by_source(&self, path: &Path) -> &[StripId] {
        self.by_source
            .get(path)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Containing meta strip, or None for top-level strips.
    pub fn owner_of(&self, id: StripId) -> Option<StripId> {
        self.owner.get(&id).copied()
    }

    /// Which meta strip owns the channel set with this id. Outer None =
    /// unknown set id; inner None = the root registry.
    pub fn channel_set_owner(&self, set_id: Uuid) -> Option<Option<StripId>> {
        self.channel_owner.get(&set_id).copied()
    }
}
