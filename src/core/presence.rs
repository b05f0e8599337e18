//! Media-presence cache: "is this strip's backing file missing?"
//!
//! Verdicts are probed lazily (one filesystem stat) and memoized per strip.
//! Missing media is a value, not an error: the render pipeline substitutes a
//! placeholder and the UI can enumerate affected strips. Invalidation clears
//! the verdict so the next query re-probes, which is how "the user restored
//! the file" is picked up.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use log::debug;

use crate::entities::strip::{Strip, StripId, StripOps};

#[derive(Debug, Default)]
pub struct PresenceCache {
    verdicts: RefCell<HashMap<StripId, bool>>,
}

impl PresenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the strip references a media file that does not exist.
    /// Sourceless kinds (solids, text, metas, effects) are never missing.
    pub fn is_missing(&self, strip: &Strip) -> bool {
        if let Some(&verdict) = self.verdicts.borrow().get(&strip.id()) {
            return verdict;
        }
        let verdict = match strip.kind().source_path() {
            Some(path) => !path.exists(),
            None => false,
        };
        if verdict {
            debug!("presence: '{}' media is missing", strip.name());
        }
        self.verdicts.borrow_mut().insert(strip.id(), verdict);
        verdict
    }

    /// Forget one strip's verdict; the next query re-probes.
    pub fn invalidate_strip(&self, id: StripId) {
        self.verdicts.borrow_mut().remove(&id);
    }

    /// Forget verdicts for every strip in `ids` (the strips referencing an
    /// external asset, resolved by the caller through the lookup index).
    pub fn invalidate_asset(&self, _path: &Path, ids: &[StripId]) {
        let mut verdicts = self.verdicts.borrow_mut();
        for id in ids {
            verdicts.remove(id);
        }
    }

    pub fn clear(&self) {
        self.verdicts.borrow_mut().clear();
    }

    pub fn cached_count(&self) -> usize {
        self.verdicts.borrow().len()
    }
}
