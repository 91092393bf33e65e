//! Last-use tracking
//!
//! Records, per object id, the most recent logical time the object took part
//! in an observed operation. The table is pushed through the sink as
//! `LAST_USE` records at segment boundaries and at the end of execution, so
//! an offline consumer can approximate when each object stopped being used.
//!
//! With `track_all_uses` the tracker keeps every update instead of only the
//! latest one, for full-history liveness analysis.

use crate::error::Result;
use crate::logger::EventLogger;
use crate::value::{Iid, LogicalTime, ObjectId, ScriptId, SourceId};
use fnv::FnvHashMap;

/// One observed use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastUse {
    pub site: SourceId,
    pub time: LogicalTime,
}

/// Per-object last-use table
#[derive(Debug, Default)]
pub struct LastUseTracker {
    track_all_uses: bool,
    latest: FnvHashMap<ObjectId, LastUse>,
    history: Vec<(ObjectId, LastUse)>,
    /// Scripts currently executing; the top qualifies raw sites
    scripts: Vec<ScriptId>,
}

impl LastUseTracker {
    pub fn new(track_all_uses: bool) -> Self {
        Self {
            track_all_uses,
            ..Self::default()
        }
    }

    /// Record that `id` was used at `site` at logical `time`
    pub fn update_last_use(&mut self, id: ObjectId, site: Iid, time: LogicalTime) {
        let entry = LastUse {
            site: self.get_source_id(site),
            time,
        };
        if self.track_all_uses {
            self.history.push((id, entry));
        } else {
            self.latest.insert(id, entry);
        }
    }

    /// Most recent use of `id` since the last flush
    pub fn last_use(&self, id: ObjectId) -> Option<LastUse> {
        if self.track_all_uses {
            self.history
                .iter()
                .rev()
                .find(|(entry_id, _)| *entry_id == id)
                .map(|(_, entry)| *entry)
        } else {
            self.latest.get(&id).copied()
        }
    }

    /// Number of retained entries
    pub fn len(&self) -> usize {
        if self.track_all_uses {
            self.history.len()
        } else {
            self.latest.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Emit every retained entry as a `LAST_USE` record, then clear the table.
    ///
    /// Latest-only entries are emitted in id order; full history in update
    /// order.
    pub fn flush_last_use<L: EventLogger + ?Sized>(&mut self, logger: &mut L) -> Result<()> {
        tracing::debug!(entries = self.len(), "flushing last-use table");
        if self.track_all_uses {
            for (id, entry) in self.history.drain(..) {
                logger.log_last_use(id, entry.site, entry.time)?;
            }
        } else {
            let mut entries: Vec<_> = self.latest.drain().collect();
            entries.sort_unstable_by_key(|(id, _)| *id);
            for (id, entry) in entries {
                logger.log_last_use(id, entry.site, entry.time)?;
            }
        }
        Ok(())
    }

    /// Qualify a raw site with the currently executing script
    pub fn get_source_id(&self, site: Iid) -> SourceId {
        SourceId::new(self.current_script(), site)
    }

    /// Script id of the innermost executing script, 0 outside any script
    pub fn current_script(&self) -> ScriptId {
        self.scripts.last().copied().unwrap_or(0)
    }

    pub fn enter_script(&mut self, script_id: ScriptId) {
        self.scripts.push(script_id);
    }

    pub fn exit_script(&mut self) {
        if self.scripts.pop().is_none() {
            tracing::warn!("script exit without matching script enter");
        }
    }
}
