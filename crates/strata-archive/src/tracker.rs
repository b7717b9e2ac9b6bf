use std::collections::HashSet;
use std::sync::Arc;

use strata_types::NameHash;
use tracing::debug;

use crate::error::{ArchiveError, ArchiveResult};
use crate::traits::{ObjectStamp, RecordFilter};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriteState {
    /// No record has been started.
    Idle,
    /// The current record is being written.
    Writing,
    /// The current record was rejected; its fields are discarded.
    Suppressed,
}

/// Per-pass bookkeeping shared by every writer: which hashes were already
/// written, which record filter applies, and whether the current record's
/// fields should reach the stream.
pub(crate) struct WriteTracker {
    saved: Vec<NameHash>,
    seen: HashSet<NameHash>,
    filter: Option<Arc<dyn RecordFilter>>,
    state: WriteState,
}

impl WriteTracker {
    pub(crate) fn new() -> Self {
        Self {
            saved: Vec::new(),
            seen: HashSet::new(),
            filter: None,
            state: WriteState::Idle,
        }
    }

    pub(crate) fn set_filter(&mut self, filter: Option<Arc<dyn RecordFilter>>) {
        self.filter = filter;
    }

    /// Decide whether the record for `stamp` is written.
    pub(crate) fn start(&mut self, stamp: ObjectStamp) -> bool {
        let hash = stamp.name_hash;
        if self.seen.contains(&hash) {
            debug!(%hash, "record already written; suppressing duplicate");
            self.state = WriteState::Suppressed;
            return false;
        }
        if let Some(filter) = &self.filter {
            if !filter.contains(hash) {
                debug!(%hash, "record outside of the filtered load; skipping");
                self.state = WriteState::Suppressed;
                return false;
            }
        }
        self.seen.insert(hash);
        self.saved.push(hash);
        self.state = WriteState::Writing;
        true
    }

    /// `Ok(true)` if field writes should reach the stream, `Ok(false)` if
    /// they are discarded, and an error if no record was ever started.
    pub(crate) fn accepts_fields(&self) -> ArchiveResult<bool> {
        match self.state {
            WriteState::Idle => Err(ArchiveError::NoActiveObject),
            WriteState::Writing => Ok(true),
            WriteState::Suppressed => Ok(false),
        }
    }

    pub(crate) fn saved(&self) -> &[NameHash] {
        &self.saved
    }

    pub(crate) fn has_saved(&self, hash: NameHash) -> bool {
        self.seen.contains(&hash)
    }
}
