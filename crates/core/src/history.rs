//! Recent generations, newest first, capped to a fixed length.

use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::job::JobSummary;
use crate::types::{JobId, Timestamp};

/// Default number of entries kept.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub created_at: Timestamp,
    pub job: JobSummary,
    pub artifacts: Vec<Artifact>,
}

/// Append-only log of `(job summary, artifacts)` pairs. Appending past the
/// limit drops the oldest entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryLog {
    limit: usize,
    entries: Vec<HistoryEntry>,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl HistoryLog {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            entries: Vec::new(),
        }
    }

    /// Rebuild from persisted entries, reapplying ordering and the cap.
    pub fn from_entries(limit: usize, mut entries: Vec<HistoryEntry>) -> Self {
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let mut log = Self::new(limit);
        entries.truncate(log.limit);
        log.entries = entries;
        log
    }

    pub fn append(&mut self, entry: HistoryEntry) {
        let pos = self
            .entries
            .iter()
            .position(|e| e.created_at <= entry.created_at)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, entry);
        self.entries.truncate(self.limit);
    }

    /// Entries, newest first.
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn find_job(&self, job_id: JobId) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.job.id == job_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}
