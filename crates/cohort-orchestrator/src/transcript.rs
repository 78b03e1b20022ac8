use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

// ---------------------------------------------------------------------------
// TranscriptEntry
// ---------------------------------------------------------------------------

/// One turn summary. Used for reporting and prompting, never for control flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Scheduling iteration the entry belongs to. `0` before the first.
    pub iteration: u32,
    /// Who acted: the manager or a member by name, or `team` for scheduling.
    pub actor: String,
    /// What happened, in one line.
    pub summary: String,
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

/// Bounded, ordered run transcript. The oldest entries are evicted first.
#[derive(Debug, Clone)]
pub struct Transcript {
    entries: VecDeque<TranscriptEntry>,
    capacity: usize,
    /// Number of entries ever appended, evicted ones included.
    appended: usize,
    /// `appended` value at the last [`Transcript::take_unreported`] call.
    reported: usize,
}

impl Transcript {
    /// Empty transcript keeping at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(256)),
            capacity,
            appended: 0,
            reported: 0,
        }
    }

    /// Append an entry, dropping the oldest when full.
    pub fn record(&mut self, iteration: u32, actor: impl Into<String>, summary: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(TranscriptEntry {
            timestamp: Utc::now(),
            iteration,
            actor: actor.into(),
            summary: summary.into(),
        });
        self.appended += 1;
    }

    /// Entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter()
    }

    /// Number of entries kept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries appended since the previous call that are still retained.
    pub fn take_unreported(&mut self) -> Vec<TranscriptEntry> {
        let fresh = (self.appended - self.reported).min(self.entries.len());
        self.reported = self.appended;
        self.entries
            .iter()
            .skip(self.entries.len() - fresh)
            .cloned()
            .collect()
    }

    /// Copy of all entries, oldest first.
    pub fn to_vec(&self) -> Vec<TranscriptEntry> {
        self.entries.iter().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
