//! Byte budgeting for committed range reads.

use ratify_raft_types::CommittedEntry;
use ratify_raft_types::LogEntry;

/// Running byte budget for a range read.
///
/// The first entry is always admitted, whatever its size. After that an
/// entry is admitted only while the cumulative size stays within
/// `max_size`. Once an entry is refused the budget is closed, so results
/// stay contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeBudget {
    max_size: u64,
    used: u64,
    taken: usize,
    closed: bool,
}

impl RangeBudget {
    pub fn new(max_size: u64) -> Self {
        Self {
            max_size,
            used: 0,
            taken: 0,
            closed: false,
        }
    }

    /// Try to admit an entry of `size` bytes.
    pub fn admit(&mut self, size: u64) -> bool {
        if self.closed {
            return false;
        }
        let next = self.used.saturating_add(size);
        if self.taken > 0 && next > self.max_size {
            self.closed = true;
            return false;
        }
        self.used = next;
        self.taken += 1;
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn taken(&self) -> usize {
        self.taken
    }
}

/// Take the budgeted prefix of `entries`.
///
/// # Example
///
/// ```rust
/// use ratify_raft::pure::select_committed_range;
/// use ratify_raft_types::EntryPayload;
/// use ratify_raft_types::LogEntry;
/// use ratify_raft_types::LogId;
///
/// let big = LogEntry::new(LogId::new(1, 0), EntryPayload::Normal(vec![0; 50]));
/// let small = LogEntry::new(LogId::new(1, 1), EntryPayload::Normal(vec![0; 1]));
/// let out = select_committed_range(vec![big, small], 10);
/// assert_eq!(out.len(), 1);
/// assert_eq!(out[0].index, 0);
/// ```
pub fn select_committed_range(entries: impl IntoIterator<Item = LogEntry>, max_size: u64) -> Vec<CommittedEntry> {
    let mut budget = RangeBudget::new(max_size);
    entries
        .into_iter()
        .take_while(|entry| budget.admit(entry.payload.size_bytes()))
        .map(CommittedEntry::from)
        .collect()
}
