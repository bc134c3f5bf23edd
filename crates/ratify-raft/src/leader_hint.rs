//! Best-effort "am I leader" signal.

use tokio::sync::watch;

/// Stream of this replica's belief about being leader.
///
/// Not authoritative: two replicas may both report `true` for a while after
/// a partition. Use it to pick where to send proposals, never for
/// correctness. Intermediate values may be skipped; the latest is always
/// delivered.
#[derive(Debug, Clone)]
pub struct LeaderHints {
    rx: watch::Receiver<bool>,
    primed: bool,
}

impl LeaderHints {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx, primed: false }
    }

    /// The current belief on the first call, then each change. `None` once
    /// the replica has stopped.
    pub async fn next(&mut self) -> Option<bool> {
        if !self.primed {
            self.primed = true;
            return Some(*self.rx.borrow_and_update());
        }
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    /// Latest belief without waiting.
    pub fn current(&self) -> bool {
        *self.rx.borrow()
    }
}
