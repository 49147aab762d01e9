//! Bounded operation counter shared by a pool's workers

use std::sync::atomic::{AtomicU64, Ordering};

/// Counts units of work towards a fixed target
///
/// Workers `claim` a unit before doing it and then either `commit` it or
/// `abandon` it. Claims never exceed the target, so completions never do
/// either.
#[derive(Debug)]
pub struct OperationCounter {
    target: u64,
    claimed: AtomicU64,
    completed: AtomicU64,
}

impl OperationCounter {
    pub fn new(target: u64) -> Self {
        Self {
            target,
            claimed: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        }
    }

    /// Reserve one unit of work; `false` once the target is fully claimed
    pub fn claim(&self) -> bool {
        self.claimed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |claimed| {
                (claimed < self.target).then_some(claimed + 1)
            })
            .is_ok()
    }

    /// Mark a claimed unit done
    ///
    /// Returns `true` for exactly one caller: the one that reached the target.
    pub fn commit(&self) -> bool {
        self.completed.fetch_add(1, Ordering::AcqRel) + 1 == self.target
    }

    /// Give a claimed unit back so another worker can take it
    pub fn abandon(&self) {
        self.claimed.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn claimed(&self) -> u64 {
        self.claimed.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.completed() >= self.target
    }
}
