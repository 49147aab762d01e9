//! One-shot completion signal between a pool and the driver

use tokio::sync::oneshot;

use crate::error::BenchError;
use crate::metrics::{PoolReport, Role};

/// Outcome a pool reports when it finishes
pub type PoolOutcome = Result<PoolReport, BenchError>;

/// Create a linked completer/signal pair for a pool of `role`
pub fn completion(role: Role) -> (Completer, CompletionSignal) {
    let (tx, rx) = oneshot::channel();
    (
        Completer { role, tx },
        CompletionSignal {
            role,
            rx: Receiver::Pending(rx),
        },
    )
}

/// Sending half, held by the pool
#[derive(Debug)]
pub struct Completer {
    role: Role,
    tx: oneshot::Sender<PoolOutcome>,
}

impl Completer {
    pub fn role(&self) -> Role {
        self.role
    }

    /// Fire the signal; consumes the completer so it fires at most once
    pub fn complete(self, outcome: PoolOutcome) {
        // Waiter gone means the driver stopped caring.
        let _ = self.tx.send(outcome);
    }
}

#[derive(Debug)]
enum Receiver {
    Pending(oneshot::Receiver<PoolOutcome>),
    Ready(PoolOutcome),
}

/// Waiting half, held by the driver
#[derive(Debug)]
pub struct CompletionSignal {
    role: Role,
    rx: Receiver,
}

impl CompletionSignal {
    /// A signal that has already fired
    pub fn ready(role: Role, outcome: PoolOutcome) -> Self {
        Self {
            role,
            rx: Receiver::Ready(outcome),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Wait for the pool to finish
    ///
    /// A pool that drops its completer without firing yields
    /// [`BenchError::PoolVanished`].
    pub async fn wait(self) -> PoolOutcome {
        match self.rx {
            Receiver::Ready(outcome) => outcome,
            Receiver::Pending(rx) => rx
                .await
                .unwrap_or(Err(BenchError::PoolVanished(self.role))),
        }
    }
}
