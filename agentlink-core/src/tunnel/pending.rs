//! Waiters for an in-flight public call

use agentlink_common::{Result, TunnelError};
use tokio::sync::oneshot;

/// Every caller waiting on one outstanding operation.
///
/// Overlapping calls chain onto the same record and settle together.
#[derive(Debug)]
pub(crate) struct Pending<T> {
    waiters: Vec<oneshot::Sender<Result<T>>>,
}

impl<T: Clone> Pending<T> {
    pub(crate) fn new(waiter: oneshot::Sender<Result<T>>) -> Self {
        Self {
            waiters: vec![waiter],
        }
    }

    /// A record nobody awaits, used when the tunnel stops itself.
    pub(crate) fn detached() -> Self {
        Self {
            waiters: Vec::new(),
        }
    }

    pub(crate) fn chain(&mut self, waiter: oneshot::Sender<Result<T>>) {
        self.waiters.push(waiter);
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn resolve(self, value: T) {
        for waiter in self.waiters {
            let _ = waiter.send(Ok(value.clone()));
        }
    }

    pub(crate) fn reject(self, error: TunnelError) {
        for waiter in self.waiters {
            let _ = waiter.send(Err(error.clone()));
        }
    }
}
