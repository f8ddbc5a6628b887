//! Thread-safe handle to an [`OpMan`].
//!
//! Every mutating call takes the write lock for its whole duration, so
//! `approve` and `execute` on the same operation are linearized: at most one
//! `execute` can succeed, and approvals recorded before it are exactly the
//! ones it counts.

use std::sync::Arc;

use opman_types::{Action, Identity, OperationId, OperationState, Result};
use parking_lot::RwLock;

use crate::engine::{ExecutionReceipt, OpMan};

/// Cloneable, shared engine handle.
#[derive(Debug, Clone)]
pub struct SharedOpMan {
    inner: Arc<RwLock<OpMan>>,
}

impl SharedOpMan {
    #[must_use]
    pub fn new(opman: OpMan) -> Self {
        Self {
            inner: Arc::new(RwLock::new(opman)),
        }
    }

    pub fn propose(&self, action: Action, proposer: Identity) -> Result<OperationId> {
        self.inner.write().propose(action, proposer)
    }

    pub fn approve(&self, op_id: OperationId, signer: Identity) -> Result<usize> {
        self.inner.write().approve(op_id, signer)
    }

    pub fn execute(&self, op_id: OperationId) -> Result<ExecutionReceipt> {
        self.inner.write().execute(op_id)
    }

    pub fn cancel(&self, op_id: OperationId, signer: Identity) -> Result<()> {
        self.inner.write().cancel(op_id, signer)
    }

    pub fn confirm_signer(&self, signer: Identity) -> Result<()> {
        self.inner.write().confirm_signer(signer)
    }

    pub fn operation_state(&self, op_id: OperationId) -> Result<OperationState> {
        self.inner.read().operation_state(op_id)
    }

    /// Run `f` under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&OpMan) -> R) -> R {
        f(&self.inner.read())
    }

    /// Run `f` under the write lock.
    pub fn write<R>(&self, f: impl FnOnce(&mut OpMan) -> R) -> R {
        f(&mut self.inner.write())
    }

    /// Take the engine back if this is the last handle.
    ///
    /// # Errors
    /// Returns `self` unchanged while other handles exist.
    pub fn try_into_inner(self) -> std::result::Result<OpMan, Self> {
        Arc::try_unwrap(self.inner)
            .map(RwLock::into_inner)
            .map_err(|inner| Self { inner })
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use opman_types::{OpManConfig, OpmanError, Role};

    use super::*;

    fn shared() -> SharedOpMan {
        let mut opman = OpMan::new(
            Identity::from_index(0xFE),
            OpManConfig {
                threshold: 3,
                require_signer_confirmation: false,
                ..OpManConfig::default()
            },
        )
        .unwrap();
        let units: Vec<Identity> = (0x10..0x19).map(Identity::from_index).collect();
        let signers: Vec<Identity> = (1..=5).map(Identity::from_index).collect();
        opman
            .bootstrap(Identity::from_index(0xD0), &units, &signers)
            .unwrap();
        SharedOpMan::new(opman)
    }

    #[test]
    fn concurrent_approvals_all_land() {
        let handle = shared();
        let op = handle
            .propose(Action::Pause { unit: Role::Escrow }, Identity::from_index(1))
            .unwrap();

        let workers: Vec<_> = (2..=5)
            .map(|n| {
                let h = handle.clone();
                thread::spawn(move || h.approve(op, Identity::from_index(n)))
            })
            .collect();
        for w in workers {
            w.join().unwrap().unwrap();
        }
        assert_eq!(handle.read(|o| o.operation(op).unwrap().approvals.len()), 5);
        assert_eq!(handle.operation_state(op).unwrap(), OperationState::Approved);
    }

    #[test]
    fn racing_executes_apply_once() {
        let handle = shared();
        let op = handle
            .propose(Action::Pause { unit: Role::Escrow }, Identity::from_index(1))
            .unwrap();
        handle.approve(op, Identity::from_index(2)).unwrap();
        handle.approve(op, Identity::from_index(3)).unwrap();

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let h = handle.clone();
                thread::spawn(move || h.execute(op))
            })
            .collect();
        let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, OpmanError::AlreadyExecuted(_))));
        assert!(handle.read(|o| o.units().record(Role::Escrow).unwrap().paused));
    }

    #[test]
    fn into_inner_only_for_last_handle() {
        let handle = shared();
        let other = handle.clone();
        let handle = handle.try_into_inner().unwrap_err();
        drop(other);
        let opman = handle.try_into_inner().unwrap();
        assert!(opman.is_bootstrapped());
    }
}
