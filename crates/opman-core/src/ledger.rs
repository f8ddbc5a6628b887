//! Operation ledger: every proposed operation, its approvals and its state.
//!
//! Approvals are a set, so concurrent approvals by different signers commute
//! and a repeated approval never grows the set. Terminal operations stay in
//! the ledger forever; their ids are never reused.

use std::collections::BTreeMap;

use opman_types::{
    Action, Identity, Operation, OperationId, OperationState, OpmanError, Result,
};

/// Store of all operations, indexed by id.
#[derive(Debug)]
pub struct OperationLedger {
    operations: BTreeMap<OperationId, Operation>,
    /// Id handed to the next proposal.
    next_id: OperationId,
    /// Maximum number of non-terminal operations.
    max_pending: usize,
}

impl OperationLedger {
    /// Create an empty ledger.
    ///
    /// # Panics
    /// Panics if `max_pending` is zero.
    #[must_use]
    pub fn new(max_pending: usize) -> Self {
        assert!(max_pending > 0, "OperationLedger max_pending must be > 0");
        Self {
            operations: BTreeMap::new(),
            next_id: OperationId(1),
            max_pending,
        }
    }

    /// Check that `action` may be opened as a new operation.
    ///
    /// At capacity, a `CancelOperation` is still admitted when it is the
    /// first open cancel of a non-cancel operation, so a full ledger can be
    /// drained by quorum. At most one such cancel exists per open operation,
    /// which bounds the overflow at `max_pending`.
    ///
    /// # Errors
    /// Returns `TooManyPendingOperations` at capacity.
    pub fn check_capacity(&self, action: &Action) -> Result<()> {
        if self.pending_count() < self.max_pending || self.admits_relief(action) {
            return Ok(());
        }
        Err(OpmanError::TooManyPendingOperations {
            limit: self.max_pending,
        })
    }

    fn admits_relief(&self, action: &Action) -> bool {
        let Action::CancelOperation { op_id } = action else {
            return false;
        };
        let Ok(target) = self.get_open(*op_id) else {
            return false;
        };
        !matches!(target.action, Action::CancelOperation { .. })
            && !self
                .pending()
                .any(|op| op.action == Action::CancelOperation { op_id: *op_id })
    }

    /// Record a new operation with the proposer's approval and return its id.
    pub fn insert(&mut self, action: Action, proposer: Identity) -> Result<OperationId> {
        self.check_capacity(&action)?;
        let id = self.next_id;
        self.next_id = id.next();
        self.operations
            .insert(id, Operation::new(id, action, proposer));
        Ok(id)
    }

    /// # Errors
    /// Returns `UnknownOperation` if no such id was ever issued.
    pub fn get(&self, id: OperationId) -> Result<&Operation> {
        self.operations
            .get(&id)
            .ok_or(OpmanError::UnknownOperation(id))
    }

    pub fn get_mut(&mut self, id: OperationId) -> Result<&mut Operation> {
        self.operations
            .get_mut(&id)
            .ok_or(OpmanError::UnknownOperation(id))
    }

    /// Look up an operation that can still change.
    ///
    /// # Errors
    /// - `UnknownOperation`
    /// - `AlreadyExecuted` if executed
    /// - `OperationCancelled` if cancelled
    pub fn get_open(&self, id: OperationId) -> Result<&Operation> {
        let op = self.get(id)?;
        match op.state {
            OperationState::Executed => Err(OpmanError::AlreadyExecuted(id)),
            OperationState::Cancelled => Err(OpmanError::OperationCancelled(id)),
            OperationState::Proposed | OperationState::Approved => Ok(op),
        }
    }

    /// Add `signer` to the approval set and return the new set size.
    ///
    /// # Errors
    /// - anything [`Self::get_open`] returns
    /// - `DuplicateApproval` if `signer` already approved
    pub fn record_approval(&mut self, id: OperationId, signer: Identity) -> Result<usize> {
        if self.get_open(id)?.approvals.contains(&signer) {
            return Err(OpmanError::DuplicateApproval { op_id: id, signer });
        }
        let op = self.get_mut(id)?;
        op.approvals.insert(signer);
        Ok(op.approvals.len())
    }

    /// Drop `signer`'s approvals from every open operation.
    ///
    /// Returns the ids of the operations that lost an approval.
    pub fn prune_approvals_from(&mut self, signer: &Identity) -> Vec<OperationId> {
        self.operations
            .values_mut()
            .filter(|op| !op.state.is_terminal())
            .filter_map(|op| op.approvals.remove(signer).then_some(op.id))
            .collect()
    }

    /// Open (PROPOSED or APPROVED) operations in id order.
    pub fn pending(&self) -> impl Iterator<Item = &Operation> {
        self.operations
            .values()
            .filter(|op| !op.state.is_terminal())
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    /// All operations in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
