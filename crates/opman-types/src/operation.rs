//! # Operation: a gated critical action
//!
//! Every privileged mutation is recorded as an [`Operation`] and must pass
//! the propose → approve → execute cycle before it takes effect.
//!
//! ## State Machine
//!
//! ```text
//!   ┌──────────┐ quorum reached ┌──────────┐  execute  ┌──────────┐
//!   │ PROPOSED ├───────────────▶│ APPROVED ├──────────▶│ EXECUTED │
//!   └────┬─────┘◀───────────────┴────┬─────┘           └──────────┘
//!        │      approvals pruned     │
//!        │ cancel                    │ cancel
//!        ▼                           ▼
//!   ┌───────────┐◀───────────────────┘
//!   │ CANCELLED │
//!   └───────────┘
//! ```
//!
//! `APPROVED` is advisory: quorum is re-evaluated against the active signer
//! set at execute time, so a PROPOSED operation may still execute if the
//! threshold was lowered, and an APPROVED one may fail if approvers were
//! removed. EXECUTED and CANCELLED are terminal.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{constants, Identity, OperationId, ParamValue, Role};

// ---------------------------------------------------------------------------
// Target / kind
// ---------------------------------------------------------------------------

/// What an operation acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    /// The operations manager itself (meta-operations).
    Engine,
    /// A managed unit.
    Unit(Role),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Engine => f.write_str(constants::ENGINE_NAME),
            Self::Unit(role) => write!(f, "{role}"),
        }
    }
}

/// Fieldless tag of an [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    ChangeOwner,
    SetParameter,
    Pause,
    Resume,
    AddSigner,
    RemoveSigner,
    SetThreshold,
    CancelOperation,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ChangeOwner => "CHANGE_OWNER",
            Self::SetParameter => "SET_PARAMETER",
            Self::Pause => "PAUSE",
            Self::Resume => "RESUME",
            Self::AddSigner => "ADD_SIGNER",
            Self::RemoveSigner => "REMOVE_SIGNER",
            Self::SetThreshold => "SET_THRESHOLD",
            Self::CancelOperation => "CANCEL_OPERATION",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Kind and payload of a gated operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Move an owner slot of `unit` to `new_holder`.
    ChangeOwner {
        unit: Role,
        slot: usize,
        new_holder: Identity,
    },
    /// Move one of the engine's own owner slots to `new_holder`.
    ChangeEngineOwner { slot: usize, new_holder: Identity },
    /// Set a business parameter on `unit`.
    SetParameter {
        unit: Role,
        name: String,
        value: ParamValue,
    },
    Pause { unit: Role },
    Resume { unit: Role },
    AddSigner { signer: Identity },
    RemoveSigner { signer: Identity },
    SetThreshold { threshold: usize },
    /// Cancel another pending operation by quorum.
    CancelOperation { op_id: OperationId },
}

impl Action {
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::ChangeOwner { .. } | Self::ChangeEngineOwner { .. } => OperationKind::ChangeOwner,
            Self::SetParameter { .. } => OperationKind::SetParameter,
            Self::Pause { .. } => OperationKind::Pause,
            Self::Resume { .. } => OperationKind::Resume,
            Self::AddSigner { .. } => OperationKind::AddSigner,
            Self::RemoveSigner { .. } => OperationKind::RemoveSigner,
            Self::SetThreshold { .. } => OperationKind::SetThreshold,
            Self::CancelOperation { .. } => OperationKind::CancelOperation,
        }
    }

    #[must_use]
    pub fn target(&self) -> Target {
        match self {
            Self::ChangeOwner { unit, .. }
            | Self::SetParameter { unit, .. }
            | Self::Pause { unit }
            | Self::Resume { unit } => Target::Unit(*unit),
            Self::ChangeEngineOwner { .. }
            | Self::AddSigner { .. }
            | Self::RemoveSigner { .. }
            | Self::SetThreshold { .. }
            | Self::CancelOperation { .. } => Target::Engine,
        }
    }

    /// Canonical byte encoding, used for the operation digest.
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.kind().to_string().as_bytes());
        out.push(b':');
        out.extend_from_slice(self.target().to_string().as_bytes());
        out.push(b':');
        match self {
            Self::ChangeOwner {
                slot, new_holder, ..
            }
            | Self::ChangeEngineOwner { slot, new_holder } => {
                out.extend_from_slice(&(*slot as u64).to_le_bytes());
                out.extend_from_slice(new_holder.as_bytes());
            }
            Self::SetParameter { name, value, .. } => {
                out.extend_from_slice(name.as_bytes());
                out.push(b'=');
                out.extend_from_slice(value.to_string().as_bytes());
            }
            Self::Pause { .. } | Self::Resume { .. } => {}
            Self::AddSigner { signer } | Self::RemoveSigner { signer } => {
                out.extend_from_slice(signer.as_bytes());
            }
            Self::SetThreshold { threshold } => {
                out.extend_from_slice(&(*threshold as u64).to_le_bytes());
            }
            Self::CancelOperation { op_id } => {
                out.extend_from_slice(&op_id.0.to_le_bytes());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// OperationState
// ---------------------------------------------------------------------------

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    /// Awaiting approvals.
    Proposed,
    /// Approval count reached the threshold at the last approval.
    Approved,
    /// Effect applied. **Irreversible.**
    Executed,
    /// Withdrawn by its proposer or by a gated cancel.
    Cancelled,
}

impl OperationState {
    /// Can an operation move from this state to `target`?
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Proposed, Self::Approved)
                | (Self::Approved, Self::Proposed)
                | (
                    Self::Proposed | Self::Approved,
                    Self::Executed | Self::Cancelled
                )
        )
    }

    /// EXECUTED and CANCELLED never change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Executed | Self::Cancelled)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proposed => write!(f, "PROPOSED"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Executed => write!(f, "EXECUTED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// A proposed critical action and its approvals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub action: Action,
    pub proposer: Identity,
    /// Signers who approved. Grows monotonically except when a removed
    /// signer's approvals are pruned.
    pub approvals: BTreeSet<Identity>,
    pub state: OperationState,
    pub proposed_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}

impl Operation {
    /// A new operation with the proposer's approval already recorded.
    #[must_use]
    pub fn new(id: OperationId, action: Action, proposer: Identity) -> Self {
        let mut approvals = BTreeSet::new();
        approvals.insert(proposer);
        Self {
            id,
            action,
            proposer,
            approvals,
            state: OperationState::Proposed,
            proposed_at: Utc::now(),
            executed_at: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.action.kind()
    }

    #[must_use]
    pub fn target(&self) -> Target {
        self.action.target()
    }

    /// Number of approvals that count under `is_active`.
    pub fn approval_count(&self, is_active: impl Fn(&Identity) -> bool) -> usize {
        self.approvals.iter().filter(|s| is_active(s)).count()
    }

    /// Move to `target`, enforcing the state machine.
    ///
    /// # Errors
    /// Returns `InvalidTransition` if the move is not allowed.
    pub fn transition(&mut self, target: OperationState) -> crate::Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(crate::OpmanError::InvalidTransition {
                op_id: self.id,
                from: self.state,
                to: target,
            });
        }
        self.state = target;
        if target == OperationState::Executed {
            self.executed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// SHA-256 over `"opman:op:v1:" || id || proposer || action`.
    ///
    /// Approvals and state are excluded: the digest names *what* is being
    /// authorized, not how far it got.
    #[must_use]
    pub fn digest(&self) -> [u8; 32] {
        let mut payload = Vec::with_capacity(128);
        payload.extend_from_slice(constants::OPERATION_DIGEST_DOMAIN);
        payload.extend_from_slice(&self.id.0.to_le_bytes());
        payload.extend_from_slice(self.proposer.as_bytes());
        self.action.encode_into(&mut payload);
        let hash = Sha256::digest(&payload);
        let mut out = [0u8; 32];
        out.copy_from_slice(&hash);
        out
    }

    #[must_use]
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change_owner() -> Action {
        Action::ChangeOwner {
            unit: Role::Hub,
            slot: 2,
            new_holder: Identity::from_index(9),
        }
    }

    #[test]
    fn action_kind_and_target() {
        assert_eq!(change_owner().kind(), OperationKind::ChangeOwner);
        assert_eq!(change_owner().target(), Target::Unit(Role::Hub));
        let add = Action::AddSigner {
            signer: Identity::from_index(1),
        };
        assert_eq!(add.kind(), OperationKind::AddSigner);
        assert_eq!(add.target(), Target::Engine);
        let engine_admin = Action::ChangeEngineOwner {
            slot: 2,
            new_holder: Identity::from_index(9),
        };
        assert_eq!(engine_admin.kind(), OperationKind::ChangeOwner);
        assert_eq!(engine_admin.target(), Target::Engine);
    }

    #[test]
    fn new_operation_records_proposer_approval() {
        let proposer = Identity::from_index(1);
        let op = Operation::new(OperationId(1), change_owner(), proposer);
        assert_eq!(op.state, OperationState::Proposed);
        assert!(op.approvals.contains(&proposer));
        assert_eq!(op.approvals.len(), 1);
        assert!(op.executed_at.is_none());
    }

    #[test]
    fn state_machine_transitions() {
        use OperationState::*;
        assert!(Proposed.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Proposed));
        assert!(Proposed.can_transition_to(Executed));
        assert!(Approved.can_transition_to(Cancelled));
        assert!(!Executed.can_transition_to(Proposed));
        assert!(!Executed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Executed));
        assert!(Executed.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!Approved.is_terminal());
    }

    #[test]
    fn executed_is_terminal_on_operation() {
        let mut op = Operation::new(OperationId(1), change_owner(), Identity::from_index(1));
        op.transition(OperationState::Executed).unwrap();
        assert!(op.executed_at.is_some());
        let err = op.transition(OperationState::Cancelled).unwrap_err();
        assert!(matches!(err, crate::OpmanError::InvalidTransition { .. }));
        assert_eq!(op.state, OperationState::Executed);
    }

    #[test]
    fn approval_count_filters_inactive() {
        let a = Identity::from_index(1);
        let b = Identity::from_index(2);
        let mut op = Operation::new(OperationId(1), change_owner(), a);
        op.approvals.insert(b);
        assert_eq!(op.approval_count(|_| true), 2);
        assert_eq!(op.approval_count(|s| *s == a), 1);
    }

    #[test]
    fn digest_ignores_approvals_but_not_payload() {
        let a = Identity::from_index(1);
        let mut op = Operation::new(OperationId(1), change_owner(), a);
        let before = op.digest();
        op.approvals.insert(Identity::from_index(2));
        assert_eq!(op.digest(), before);

        let other = Operation::new(
            OperationId(1),
            Action::ChangeOwner {
                unit: Role::Hub,
                slot: 2,
                new_holder: Identity::from_index(10),
            },
            a,
        );
        assert_ne!(other.digest(), before);

        // Same slot and holder on the engine instead of Hub.
        let engine = Operation::new(
            OperationId(1),
            Action::ChangeEngineOwner {
                slot: 2,
                new_holder: Identity::from_index(9),
            },
            a,
        );
        assert_ne!(engine.digest(), before);
        assert_eq!(op.digest_hex().len(), 64);
    }

    #[test]
    fn display_names() {
        assert_eq!(OperationKind::ChangeOwner.to_string(), "CHANGE_OWNER");
        assert_eq!(OperationState::Approved.to_string(), "APPROVED");
        assert_eq!(Target::Engine.to_string(), "OpMan");
        assert_eq!(Target::Unit(Role::Sale).to_string(), "Sale");
    }
}
