//! Error types for the OpMan operations manager.
//!
//! All errors use the `OPM_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Signer errors
//! - 2xx: Operation / quorum errors
//! - 3xx: Unit registry errors
//! - 4xx: Initialization lifecycle errors
//! - 9xx: General errors
//!
//! Every error is local and non-fatal: a call that fails leaves the engine's
//! registries exactly as they were before the call.

use thiserror::Error;

use crate::{Identity, OperationId, OperationState, Role, UnitState};

/// Central error enum for all OpMan operations.
#[derive(Debug, Error)]
pub enum OpmanError {
    // =================================================================
    // Signer Errors (1xx)
    // =================================================================
    /// The caller is not an active signer.
    #[error("OPM_ERR_100: Unauthorized signer: {0}")]
    UnauthorizedSigner(Identity),

    /// The identity is already a registered signer.
    #[error("OPM_ERR_101: Signer already registered: {0}")]
    DuplicateSigner(Identity),

    /// The identity is not a registered signer.
    #[error("OPM_ERR_102: Unknown signer: {0}")]
    UnknownSigner(Identity),

    /// The signer was installed but has not confirmed control of its identity.
    #[error("OPM_ERR_103: Signer not yet confirmed: {0}")]
    SignerNotConfirmed(Identity),

    // =================================================================
    // Operation Errors (2xx)
    // =================================================================
    /// No operation with this id exists in the ledger.
    #[error("OPM_ERR_200: Unknown operation: {0}")]
    UnknownOperation(OperationId),

    /// The operation has already been executed.
    #[error("OPM_ERR_201: Operation already executed: {0}")]
    AlreadyExecuted(OperationId),

    /// The signer has already approved this operation.
    #[error("OPM_ERR_202: Duplicate approval of {op_id} by {signer}")]
    DuplicateApproval { op_id: OperationId, signer: Identity },

    /// Not enough approvals from currently active signers.
    #[error("OPM_ERR_203: Quorum not met for {op_id}: {approvals} of {threshold} approvals")]
    QuorumNotMet {
        op_id: OperationId,
        approvals: usize,
        threshold: usize,
    },

    /// The operation was cancelled and can no longer be approved or executed.
    #[error("OPM_ERR_204: Operation cancelled: {0}")]
    OperationCancelled(OperationId),

    /// Only the original proposer may cancel directly.
    #[error("OPM_ERR_205: {caller} is not the proposer of {op_id}")]
    NotProposer { op_id: OperationId, caller: Identity },

    /// The operation's payload is invalid for its target.
    #[error("OPM_ERR_206: Invalid operation: {reason}")]
    InvalidOperation { reason: String },

    /// The requested threshold is outside `1..=registered signers`.
    #[error("OPM_ERR_207: Invalid threshold {threshold} for {signers} signers")]
    InvalidThreshold { threshold: usize, signers: usize },

    /// The change would leave fewer signers than the threshold requires.
    #[error("OPM_ERR_208: Threshold {threshold} unreachable with {signers} signers")]
    ThresholdUnreachable { threshold: usize, signers: usize },

    /// Too many operations are open at once.
    #[error("OPM_ERR_209: Too many pending operations (limit {limit})")]
    TooManyPendingOperations { limit: usize },

    /// The operation cannot move between these states.
    #[error("OPM_ERR_210: Invalid transition for {op_id}: {from} -> {to}")]
    InvalidTransition {
        op_id: OperationId,
        from: OperationState,
        to: OperationState,
    },

    // =================================================================
    // Registry Errors (3xx)
    // =================================================================
    /// A role or identity was bound a second time, or bootstrap ran twice.
    #[error("OPM_ERR_300: Duplicate registration: {reason}")]
    DuplicateRegistration { reason: String },

    /// A mandatory role is missing from the registration set.
    #[error("OPM_ERR_301: Incomplete role set: missing {missing:?}")]
    IncompleteRoleSet { missing: Vec<Role> },

    /// The role has not been bound to an identity.
    #[error("OPM_ERR_302: Unbound role: {0}")]
    UnboundRole(Role),

    /// The slot index does not exist on the unit.
    #[error("OPM_ERR_303: Invalid slot {slot} on {unit}")]
    InvalidSlot { unit: Role, slot: usize },

    /// The identity could not be parsed.
    #[error("OPM_ERR_304: Invalid identity: {reason}")]
    InvalidIdentity { reason: String },

    // =================================================================
    // Lifecycle Errors (4xx)
    // =================================================================
    /// Sealing was attempted before the unit was ready.
    #[error("OPM_ERR_400: Premature seal of {unit}: {reason}")]
    PrematureSeal { unit: Role, reason: String },

    /// The unit is sealed; initialization-only entry points are disabled.
    #[error("OPM_ERR_401: Unit sealed: {0}")]
    UnitSealed(Role),

    /// The unit is paused.
    #[error("OPM_ERR_402: Unit paused: {0}")]
    UnitPaused(Role),

    /// The unit is not in a state that allows this call.
    #[error("OPM_ERR_403: Wrong state for {unit}: expected {expected}, got {actual}")]
    WrongUnitState {
        unit: Role,
        expected: UnitState,
        actual: UnitState,
    },

    /// Initialization entry points are reserved for the deploying actor.
    #[error("OPM_ERR_404: {0} is not the deploying actor")]
    NotDeployer(Identity),

    /// The engine has not been bootstrapped yet.
    #[error("OPM_ERR_405: Engine not bootstrapped")]
    NotBootstrapped,

    // =================================================================
    // General (9xx)
    // =================================================================
    /// Serialization / deserialization error.
    #[error("OPM_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("OPM_ERR_902: Configuration error: {0}")]
    Configuration(String),
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, OpmanError>;

impl From<serde_json::Error> for OpmanError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = OpmanError::UnknownOperation(OperationId(9));
        let msg = format!("{err}");
        assert!(msg.starts_with("OPM_ERR_200"), "Got: {msg}");
        assert!(msg.contains("op:9"));
    }

    #[test]
    fn quorum_not_met_display() {
        let err = OpmanError::QuorumNotMet {
            op_id: OperationId(4),
            approvals: 2,
            threshold: 3,
        };
        let msg = format!("{err}");
        assert!(msg.contains("OPM_ERR_203"));
        assert!(msg.contains("2 of 3"));
    }

    #[test]
    fn wrong_unit_state_display() {
        let err = OpmanError::WrongUnitState {
            unit: Role::Hub,
            expected: UnitState::OwnersAssigned,
            actual: UnitState::Constructed,
        };
        let msg = format!("{err}");
        assert!(msg.contains("OPM_ERR_403"));
        assert!(msg.contains("Hub"));
        assert!(msg.contains("OWNERS_ASSIGNED"));
        assert!(msg.contains("CONSTRUCTED"));
    }

    #[test]
    fn all_errors_have_opm_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(OpmanError::UnauthorizedSigner(Identity::ZERO)),
            Box::new(OpmanError::AlreadyExecuted(OperationId(1))),
            Box::new(OpmanError::UnboundRole(Role::Token)),
            Box::new(OpmanError::IncompleteRoleSet {
                missing: vec![Role::Sale],
            }),
            Box::new(OpmanError::PrematureSeal {
                unit: Role::Hub,
                reason: "test".into(),
            }),
            Box::new(OpmanError::NotBootstrapped),
            Box::new(OpmanError::Configuration("test".into())),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("OPM_ERR_"),
                "Error missing OPM_ERR_ prefix: {msg}"
            );
        }
    }

    #[test]
    fn serde_json_error_converts() {
        let err: OpmanError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, OpmanError::Serialization(_)));
    }
}
