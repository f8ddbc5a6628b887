//! Audit trail entries.
//!
//! Every engine state transition appends one [`AuditEvent`]. The log is
//! append-only; replaying it in `seq` order reproduces the engine's history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AuditEventId, Identity, OperationId};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEventKind {
    /// Units and the initial signer set installed.
    Bootstrapped,
    SignerConfirmed,
    Proposed,
    Approved,
    Executed,
    Cancelled,
    /// A removed signer's approvals were dropped from an open operation.
    ApprovalsPruned,
    UnitInitialised,
    /// A parameter was set directly during initialization.
    ParameterSet,
    UnitSealed,
}

impl std::fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bootstrapped => write!(f, "BOOTSTRAPPED"),
            Self::SignerConfirmed => write!(f, "SIGNER_CONFIRMED"),
            Self::Proposed => write!(f, "PROPOSED"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Executed => write!(f, "EXECUTED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::ApprovalsPruned => write!(f, "APPROVALS_PRUNED"),
            Self::UnitInitialised => write!(f, "UNIT_INITIALISED"),
            Self::ParameterSet => write!(f, "PARAMETER_SET"),
            Self::UnitSealed => write!(f, "UNIT_SEALED"),
        }
    }
}

/// One entry of the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: AuditEventId,
    /// Position in the log, starting at 0.
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub kind: AuditEventKind,
    /// Who triggered the transition, if anyone in particular.
    pub actor: Option<Identity>,
    /// The operation involved, if any.
    pub op_id: Option<OperationId>,
    /// Free-form context (operation digest, unit name, parameter name).
    pub detail: String,
}
