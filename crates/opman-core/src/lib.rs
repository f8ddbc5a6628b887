//! # opman-core
//!
//! The **OpMan** engine: an M-of-N multisig authority over a fixed set of
//! nine managed units.
//!
//! - [`OpMan`]: the engine; every state change goes through it
//! - [`SignerRegistry`]: signers and their `PENDING → ACTIVE → REMOVED` status
//! - [`UnitRegistry`]: role bindings, owner slots, unit lifecycle, parameters
//! - [`OperationLedger`]: proposed operations and their approval sets
//! - [`AuditLog`]: append-only record of every transition
//! - [`SharedOpMan`]: lock-protected handle for concurrent callers
//! - [`ManagedUnit`]: the black-box seam a governed unit exposes
//!
//! ## Unit Lifecycle
//!
//! ```text
//! CONSTRUCTED ──▶ OWNERS_ASSIGNED ──▶ INITIALIZED ──▶ SEALED
//!  (deployer      (mandatory slots    (peers          (only gated
//!   holds slots)   handed over)        resolved)       operations)
//! ```

pub mod audit;
pub mod engine;
pub mod ledger;
pub mod managed_unit;
pub mod shared;
pub mod signer_registry;
pub mod unit_registry;

pub use audit::AuditLog;
pub use engine::{AppliedEffect, ExecutionReceipt, OpMan};
pub use ledger::OperationLedger;
pub use managed_unit::ManagedUnit;
#[cfg(any(test, feature = "test-helpers"))]
pub use managed_unit::{Recording, RecordingUnit};
pub use shared::SharedOpMan;
pub use signer_registry::{SignerRegistry, SignerStatus};
pub use unit_registry::{PeerResolver, UnitRegistry};
