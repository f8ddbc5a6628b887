//! # opman-types
//!
//! Shared types, errors, and configuration for **OpMan**, the multisig
//! operations manager that governs a cluster of interdependent managed units.
//!
//! This crate is the leaf dependency of the workspace. It defines:
//!
//! - **Identifiers**: [`Identity`], [`OperationId`], [`AuditEventId`]
//! - **Unit model**: [`Role`], [`SlotRole`], [`OwnerSlot`], [`UnitState`], [`UnitRecord`], [`ParamValue`]
//! - **Operation model**: [`Operation`], [`Action`], [`OperationKind`], [`OperationState`], [`Target`]
//! - **Audit model**: [`AuditEvent`], [`AuditEventKind`]
//! - **Configuration**: [`OpManConfig`], [`DeploymentPlan`], [`ParameterAssignment`]
//! - **Errors**: [`OpmanError`] with `OPM_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod audit;
pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod operation;
pub mod unit;

pub use audit::*;
pub use config::*;
pub use error::*;
pub use ids::*;
pub use operation::*;
pub use unit::*;

// Constants are accessed via `opman_types::constants::FOO`
// (not re-exported to avoid name collisions).
