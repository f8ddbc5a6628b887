//! # opman-choreography
//!
//! Drives the nine managed units from construction to seal, routing every
//! privileged step through the [`OpMan`](opman_core::OpMan) engine.
//!
//! - [`Choreographer`]: owner assignment, `Initialise`, parameters, seal
//! - [`SignerPanel`]: the signers an operator drives gated operations with
//!
//! A run can be interrupted at any point and resumed: each step inspects the
//! engine's state and skips work that is already done.

pub mod choreographer;

pub use choreographer::{Choreographer, SignerPanel, UnitProgress};
pub use opman_core::ManagedUnit;
