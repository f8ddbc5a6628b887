//! The authorization engine.
//!
//! [`OpMan`] owns the signer registry, the unit registry, the operation
//! ledger and the audit log, and is the only path through which any of them
//! change. Each public method is one atomic state transition attempt: it
//! validates everything first and mutates only once validation has passed,
//! so an `Err` always means "nothing changed".
//!
//! ## Gated operation flow
//!
//! ```text
//! propose(action, proposer) ─▶ approve(op, signer)* ─▶ execute(op)
//!            │                                            │
//!            └──────────── cancel(op, proposer) ◀─────────┘ (only while open)
//! ```
//!
//! Quorum is re-evaluated at execute time against the signers that are
//! ACTIVE at that moment.

use std::collections::BTreeMap;

use opman_types::{
    constants, Action, AuditEventKind, Identity, Operation, OperationId, OperationKind, OperationState,
    OpManConfig, OpmanError, OwnerSlot, ParamValue, Result, Role, SlotRole, UnitState,
    ENGINE_SLOT_LAYOUT,
};

use crate::audit::AuditLog;
use crate::ledger::OperationLedger;
use crate::signer_registry::SignerRegistry;
use crate::unit_registry::UnitRegistry;

/// What an executed operation changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedEffect {
    OwnerChanged {
        unit: Role,
        slot: usize,
        previous: Identity,
        new_holder: Identity,
    },
    /// One of the engine's own slots moved.
    EngineOwnerChanged {
        slot: usize,
        previous: Identity,
        new_holder: Identity,
    },
    ParameterSet {
        unit: Role,
        name: String,
        value: ParamValue,
        previous: Option<ParamValue>,
    },
    Paused { unit: Role },
    Resumed { unit: Role },
    SignerAdded { signer: Identity },
    SignerRemoved {
        signer: Identity,
        /// Open operations that lost this signer's approval.
        pruned: Vec<OperationId>,
    },
    ThresholdChanged { previous: usize, threshold: usize },
    OperationCancelled { op_id: OperationId },
}

/// Result of a successful `execute`.
#[derive(Debug, Clone)]
pub struct ExecutionReceipt {
    pub op_id: OperationId,
    pub kind: OperationKind,
    pub effect: AppliedEffect,
    /// Digest of the executed operation (see [`Operation::digest`]).
    pub digest: [u8; 32],
    /// Active approvals counted at execution.
    pub approvals: usize,
}

/// The multisig operations manager.
#[derive(Debug)]
pub struct OpMan {
    /// The engine's own identity; holder of every `OpMan` slot.
    identity: Identity,
    /// Owner slots of the engine itself, laid out as [`ENGINE_SLOT_LAYOUT`].
    /// Empty until bootstrap.
    owners: Vec<OwnerSlot>,
    /// Current M of M-of-N. Starts at `config.threshold`.
    threshold: usize,
    signers: SignerRegistry,
    units: UnitRegistry,
    ledger: OperationLedger,
    audit: AuditLog,
}

impl OpMan {
    /// Create an engine that has not been bootstrapped yet.
    ///
    /// # Errors
    /// - `Configuration` if the config is invalid
    /// - `InvalidIdentity` if `identity` is zero
    pub fn new(identity: Identity, config: OpManConfig) -> Result<Self> {
        config.validate()?;
        if identity.is_zero() {
            return Err(OpmanError::InvalidIdentity {
                reason: "engine identity must not be zero".into(),
            });
        }
        Ok(Self {
            identity,
            owners: Vec::new(),
            threshold: config.threshold,
            signers: SignerRegistry::new(config.require_signer_confirmation),
            units: UnitRegistry::new(),
            ledger: OperationLedger::new(config.max_pending_operations),
            audit: AuditLog::new(),
        })
    }

    // =================================================================
    // Bootstrap
    // =================================================================

    /// One-time installation of the unit bindings and the initial signers.
    ///
    /// `units` holds one identity per role, in [`Role::ALL`] order.
    ///
    /// # Errors
    /// - `DuplicateRegistration` on a second call, or if identities collide
    /// - `IncompleteRoleSet` if fewer than nine unit identities are given
    /// - `ThresholdUnreachable` if there are fewer signers than the threshold
    /// - anything the registries reject
    pub fn bootstrap(
        &mut self,
        deployer: Identity,
        units: &[Identity],
        signers: &[Identity],
    ) -> Result<()> {
        if self.is_bootstrapped() {
            tracing::warn!(caller = %deployer, "Bootstrap attempted twice");
            return Err(OpmanError::DuplicateRegistration {
                reason: "engine already bootstrapped".into(),
            });
        }
        if units.len() < Role::ALL.len() {
            return Err(OpmanError::IncompleteRoleSet {
                missing: Role::ALL[units.len()..].to_vec(),
            });
        }
        if units.len() > Role::ALL.len() {
            return Err(OpmanError::InvalidOperation {
                reason: format!(
                    "expected {} unit identities, got {}",
                    Role::ALL.len(),
                    units.len()
                ),
            });
        }
        if units.contains(&self.identity) || deployer == self.identity {
            return Err(OpmanError::DuplicateRegistration {
                reason: format!("{} is the engine's own identity", self.identity),
            });
        }
        if signers.contains(&self.identity) {
            return Err(OpmanError::InvalidOperation {
                reason: "the engine cannot sign for itself".into(),
            });
        }
        let map: BTreeMap<Role, Identity> = Role::ALL.into_iter().zip(units.iter().copied()).collect();

        self.units.check_registration(deployer, &map)?;
        self.signers.check_initial(signers)?;
        if signers.len() < self.threshold {
            return Err(OpmanError::ThresholdUnreachable {
                threshold: self.threshold,
                signers: signers.len(),
            });
        }

        self.units.register_units(deployer, &map)?;
        self.signers.install_initial(signers)?;
        self.owners = ENGINE_SLOT_LAYOUT
            .iter()
            .enumerate()
            .map(|(index, slot)| OwnerSlot {
                index,
                role: *slot,
                holder: if *slot == SlotRole::OpMan {
                    self.identity
                } else {
                    deployer
                },
            })
            .collect();
        self.audit.record(
            AuditEventKind::Bootstrapped,
            Some(deployer),
            None,
            format!("{} units, {} signers", map.len(), signers.len()),
        );
        tracing::info!(
            version = constants::VERSION,
            deployer = %deployer,
            units = map.len(),
            signers = signers.len(),
            threshold = self.threshold,
            "OpMan bootstrapped"
        );
        Ok(())
    }

    /// An installed signer confirms control of its identity.
    pub fn confirm_signer(&mut self, signer: Identity) -> Result<()> {
        self.signers.confirm(signer)?;
        self.audit
            .record(AuditEventKind::SignerConfirmed, Some(signer), None, "");
        tracing::debug!(signer = %signer, "Signer confirmed");
        Ok(())
    }

    // =================================================================
    // Gated operations
    // =================================================================

    /// Propose a gated operation. The proposer's approval is recorded.
    ///
    /// # Errors
    /// - `NotBootstrapped`
    /// - `UnauthorizedSigner` / `SignerNotConfirmed` if the proposer is not ACTIVE
    /// - `TooManyPendingOperations`
    /// - any validation error of the action against current state
    pub fn propose(&mut self, action: Action, proposer: Identity) -> Result<OperationId> {
        self.require_bootstrapped()?;
        if let Err(e) = self.signers.require_active(proposer) {
            tracing::warn!(proposer = %proposer, kind = %action.kind(), "Proposal from inactive signer rejected");
            return Err(e);
        }
        self.check_action(&action)?;
        self.ledger.check_capacity(&action)?;

        let kind = action.kind();
        let target = action.target();
        let op_id = self.ledger.insert(action, proposer)?;
        let digest = self.ledger.get(op_id)?.digest_hex();
        self.audit.record(
            AuditEventKind::Proposed,
            Some(proposer),
            Some(op_id),
            format!("{kind} on {target} digest={digest}"),
        );
        self.refresh_state(op_id)?;
        tracing::info!(op = %op_id, kind = %kind, target = %target, proposer = %proposer, "Operation proposed");
        Ok(op_id)
    }

    /// Approve an open operation. Returns the number of approvals from
    /// currently ACTIVE signers after this one.
    ///
    /// # Errors
    /// - `UnknownOperation`, `AlreadyExecuted`, `OperationCancelled`
    /// - `UnauthorizedSigner` / `SignerNotConfirmed`
    /// - `DuplicateApproval`
    pub fn approve(&mut self, op_id: OperationId, signer: Identity) -> Result<usize> {
        self.ledger.get_open(op_id)?;
        if let Err(e) = self.signers.require_active(signer) {
            tracing::warn!(op = %op_id, signer = %signer, "Approval from inactive signer rejected");
            return Err(e);
        }
        self.ledger.record_approval(op_id, signer)?;
        self.audit
            .record(AuditEventKind::Approved, Some(signer), Some(op_id), "");
        self.refresh_state(op_id)?;
        let count = self.active_approvals(self.ledger.get(op_id)?);
        tracing::debug!(op = %op_id, signer = %signer, approvals = count, threshold = self.threshold, "Operation approved");
        Ok(count)
    }

    /// Execute an operation whose quorum is met, applying its effect.
    ///
    /// # Errors
    /// - `UnknownOperation`, `AlreadyExecuted`, `OperationCancelled`
    /// - `QuorumNotMet` if ACTIVE approvals are below the threshold
    /// - any validation error of the action against current state; the
    ///   operation then stays open
    pub fn execute(&mut self, op_id: OperationId) -> Result<ExecutionReceipt> {
        let op = self.ledger.get_open(op_id)?;
        let approvals = self.active_approvals(op);
        if approvals < self.threshold {
            if op.approvals.len() >= self.threshold {
                tracing::warn!(
                    op = %op_id,
                    recorded = op.approvals.len(),
                    active = approvals,
                    "Stale approvals no longer meet quorum"
                );
            }
            return Err(OpmanError::QuorumNotMet {
                op_id,
                approvals,
                threshold: self.threshold,
            });
        }
        let action = op.action.clone();
        let kind = op.kind();
        let digest = op.digest();

        self.check_action(&action)?;
        let effect = self.apply(&action)?;
        self.ledger.get_mut(op_id)?.transition(OperationState::Executed)?;
        self.audit.record(
            AuditEventKind::Executed,
            None,
            Some(op_id),
            format!("{kind} digest={}", hex::encode(digest)),
        );
        tracing::info!(op = %op_id, kind = %kind, approvals, "Operation executed");
        Ok(ExecutionReceipt {
            op_id,
            kind,
            effect,
            digest,
            approvals,
        })
    }

    /// Cancel an open operation. Only its proposer, while still ACTIVE, may
    /// do this directly; anyone else needs a gated `CancelOperation`.
    ///
    /// # Errors
    /// - `UnknownOperation`, `AlreadyExecuted`, `OperationCancelled`
    /// - `NotProposer`
    /// - `UnauthorizedSigner` / `SignerNotConfirmed`
    pub fn cancel(&mut self, op_id: OperationId, signer: Identity) -> Result<()> {
        let op = self.ledger.get_open(op_id)?;
        if op.proposer != signer {
            tracing::warn!(op = %op_id, caller = %signer, "Cancel by non-proposer rejected");
            return Err(OpmanError::NotProposer {
                op_id,
                caller: signer,
            });
        }
        self.signers.require_active(signer)?;
        self.ledger.get_mut(op_id)?.transition(OperationState::Cancelled)?;
        self.audit
            .record(AuditEventKind::Cancelled, Some(signer), Some(op_id), "by proposer");
        tracing::info!(op = %op_id, by = %signer, "Operation cancelled");
        Ok(())
    }

    /// Validate `action` against current state without changing anything.
    fn check_action(&self, action: &Action) -> Result<()> {
        match action {
            Action::ChangeOwner {
                unit,
                slot,
                new_holder,
            } => self.units.check_change_owner(*unit, *slot, *new_holder),
            Action::ChangeEngineOwner { slot, new_holder } => {
                self.check_engine_owner(*slot, *new_holder)
            }
            Action::SetParameter { unit, name, .. } => {
                self.units.record(*unit)?;
                if name.is_empty() {
                    return Err(OpmanError::InvalidOperation {
                        reason: "parameter name must not be empty".into(),
                    });
                }
                Ok(())
            }
            Action::Pause { unit } => self.units.check_pause(*unit, true),
            Action::Resume { unit } => self.units.check_pause(*unit, false),
            Action::AddSigner { signer } => {
                if *signer == self.identity {
                    return Err(OpmanError::InvalidOperation {
                        reason: "the engine cannot sign for itself".into(),
                    });
                }
                self.signers.check_add(*signer)
            }
            Action::RemoveSigner { signer } => self.signers.check_remove(*signer, self.threshold),
            Action::SetThreshold { threshold } => {
                let signers = self.signers.registered_count();
                if *threshold == 0 || *threshold > signers {
                    return Err(OpmanError::InvalidThreshold {
                        threshold: *threshold,
                        signers,
                    });
                }
                Ok(())
            }
            Action::CancelOperation { op_id } => self.ledger.get_open(*op_id).map(|_| ()),
        }
    }

    /// Apply a validated action.
    fn apply(&mut self, action: &Action) -> Result<AppliedEffect> {
        let effect = match action {
            Action::ChangeOwner {
                unit,
                slot,
                new_holder,
            } => {
                let previous = self.units.change_owner(*unit, *slot, *new_holder)?;
                AppliedEffect::OwnerChanged {
                    unit: *unit,
                    slot: *slot,
                    previous,
                    new_holder: *new_holder,
                }
            }
            Action::ChangeEngineOwner { slot, new_holder } => {
                self.check_engine_owner(*slot, *new_holder)?;
                let previous = std::mem::replace(&mut self.owners[*slot].holder, *new_holder);
                AppliedEffect::EngineOwnerChanged {
                    slot: *slot,
                    previous,
                    new_holder: *new_holder,
                }
            }
            Action::SetParameter { unit, name, value } => {
                let previous = self.units.set_parameter(*unit, name, value.clone())?;
                AppliedEffect::ParameterSet {
                    unit: *unit,
                    name: name.clone(),
                    value: value.clone(),
                    previous,
                }
            }
            Action::Pause { unit } => {
                self.units.set_paused(*unit, true)?;
                AppliedEffect::Paused { unit: *unit }
            }
            Action::Resume { unit } => {
                self.units.set_paused(*unit, false)?;
                AppliedEffect::Resumed { unit: *unit }
            }
            Action::AddSigner { signer } => {
                self.signers.add(*signer)?;
                AppliedEffect::SignerAdded { signer: *signer }
            }
            Action::RemoveSigner { signer } => {
                self.signers.remove(*signer, self.threshold)?;
                let pruned = self.ledger.prune_approvals_from(signer);
                for id in &pruned {
                    self.audit.record(
                        AuditEventKind::ApprovalsPruned,
                        Some(*signer),
                        Some(*id),
                        "signer removed",
                    );
                    self.refresh_state(*id)?;
                }
                AppliedEffect::SignerRemoved {
                    signer: *signer,
                    pruned,
                }
            }
            Action::SetThreshold { threshold } => {
                let previous = std::mem::replace(&mut self.threshold, *threshold);
                let open: Vec<OperationId> = self.ledger.pending().map(|op| op.id).collect();
                for id in open {
                    self.refresh_state(id)?;
                }
                AppliedEffect::ThresholdChanged {
                    previous,
                    threshold: *threshold,
                }
            }
            Action::CancelOperation { op_id } => {
                self.ledger.get_mut(*op_id)?.transition(OperationState::Cancelled)?;
                self.audit
                    .record(AuditEventKind::Cancelled, None, Some(*op_id), "by quorum");
                AppliedEffect::OperationCancelled { op_id: *op_id }
            }
        };
        Ok(effect)
    }

    /// Validate a change to one of the engine's own slots. The engine's
    /// self slot never moves.
    fn check_engine_owner(&self, slot: usize, new_holder: Identity) -> Result<()> {
        let target = self.owners.get(slot).ok_or_else(|| OpmanError::InvalidOperation {
            reason: format!("{} has no owner slot {slot}", constants::ENGINE_NAME),
        })?;
        if target.role == SlotRole::OpMan {
            return Err(OpmanError::InvalidOperation {
                reason: "the engine's self slot cannot change".into(),
            });
        }
        if new_holder.is_zero() {
            return Err(OpmanError::InvalidOperation {
                reason: format!("engine slot {slot} cannot be left without a holder"),
            });
        }
        Ok(())
    }

    /// Re-derive PROPOSED/APPROVED from the current ACTIVE approval count.
    fn refresh_state(&mut self, op_id: OperationId) -> Result<()> {
        let op = self.ledger.get(op_id)?;
        if op.state.is_terminal() {
            return Ok(());
        }
        let desired = if self.active_approvals(op) >= self.threshold {
            OperationState::Approved
        } else {
            OperationState::Proposed
        };
        if op.state != desired {
            self.ledger.get_mut(op_id)?.transition(desired)?;
        }
        Ok(())
    }

    fn active_approvals(&self, op: &Operation) -> usize {
        op.approval_count(|s| self.signers.is_active(s))
    }

    // =================================================================
    // Initialization entry points (deploying actor only)
    // =================================================================

    fn require_bootstrapped(&self) -> Result<()> {
        if self.is_bootstrapped() {
            Ok(())
        } else {
            Err(OpmanError::NotBootstrapped)
        }
    }

    /// # Errors
    /// `NotBootstrapped` or `NotDeployer`.
    pub fn require_deployer(&self, caller: Identity) -> Result<()> {
        match self.units.deployer() {
            None => Err(OpmanError::NotBootstrapped),
            Some(d) if d == caller => Ok(()),
            Some(_) => {
                tracing::warn!(caller = %caller, "Initialization call from non-deployer rejected");
                Err(OpmanError::NotDeployer(caller))
            }
        }
    }

    /// Check that `role` may run `Initialise` now.
    pub fn check_initialise(&self, role: Role, caller: Identity) -> Result<()> {
        self.require_deployer(caller)?;
        self.units.check_initialise(role)
    }

    /// Record that `role` resolved its peers.
    pub fn mark_initialised(&mut self, role: Role, caller: Identity) -> Result<()> {
        self.check_initialise(role, caller)?;
        self.units.mark_initialised(role)?;
        self.audit.record(
            AuditEventKind::UnitInitialised,
            Some(caller),
            None,
            role.to_string(),
        );
        tracing::info!(unit = %role, "Unit initialised");
        Ok(())
    }

    /// Set a parameter directly, before the unit is sealed.
    ///
    /// # Errors
    /// - `NotBootstrapped` / `NotDeployer`
    /// - `UnitSealed` once sealed (use a gated `SetParameter` instead)
    /// - `UnitPaused` while paused
    pub fn set_initial_parameter(
        &mut self,
        role: Role,
        caller: Identity,
        name: &str,
        value: ParamValue,
    ) -> Result<Option<ParamValue>> {
        self.require_deployer(caller)?;
        let rec = self.units.record(role)?;
        if rec.state == UnitState::Sealed {
            return Err(OpmanError::UnitSealed(role));
        }
        if rec.paused {
            return Err(OpmanError::UnitPaused(role));
        }
        let shown = value.to_string();
        let previous = self.units.set_parameter(role, name, value)?;
        self.audit.record(
            AuditEventKind::ParameterSet,
            Some(caller),
            None,
            format!("{role}.{name}={shown}"),
        );
        tracing::debug!(unit = %role, name, value = %shown, "Initial parameter set");
        Ok(previous)
    }

    /// Seal `role`. Checks the unit's own readiness only; cross-unit ordering
    /// is the caller's responsibility.
    ///
    /// # Errors
    /// - `NotBootstrapped` / `NotDeployer`
    /// - `PrematureSeal` / `UnitSealed`
    pub fn seal_unit(&mut self, role: Role, caller: Identity) -> Result<()> {
        self.require_deployer(caller)?;
        if let Err(e) = self.units.seal(role) {
            tracing::warn!(unit = %role, error = %e, "Seal rejected");
            return Err(e);
        }
        self.audit
            .record(AuditEventKind::UnitSealed, Some(caller), None, role.to_string());
        tracing::info!(unit = %role, "Unit sealed");
        Ok(())
    }

    // =================================================================
    // Queries
    // =================================================================

    #[must_use]
    pub fn identity(&self) -> Identity {
        self.identity
    }

    #[must_use]
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    #[must_use]
    pub fn is_bootstrapped(&self) -> bool {
        self.units.is_bound()
    }

    /// The deploying actor recorded at bootstrap.
    #[must_use]
    pub fn deployer(&self) -> Option<Identity> {
        self.units.deployer()
    }

    /// Current holder of the engine's own `slot`.
    ///
    /// # Errors
    /// `NotBootstrapped`, or `InvalidOperation` for an unknown slot.
    pub fn engine_owner(&self, slot: usize) -> Result<Identity> {
        self.require_bootstrapped()?;
        self.owners
            .get(slot)
            .map(|s| s.holder)
            .ok_or_else(|| OpmanError::InvalidOperation {
                reason: format!("{} has no owner slot {slot}", constants::ENGINE_NAME),
            })
    }

    /// The engine's own slots. Empty before bootstrap.
    #[must_use]
    pub fn engine_slots(&self) -> &[OwnerSlot] {
        &self.owners
    }

    /// Whether every mandatory engine slot has left the deployer.
    #[must_use]
    pub fn engine_owners_assigned(&self) -> bool {
        match self.units.deployer() {
            Some(d) => self
                .owners
                .iter()
                .all(|s| !s.role.is_mandatory() || s.holder != d),
            None => false,
        }
    }

    /// Current holder of `(role, slot)`.
    pub fn owner(&self, role: Role, slot: usize) -> Result<Identity> {
        self.units.owner(role, slot)
    }

    pub fn unit_state(&self, role: Role) -> Result<UnitState> {
        self.units.state(role)
    }

    pub fn operation(&self, op_id: OperationId) -> Result<&Operation> {
        self.ledger.get(op_id)
    }

    pub fn operation_state(&self, op_id: OperationId) -> Result<OperationState> {
        Ok(self.ledger.get(op_id)?.state)
    }

    /// Whether `op_id` would pass the quorum check right now.
    pub fn is_ready(&self, op_id: OperationId) -> Result<bool> {
        let op = self.ledger.get_open(op_id)?;
        Ok(self.active_approvals(op) >= self.threshold)
    }

    #[must_use]
    pub fn units(&self) -> &UnitRegistry {
        &self.units
    }

    #[must_use]
    pub fn signers(&self) -> &SignerRegistry {
        &self.signers
    }

    #[must_use]
    pub fn ledger(&self) -> &OperationLedger {
        &self.ledger
    }

    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }
}
