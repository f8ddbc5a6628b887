//! Initialization choreography.
//!
//! ## Sequence
//!
//! ```text
//! bootstrap ─▶ assign_engine_owners (gated)
//!           ─▶ assign_owners (gated, per unit) ─▶ initialise (per unit)
//!           ─▶ plan parameters (direct)        ─▶ end_initialise (per unit)
//! ```
//!
//! Units are wired in any order since peers are resolved through the
//! registry. Sealing a unit waits until everything it depends on is at least
//! INITIALIZED; that ordering is enforced here, not by the engine.

use std::collections::BTreeMap;

use opman_core::{AppliedEffect, ExecutionReceipt, ManagedUnit, OpMan};
use opman_types::{
    Action, DeploymentPlan, Identity, OperationId, OpmanError, ParamValue, Result, Role, SlotRole,
    UnitState, ENGINE_SLOT_LAYOUT,
};

/// The signers an operator controls, in the order they act.
///
/// The first signer proposes; the rest approve until the operation is ready.
#[derive(Debug, Clone)]
pub struct SignerPanel {
    signers: Vec<Identity>,
}

impl SignerPanel {
    /// # Errors
    /// `InvalidOperation` if `signers` is empty or repeats an identity.
    pub fn new(signers: Vec<Identity>) -> Result<Self> {
        if signers.is_empty() {
            return Err(OpmanError::InvalidOperation {
                reason: "signer panel is empty".into(),
            });
        }
        for (i, s) in signers.iter().enumerate() {
            if signers[..i].contains(s) {
                return Err(OpmanError::InvalidOperation {
                    reason: format!("{s} appears twice in the signer panel"),
                });
            }
        }
        Ok(Self { signers })
    }

    #[must_use]
    pub fn proposer(&self) -> Identity {
        self.signers[0]
    }

    pub fn approvers(&self) -> &[Identity] {
        &self.signers[1..]
    }

    pub fn signers(&self) -> &[Identity] {
        &self.signers
    }
}

/// Per-unit progress report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitProgress {
    pub role: Role,
    pub state: UnitState,
    /// Mandatory slots still held by the deployer.
    pub deployer_slots: Vec<SlotRole>,
    pub paused: bool,
}

/// Drives managed units through OpMan from construction to seal.
pub struct Choreographer<'a> {
    opman: &'a mut OpMan,
    /// The deploying actor; caller of every initialization entry point.
    deployer: Identity,
    units: BTreeMap<Role, Box<dyn ManagedUnit>>,
}

impl<'a> Choreographer<'a> {
    pub fn new(opman: &'a mut OpMan, deployer: Identity) -> Self {
        Self {
            opman,
            deployer,
            units: BTreeMap::new(),
        }
    }

    /// Register a constructed unit.
    ///
    /// # Errors
    /// - `DuplicateRegistration` if the role already has a unit
    /// - `InvalidOperation` if the unit's slots differ from its role's layout
    pub fn add_unit(&mut self, unit: Box<dyn ManagedUnit>) -> Result<()> {
        let role = unit.role();
        if self.units.contains_key(&role) {
            return Err(OpmanError::DuplicateRegistration {
                reason: format!("{role} already has a unit"),
            });
        }
        if unit.owner_slots() != role.slot_layout() {
            return Err(OpmanError::InvalidOperation {
                reason: format!("{role} unit exposes an unexpected slot layout"),
            });
        }
        self.units.insert(role, unit);
        Ok(())
    }

    #[must_use]
    pub fn opman(&self) -> &OpMan {
        self.opman
    }

    #[must_use]
    pub fn deployer(&self) -> Identity {
        self.deployer
    }

    pub fn unit(&self, role: Role) -> Option<&dyn ManagedUnit> {
        self.units.get(&role).map(Box::as_ref)
    }

    /// Hand the units back, e.g. to resume with a new choreographer.
    pub fn into_units(self) -> Vec<Box<dyn ManagedUnit>> {
        self.units.into_values().collect()
    }

    fn unit_mut(&mut self, role: Role) -> Result<&mut Box<dyn ManagedUnit>> {
        self.units.get_mut(&role).ok_or(OpmanError::UnboundRole(role))
    }

    /// Bootstrap the engine with every added unit and `signers`.
    ///
    /// # Errors
    /// `IncompleteRoleSet` if a role has no unit; anything `OpMan::bootstrap`
    /// returns.
    pub fn bootstrap(&mut self, signers: &[Identity]) -> Result<()> {
        let missing: Vec<Role> = Role::ALL
            .into_iter()
            .filter(|r| !self.units.contains_key(r))
            .collect();
        if !missing.is_empty() {
            return Err(OpmanError::IncompleteRoleSet { missing });
        }
        let identities: Vec<Identity> = self.units.values().map(|u| u.identity()).collect();
        self.opman.bootstrap(self.deployer, &identities, signers)
    }

    // =================================================================
    // Gated operations
    // =================================================================

    /// Propose `action` with the panel, collect approvals until ready, and
    /// execute. An operation that cannot complete is cancelled by its
    /// proposer before the error is returned.
    pub fn run_gated(&mut self, action: Action, panel: &SignerPanel) -> Result<ExecutionReceipt> {
        let proposer = panel.proposer();
        let op_id = self.opman.propose(action, proposer)?;
        match self.collect_and_execute(op_id, panel) {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                if self.opman.cancel(op_id, proposer).is_ok() {
                    tracing::warn!(op = %op_id, error = %e, "Gated operation abandoned");
                }
                Err(e)
            }
        }
    }

    fn collect_and_execute(
        &mut self,
        op_id: OperationId,
        panel: &SignerPanel,
    ) -> Result<ExecutionReceipt> {
        for signer in panel.approvers() {
            if self.opman.is_ready(op_id)? {
                break;
            }
            self.opman.approve(op_id, *signer)?;
        }
        self.execute_gated(op_id)
    }

    /// Execute an operation and forward its effect to the affected unit.
    pub fn execute_gated(&mut self, op_id: OperationId) -> Result<ExecutionReceipt> {
        let receipt = self.opman.execute(op_id)?;
        match &receipt.effect {
            AppliedEffect::ParameterSet {
                unit, name, value, ..
            } => {
                if let Some(u) = self.units.get_mut(unit) {
                    u.on_parameter(name, value);
                }
            }
            AppliedEffect::Paused { unit } => {
                if let Some(u) = self.units.get_mut(unit) {
                    u.on_paused(true);
                }
            }
            AppliedEffect::Resumed { unit } => {
                if let Some(u) = self.units.get_mut(unit) {
                    u.on_paused(false);
                }
            }
            _ => {}
        }
        Ok(receipt)
    }

    /// `ChangeOwnerMO`: move `(role, slot)` to `holder` through the gated
    /// cycle. Returns `None` if `holder` already has the slot.
    pub fn change_owner_mo(
        &mut self,
        role: Role,
        slot: usize,
        holder: Identity,
        panel: &SignerPanel,
    ) -> Result<Option<ExecutionReceipt>> {
        if self.opman.owner(role, slot)? == holder {
            tracing::debug!(unit = %role, slot, "Slot already held, skipping");
            return Ok(None);
        }
        self.run_gated(
            Action::ChangeOwner {
                unit: role,
                slot,
                new_holder: holder,
            },
            panel,
        )
        .map(Some)
    }

    /// Intended holder of a slot under `plan`. `None` leaves it alone.
    fn intended_holder(&self, slot: SlotRole, plan: &DeploymentPlan) -> Result<Option<Identity>> {
        use opman_core::PeerResolver;

        Ok(match slot {
            SlotRole::Deployer => None,
            SlotRole::OpMan => Some(self.opman.identity()),
            SlotRole::Admin => Some(plan.admin),
            SlotRole::Web => plan.web,
            SlotRole::Hub | SlotRole::Sale | SlotRole::Token | SlotRole::Mvp => match slot.peer_role() {
                Some(peer) => Some(self.opman.units().resolve(peer)?),
                None => None,
            },
        })
    }

    /// Assign the engine's own slots per `plan`; in practice its Admin slot.
    /// Returns the number of gated operations executed.
    pub fn assign_engine_owners(
        &mut self,
        plan: &DeploymentPlan,
        panel: &SignerPanel,
    ) -> Result<usize> {
        let mut executed = 0;
        for (index, slot) in ENGINE_SLOT_LAYOUT.iter().enumerate() {
            let Some(holder) = self.intended_holder(*slot, plan)? else {
                continue;
            };
            if self.opman.engine_owner(index)? == holder {
                continue;
            }
            self.run_gated(
                Action::ChangeEngineOwner {
                    slot: index,
                    new_holder: holder,
                },
                panel,
            )?;
            executed += 1;
        }
        tracing::info!(executed, "Engine owners assigned");
        Ok(executed)
    }

    /// Assign every owner slot of `role` per `plan`. Returns the number of
    /// gated operations executed; slots already in place are skipped.
    pub fn assign_owners(
        &mut self,
        role: Role,
        plan: &DeploymentPlan,
        panel: &SignerPanel,
    ) -> Result<usize> {
        let layout = self
            .units
            .get(&role)
            .ok_or(OpmanError::UnboundRole(role))?
            .owner_slots();
        let mut executed = 0;
        for (index, slot) in layout.iter().enumerate() {
            let Some(holder) = self.intended_holder(*slot, plan)? else {
                continue;
            };
            if self.change_owner_mo(role, index, holder, panel)?.is_some() {
                executed += 1;
            }
        }
        tracing::info!(unit = %role, executed, state = %self.opman.unit_state(role)?, "Owners assigned");
        Ok(executed)
    }

    // =================================================================
    // Initialization entry points
    // =================================================================

    /// Run the unit's `Initialise` and record it with the engine.
    pub fn initialise(&mut self, role: Role) -> Result<()> {
        self.opman.check_initialise(role, self.deployer)?;
        let unit = self
            .units
            .get_mut(&role)
            .ok_or(OpmanError::UnboundRole(role))?;
        unit.initialise(self.opman.units())?;
        self.opman.mark_initialised(role, self.deployer)
    }

    /// Set a parameter: directly before seal, through a gated
    /// `SetParameter` afterwards.
    pub fn set_parameter(
        &mut self,
        role: Role,
        name: &str,
        value: ParamValue,
        panel: &SignerPanel,
    ) -> Result<()> {
        if self.opman.unit_state(role)? == UnitState::Sealed {
            self.run_gated(
                Action::SetParameter {
                    unit: role,
                    name: name.to_string(),
                    value,
                },
                panel,
            )?;
            return Ok(());
        }
        self.opman
            .set_initial_parameter(role, self.deployer, name, value.clone())?;
        self.unit_mut(role)?.on_parameter(name, &value);
        Ok(())
    }

    /// `EndInitialise`: seal `role` once every unit it depends on is at
    /// least INITIALIZED.
    ///
    /// # Errors
    /// `PrematureSeal` naming the first dependency that is not ready, or
    /// anything `OpMan::seal_unit` returns.
    pub fn end_initialise(&mut self, role: Role) -> Result<()> {
        for dep in role.dependencies() {
            let state = self.opman.unit_state(*dep)?;
            if !state.is_initialized() {
                tracing::warn!(unit = %role, dependency = %dep, state = %state, "Seal deferred");
                return Err(OpmanError::PrematureSeal {
                    unit: role,
                    reason: format!("dependency {dep} is {state}"),
                });
            }
        }
        self.opman.seal_unit(role, self.deployer)
    }

    /// Run the whole sequence for every unit, skipping completed steps.
    /// The engine must already be bootstrapped and the panel's signers
    /// confirmed.
    pub fn run(&mut self, plan: &DeploymentPlan, panel: &SignerPanel) -> Result<()> {
        plan.validate()?;
        if plan.admin == self.deployer || plan.web == Some(self.deployer) {
            return Err(OpmanError::Configuration(
                "plan hands a slot back to the deployer".into(),
            ));
        }
        if !self.opman.is_bootstrapped() {
            return Err(OpmanError::NotBootstrapped);
        }

        self.assign_engine_owners(plan, panel)?;
        for role in Role::ALL {
            if self.opman.unit_state(role)? < UnitState::Initialized {
                self.assign_owners(role, plan, panel)?;
            }
        }
        for role in Role::ALL {
            if self.opman.unit_state(role)? == UnitState::OwnersAssigned {
                self.initialise(role)?;
            }
        }
        for role in Role::ALL {
            if self.opman.unit_state(role)? == UnitState::Sealed {
                continue;
            }
            for assignment in plan.parameters_for(role) {
                self.set_parameter(role, &assignment.name, assignment.value.clone(), panel)?;
            }
        }
        for role in Role::ALL {
            if self.opman.unit_state(role)? != UnitState::Sealed {
                self.end_initialise(role)?;
            }
        }
        tracing::info!(units = Role::ALL.len(), "All units sealed");
        Ok(())
    }

    /// Current state of every bound unit, in role order.
    pub fn progress(&self) -> Vec<UnitProgress> {
        let Some(deployer) = self.opman.deployer() else {
            return Vec::new();
        };
        self.opman
            .units()
            .records()
            .map(|rec| UnitProgress {
                role: rec.role,
                state: rec.state,
                deployer_slots: rec.slots_held_by(&deployer).map(|s| s.role).collect(),
                paused: rec.paused,
            })
            .collect()
    }

    /// Every unit sealed and the engine's Admin slot handed over.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.opman.engine_owners_assigned()
            && self
                .opman
                .units()
                .records()
                .all(|r| r.state == UnitState::Sealed)
    }
}

#[cfg(test)]
mod tests {
    use opman_core::RecordingUnit;
    use opman_types::OpManConfig;

    use super::*;

    fn deployer() -> Identity {
        Identity::from_index(0xD0)
    }

    fn signers() -> Vec<Identity> {
        (1..=5).map(Identity::from_index).collect()
    }

    fn engine() -> OpMan {
        OpMan::new(
            Identity::from_index(0xFE),
            OpManConfig {
                threshold: 3,
                require_signer_confirmation: false,
                ..OpManConfig::default()
            },
        )
        .unwrap()
    }

    fn panel() -> SignerPanel {
        SignerPanel::new(signers()).unwrap()
    }

    fn ready(opman: &mut OpMan) -> Choreographer<'_> {
        let mut ch = Choreographer::new(opman, deployer());
        for unit in RecordingUnit::fleet() {
            ch.add_unit(Box::new(unit)).unwrap();
        }
        ch.bootstrap(&signers()).unwrap();
        ch
    }

    #[test]
    fn signer_panel_validation() {
        assert!(SignerPanel::new(Vec::new()).is_err());
        let s = Identity::from_index(1);
        assert!(SignerPanel::new(vec![s, s]).is_err());
        let p = panel();
        assert_eq!(p.proposer(), Identity::from_index(1));
        assert_eq!(p.approvers().len(), 4);
    }

    #[test]
    fn add_unit_rejects_duplicate_role() {
        let mut opman = engine();
        let mut ch = Choreographer::new(&mut opman, deployer());
        ch.add_unit(Box::new(RecordingUnit::new(Role::Hub, Identity::from_index(0x10))))
            .unwrap();
        let err = ch
            .add_unit(Box::new(RecordingUnit::new(Role::Hub, Identity::from_index(0x11))))
            .unwrap_err();
        assert!(matches!(err, OpmanError::DuplicateRegistration { .. }));
    }

    #[test]
    fn bootstrap_requires_every_role() {
        let mut opman = engine();
        let mut ch = Choreographer::new(&mut opman, deployer());
        ch.add_unit(Box::new(RecordingUnit::new(Role::Hub, Identity::from_index(0x10))))
            .unwrap();
        let err = ch.bootstrap(&signers()).unwrap_err();
        match err {
            OpmanError::IncompleteRoleSet { missing } => assert_eq!(missing.len(), 8),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn run_gated_uses_only_needed_approvals() {
        let mut opman = engine();
        let mut ch = ready(&mut opman);
        let receipt = ch
            .run_gated(Action::Pause { unit: Role::Sale }, &panel())
            .unwrap();
        assert_eq!(receipt.approvals, 3);
    }

    #[test]
    fn run_gated_cancels_when_quorum_is_short() {
        let mut opman = engine();
        let mut ch = ready(&mut opman);
        let small = SignerPanel::new(signers()[..2].to_vec()).unwrap();
        let err = ch
            .run_gated(Action::Pause { unit: Role::Sale }, &small)
            .unwrap_err();
        assert!(matches!(err, OpmanError::QuorumNotMet { .. }));
        assert_eq!(ch.opman().ledger().pending_count(), 0);
    }

    #[test]
    fn change_owner_mo_skips_current_holder() {
        let mut opman = engine();
        let mut ch = ready(&mut opman);
        let result = ch
            .change_owner_mo(Role::Sale, 0, deployer(), &panel())
            .unwrap();
        assert!(result.is_none());
        assert!(ch.opman().ledger().is_empty());
    }

    #[test]
    fn assign_owners_wires_peer_slots() {
        let mut opman = engine();
        let mut ch = ready(&mut opman);
        let plan = DeploymentPlan::new(Identity::from_index(0xAD));
        // Token: [Deployer, OpMan, Hub, Sale, Mvp]
        let executed = ch.assign_owners(Role::Token, &plan, &panel()).unwrap();
        assert_eq!(executed, 4);
        assert_eq!(ch.opman().owner(Role::Token, 1).unwrap(), Identity::from_index(0xFE));
        assert_eq!(ch.opman().owner(Role::Token, 2).unwrap(), Identity::from_index(0x10));
        assert_eq!(ch.opman().owner(Role::Token, 4).unwrap(), Identity::from_index(0x18));
        assert_eq!(ch.opman().unit_state(Role::Token).unwrap(), UnitState::OwnersAssigned);

        assert_eq!(ch.assign_owners(Role::Token, &plan, &panel()).unwrap(), 0);
    }

    #[test]
    fn assign_engine_owners_moves_admin_once() {
        let mut opman = engine();
        let mut ch = ready(&mut opman);
        let plan = DeploymentPlan::new(Identity::from_index(0xAD));
        assert_eq!(ch.assign_engine_owners(&plan, &panel()).unwrap(), 1);
        assert_eq!(ch.opman().engine_owner(2).unwrap(), Identity::from_index(0xAD));
        assert_eq!(ch.opman().engine_owner(0).unwrap(), deployer());
        assert!(ch.opman().engine_owners_assigned());

        assert_eq!(ch.assign_engine_owners(&plan, &panel()).unwrap(), 0);
        assert_eq!(ch.opman().ledger().len(), 1);
    }

    #[test]
    fn initialise_before_owners_assigned_fails() {
        let mut opman = engine();
        let mut ch = ready(&mut opman);
        let err = ch.initialise(Role::Escrow).unwrap_err();
        assert!(matches!(
            err,
            OpmanError::WrongUnitState {
                unit: Role::Escrow,
                ..
            }
        ));
    }

    #[test]
    fn hub_seal_waits_for_sale() {
        let mut opman = engine();
        let mut ch = ready(&mut opman);
        let plan = DeploymentPlan::new(Identity::from_index(0xAD));
        ch.assign_owners(Role::Hub, &plan, &panel()).unwrap();
        ch.initialise(Role::Hub).unwrap();
        let err = ch.end_initialise(Role::Hub).unwrap_err();
        match err {
            OpmanError::PrematureSeal { unit, reason } => {
                assert_eq!(unit, Role::Hub);
                assert!(reason.contains("Sale"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(ch.opman().unit_state(Role::Hub).unwrap(), UnitState::Initialized);
    }

    #[test]
    fn progress_reports_deployer_slots() {
        let mut opman = engine();
        let ch = ready(&mut opman);
        let progress = ch.progress();
        assert_eq!(progress.len(), 9);
        let sale = progress.iter().find(|p| p.role == Role::Sale).unwrap();
        assert_eq!(sale.state, UnitState::Constructed);
        assert_eq!(sale.deployer_slots, vec![SlotRole::OpMan, SlotRole::Hub]);
        assert!(!ch.is_complete());
    }
}
