//! Managed-unit registry: role → identity bindings, owner slots and
//! per-unit initialization state.
//!
//! Bindings are written once at bootstrap and never change. Slot holders and
//! lifecycle state change only through the engine; the `check_*` methods let
//! the engine validate a mutation fully before applying it, so a failed call
//! leaves the registry untouched.

use std::collections::{BTreeMap, BTreeSet};

use opman_types::{
    Identity, OpmanError, ParamValue, Result, Role, UnitRecord, UnitState,
};

/// Read-only peer lookup handed to units during `Initialise`.
pub trait PeerResolver {
    /// Identity bound to `role`.
    ///
    /// # Errors
    /// Returns `UnboundRole` if the role has not been registered.
    fn resolve(&self, role: Role) -> Result<Identity>;
}

/// Registry of the managed units bound at bootstrap.
#[derive(Debug, Default)]
pub struct UnitRegistry {
    units: BTreeMap<Role, UnitRecord>,
    /// The deploying actor; initial holder of every slot.
    deployer: Option<Identity>,
}

impl UnitRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a registration without touching the registry.
    ///
    /// # Errors
    /// - `DuplicateRegistration` if units are already bound, or two roles
    ///   share an identity
    /// - `IncompleteRoleSet` if any role is missing
    /// - `InvalidOperation` for zero identities or a unit bound to the deployer
    pub fn check_registration(
        &self,
        deployer: Identity,
        units: &BTreeMap<Role, Identity>,
    ) -> Result<()> {
        if self.deployer.is_some() || !self.units.is_empty() {
            return Err(OpmanError::DuplicateRegistration {
                reason: "units already registered".into(),
            });
        }
        if deployer.is_zero() {
            return Err(OpmanError::InvalidOperation {
                reason: "deployer must not be the zero identity".into(),
            });
        }
        let missing: Vec<Role> = Role::ALL
            .into_iter()
            .filter(|r| !units.contains_key(r))
            .collect();
        if !missing.is_empty() {
            return Err(OpmanError::IncompleteRoleSet { missing });
        }
        let mut seen = BTreeSet::new();
        for (role, id) in units {
            if id.is_zero() {
                return Err(OpmanError::InvalidOperation {
                    reason: format!("{role} bound to the zero identity"),
                });
            }
            if *id == deployer {
                return Err(OpmanError::InvalidOperation {
                    reason: format!("{role} bound to the deployer identity"),
                });
            }
            if !seen.insert(*id) {
                return Err(OpmanError::DuplicateRegistration {
                    reason: format!("{id} bound to more than one role"),
                });
            }
        }
        Ok(())
    }

    /// Bind every role to its unit identity. Callable once.
    pub fn register_units(
        &mut self,
        deployer: Identity,
        units: &BTreeMap<Role, Identity>,
    ) -> Result<()> {
        self.check_registration(deployer, units)?;
        for (role, id) in units {
            self.units
                .insert(*role, UnitRecord::constructed(*role, *id, deployer));
        }
        self.deployer = Some(deployer);
        Ok(())
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.deployer.is_some()
    }

    #[must_use]
    pub fn deployer(&self) -> Option<Identity> {
        self.deployer
    }

    /// # Errors
    /// Returns `UnboundRole` if `role` is not registered.
    pub fn record(&self, role: Role) -> Result<&UnitRecord> {
        self.units.get(&role).ok_or(OpmanError::UnboundRole(role))
    }

    fn record_mut(&mut self, role: Role) -> Result<&mut UnitRecord> {
        self.units.get_mut(&role).ok_or(OpmanError::UnboundRole(role))
    }

    /// All unit records in role order.
    pub fn records(&self) -> impl Iterator<Item = &UnitRecord> {
        self.units.values()
    }

    /// The role bound to `identity`, if any.
    #[must_use]
    pub fn role_of(&self, identity: &Identity) -> Option<Role> {
        self.units
            .values()
            .find(|r| r.identity == *identity)
            .map(|r| r.role)
    }

    /// Current holder of `(role, slot)`.
    ///
    /// # Errors
    /// `UnboundRole` or `InvalidSlot`.
    pub fn owner(&self, role: Role, slot: usize) -> Result<Identity> {
        self.record(role)?
            .slot(slot)
            .map(|s| s.holder)
            .ok_or(OpmanError::InvalidSlot { unit: role, slot })
    }

    /// # Errors
    /// Returns `UnboundRole` if `role` is not registered.
    pub fn state(&self, role: Role) -> Result<UnitState> {
        Ok(self.record(role)?.state)
    }

    /// Validate a slot change.
    ///
    /// # Errors
    /// - `UnboundRole` / `InvalidSlot` for an unknown target
    /// - `InvalidOperation` for a zero holder, or for handing a mandatory
    ///   slot of a sealed unit back to the deployer
    pub fn check_change_owner(&self, role: Role, slot: usize, new_holder: Identity) -> Result<()> {
        let rec = self.record(role)?;
        let target = rec
            .slot(slot)
            .ok_or(OpmanError::InvalidSlot { unit: role, slot })?;
        if new_holder.is_zero() {
            return Err(OpmanError::InvalidOperation {
                reason: format!("{role} slot {slot} cannot be left without a holder"),
            });
        }
        if rec.state == UnitState::Sealed
            && target.role.is_mandatory()
            && Some(new_holder) == self.deployer
        {
            return Err(OpmanError::InvalidOperation {
                reason: format!("sealed {role} cannot return {} slot to the deployer", target.role),
            });
        }
        Ok(())
    }

    /// Move `(role, slot)` to `new_holder` and return the previous holder.
    ///
    /// Advances a CONSTRUCTED unit to OWNERS_ASSIGNED once no mandatory slot
    /// is held by the deployer.
    pub fn change_owner(&mut self, role: Role, slot: usize, new_holder: Identity) -> Result<Identity> {
        self.check_change_owner(role, slot, new_holder)?;
        let deployer = self.deployer.ok_or(OpmanError::NotBootstrapped)?;
        let rec = self.record_mut(role)?;
        let previous = std::mem::replace(&mut rec.slots[slot].holder, new_holder);
        if rec.state == UnitState::Constructed && rec.owners_assigned(&deployer) {
            rec.state = UnitState::OwnersAssigned;
            tracing::debug!(unit = %role, "All mandatory owner slots assigned");
        }
        Ok(previous)
    }

    /// Validate `Initialise` for `role`.
    ///
    /// # Errors
    /// - `UnitSealed` once sealed
    /// - `WrongUnitState` before owners are assigned
    /// - `InvalidOperation` if a mandatory slot has since been handed back
    ///   to the deployer
    pub fn check_initialise(&self, role: Role) -> Result<()> {
        let rec = self.record(role)?;
        let state = rec.state;
        if state == UnitState::Sealed {
            return Err(OpmanError::UnitSealed(role));
        }
        if !state.can_transition_to(UnitState::Initialized) {
            return Err(OpmanError::WrongUnitState {
                unit: role,
                expected: UnitState::OwnersAssigned,
                actual: state,
            });
        }
        let deployer = self.deployer.ok_or(OpmanError::NotBootstrapped)?;
        let held: Vec<String> = rec
            .slots_held_by(&deployer)
            .map(|s| s.role.to_string())
            .collect();
        if !held.is_empty() {
            return Err(OpmanError::InvalidOperation {
                reason: format!("{role} slots back with the deployer: {}", held.join(", ")),
            });
        }
        Ok(())
    }

    pub fn mark_initialised(&mut self, role: Role) -> Result<()> {
        self.check_initialise(role)?;
        self.record_mut(role)?.state = UnitState::Initialized;
        Ok(())
    }

    /// Validate the unit's own pre-seal conditions.
    ///
    /// Cross-unit ordering is not checked here.
    ///
    /// # Errors
    /// - `UnitSealed` if already sealed
    /// - `PrematureSeal` if not INITIALIZED, or a mandatory slot is still
    ///   held by the deployer
    pub fn check_seal(&self, role: Role) -> Result<()> {
        let rec = self.record(role)?;
        if rec.state == UnitState::Sealed {
            return Err(OpmanError::UnitSealed(role));
        }
        if rec.state != UnitState::Initialized {
            return Err(OpmanError::PrematureSeal {
                unit: role,
                reason: format!("unit is {}, expected {}", rec.state, UnitState::Initialized),
            });
        }
        let deployer = self.deployer.ok_or(OpmanError::NotBootstrapped)?;
        let held: Vec<String> = rec
            .slots_held_by(&deployer)
            .map(|s| s.role.to_string())
            .collect();
        if !held.is_empty() {
            return Err(OpmanError::PrematureSeal {
                unit: role,
                reason: format!("slots still held by deployer: {}", held.join(", ")),
            });
        }
        Ok(())
    }

    pub fn seal(&mut self, role: Role) -> Result<()> {
        self.check_seal(role)?;
        self.record_mut(role)?.state = UnitState::Sealed;
        Ok(())
    }

    /// Store a parameter value, returning the previous one.
    pub fn set_parameter(
        &mut self,
        role: Role,
        name: &str,
        value: ParamValue,
    ) -> Result<Option<ParamValue>> {
        if name.is_empty() {
            return Err(OpmanError::InvalidOperation {
                reason: "parameter name must not be empty".into(),
            });
        }
        Ok(self
            .record_mut(role)?
            .parameters
            .insert(name.to_string(), value))
    }

    /// # Errors
    /// `InvalidOperation` if the unit is already in the requested pause state.
    pub fn check_pause(&self, role: Role, paused: bool) -> Result<()> {
        let rec = self.record(role)?;
        if rec.paused == paused {
            let what = if paused { "paused" } else { "running" };
            return Err(OpmanError::InvalidOperation {
                reason: format!("{role} is already {what}"),
            });
        }
        Ok(())
    }

    pub fn set_paused(&mut self, role: Role, paused: bool) -> Result<()> {
        self.check_pause(role, paused)?;
        self.record_mut(role)?.paused = paused;
        Ok(())
    }
}

impl PeerResolver for UnitRegistry {
    fn resolve(&self, role: Role) -> Result<Identity> {
        Ok(self.record(role)?.identity)
    }
}

#[cfg(test)]
mod tests {
    use opman_types::SlotRole;
    use rust_decimal::Decimal;

    use super::*;

    fn deployer() -> Identity {
        Identity::from_index(0xD0)
    }

    fn unit_map() -> BTreeMap<Role, Identity> {
        Role::ALL
            .into_iter()
            .zip(0x10u8..)
            .map(|(r, n)| (r, Identity::from_index(n)))
            .collect()
    }

    fn registered() -> UnitRegistry {
        let mut reg = UnitRegistry::new();
        reg.register_units(deployer(), &unit_map()).unwrap();
        reg
    }

    fn assign_all(reg: &mut UnitRegistry, role: Role) {
        for (i, slot) in role.slot_layout().iter().enumerate() {
            if slot.is_mandatory() {
                reg.change_owner(role, i, Identity::from_index(0xE0 + i as u8))
                    .unwrap();
            }
        }
    }

    #[test]
    fn register_and_resolve() {
        let reg = registered();
        assert!(reg.is_bound());
        assert_eq!(reg.resolve(Role::Hub).unwrap(), Identity::from_index(0x10));
        assert_eq!(reg.role_of(&Identity::from_index(0x11)), Some(Role::Sale));
        assert_eq!(reg.state(Role::Token).unwrap(), UnitState::Constructed);
        assert_eq!(reg.owner(Role::Token, 1).unwrap(), deployer());
    }

    #[test]
    fn resolve_before_registration_fails() {
        let reg = UnitRegistry::new();
        let err = reg.resolve(Role::Token).unwrap_err();
        assert!(matches!(err, OpmanError::UnboundRole(Role::Token)));
    }

    #[test]
    fn double_registration_fails() {
        let mut reg = registered();
        let err = reg.register_units(deployer(), &unit_map()).unwrap_err();
        assert!(matches!(err, OpmanError::DuplicateRegistration { .. }));
    }

    #[test]
    fn missing_role_fails() {
        let mut map = unit_map();
        map.remove(&Role::VoteEnd);
        let mut reg = UnitRegistry::new();
        let err = reg.register_units(deployer(), &map).unwrap_err();
        match err {
            OpmanError::IncompleteRoleSet { missing } => assert_eq!(missing, vec![Role::VoteEnd]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!reg.is_bound());
    }

    #[test]
    fn shared_identity_fails() {
        let mut map = unit_map();
        let hub = map[&Role::Hub];
        map.insert(Role::Sale, hub);
        let err = UnitRegistry::new().check_registration(deployer(), &map).unwrap_err();
        assert!(matches!(err, OpmanError::DuplicateRegistration { .. }));
    }

    #[test]
    fn unit_bound_to_deployer_fails() {
        let mut map = unit_map();
        map.insert(Role::List, deployer());
        let err = UnitRegistry::new().check_registration(deployer(), &map).unwrap_err();
        assert!(matches!(err, OpmanError::InvalidOperation { .. }));
    }

    #[test]
    fn change_owner_advances_state_once_mandatory_slots_move() {
        let mut reg = registered();
        // Sale: Deployer, OpMan, Hub
        reg.change_owner(Role::Sale, 1, Identity::from_index(0xAA)).unwrap();
        assert_eq!(reg.state(Role::Sale).unwrap(), UnitState::Constructed);
        let prev = reg.change_owner(Role::Sale, 2, Identity::from_index(0xBB)).unwrap();
        assert_eq!(prev, deployer());
        assert_eq!(reg.state(Role::Sale).unwrap(), UnitState::OwnersAssigned);
        assert_eq!(reg.owner(Role::Sale, 0).unwrap(), deployer());
    }

    #[test]
    fn change_owner_invalid_slot() {
        let mut reg = registered();
        let err = reg
            .change_owner(Role::VoteTap, 3, Identity::from_index(1))
            .unwrap_err();
        assert!(matches!(err, OpmanError::InvalidSlot { unit: Role::VoteTap, slot: 3 }));
    }

    #[test]
    fn change_owner_rejects_zero_holder() {
        let mut reg = registered();
        let err = reg.change_owner(Role::Hub, 1, Identity::ZERO).unwrap_err();
        assert!(matches!(err, OpmanError::InvalidOperation { .. }));
        assert_eq!(reg.owner(Role::Hub, 1).unwrap(), deployer());
    }

    #[test]
    fn initialise_requires_owners_assigned() {
        let mut reg = registered();
        let err = reg.mark_initialised(Role::Token).unwrap_err();
        assert!(matches!(
            err,
            OpmanError::WrongUnitState {
                actual: UnitState::Constructed,
                ..
            }
        ));
        assign_all(&mut reg, Role::Token);
        reg.mark_initialised(Role::Token).unwrap();
        // Re-initialising refreshes without changing state.
        reg.mark_initialised(Role::Token).unwrap();
        assert_eq!(reg.state(Role::Token).unwrap(), UnitState::Initialized);
    }

    #[test]
    fn initialise_rejects_slot_returned_to_deployer() {
        let mut reg = registered();
        assign_all(&mut reg, Role::Sale);
        assert_eq!(reg.state(Role::Sale).unwrap(), UnitState::OwnersAssigned);
        let opman = Role::Sale.slot_index(SlotRole::OpMan).unwrap();
        reg.change_owner(Role::Sale, opman, deployer()).unwrap();
        // Lifecycle state only moves forward, but Initialise still refuses.
        assert_eq!(reg.state(Role::Sale).unwrap(), UnitState::OwnersAssigned);
        match reg.mark_initialised(Role::Sale).unwrap_err() {
            OpmanError::InvalidOperation { reason } => assert!(reason.contains("OpMan"), "{reason}"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(reg.state(Role::Sale).unwrap(), UnitState::OwnersAssigned);

        reg.change_owner(Role::Sale, opman, Identity::from_index(0xEE)).unwrap();
        reg.mark_initialised(Role::Sale).unwrap();
        assert_eq!(reg.state(Role::Sale).unwrap(), UnitState::Initialized);
    }

    #[test]
    fn seal_requires_initialised() {
        let mut reg = registered();
        assign_all(&mut reg, Role::Escrow);
        let err = reg.seal(Role::Escrow).unwrap_err();
        assert!(matches!(err, OpmanError::PrematureSeal { unit: Role::Escrow, .. }));
        reg.mark_initialised(Role::Escrow).unwrap();
        reg.seal(Role::Escrow).unwrap();
        assert_eq!(reg.state(Role::Escrow).unwrap(), UnitState::Sealed);
        assert!(matches!(
            reg.seal(Role::Escrow).unwrap_err(),
            OpmanError::UnitSealed(Role::Escrow)
        ));
        assert!(matches!(
            reg.mark_initialised(Role::Escrow).unwrap_err(),
            OpmanError::UnitSealed(Role::Escrow)
        ));
    }

    #[test]
    fn seal_rejects_slot_returned_to_deployer() {
        let mut reg = registered();
        assign_all(&mut reg, Role::Hub);
        reg.mark_initialised(Role::Hub).unwrap();
        let admin = Role::Hub.slot_index(SlotRole::Admin).unwrap();
        reg.change_owner(Role::Hub, admin, deployer()).unwrap();
        let err = reg.seal(Role::Hub).unwrap_err();
        match err {
            OpmanError::PrematureSeal { reason, .. } => assert!(reason.contains("Admin"), "{reason}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sealed_unit_cannot_hand_mandatory_slot_to_deployer() {
        let mut reg = registered();
        assign_all(&mut reg, Role::VoteEnd);
        reg.mark_initialised(Role::VoteEnd).unwrap();
        reg.seal(Role::VoteEnd).unwrap();
        let err = reg.check_change_owner(Role::VoteEnd, 2, deployer()).unwrap_err();
        assert!(matches!(err, OpmanError::InvalidOperation { .. }));
        // Other holders are fine after seal.
        reg.change_owner(Role::VoteEnd, 2, Identity::from_index(0x77)).unwrap();
    }

    #[test]
    fn parameters_and_pause() {
        let mut reg = registered();
        let prev = reg
            .set_parameter(Role::Hub, "usd_ether_price", ParamValue::Amount(Decimal::new(2000, 0)))
            .unwrap();
        assert!(prev.is_none());
        let prev = reg
            .set_parameter(Role::Hub, "usd_ether_price", ParamValue::Amount(Decimal::new(2100, 0)))
            .unwrap();
        assert_eq!(prev, Some(ParamValue::Amount(Decimal::new(2000, 0))));
        assert!(reg.set_parameter(Role::Hub, "", ParamValue::Flag(true)).is_err());

        reg.set_paused(Role::Sale, true).unwrap();
        assert!(reg.record(Role::Sale).unwrap().paused);
        assert!(reg.set_paused(Role::Sale, true).is_err());
        reg.set_paused(Role::Sale, false).unwrap();
    }
}
