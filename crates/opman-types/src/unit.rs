//! Managed units: roles, owner slots and the initialization lifecycle.
//!
//! ## Lifecycle
//!
//! ```text
//!   ┌─────────────┐ owners set ┌─────────────────┐ Initialise() ┌─────────────┐ EndInitialise() ┌────────┐
//!   │ CONSTRUCTED ├───────────▶│ OWNERS_ASSIGNED ├─────────────▶│ INITIALIZED ├────────────────▶│ SEALED │
//!   └─────────────┘            └─────────────────┘              └─────────────┘                 └────────┘
//! ```
//!
//! Transitions only move forward. `SEALED` is terminal: the unit keeps its
//! business and gated entry points, but initialization-only ones are gone.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{constants, Identity};

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Logical role of a managed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Role {
    Hub,
    Sale,
    Token,
    List,
    Escrow,
    GreyEscrow,
    VoteTap,
    VoteEnd,
    MvpModule,
}

impl Role {
    /// Every role, in the order bootstrap expects unit identities.
    pub const ALL: [Self; constants::UNIT_COUNT] = [
        Self::Hub,
        Self::Sale,
        Self::Token,
        Self::List,
        Self::Escrow,
        Self::GreyEscrow,
        Self::VoteTap,
        Self::VoteEnd,
        Self::MvpModule,
    ];

    /// Owner slot layout, index order.
    #[must_use]
    pub fn slot_layout(self) -> &'static [SlotRole] {
        use SlotRole as S;
        match self {
            Self::Hub => &[S::Deployer, S::OpMan, S::Admin, S::Sale, S::Web],
            Self::Sale => &[S::Deployer, S::OpMan, S::Hub],
            Self::Token => &[S::Deployer, S::OpMan, S::Hub, S::Sale, S::Mvp],
            Self::List => &[S::Deployer, S::OpMan, S::Hub, S::Token],
            Self::Escrow | Self::GreyEscrow => &[S::Deployer, S::OpMan, S::Hub, S::Sale],
            Self::VoteTap | Self::VoteEnd | Self::MvpModule => &[S::Deployer, S::OpMan, S::Hub],
        }
    }

    /// Units whose identities this unit resolves during `Initialise`.
    ///
    /// The graph is cyclic (Hub ↔ Sale, Token ↔ List). Sealing a unit requires
    /// each of these to be at least INITIALIZED.
    #[must_use]
    pub fn dependencies(self) -> &'static [Role] {
        match self {
            Self::Hub => &[
                Self::Sale,
                Self::Token,
                Self::List,
                Self::Escrow,
                Self::GreyEscrow,
                Self::VoteTap,
                Self::VoteEnd,
                Self::MvpModule,
            ],
            Self::Sale => &[
                Self::Hub,
                Self::Token,
                Self::List,
                Self::Escrow,
                Self::GreyEscrow,
            ],
            Self::Token => &[Self::List],
            Self::List => &[Self::Token],
            Self::Escrow | Self::GreyEscrow => &[],
            Self::VoteTap | Self::VoteEnd => &[Self::Hub, Self::Escrow, Self::List],
            Self::MvpModule => &[Self::Token, Self::List],
        }
    }

    /// Index of the first slot with the given label, if the unit has one.
    #[must_use]
    pub fn slot_index(self, slot: SlotRole) -> Option<usize> {
        self.slot_layout().iter().position(|s| *s == slot)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hub => "Hub",
            Self::Sale => "Sale",
            Self::Token => "Token",
            Self::List => "List",
            Self::Escrow => "Escrow",
            Self::GreyEscrow => "GreyEscrow",
            Self::VoteTap => "VoteTap",
            Self::VoteEnd => "VoteEnd",
            Self::MvpModule => "MvpModule",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// SlotRole / OwnerSlot
// ---------------------------------------------------------------------------

/// Label of an ownership position on a managed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum SlotRole {
    /// The deploying actor. Keeps this slot for the unit's whole life.
    Deployer,
    /// The operations manager itself.
    OpMan,
    /// Administrative hardware wallet.
    Admin,
    Hub,
    Sale,
    Token,
    Mvp,
    /// Web front-end account.
    Web,
}

impl SlotRole {
    /// Mandatory slots must hold their final (non-deployer) holder before seal.
    #[must_use]
    pub fn is_mandatory(self) -> bool {
        !matches!(self, Self::Deployer | Self::Web)
    }

    /// The unit role whose identity fills this slot, if any.
    #[must_use]
    pub fn peer_role(self) -> Option<Role> {
        match self {
            Self::Hub => Some(Role::Hub),
            Self::Sale => Some(Role::Sale),
            Self::Token => Some(Role::Token),
            Self::Mvp => Some(Role::MvpModule),
            Self::Deployer | Self::OpMan | Self::Admin | Self::Web => None,
        }
    }
}

impl fmt::Display for SlotRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Deployer => "Deployer",
            Self::OpMan => "OpMan",
            Self::Admin => "Admin",
            Self::Hub => "Hub",
            Self::Sale => "Sale",
            Self::Token => "Token",
            Self::Mvp => "Mvp",
            Self::Web => "Web",
        };
        f.write_str(name)
    }
}

/// Owner slot layout of the operations manager itself: the deploying actor,
/// the engine (self) and the administrative wallet.
pub const ENGINE_SLOT_LAYOUT: [SlotRole; 3] = [SlotRole::Deployer, SlotRole::OpMan, SlotRole::Admin];

/// One ownership position on a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerSlot {
    pub index: usize,
    pub role: SlotRole,
    pub holder: Identity,
}

// ---------------------------------------------------------------------------
// UnitState
// ---------------------------------------------------------------------------

/// Initialization state of a managed unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum UnitState {
    /// Exists; every slot is held by the deploying actor.
    Constructed,
    /// Every mandatory slot holds its final holder.
    OwnersAssigned,
    /// Peer identities resolved and recorded by the unit.
    Initialized,
    /// Initialization phase permanently closed.
    Sealed,
}

impl UnitState {
    /// Can a unit move from this state to `target`?
    ///
    /// Re-running `Initialise` on an INITIALIZED unit is allowed and keeps the
    /// state unchanged.
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Constructed, Self::OwnersAssigned)
                | (Self::OwnersAssigned | Self::Initialized, Self::Initialized)
                | (Self::Initialized, Self::Sealed)
        )
    }

    /// Whether the unit has resolved its peers (INITIALIZED or SEALED).
    #[must_use]
    pub fn is_initialized(self) -> bool {
        self >= Self::Initialized
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constructed => write!(f, "CONSTRUCTED"),
            Self::OwnersAssigned => write!(f, "OWNERS_ASSIGNED"),
            Self::Initialized => write!(f, "INITIALIZED"),
            Self::Sealed => write!(f, "SEALED"),
        }
    }
}

// ---------------------------------------------------------------------------
// ParamValue
// ---------------------------------------------------------------------------

/// Value of a business parameter (caps, prices, accounts, switches).
///
/// The engine stores parameters opaquely; their meaning belongs to the unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum ParamValue {
    Amount(Decimal),
    Count(u64),
    Account(Identity),
    Flag(bool),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Amount(d) => write!(f, "{d}"),
            Self::Count(n) => write!(f, "{n}"),
            Self::Account(id) => write!(f, "{id}"),
            Self::Flag(b) => write!(f, "{b}"),
        }
    }
}

// ---------------------------------------------------------------------------
// UnitRecord
// ---------------------------------------------------------------------------

/// Registry view of a managed unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRecord {
    pub role: Role,
    pub identity: Identity,
    pub state: UnitState,
    /// Owner slots in index order.
    pub slots: Vec<OwnerSlot>,
    /// Business parameters set during initialization or by gated operation.
    pub parameters: BTreeMap<String, ParamValue>,
    pub paused: bool,
}

impl UnitRecord {
    /// A freshly constructed unit: every slot held by `deployer`.
    #[must_use]
    pub fn constructed(role: Role, identity: Identity, deployer: Identity) -> Self {
        let slots = role
            .slot_layout()
            .iter()
            .enumerate()
            .map(|(index, slot)| OwnerSlot {
                index,
                role: *slot,
                holder: deployer,
            })
            .collect();
        Self {
            role,
            identity,
            state: UnitState::Constructed,
            slots,
            parameters: BTreeMap::new(),
            paused: false,
        }
    }

    #[must_use]
    pub fn slot(&self, index: usize) -> Option<&OwnerSlot> {
        self.slots.get(index)
    }

    /// Mandatory slots still held by `deployer`.
    #[must_use]
    pub fn slots_held_by<'a>(&'a self, deployer: &'a Identity) -> impl Iterator<Item = &'a OwnerSlot> + 'a {
        self.slots
            .iter()
            .filter(move |s| s.role.is_mandatory() && s.holder == *deployer)
    }

    /// Whether every mandatory slot has moved away from `deployer`.
    #[must_use]
    pub fn owners_assigned(&self, deployer: &Identity) -> bool {
        self.slots_held_by(deployer).next().is_none()
    }
}
