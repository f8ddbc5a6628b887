//! The managed-unit collaborator seam.

use opman_types::{Identity, ParamValue, Result, Role, SlotRole};

use crate::unit_registry::PeerResolver;

/// A business unit governed by OpMan.
///
/// Units are opaque: the choreographer only needs their identity, their
/// owner slot layout and an `Initialise` entry point that wires peers.
pub trait ManagedUnit {
    fn role(&self) -> Role;

    fn identity(&self) -> Identity;

    /// Ordered owner slots. Must match the role's layout.
    fn owner_slots(&self) -> &'static [SlotRole] {
        self.role().slot_layout()
    }

    /// Resolve peers through `peers` and wire them in. May be called again
    /// after an interrupted run.
    fn initialise(&mut self, peers: &dyn PeerResolver) -> Result<()>;

    /// A parameter was set on this unit.
    fn on_parameter(&mut self, _name: &str, _value: &ParamValue) {}

    /// The unit was paused or resumed.
    fn on_paused(&mut self, _paused: bool) {}
}

#[cfg(any(test, feature = "test-helpers"))]
pub use recording::{Recording, RecordingUnit};

#[cfg(any(test, feature = "test-helpers"))]
mod recording {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::{Identity, ManagedUnit, ParamValue, PeerResolver, Result, Role};

    /// What a [`RecordingUnit`] has observed.
    #[derive(Debug, Clone, Default)]
    pub struct Recording {
        pub peers: BTreeMap<Role, Identity>,
        pub parameters: BTreeMap<String, ParamValue>,
        pub paused: bool,
        pub initialise_calls: usize,
    }

    /// Test unit that resolves every dependency of its role and records what
    /// it sees. The recording stays readable after the unit is boxed.
    #[derive(Debug)]
    pub struct RecordingUnit {
        role: Role,
        identity: Identity,
        recording: Arc<Mutex<Recording>>,
    }

    impl RecordingUnit {
        pub fn new(role: Role, identity: Identity) -> Self {
            Self {
                role,
                identity,
                recording: Arc::new(Mutex::new(Recording::default())),
            }
        }

        /// One unit per role, identities `0x10..` in role order.
        pub fn fleet() -> Vec<Self> {
            Role::ALL
                .into_iter()
                .zip(0x10u8..)
                .map(|(role, n)| Self::new(role, Identity::from_index(n)))
                .collect()
        }

        /// Shared view of the recording.
        pub fn recording(&self) -> Arc<Mutex<Recording>> {
            Arc::clone(&self.recording)
        }
    }

    impl ManagedUnit for RecordingUnit {
        fn role(&self) -> Role {
            self.role
        }

        fn identity(&self) -> Identity {
            self.identity
        }

        fn initialise(&mut self, peers: &dyn PeerResolver) -> Result<()> {
            let mut resolved = BTreeMap::new();
            for dep in self.role.dependencies() {
                resolved.insert(*dep, peers.resolve(*dep)?);
            }
            let mut rec = self.recording.lock();
            rec.peers = resolved;
            rec.initialise_calls += 1;
            Ok(())
        }

        fn on_parameter(&mut self, name: &str, value: &ParamValue) {
            self.recording
                .lock()
                .parameters
                .insert(name.to_string(), value.clone());
        }

        fn on_paused(&mut self, paused: bool) {
            self.recording.lock().paused = paused;
        }
    }
}
