//! Signer registry: who may propose and approve gated operations.
//!
//! Signers move through `PENDING → ACTIVE → REMOVED`. Only ACTIVE signers
//! count toward quorum. A removed signer may later be re-added through a
//! fresh `AddSigner` operation.

use std::collections::BTreeMap;
use std::fmt;

use opman_types::{Identity, OpmanError, Result};
use serde::{Deserialize, Serialize};

/// Status of a registered signer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignerStatus {
    /// Installed, awaiting confirmation by the signer itself.
    Pending,
    /// Counts toward quorum.
    Active,
    /// Removed by a gated operation.
    Removed,
}

impl fmt::Display for SignerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Removed => write!(f, "REMOVED"),
        }
    }
}

/// The set of signers known to the engine.
#[derive(Debug, Default)]
pub struct SignerRegistry {
    signers: BTreeMap<Identity, SignerStatus>,
    /// New signers start PENDING when set; ACTIVE otherwise.
    require_confirmation: bool,
}

impl SignerRegistry {
    #[must_use]
    pub fn new(require_confirmation: bool) -> Self {
        Self {
            signers: BTreeMap::new(),
            require_confirmation,
        }
    }

    fn initial_status(&self) -> SignerStatus {
        if self.require_confirmation {
            SignerStatus::Pending
        } else {
            SignerStatus::Active
        }
    }

    /// Validate an initial signer set without touching the registry.
    ///
    /// # Errors
    /// - `DuplicateRegistration` if signers were already installed
    /// - `InvalidOperation` for an empty set or a zero identity
    /// - `DuplicateSigner` if an identity appears twice
    pub fn check_initial(&self, signers: &[Identity]) -> Result<()> {
        if !self.signers.is_empty() {
            return Err(OpmanError::DuplicateRegistration {
                reason: "initial signer set already installed".into(),
            });
        }
        if signers.is_empty() {
            return Err(OpmanError::InvalidOperation {
                reason: "initial signer set is empty".into(),
            });
        }
        let mut seen = std::collections::BTreeSet::new();
        for s in signers {
            if s.is_zero() {
                return Err(OpmanError::InvalidOperation {
                    reason: "zero identity cannot be a signer".into(),
                });
            }
            if !seen.insert(*s) {
                return Err(OpmanError::DuplicateSigner(*s));
            }
        }
        Ok(())
    }

    /// Install the bootstrap signer set. Only valid on an empty registry.
    pub fn install_initial(&mut self, signers: &[Identity]) -> Result<()> {
        self.check_initial(signers)?;
        let status = self.initial_status();
        for s in signers {
            self.signers.insert(*s, status);
        }
        Ok(())
    }

    /// The signer confirms control of its identity: PENDING → ACTIVE.
    ///
    /// # Errors
    /// - `UnknownSigner` if not registered or removed
    /// - `DuplicateSigner` if already active
    pub fn confirm(&mut self, signer: Identity) -> Result<()> {
        let status = self
            .signers
            .get_mut(&signer)
            .ok_or(OpmanError::UnknownSigner(signer))?;
        match *status {
            SignerStatus::Pending => {
                *status = SignerStatus::Active;
                Ok(())
            }
            SignerStatus::Active => Err(OpmanError::DuplicateSigner(signer)),
            SignerStatus::Removed => Err(OpmanError::UnknownSigner(signer)),
        }
    }

    /// Check that `signer` could be added.
    pub fn check_add(&self, signer: Identity) -> Result<()> {
        if signer.is_zero() {
            return Err(OpmanError::InvalidOperation {
                reason: "zero identity cannot be a signer".into(),
            });
        }
        match self.signers.get(&signer) {
            Some(SignerStatus::Pending | SignerStatus::Active) => {
                Err(OpmanError::DuplicateSigner(signer))
            }
            Some(SignerStatus::Removed) | None => Ok(()),
        }
    }

    /// Add a signer (or re-add a removed one).
    pub fn add(&mut self, signer: Identity) -> Result<()> {
        self.check_add(signer)?;
        let status = self.initial_status();
        self.signers.insert(signer, status);
        Ok(())
    }

    /// Check that `signer` could be removed while keeping `threshold` reachable.
    ///
    /// # Errors
    /// - `UnknownSigner` if not registered or already removed
    /// - `ThresholdUnreachable` if fewer than `threshold` signers would remain
    pub fn check_remove(&self, signer: Identity, threshold: usize) -> Result<()> {
        match self.signers.get(&signer) {
            Some(SignerStatus::Pending | SignerStatus::Active) => {}
            Some(SignerStatus::Removed) | None => return Err(OpmanError::UnknownSigner(signer)),
        }
        let remaining = self.registered_count() - 1;
        if remaining < threshold {
            return Err(OpmanError::ThresholdUnreachable {
                threshold,
                signers: remaining,
            });
        }
        Ok(())
    }

    /// Remove a signer. Its approvals stop counting immediately.
    pub fn remove(&mut self, signer: Identity, threshold: usize) -> Result<()> {
        self.check_remove(signer, threshold)?;
        self.signers.insert(signer, SignerStatus::Removed);
        Ok(())
    }

    #[must_use]
    pub fn status(&self, signer: &Identity) -> Option<SignerStatus> {
        self.signers.get(signer).copied()
    }

    #[must_use]
    pub fn is_active(&self, signer: &Identity) -> bool {
        self.status(signer) == Some(SignerStatus::Active)
    }

    /// Fail unless `signer` is ACTIVE.
    ///
    /// # Errors
    /// - `SignerNotConfirmed` for a PENDING signer
    /// - `UnauthorizedSigner` otherwise
    pub fn require_active(&self, signer: Identity) -> Result<()> {
        match self.status(&signer) {
            Some(SignerStatus::Active) => Ok(()),
            Some(SignerStatus::Pending) => Err(OpmanError::SignerNotConfirmed(signer)),
            Some(SignerStatus::Removed) | None => Err(OpmanError::UnauthorizedSigner(signer)),
        }
    }

    /// Number of ACTIVE signers.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.signers
            .values()
            .filter(|s| **s == SignerStatus::Active)
            .count()
    }

    /// Number of PENDING or ACTIVE signers.
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.signers
            .values()
            .filter(|s| **s != SignerStatus::Removed)
            .count()
    }

    /// ACTIVE signers in identity order.
    pub fn active_signers(&self) -> impl Iterator<Item = Identity> + '_ {
        self.signers
            .iter()
            .filter(|(_, s)| **s == SignerStatus::Active)
            .map(|(id, _)| *id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }
}
