//! Identifiers used throughout OpMan.
//!
//! Account identities are raw 20-byte addresses supplied by the execution
//! environment. Operation ids are monotonic counters handed out by the
//! ledger; audit entries use UUIDv7 for time-ordered sorting.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{OpmanError, Result};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// An account identity: a managed unit, a signer, the deployer or an
/// external wallet.
///
/// Serialized as a `0x`-prefixed hex string so plans and audit exports stay
/// readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(pub [u8; 20]);

impl Identity {
    /// The all-zero identity. Never a valid signer or slot holder.
    pub const ZERO: Self = Self([0u8; 20]);

    /// Parse a hex identity, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let raw = hex::decode(digits).map_err(|e| OpmanError::InvalidIdentity {
            reason: format!("{s}: {e}"),
        })?;
        let bytes: [u8; 20] = raw.try_into().map_err(|v: Vec<u8>| OpmanError::InvalidIdentity {
            reason: format!("{s}: expected 20 bytes, got {}", v.len()),
        })?;
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

/// Random identities for tests. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl Identity {
    #[must_use]
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Deterministic identity whose last byte is `n`.
    #[must_use]
    pub fn from_index(n: u8) -> Self {
        let mut bytes = [0u8; 20];
        bytes[0] = 0xA0;
        bytes[19] = n;
        Self(bytes)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl TryFrom<String> for Identity {
    type Error = OpmanError;

    fn try_from(s: String) -> Result<Self> {
        Self::from_hex(&s)
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.to_string()
    }
}

// ---------------------------------------------------------------------------
// OperationId
// ---------------------------------------------------------------------------

/// Numeric id of a gated operation, returned at proposal time.
///
/// Ids start at 1 and increase by one per proposal; they are never reused,
/// including for cancelled operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct OperationId(pub u64);

impl OperationId {
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// AuditEventId
// ---------------------------------------------------------------------------

/// Unique identifier of an audit entry. Uses UUIDv7 for time-ordered sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AuditEventId(pub Uuid);

impl AuditEventId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for AuditEventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AuditEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "audit:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_hex_roundtrip() {
        let id = Identity::from_index(7);
        let text = id.to_string();
        assert!(text.starts_with("0xa0"));
        assert_eq!(Identity::from_hex(&text).unwrap(), id);
        assert_eq!(Identity::from_hex(text.trim_start_matches("0x")).unwrap(), id);
    }

    #[test]
    fn identity_from_hex_rejects_wrong_length() {
        let err = Identity::from_hex("0xdeadbeef").unwrap_err();
        assert!(matches!(err, OpmanError::InvalidIdentity { .. }));
    }

    #[test]
    fn identity_from_hex_rejects_garbage() {
        let err = Identity::from_hex("0xzz").unwrap_err();
        assert!(matches!(err, OpmanError::InvalidIdentity { .. }));
    }

    #[test]
    fn zero_identity() {
        assert!(Identity::ZERO.is_zero());
        assert!(!Identity::from_index(1).is_zero());
    }

    #[test]
    fn random_identities_differ() {
        assert_ne!(Identity::random(), Identity::random());
    }

    #[test]
    fn operation_id_next() {
        assert_eq!(OperationId(1).next(), OperationId(2));
        assert_eq!(OperationId(41).to_string(), "op:41");
    }

    #[test]
    fn audit_event_ids_are_ordered() {
        let a = AuditEventId::new();
        let b = AuditEventId::new();
        assert!(a < b);
    }

    #[test]
    fn identity_serde_roundtrip() {
        let id = Identity::from_index(3);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
