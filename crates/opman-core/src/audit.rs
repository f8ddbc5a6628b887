//! Append-only audit log of engine state transitions.

use chrono::Utc;
use opman_types::{AuditEvent, AuditEventId, AuditEventKind, Identity, OperationId, Result};

/// In-memory audit trail. Entries are never modified or removed.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Vec<AuditEvent>,
}

impl AuditLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return its sequence number.
    pub fn record(
        &mut self,
        kind: AuditEventKind,
        actor: Option<Identity>,
        op_id: Option<OperationId>,
        detail: impl Into<String>,
    ) -> u64 {
        let seq = self.entries.len() as u64;
        self.entries.push(AuditEvent {
            id: AuditEventId::new(),
            seq,
            at: Utc::now(),
            kind,
            actor,
            op_id,
            detail: detail.into(),
        });
        seq
    }

    #[must_use]
    pub fn entries(&self) -> &[AuditEvent] {
        &self.entries
    }

    /// Entries concerning one operation, in log order.
    pub fn for_operation(&self, op_id: OperationId) -> impl Iterator<Item = &AuditEvent> {
        self.entries
            .iter()
            .filter(move |e| e.op_id == Some(op_id))
    }

    /// Count of entries of a given kind.
    #[must_use]
    pub fn count(&self, kind: AuditEventKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    /// One JSON object per line, in log order.
    pub fn to_json_lines(&self) -> Result<String> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        Ok(out)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
