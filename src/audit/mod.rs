//! Audit Trail
//!
//! Tamper-evident audit trail for ledger transactions. Every entry stores the
//! SHA-256 hash of its content chained to the previous entry's hash, and the
//! hash is recorded in the event that appended it. Replaying the events and
//! re-hashing therefore detects any edit to stored history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::TransactionStatus;

/// `previous_hash` of the first entry in every chain
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    StatusChanged,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::StatusChanged => "status_changed",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Content of an entry before it is hashed into the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub performed_by: Uuid,
    pub previous_status: Option<TransactionStatus>,
    pub new_status: TransactionStatus,
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One entry of a transaction's audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u32,
    pub action: AuditAction,
    pub performed_by: Uuid,
    pub previous_status: Option<TransactionStatus>,
    pub new_status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub previous_hash: String,
    pub hash: String,
}

/// Append-only, hash-chained list of audit entries for one subject
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTrail {
    subject_id: Uuid,
    entries: Vec<AuditEntry>,
}

impl AuditTrail {
    pub fn new(subject_id: Uuid) -> Self {
        Self {
            subject_id,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn last_hash(&self) -> &str {
        self.entries
            .last()
            .map(|e| e.hash.as_str())
            .unwrap_or(GENESIS_HASH)
    }

    /// Hash the record would receive if appended now
    pub fn next_hash(&self, record: &AuditRecord) -> String {
        entry_hash(
            self.subject_id,
            self.entries.len() as u32 + 1,
            record,
            self.last_hash(),
        )
    }

    /// Append a record with the hash that was recorded for it
    pub fn push(&mut self, record: AuditRecord, hash: String) {
        let previous_hash = self.last_hash().to_string();
        self.entries.push(AuditEntry {
            sequence: self.entries.len() as u32 + 1,
            action: record.action,
            performed_by: record.performed_by,
            previous_status: record.previous_status,
            new_status: record.new_status,
            details: record.details,
            timestamp: record.timestamp,
            previous_hash,
            hash,
        });
    }

    /// Re-hash every entry and check the chain linkage
    pub fn verify(&self) -> ChainVerificationResult {
        let mut previous_hash = GENESIS_HASH.to_string();

        for entry in &self.entries {
            if entry.previous_hash != previous_hash {
                return ChainVerificationResult::invalid(
                    entry.sequence,
                    previous_hash,
                    entry.previous_hash.clone(),
                );
            }

            let record = AuditRecord {
                action: entry.action,
                performed_by: entry.performed_by,
                previous_status: entry.previous_status,
                new_status: entry.new_status,
                details: entry.details.clone(),
                timestamp: entry.timestamp,
            };
            let calculated = entry_hash(self.subject_id, entry.sequence, &record, &previous_hash);
            if calculated != entry.hash {
                return ChainVerificationResult::invalid(
                    entry.sequence,
                    calculated,
                    entry.hash.clone(),
                );
            }

            previous_hash = entry.hash.clone();
        }

        ChainVerificationResult {
            is_valid: true,
            entries_checked: self.entries.len() as u64,
            first_invalid_entry: None,
            expected_hash: None,
            actual_hash: None,
        }
    }
}

/// Result of hash chain verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerificationResult {
    pub is_valid: bool,
    pub entries_checked: u64,
    pub first_invalid_entry: Option<u32>,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
}

impl ChainVerificationResult {
    fn invalid(sequence: u32, expected: String, actual: String) -> Self {
        Self {
            is_valid: false,
            entries_checked: u64::from(sequence),
            first_invalid_entry: Some(sequence),
            expected_hash: Some(expected),
            actual_hash: Some(actual),
        }
    }
}

fn entry_hash(subject_id: Uuid, sequence: u32, record: &AuditRecord, previous_hash: &str) -> String {
    let hash_input = format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}",
        subject_id,
        sequence,
        record.action,
        record.performed_by,
        record.previous_status.map(|s| s.as_str()).unwrap_or_default(),
        record.new_status,
        record.details.as_deref().unwrap_or_default(),
        record.timestamp.to_rfc3339(),
        previous_hash
    );
    sha256_hex(hash_input.as_bytes())
}

/// Calculate SHA-256 hash and return as hex string
pub fn sha256_hex(input: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input);
    hex::encode(hasher.finalize())
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(previous: Option<TransactionStatus>, new: TransactionStatus) -> AuditRecord {
        AuditRecord {
            action: if previous.is_none() {
                AuditAction::Created
            } else {
                AuditAction::StatusChanged
            },
            performed_by: Uuid::new_v4(),
            previous_status: previous,
            new_status: new,
            details: None,
            timestamp: Utc::now(),
        }
    }

    fn chain() -> AuditTrail {
        let mut trail = AuditTrail::new(Uuid::new_v4());
        for (prev, new) in [
            (None, TransactionStatus::Pending),
            (Some(TransactionStatus::Pending), TransactionStatus::Processing),
            (Some(TransactionStatus::Processing), TransactionStatus::Completed),
        ] {
            let r = record(prev, new);
            let hash = trail.next_hash(&r);
            trail.push(r, hash);
        }
        trail
    }

    #[test]
    fn test_valid_chain() {
        let trail = chain();
        assert_eq!(trail.len(), 3);
        assert_eq!(trail.entries()[0].previous_hash, GENESIS_HASH);
        assert_eq!(trail.entries()[1].previous_hash, trail.entries()[0].hash);

        let result = trail.verify();
        assert!(result.is_valid);
        assert_eq!(result.entries_checked, 3);
    }

    #[test]
    fn test_tampered_entry_detected() {
        let mut trail = chain();
        trail.entries[1].performed_by = Uuid::new_v4();

        let result = trail.verify();
        assert!(!result.is_valid);
        assert_eq!(result.first_invalid_entry, Some(2));
    }

    #[test]
    fn test_broken_linkage_detected() {
        let mut trail = chain();
        trail.entries[2].previous_hash = GENESIS_HASH.to_string();
        assert_eq!(trail.verify().first_invalid_entry, Some(3));
    }

    #[test]
    fn test_hash_depends_on_subject() {
        let r = record(None, TransactionStatus::Pending);
        let a = AuditTrail::new(Uuid::new_v4()).next_hash(&r);
        let b = AuditTrail::new(Uuid::new_v4()).next_hash(&r);
        assert_ne!(a, b);
    }

    #[test]
    fn test_sha256_hex() {
        let hash = sha256_hex(b"test input");
        assert_eq!(hash.len(), 64); // SHA-256 produces 64 hex characters
    }
}
