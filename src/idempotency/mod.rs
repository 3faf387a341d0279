//! Idempotency module
//!
//! Client-supplied idempotency keys for payment operations. A key is bound to
//! the transaction it created together with a fingerprint of the request, so
//! a retry with the same key returns that transaction instead of creating a
//! duplicate, and a different request under the same key is rejected.
//!
//! Keys are chosen by clients, so they are stored per caller: two users
//! sending `installment-1` never see each other's bindings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::sha256_hex;
use crate::domain::DomainError;

/// Longest accepted key
pub const MAX_KEY_LEN: usize = 255;

/// Validated idempotency key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Parse a key as received in the `Idempotency-Key` header
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let key = raw.trim();
        if key.is_empty() {
            return Err(DomainError::validation(
                "idempotency_key",
                "must not be empty",
            ));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(DomainError::validation(
                "idempotency_key",
                format!("must be at most {} characters", MAX_KEY_LEN),
            ));
        }
        if !key.chars().all(|c| c.is_ascii_graphic()) {
            return Err(DomainError::validation(
                "idempotency_key",
                "must be printable ASCII without spaces",
            ));
        }
        Ok(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Key as stored and looked up, namespaced by the caller that sent it
    pub fn storage_key(&self, owner: Uuid) -> String {
        format!("{}:{}", owner, self.0)
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored binding of a key to the aggregate it produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_hash: String,
    pub aggregate_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Claim of a key, persisted in the same unit as the events it guards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyClaim {
    pub key: String,
    pub request_hash: String,
    pub aggregate_id: Uuid,
    /// Aggregate the key may currently be bound to; set when a failed
    /// transaction is being replaced by a fresh one
    pub replaces: Option<Uuid>,
}

impl IdempotencyClaim {
    pub fn new(
        key: &IdempotencyKey,
        owner: Uuid,
        request_hash: String,
        aggregate_id: Uuid,
    ) -> Self {
        Self {
            key: key.storage_key(owner),
            request_hash,
            aggregate_id,
            replaces: None,
        }
    }

    pub fn replacing(mut self, previous: Uuid) -> Self {
        self.replaces = Some(previous);
        self
    }
}

/// Compute SHA-256 hash of a request for conflict detection
pub fn compute_request_hash<T: Serialize>(request: &T) -> Result<String, serde_json::Error> {
    let body = serde_json::to_vec(request)?;
    Ok(sha256_hex(&body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Request {
        amount: &'static str,
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(IdempotencyKey::parse(" abc-123 ").unwrap().as_str(), "abc-123");
        assert!(IdempotencyKey::parse("").is_err());
        assert!(IdempotencyKey::parse("has space").is_err());
        assert!(IdempotencyKey::parse(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn test_compute_request_hash() {
        let hash = compute_request_hash(&Request { amount: "100.00" }).unwrap();

        // Hash should be 64 hex characters (SHA-256)
        assert_eq!(hash.len(), 64);

        // Same input should produce same hash
        let hash2 = compute_request_hash(&Request { amount: "100.00" }).unwrap();
        assert_eq!(hash, hash2);

        // Different input should produce different hash
        let hash3 = compute_request_hash(&Request { amount: "200.00" }).unwrap();
        assert_ne!(hash, hash3);
    }

    #[test]
    fn test_claim_replacing() {
        let key = IdempotencyKey::parse("retry-1").unwrap();
        let owner = Uuid::new_v4();
        let previous = Uuid::new_v4();
        let claim = IdempotencyClaim::new(&key, owner, "h".to_string(), Uuid::new_v4())
            .replacing(previous);
        assert_eq!(claim.replaces, Some(previous));
        assert_eq!(claim.key, format!("{}:retry-1", owner));
    }

    #[test]
    fn test_storage_key_is_per_owner() {
        let key = IdempotencyKey::parse("installment-1").unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert_ne!(key.storage_key(a), key.storage_key(b));
        assert_eq!(key.storage_key(a), key.storage_key(a));
        assert!(key.storage_key(a).ends_with(":installment-1"));
    }
}
