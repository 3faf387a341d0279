//! Operation Context
//!
//! Contains the caller's identity and request metadata for audit and tracing.
//! Authentication happens upstream; this module only carries its result.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use uuid::Uuid;

use super::error::DomainError;

/// Role of an authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Borrower,
    Lender,
    /// Acts as borrower and lender
    Both,
    Admin,
    /// Internal callers such as scheduled jobs
    System,
}

impl Role {
    pub fn can_borrow(&self) -> bool {
        matches!(self, Role::Borrower | Role::Both)
    }

    pub fn can_lend(&self) -> bool {
        matches!(self, Role::Lender | Role::Both)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin | Role::System)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Borrower => "borrower",
            Role::Lender => "lender",
            Role::Both => "both",
            Role::Admin => "admin",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "borrower" => Ok(Role::Borrower),
            "lender" => Ok(Role::Lender),
            "both" => Ok(Role::Both),
            "admin" => Ok(Role::Admin),
            "system" => Ok(Role::System),
            other => Err(DomainError::Unauthorized(format!("unknown role '{}'", other))),
        }
    }
}

/// Authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    /// Identity used by scheduled jobs
    pub fn system() -> Self {
        Self {
            user_id: Uuid::nil(),
            role: Role::System,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// Context for an operation, used for auditing and tracing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationContext {
    /// Caller as supplied by the authentication layer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,

    /// Correlation ID for request tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,

    /// Client IP address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for internal callers
    pub fn system() -> Self {
        Self::new().with_principal(Principal::system())
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }

    /// The caller, or `Unauthorized` when the request carried none
    pub fn principal(&self) -> Result<Principal, DomainError> {
        self.principal
            .ok_or_else(|| DomainError::Unauthorized("missing principal".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builder() {
        let user_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();

        let context = OperationContext::new()
            .with_principal(Principal::new(user_id, Role::Lender))
            .with_correlation_id(correlation_id);

        assert_eq!(context.principal().unwrap().user_id, user_id);
        assert_eq!(context.correlation_id, Some(correlation_id));
    }

    #[test]
    fn test_missing_principal() {
        let context = OperationContext::new();
        assert!(matches!(
            context.principal(),
            Err(DomainError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_ensure_correlation_id() {
        let mut context = OperationContext::new();
        let id = context.ensure_correlation_id();
        assert_eq!(context.ensure_correlation_id(), id);
    }

    #[test]
    fn test_roles() {
        assert!(Role::Both.can_borrow());
        assert!(Role::Both.can_lend());
        assert!(!Role::Lender.can_borrow());
        assert!(Role::System.is_admin());
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert!("guest".parse::<Role>().is_err());
    }
}
