//! Payment gateway
//!
//! The gateway is an opaque external service: given a payment method and an
//! amount it either approves with a reference or declines. Every call is
//! bounded by a timeout; a call that does not answer in time counts as failed.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{Money, PaymentMethod};

/// Gateway errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment declined: {0}")]
    Declined(String),

    #[error("Payment gateway did not answer within {0:?}")]
    Timeout(Duration),
}

/// Approval returned by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayReceipt {
    pub gateway_ref: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(
        &self,
        method: PaymentMethod,
        amount: Money,
        reference: &str,
    ) -> Result<GatewayReceipt, GatewayError>;
}

/// Charge with an upper bound on the call duration
pub async fn charge_with_timeout(
    gateway: &dyn PaymentGateway,
    method: PaymentMethod,
    amount: Money,
    reference: &str,
    timeout: Duration,
) -> Result<GatewayReceipt, GatewayError> {
    match tokio::time::timeout(timeout, gateway.charge(method, amount, reference)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(reference, ?timeout, "Payment gateway call timed out");
            Err(GatewayError::Timeout(timeout))
        }
    }
}

/// Gateway that approves every payment immediately
#[derive(Debug, Default, Clone)]
pub struct SimulatedGateway;

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn charge(
        &self,
        method: PaymentMethod,
        amount: Money,
        reference: &str,
    ) -> Result<GatewayReceipt, GatewayError> {
        tracing::debug!(%method, %amount, reference, "Simulated gateway approved payment");
        Ok(GatewayReceipt {
            gateway_ref: format!("SIM-{}", Uuid::new_v4().simple()),
        })
    }
}

/// Scripted outcome of one gateway call
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Approve(String),
    Decline(String),
    /// Never answers; only a timeout ends the call
    Hang,
}

/// Gateway replaying a fixed script of outcomes, approving once exhausted
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    outcomes: Mutex<VecDeque<ScriptedOutcome>>,
}

impl ScriptedGateway {
    pub fn new(outcomes: impl IntoIterator<Item = ScriptedOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
        }
    }

    pub async fn push(&self, outcome: ScriptedOutcome) {
        self.outcomes.lock().await.push_back(outcome);
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn charge(
        &self,
        _method: PaymentMethod,
        _amount: Money,
        reference: &str,
    ) -> Result<GatewayReceipt, GatewayError> {
        let next = self.outcomes.lock().await.pop_front();
        match next {
            Some(ScriptedOutcome::Approve(gateway_ref)) => Ok(GatewayReceipt { gateway_ref }),
            Some(ScriptedOutcome::Decline(reason)) => Err(GatewayError::Declined(reason)),
            Some(ScriptedOutcome::Hang) => std::future::pending().await,
            None => Ok(GatewayReceipt {
                gateway_ref: format!("GW-{}", reference),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Currency;

    fn amount() -> Money {
        Money::from_minor(10_000, Currency::Usd)
    }

    #[tokio::test]
    async fn test_scripted_outcomes_in_order() {
        let gateway = ScriptedGateway::new([
            ScriptedOutcome::Decline("insufficient funds".to_string()),
            ScriptedOutcome::Approve("gw-42".to_string()),
        ]);

        let first = gateway.charge(PaymentMethod::CreditCard, amount(), "REF-1").await;
        assert_eq!(first, Err(GatewayError::Declined("insufficient funds".to_string())));

        let second = gateway.charge(PaymentMethod::CreditCard, amount(), "REF-1").await;
        assert_eq!(second.unwrap().gateway_ref, "gw-42");

        let fallback = gateway.charge(PaymentMethod::CreditCard, amount(), "REF-2").await;
        assert_eq!(fallback.unwrap().gateway_ref, "GW-REF-2");
    }

    #[tokio::test]
    async fn test_hanging_call_times_out() {
        let gateway = ScriptedGateway::new([ScriptedOutcome::Hang]);
        let timeout = Duration::from_millis(20);
        let result =
            charge_with_timeout(&gateway, PaymentMethod::Wallet, amount(), "REF-3", timeout).await;
        assert_eq!(result, Err(GatewayError::Timeout(timeout)));
    }

    #[tokio::test]
    async fn test_simulated_gateway_approves() {
        let receipt = SimulatedGateway
            .charge(PaymentMethod::BankTransfer, amount(), "REF-4")
            .await
            .unwrap();
        assert!(receipt.gateway_ref.starts_with("SIM-"));
    }
}
