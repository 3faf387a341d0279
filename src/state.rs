//! Shared application state
//!
//! Every service is built from these injected handles; nothing is global.

use std::sync::Arc;

use crate::config::LedgerSettings;
use crate::domain::{Clock, SystemClock};
use crate::event_store::{EventStore, MemoryEventStore};
use crate::funding::FundingAggregator;
use crate::gateway::{PaymentGateway, SimulatedGateway};
use crate::ledger::TransactionLedger;
use crate::projection::BalanceEngine;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub balances: Arc<BalanceEngine>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub clock: Arc<dyn Clock>,
    pub settings: Arc<LedgerSettings>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn EventStore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        settings: LedgerSettings,
    ) -> Self {
        let balances = Arc::new(BalanceEngine::new(store.clone(), settings.currency));
        Self {
            store,
            balances,
            gateway,
            clock,
            settings: Arc::new(settings),
        }
    }

    /// In-memory store, simulated gateway and system clock
    pub fn in_memory(settings: LedgerSettings) -> Self {
        Self::new(
            Arc::new(MemoryEventStore::new()),
            Arc::new(SimulatedGateway),
            Arc::new(SystemClock),
            settings,
        )
    }

    pub fn ledger(&self) -> TransactionLedger {
        TransactionLedger::new(
            self.store.clone(),
            self.balances.clone(),
            self.clock.clone(),
            self.settings.clone(),
        )
    }

    pub fn funding(&self) -> FundingAggregator {
        FundingAggregator::new(
            self.store.clone(),
            self.ledger(),
            self.clock.clone(),
            self.settings.clone(),
        )
    }
}
