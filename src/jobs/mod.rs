//! Scheduled Jobs
//!
//! Background jobs run by the server binary. The ledger core runs no timers
//! of its own; the late-fee assessment is driven from here.

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};

use crate::domain::OperationContext;
use crate::error::AppResult;
use crate::handlers::{AssessLateFeesCommand, AssessLateFeesHandler, LateFeeReport};
use crate::state::AppState;

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval of the late-fee assessment (default: 1 hour)
    pub late_fee_interval: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            late_fee_interval: Duration::from_secs(3600),
        }
    }
}

/// Job Scheduler - runs periodic ledger tasks
pub struct JobScheduler {
    state: AppState,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            config: JobSchedulerConfig::default(),
        }
    }

    pub fn with_config(state: AppState, config: JobSchedulerConfig) -> Self {
        Self { state, config }
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!(
            late_fee_interval_secs = self.config.late_fee_interval.as_secs(),
            "Job scheduler started"
        );

        let mut late_fee_interval = interval(self.config.late_fee_interval);
        late_fee_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            late_fee_interval.tick().await;
            if let Err(e) = self.assess_late_fees_once().await {
                tracing::error!(error = %e, "Late fee assessment failed");
            }
        }
    }

    /// Assess late fees as of today's date on the injected clock
    pub async fn assess_late_fees_once(&self) -> AppResult<LateFeeReport> {
        let as_of = self.state.clock.today();
        AssessLateFeesHandler::new(self.state.clone())
            .execute(AssessLateFeesCommand::new(as_of), &OperationContext::system())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerSettings;

    #[test]
    fn test_job_scheduler_config_default() {
        let config = JobSchedulerConfig::default();
        assert_eq!(config.late_fee_interval, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_assess_once_on_empty_ledger() {
        let scheduler = JobScheduler::new(AppState::in_memory(LedgerSettings::default()));
        let report = scheduler.assess_late_fees_once().await.unwrap();
        assert_eq!(report, LateFeeReport::default());
    }
}
