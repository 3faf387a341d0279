//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::aggregate::LateFeePolicy;
use crate::domain::Currency;

/// How a completed repayment reaches the lenders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationRule {
    /// Split across lenders in proportion to their contribution
    #[default]
    ProRata,
    /// Kept by the loan's escrow party
    Escrow,
}

impl FromStr for AllocationRule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pro_rata" | "pro-rata" | "prorata" => Ok(AllocationRule::ProRata),
            "escrow" => Ok(AllocationRule::Escrow),
            _ => Err(ConfigError::InvalidValue("REPAYMENT_ALLOCATION")),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Settings consumed by the ledger core
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    /// Currency of every loan and transaction
    pub currency: Currency,

    /// Fee on gateway-settled transactions, in basis points
    pub processing_fee_bps: u32,

    pub late_fee: LateFeePolicy,

    pub allocation: AllocationRule,

    /// Bound on a single payment gateway call
    pub gateway_timeout: Duration,

    /// Optimistic-concurrency retries before giving up
    pub conflict_max_retries: u32,

    /// Linear backoff step between retries
    pub conflict_backoff: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            currency: Currency::Usd,
            processing_fee_bps: 0,
            late_fee: LateFeePolicy::default(),
            allocation: AllocationRule::ProRata,
            gateway_timeout: Duration::from_millis(5000),
            conflict_max_retries: 5,
            conflict_backoff: Duration::from_millis(5),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL; in-memory store when unset
    pub database_url: Option<String>,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    pub log_format: LogFormat,

    pub ledger: LedgerSettings,

    /// Interval of the scheduled late-fee assessment
    pub late_fee_job_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());

        let database_max_connections = parse_var("DATABASE_MAX_CONNECTIONS", "10")?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = parse_var("PORT", "3000")?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let log_format = match env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "pretty".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "pretty" | "text" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            _ => return Err(ConfigError::InvalidValue("LOG_FORMAT")),
        };

        let currency = env::var("LEDGER_CURRENCY")
            .unwrap_or_else(|_| "USD".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("LEDGER_CURRENCY"))?;

        let processing_fee_bps: u32 = parse_var("PROCESSING_FEE_BPS", "0")?;
        if processing_fee_bps > 10_000 {
            return Err(ConfigError::InvalidValue("PROCESSING_FEE_BPS"));
        }

        let late_fee = LateFeePolicy {
            late_fee_bps: parse_var("LATE_FEE_BPS", "500")?,
            grace_days: parse_var("LATE_FEE_GRACE_DAYS", "0")?,
            default_after_days: parse_var("DEFAULT_AFTER_DAYS", "90")?,
        };
        if late_fee.grace_days < 0 {
            return Err(ConfigError::InvalidValue("LATE_FEE_GRACE_DAYS"));
        }
        if late_fee.default_after_days < 0 {
            return Err(ConfigError::InvalidValue("DEFAULT_AFTER_DAYS"));
        }

        let allocation = env::var("REPAYMENT_ALLOCATION")
            .unwrap_or_else(|_| "pro_rata".to_string())
            .parse()?;

        let gateway_timeout = Duration::from_millis(parse_var("GATEWAY_TIMEOUT_MS", "5000")?);
        let conflict_max_retries = parse_var("CONFLICT_MAX_RETRIES", "5")?;
        let conflict_backoff = Duration::from_millis(parse_var("CONFLICT_BACKOFF_MS", "5")?);
        let late_fee_job_interval =
            Duration::from_secs(parse_var("LATE_FEE_JOB_INTERVAL_SECS", "3600")?);
        if late_fee_job_interval.is_zero() {
            return Err(ConfigError::InvalidValue("LATE_FEE_JOB_INTERVAL_SECS"));
        }

        let config = Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            log_format,
            ledger: LedgerSettings {
                currency,
                processing_fee_bps,
                late_fee,
                allocation,
                gateway_timeout,
                conflict_max_retries,
                conflict_backoff,
            },
            late_fee_job_interval,
        };

        if config.is_production() && config.database_url.is_none() {
            return Err(ConfigError::MissingEnv("DATABASE_URL"));
        }

        Ok(config)
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name))
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_rule_parse() {
        assert_eq!("pro_rata".parse::<AllocationRule>().unwrap(), AllocationRule::ProRata);
        assert_eq!("Escrow".parse::<AllocationRule>().unwrap(), AllocationRule::Escrow);
        assert!("lottery".parse::<AllocationRule>().is_err());
    }

    #[test]
    fn test_default_ledger_settings() {
        let settings = LedgerSettings::default();
        assert_eq!(settings.currency, Currency::Usd);
        assert_eq!(settings.late_fee.late_fee_bps, 500);
        assert_eq!(settings.late_fee.default_after_days, 90);
        assert_eq!(settings.allocation, AllocationRule::ProRata);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue("PORT");
        assert_eq!(err.to_string(), "Invalid value for environment variable: PORT");
    }
}
