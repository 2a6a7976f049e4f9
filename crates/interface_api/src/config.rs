//! API configuration

use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;

use core_kernel::CoreError;
use domain_lending::{GatewayCredentials, RetryPolicy, SweeperConfig};
use infra_db::DatabaseConfig;

/// API configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// JWT secret for authentication
    pub jwt_secret: String,
    /// JWT expiration in seconds
    pub jwt_expiration_secs: u64,
    /// Database URL
    pub database_url: String,
    pub database_max_connections: u32,
    /// Log level
    pub log_level: String,
    /// Shared secret for gateway request signing
    pub gateway_secret: String,
    pub gateway_salt_index: u32,
    pub gateway_merchant_id: String,
    /// Public URL the gateway posts callbacks to
    pub gateway_callback_url: Option<String>,
    /// Seconds between overdue sweeps
    pub sweeper_interval_secs: u64,
    pub grace_period_days: u32,
    /// Flat fee added to each installment that becomes overdue
    pub late_fee: Decimal,
    pub notification_max_attempts: u32,
    pub notification_backoff_base_secs: u64,
    pub conflict_retry_attempts: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            jwt_secret: "change-me-in-production".to_string(),
            jwt_expiration_secs: 3600,
            database_url: "postgres://localhost/lending".to_string(),
            database_max_connections: 10,
            log_level: "info".to_string(),
            gateway_secret: "change-me-in-production".to_string(),
            gateway_salt_index: 1,
            gateway_merchant_id: "LENDINGUAT".to_string(),
            gateway_callback_url: None,
            sweeper_interval_secs: 6 * 60 * 60,
            grace_period_days: 3,
            late_fee: Decimal::ZERO,
            notification_max_attempts: 5,
            notification_backoff_base_secs: 30,
            conflict_retry_attempts: 3,
        }
    }
}

impl ApiConfig {
    /// Loads configuration from `API_`-prefixed environment variables
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("API").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Rejects settings the services cannot run with
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.jwt_secret.is_empty() {
            return Err(CoreError::configuration("jwt_secret must not be empty"));
        }
        if self.gateway_secret.is_empty() || self.gateway_merchant_id.is_empty() {
            return Err(CoreError::configuration("gateway credentials must not be empty"));
        }
        if self.sweeper_interval_secs == 0 {
            return Err(CoreError::configuration("sweeper_interval_secs must be positive"));
        }
        if self.late_fee.is_sign_negative() {
            return Err(CoreError::configuration("late_fee must not be negative"));
        }
        if self.notification_max_attempts == 0 {
            return Err(CoreError::configuration("notification_max_attempts must be at least 1"));
        }
        Ok(())
    }

    /// Returns the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig::new(self.database_url.clone()).max_connections(self.database_max_connections)
    }

    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.sweeper_interval_secs),
            grace_period_days: self.grace_period_days,
            late_fee: self.late_fee,
        }
    }

    pub fn gateway_credentials(&self) -> GatewayCredentials {
        GatewayCredentials {
            merchant_id: self.gateway_merchant_id.clone(),
            secret: self.gateway_secret.clone(),
            salt_index: self.gateway_salt_index,
            callback_url: self.gateway_callback_url.clone(),
        }
    }

    pub fn notification_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.notification_max_attempts,
            Duration::from_secs(self.notification_backoff_base_secs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ApiConfig::default();
        assert_eq!(config.server_addr(), "0.0.0.0:8080");
        assert_eq!(config.sweeper_config().interval, Duration::from_secs(21600));
        assert_eq!(config.sweeper_config().grace_period_days, 3);
        assert_eq!(config.notification_retry_policy().max_attempts, 5);
        assert_eq!(config.database_config().max_connections, 10);
    }

    #[test]
    fn test_partial_source_keeps_defaults() {
        let config: ApiConfig = config::Config::builder()
            .set_override("port", 9090)
            .unwrap()
            .set_override("late_fee", "25.50")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.late_fee, Decimal::new(2550, 2));
        assert_eq!(config.grace_period_days, 3);
    }

    #[test]
    fn test_validate_rejects_unusable_settings() {
        assert!(ApiConfig::default().validate().is_ok());

        let config = ApiConfig {
            sweeper_interval_secs: 0,
            ..ApiConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::Configuration(_))));

        let config = ApiConfig {
            late_fee: Decimal::new(-1, 0),
            ..ApiConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gateway_secret_is_not_logged() {
        let credentials = ApiConfig::default().gateway_credentials();
        assert!(!format!("{:?}", credentials).contains("change-me"));
    }
}
