//! Application configuration module
//!
//! Type-safe configuration loaded from environment variables using the
//! `config` and `dotenvy` crates. Variables carry the `INVOICER` prefix and
//! nested values are separated by double underscores.
//!
//! # Example
//!
//! ```no_run
//! use invoicer_billing::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Sweeping every {:?}", config.billing.sweep_interval());
//! ```

mod billing;
mod database;
mod error;
mod mpesa;
mod server;
mod stripe;

pub use billing::BillingConfig;
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use mpesa::{MpesaEnvironment, MpesaSettings};
pub use server::{Environment, ServerConfig};
pub use stripe::StripeSettings;

use serde::Deserialize;

/// Root application configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    pub database: DatabaseConfig,

    /// Grace, reminder, timeout and sweep tuning
    #[serde(default)]
    pub billing: BillingConfig,

    /// Mobile-money gateway (Safaricom Daraja)
    #[serde(default)]
    pub mpesa: MpesaSettings,

    /// Card gateway
    #[serde(default)]
    pub stripe: StripeSettings,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// Loads `.env` when present, then reads `INVOICER__*` variables:
    ///
    /// - `INVOICER__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `INVOICER__MPESA__SHORT_CODE=174379` -> `mpesa.short_code = "174379"`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or values
    /// cannot be parsed into their expected types.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("INVOICER")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for the first invalid value, including any
    /// missing gateway secret.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.database.validate()?;
        self.billing.validate()?;
        self.mpesa.validate(&self.server.environment)?;
        self.stripe.validate()?;
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Env vars are process-global
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[(&str, &str)] = &[
        ("INVOICER__DATABASE__URL", "postgresql://test@localhost/invoicer"),
        ("INVOICER__MPESA__CONSUMER_KEY", "ck"),
        ("INVOICER__MPESA__CONSUMER_SECRET", "cs"),
        ("INVOICER__MPESA__SHORT_CODE", "174379"),
        ("INVOICER__MPESA__PASSKEY", "pk"),
        ("INVOICER__MPESA__CALLBACK_URL", "https://billing.example.com/callbacks/mpesa"),
        ("INVOICER__MPESA__CALLBACK_SECRET", "cb-secret"),
        ("INVOICER__STRIPE__API_KEY", "sk_test_xxx"),
        ("INVOICER__STRIPE__WEBHOOK_SECRET", "whsec_xxx"),
    ];

    const OPTIONAL: &[&str] = &[
        "INVOICER__SERVER__PORT",
        "INVOICER__SERVER__ENVIRONMENT",
        "INVOICER__BILLING__GRACE_PERIOD_DAYS",
        "INVOICER__MPESA__ENVIRONMENT",
    ];

    fn set_minimal_env() {
        for (key, value) in VARS {
            env::set_var(key, value);
        }
    }

    fn clear_env() {
        for (key, _) in VARS {
            env::remove_var(key);
        }
        for key in OPTIONAL {
            env::remove_var(key);
        }
    }

    fn load_with(extra: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        for (key, value) in extra {
            env::set_var(key, value);
        }
        let result = AppConfig::load();
        clear_env();
        result
    }

    #[test]
    fn loads_minimal_environment() {
        let config = load_with(&[]).unwrap();

        assert_eq!(config.database.url, "postgresql://test@localhost/invoicer");
        assert_eq!(config.mpesa.short_code, "174379");
        assert_eq!(config.mpesa.environment, MpesaEnvironment::Sandbox);
        assert_eq!(config.billing.grace_period_days, 7);
        assert_eq!(config.billing.sweep_interval_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn nested_overrides_are_applied() {
        let config = load_with(&[
            ("INVOICER__SERVER__PORT", "3000"),
            ("INVOICER__SERVER__ENVIRONMENT", "production"),
            ("INVOICER__BILLING__GRACE_PERIOD_DAYS", "10"),
            ("INVOICER__MPESA__ENVIRONMENT", "production"),
        ])
        .unwrap();

        assert_eq!(config.server.port, 3000);
        assert!(config.is_production());
        assert_eq!(config.billing.policy().grace_period_days, 10);
        assert!(config.mpesa.is_production());
    }

    #[test]
    fn missing_gateway_secret_fails_validation() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::remove_var("INVOICER__STRIPE__WEBHOOK_SECRET");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(
            config.validate(),
            Err(ValidationError::MissingRequired("STRIPE__WEBHOOK_SECRET"))
        );
    }

    #[test]
    fn missing_database_section_fails_to_load() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        let result = AppConfig::load();

        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }
}
