//! M-Pesa (Daraja) configuration

use serde::Deserialize;

use super::error::ValidationError;
use super::server::Environment;

/// Which Daraja host to talk to.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MpesaEnvironment {
    #[default]
    Sandbox,
    Production,
}

/// Daraja credentials and callback settings.
///
/// Secrets stay plain strings here and are wrapped in `SecretString` when the
/// adapter and callback verifier are built.
#[derive(Clone, Default, Deserialize)]
pub struct MpesaSettings {
    #[serde(default)]
    pub environment: MpesaEnvironment,

    #[serde(default)]
    pub consumer_key: String,

    #[serde(default)]
    pub consumer_secret: String,

    /// Paybill or till number
    #[serde(default)]
    pub short_code: String,

    #[serde(default)]
    pub passkey: String,

    /// Public URL Safaricom posts STK results to
    #[serde(default)]
    pub callback_url: String,

    /// Shared secret for the callback signature header
    #[serde(default)]
    pub callback_secret: String,

    /// Overrides the Daraja host, for local fakes
    pub api_base_url: Option<String>,
}

impl MpesaSettings {
    pub fn is_production(&self) -> bool {
        self.environment == MpesaEnvironment::Production
    }

    pub fn validate(&self, environment: &Environment) -> Result<(), ValidationError> {
        let required = [
            (&self.consumer_key, "MPESA__CONSUMER_KEY"),
            (&self.consumer_secret, "MPESA__CONSUMER_SECRET"),
            (&self.short_code, "MPESA__SHORT_CODE"),
            (&self.passkey, "MPESA__PASSKEY"),
            (&self.callback_url, "MPESA__CALLBACK_URL"),
            (&self.callback_secret, "MPESA__CALLBACK_SECRET"),
        ];
        for (value, name) in required {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingRequired(name));
            }
        }
        // Daraja refuses plain-HTTP callback URLs outside the sandbox
        if (*environment == Environment::Production || self.is_production())
            && !self.callback_url.starts_with("https://")
        {
            return Err(ValidationError::CallbackUrlMustBeHttps);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MpesaSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpesaSettings")
            .field("environment", &self.environment)
            .field("short_code", &self.short_code)
            .field("callback_url", &self.callback_url)
            .field("api_base_url", &self.api_base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> MpesaSettings {
        MpesaSettings {
            environment: MpesaEnvironment::Sandbox,
            consumer_key: "ck".to_string(),
            consumer_secret: "cs".to_string(),
            short_code: "174379".to_string(),
            passkey: "pk".to_string(),
            callback_url: "https://billing.example.com/callbacks/mpesa".to_string(),
            callback_secret: "cb-secret".to_string(),
            api_base_url: None,
        }
    }

    #[test]
    fn complete_settings_pass() {
        assert!(valid().validate(&Environment::Development).is_ok());
    }

    #[test]
    fn missing_callback_secret_is_reported() {
        let settings = MpesaSettings {
            callback_secret: String::new(),
            ..valid()
        };
        assert_eq!(
            settings.validate(&Environment::Development),
            Err(ValidationError::MissingRequired("MPESA__CALLBACK_SECRET"))
        );
    }

    #[test]
    fn production_requires_https_callback() {
        let settings = MpesaSettings {
            callback_url: "http://billing.example.com/callbacks/mpesa".to_string(),
            ..valid()
        };
        assert!(settings.validate(&Environment::Development).is_ok());
        assert_eq!(
            settings.validate(&Environment::Production),
            Err(ValidationError::CallbackUrlMustBeHttps)
        );
    }

    #[test]
    fn debug_output_hides_credentials() {
        let rendered = format!("{:?}", valid());
        assert!(!rendered.contains("cb-secret"));
        assert!(!rendered.contains("\"cs\""));
        assert!(rendered.contains("174379"));
    }
}
