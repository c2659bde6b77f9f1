//! Stripe configuration

use serde::Deserialize;

use super::error::ValidationError;

/// Stripe API key and webhook signing secret.
#[derive(Clone, Default, Deserialize)]
pub struct StripeSettings {
    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub webhook_secret: String,

    /// Overrides the Stripe API host, for local fakes
    pub api_base_url: Option<String>,
}

impl StripeSettings {
    pub fn is_test_mode(&self) -> bool {
        self.api_key.starts_with("sk_test_")
    }

    pub fn is_live_mode(&self) -> bool {
        self.api_key.starts_with("sk_live_")
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.api_key.is_empty() {
            return Err(ValidationError::MissingRequired("STRIPE__API_KEY"));
        }
        if self.webhook_secret.is_empty() {
            return Err(ValidationError::MissingRequired("STRIPE__WEBHOOK_SECRET"));
        }
        if !self.api_key.starts_with("sk_") {
            return Err(ValidationError::InvalidStripeKey);
        }
        if !self.webhook_secret.starts_with("whsec_") {
            return Err(ValidationError::InvalidStripeWebhookSecret);
        }
        Ok(())
    }
}

impl std::fmt::Debug for StripeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeSettings")
            .field("test_mode", &self.is_test_mode())
            .field("api_base_url", &self.api_base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> StripeSettings {
        StripeSettings {
            api_key: "sk_test_abcd1234".to_string(),
            webhook_secret: "whsec_xyz789".to_string(),
            api_base_url: None,
        }
    }

    #[test]
    fn mode_follows_key_prefix() {
        assert!(valid().is_test_mode());
        let live = StripeSettings {
            api_key: "sk_live_abcd".to_string(),
            ..valid()
        };
        assert!(live.is_live_mode());
        assert!(!live.is_test_mode());
    }

    #[test]
    fn missing_webhook_secret_is_reported() {
        let settings = StripeSettings {
            webhook_secret: String::new(),
            ..valid()
        };
        assert_eq!(
            settings.validate(),
            Err(ValidationError::MissingRequired("STRIPE__WEBHOOK_SECRET"))
        );
    }

    #[test]
    fn publishable_key_is_rejected() {
        let settings = StripeSettings {
            api_key: "pk_test_xxx".to_string(),
            ..valid()
        };
        assert_eq!(settings.validate(), Err(ValidationError::InvalidStripeKey));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let rendered = format!("{:?}", valid());
        assert!(!rendered.contains("sk_test_abcd1234"));
        assert!(!rendered.contains("whsec_xyz789"));
    }
}
