//! Gateway callback signature verification.
//!
//! Both schemes are HMAC-SHA256 over the raw request body and are checked
//! before the body is parsed:
//!
//! - [`BodySignatureVerifier`]: hex digest of the body, sent in a single header
//!   (mobile money callbacks relayed through our signing proxy)
//! - [`TimestampedSignatureVerifier`]: `t=<unix>,v1=<hex>` over `"{t}.{body}"`
//!   with a replay window (Stripe)
//!
//! An empty secret is a construction error; there is no permissive mode.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Maximum allowed age for a timestamped signature (5 minutes).
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Allowed clock skew for signatures stamped in the future.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackSignatureError {
    #[error("callback secret is not configured")]
    MissingSecret,

    #[error("signature header is missing")]
    MissingHeader,

    #[error("malformed signature header: {0}")]
    MalformedHeader(String),

    #[error("signature does not match")]
    Mismatch,

    #[error("signature timestamp outside tolerance")]
    TimestampOutOfRange,
}

/// Verifies `hex(HMAC-SHA256(secret, body))`.
#[derive(Clone)]
pub struct BodySignatureVerifier {
    secret: SecretString,
}

impl BodySignatureVerifier {
    pub fn new(secret: SecretString) -> Result<Self, CallbackSignatureError> {
        if secret.expose_secret().trim().is_empty() {
            return Err(CallbackSignatureError::MissingSecret);
        }
        Ok(Self { secret })
    }

    pub fn verify(&self, body: &[u8], header: Option<&str>) -> Result<(), CallbackSignatureError> {
        let header = header
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(CallbackSignatureError::MissingHeader)?;
        let provided = hex_decode(header)
            .ok_or_else(|| CallbackSignatureError::MalformedHeader("invalid hex".to_string()))?;
        let expected = hmac_sha256(self.secret.expose_secret().as_bytes(), &[body])?;
        if constant_time_compare(&expected, &provided) {
            Ok(())
        } else {
            Err(CallbackSignatureError::Mismatch)
        }
    }
}

/// Parsed `t=...,v1=...` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedSignature {
    pub timestamp: i64,
    pub signatures: Vec<Vec<u8>>,
}

impl TimestampedSignature {
    /// Parses `t=<timestamp>,v1=<sig>[,v1=<sig>...]`. Unknown keys are ignored.
    pub fn parse(header: &str) -> Result<Self, CallbackSignatureError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part.trim().split_once('=').ok_or_else(|| {
                CallbackSignatureError::MalformedHeader("expected key=value".to_string())
            })?;
            match key {
                "t" => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| {
                        CallbackSignatureError::MalformedHeader("invalid timestamp".to_string())
                    })?);
                }
                "v1" => {
                    let sig = hex_decode(value).ok_or_else(|| {
                        CallbackSignatureError::MalformedHeader("invalid v1 hex".to_string())
                    })?;
                    signatures.push(sig);
                }
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| CallbackSignatureError::MalformedHeader("missing timestamp".to_string()))?;
        if signatures.is_empty() {
            return Err(CallbackSignatureError::MalformedHeader(
                "missing v1 signature".to_string(),
            ));
        }
        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

/// Verifies Stripe-style timestamped signatures.
#[derive(Clone)]
pub struct TimestampedSignatureVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl TimestampedSignatureVerifier {
    pub fn new(secret: SecretString) -> Result<Self, CallbackSignatureError> {
        if secret.expose_secret().trim().is_empty() {
            return Err(CallbackSignatureError::MissingSecret);
        }
        Ok(Self {
            secret,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        })
    }

    pub fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    pub fn verify(&self, body: &[u8], header: Option<&str>) -> Result<(), CallbackSignatureError> {
        self.verify_at(body, header, chrono::Utc::now().timestamp())
    }

    /// Verifies against an explicit clock.
    pub fn verify_at(
        &self,
        body: &[u8],
        header: Option<&str>,
        now_secs: i64,
    ) -> Result<(), CallbackSignatureError> {
        let header = header
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(CallbackSignatureError::MissingHeader)?;
        let parsed = TimestampedSignature::parse(header)?;

        let age = now_secs - parsed.timestamp;
        if age > self.tolerance_secs || age < -MAX_CLOCK_SKEW_SECS {
            return Err(CallbackSignatureError::TimestampOutOfRange);
        }

        let prefix = format!("{}.", parsed.timestamp);
        let expected = hmac_sha256(
            self.secret.expose_secret().as_bytes(),
            &[prefix.as_bytes(), body],
        )?;
        if parsed
            .signatures
            .iter()
            .any(|sig| constant_time_compare(&expected, sig))
        {
            Ok(())
        } else {
            Err(CallbackSignatureError::Mismatch)
        }
    }
}

/// Hex HMAC of a body, as [`BodySignatureVerifier`] expects it.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    hmac_sha256(secret.as_bytes(), &[body])
        .map(|mac| hex_encode(&mac))
        .unwrap_or_default()
}

/// `t=..,v1=..` header value, as [`TimestampedSignatureVerifier`] expects it.
pub fn sign_timestamped(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let prefix = format!("{}.", timestamp);
    let mac = hmac_sha256(secret.as_bytes(), &[prefix.as_bytes(), body])
        .map(|mac| hex_encode(&mac))
        .unwrap_or_default();
    format!("t={},v1={}", timestamp, mac)
}

fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, CallbackSignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|_| CallbackSignatureError::MissingSecret)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Lowercase hex encoding.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Hex decoding. Returns `None` on odd length or non-hex characters.
pub fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| s.get(i..i + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}
