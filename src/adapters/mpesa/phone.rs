//! Kenyan MSISDN normalization.
//!
//! Daraja expects `2547XXXXXXXX` or `2541XXXXXXXX`. Accepted inputs:
//!
//! | Input | Example |
//! |-------|---------|
//! | local, 10 digits | `0712345678`, `0112345678` |
//! | short, 9 digits | `712345678`, `112345678` |
//! | international, 12 digits | `254712345678`, `+254 712 345 678` |
//!
//! Spaces, dashes and parentheses are ignored.

use crate::domain::foundation::ValidationError;

const COUNTRY_PREFIX: &str = "254";

/// Rewrites a phone number into the `254XXXXXXXXX` form.
pub fn normalize_msisdn(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::empty_field("phone"));
    }

    let without_plus = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let mut digits = String::with_capacity(without_plus.len());
    for c in without_plus.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '(' | ')' => {}
            _ => {
                return Err(ValidationError::invalid_format(
                    "phone",
                    format!("unexpected character '{}'", c),
                ))
            }
        }
    }

    let subscriber = match digits.len() {
        10 if digits.starts_with("07") || digits.starts_with("01") => &digits[1..],
        9 if digits.starts_with('7') || digits.starts_with('1') => &digits[..],
        12 if digits.starts_with("2547") || digits.starts_with("2541") => &digits[3..],
        _ => {
            return Err(ValidationError::invalid_format(
                "phone",
                "not a Kenyan mobile number",
            ))
        }
    };

    Ok(format!("{}{}", COUNTRY_PREFIX, subscriber))
}
