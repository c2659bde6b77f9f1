//! Daraja API wire types.
//!
//! Field names follow Safaricom's PascalCase JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ════════════════════════════════════════════════════════════════════════════════
// OAuth
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccessTokenResponse {
    pub access_token: String,

    /// Seconds, sent as a string.
    pub expires_in: String,
}

// ════════════════════════════════════════════════════════════════════════════════
// STK push
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkPushRequest {
    pub business_short_code: String,
    pub password: String,
    pub timestamp: String,
    pub transaction_type: String,
    pub amount: i64,
    pub party_a: String,
    pub party_b: String,
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    pub account_reference: String,
    pub transaction_desc: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    pub response_code: String,
    pub response_description: String,
    #[serde(default)]
    pub customer_message: Option<String>,
}

/// Error body Daraja returns with non-2xx statuses.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DarajaErrorBody {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════════
// Callback
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    pub result_code: i64,
    pub result_desc: String,
    #[serde(default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<JsonValue>,
}

impl CallbackMetadata {
    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .and_then(|item| item.value.as_ref())
    }

    /// Value as a string; numbers are rendered without decoration.
    pub fn get_string(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Amount in whole shillings, integer or decimal.
    pub fn get_amount(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            JsonValue::Number(n) => n.as_f64(),
            JsonValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn callback_parses_success_body() {
        let body = json!({
            "Body": {"stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": "ws_CO_191220191020363925",
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {"Item": [
                    {"Name": "Amount", "Value": 1000.00},
                    {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                    {"Name": "Balance"},
                    {"Name": "TransactionDate", "Value": 20191219102115u64},
                    {"Name": "PhoneNumber", "Value": 254708374149u64}
                ]}
            }}
        });
        let envelope: StkCallbackEnvelope = serde_json::from_value(body).unwrap();
        let cb = envelope.body.stk_callback;
        assert_eq!(cb.result_code, 0);
        let meta = cb.callback_metadata.unwrap();
        assert_eq!(meta.get_string("MpesaReceiptNumber").as_deref(), Some("NLJ7RT61SV"));
        assert_eq!(meta.get_string("PhoneNumber").as_deref(), Some("254708374149"));
        assert_eq!(meta.get_amount("Amount"), Some(1000.0));
        assert!(meta.get("Balance").is_none());
    }

    #[test]
    fn stk_request_uses_daraja_field_names() {
        let req = StkPushRequest {
            business_short_code: "174379".to_string(),
            password: "pw".to_string(),
            timestamp: "20260101120000".to_string(),
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: 1,
            party_a: "254712345678".to_string(),
            party_b: "174379".to_string(),
            phone_number: "254712345678".to_string(),
            callback_url: "https://example.test/callbacks/mpesa".to_string(),
            account_reference: "INV-1".to_string(),
            transaction_desc: "Renewal".to_string(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["BusinessShortCode"], "174379");
        assert_eq!(json["CallBackURL"], "https://example.test/callbacks/mpesa");
        assert_eq!(json["PartyA"], "254712345678");
    }
}
