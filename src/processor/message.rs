//! SMS payload parsing.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::model::Amount;

/// The structured content of one bank SMS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsMessage {
    /// Merchant or counterparty text, trimmed. Never empty.
    pub description: String,
    pub amount: Amount,
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    description: String,
    amount: Amount,
    #[serde(default)]
    occurred_at: Option<DateTime<Utc>>,
}

impl SmsMessage {
    /// Parse a raw sms table payload.
    ///
    /// Expects a JSON object with `description`, `amount` and an optional
    /// RFC 3339 `occurredAt`. Unknown fields are ignored.
    pub fn parse(payload: &[u8]) -> Result<Self, String> {
        let raw: RawMessage = serde_json::from_slice(payload).map_err(|e| e.to_string())?;

        let description = raw.description.trim();
        if description.is_empty() {
            return Err("description is empty".to_string());
        }

        Ok(Self {
            description: description.to_string(),
            amount: raw.amount,
            occurred_at: raw.occurred_at,
        })
    }
}
