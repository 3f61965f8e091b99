//! Records flowing through the pipeline.
//!
//! Source records arrive in the SMS table, become change events on the feed,
//! and are turned into transaction records by the processor. Category
//! mappings and monthly periods are maintained through the API.

mod amount;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use amount::{Amount, AmountError};

/// Namespace for deriving transaction ids from source record ids.
///
/// Changing this value changes every derived id and breaks deduplication
/// against records written before the change.
pub const TRANSACTION_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_2c3e_9b4d_5e8f_a071_c2d3_e4f5_0617);

/// Derive the transaction id for a source record id.
///
/// Pure function of the input: redelivered events map onto the same id.
pub fn transaction_id_for(source_id: &str) -> String {
    Uuid::new_v5(&TRANSACTION_NAMESPACE, source_id.as_bytes()).to_string()
}

/// A record in the SMS (source) table. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub id: String,
    pub payload: Vec<u8>,
    pub inserted_at: DateTime<Utc>,
}

impl SourceRecord {
    pub fn new(id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            inserted_at: Utc::now(),
        }
    }

    pub fn with_inserted_at(mut self, inserted_at: DateTime<Utc>) -> Self {
        self.inserted_at = inserted_at;
        self
    }
}

/// Opaque position of a change in the source table's stream.
///
/// Tokens compare in commit order within one stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceToken(String);

impl SequenceToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Token for a numeric sequence, zero padded so string order matches.
    pub fn from_sequence(sequence: u64) -> Self {
        Self(format!("{:020}", sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One delivery of a source record mutation to a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub record: SourceRecord,
    pub sequence_token: SequenceToken,
    /// Starts at 1 and increases with every redelivery of the same change.
    pub delivery_attempt: u32,
}

/// A transaction derived from one SMS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: String,
    pub source_id: String,
    pub description: String,
    pub amount: Amount,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Description to category mapping. Last write wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryMapping {
    pub description: String,
    pub category: String,
    pub updated_at: DateTime<Utc>,
}

impl CategoryMapping {
    pub fn new(description: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            category: category.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Aggregate data for one month, keyed by `YYYY-MM`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodRecord {
    pub month: String,
    pub data: serde_json::Map<String, serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}
