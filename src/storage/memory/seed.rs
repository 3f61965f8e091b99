//! Seeding the sms table from a JSON-lines file.
//!
//! Each non-blank line is one object. Its `id` field becomes the source
//! record id and the remaining fields become the payload.

use std::path::Path;

use tracing::info;

use crate::model::SourceRecord;
use crate::storage::SourceStore;

/// Errors raised while seeding.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("Failed to read seed file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Seed line {line}: {reason}")]
    InvalidLine { line: usize, reason: String },

    #[error(transparent)]
    Store(#[from] crate::storage::StoreError),
}

/// Parse one seed line into a source record.
pub fn parse_seed_line(line: &str) -> Result<SourceRecord, String> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let serde_json::Value::Object(mut fields) = value else {
        return Err("expected a JSON object".to_string());
    };

    let id = match fields.remove("id") {
        Some(serde_json::Value::String(id)) if !id.trim().is_empty() => id,
        Some(serde_json::Value::Number(id)) => id.to_string(),
        _ => return Err("missing string field 'id'".to_string()),
    };

    let payload = serde_json::to_vec(&fields).map_err(|e| e.to_string())?;
    Ok(SourceRecord::new(id, payload))
}

/// Append every record in `path` to `store`, in file order.
pub async fn seed_source_table(store: &dyn SourceStore, path: &Path) -> Result<usize, SeedError> {
    let contents = tokio::fs::read_to_string(path).await?;

    let mut appended = 0;
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_seed_line(line).map_err(|reason| SeedError::InvalidLine {
            line: index + 1,
            reason,
        })?;
        store.append(record).await?;
        appended += 1;
    }

    info!(path = %path.display(), records = appended, "Seeded sms table");
    Ok(appended)
}
