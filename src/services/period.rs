//! Monthly period records.

use chrono::Utc;
use tracing::info;

use super::ServiceError;
use crate::model::PeriodRecord;
use crate::storage::ScopedStores;

/// Check that `month` is `YYYY-MM` with a month between 01 and 12.
pub fn validate_month(month: &str) -> Result<(), ServiceError> {
    let invalid = || ServiceError::Invalid(format!("month '{}' is not in YYYY-MM form", month));

    let (year, mm) = month.split_once('-').ok_or_else(invalid)?;
    if year.len() != 4 || mm.len() != 2 {
        return Err(invalid());
    }
    if !year.bytes().chain(mm.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    match mm.parse::<u8>() {
        Ok(1..=12) => Ok(()),
        _ => Err(invalid()),
    }
}

/// Create or replace the period record for `month`.
pub async fn update_period(
    stores: &ScopedStores,
    month: &str,
    data: serde_json::Value,
) -> Result<PeriodRecord, ServiceError> {
    validate_month(month)?;
    let serde_json::Value::Object(data) = data else {
        return Err(ServiceError::Invalid("data must be a JSON object".to_string()));
    };

    let record = PeriodRecord {
        month: month.to_string(),
        data,
        updated_at: Utc::now(),
    };
    stores.upsert_period(&record).await?;

    info!(month, "Period updated");
    Ok(record)
}

/// The period record for `month`, if one was written.
pub async fn get_period(
    stores: &ScopedStores,
    month: &str,
) -> Result<Option<PeriodRecord>, ServiceError> {
    validate_month(month)?;
    Ok(stores.get_period(month).await?)
}
