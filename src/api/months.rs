//! `/months` routes.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use http::StatusCode;
use serde::Deserialize;

use super::{ApiError, ApiState};
use crate::model::PeriodRecord;
use crate::services;

#[derive(Debug, Deserialize)]
pub struct PeriodRequest {
    pub month: String,
    pub data: serde_json::Value,
}

/// `GET /months/{month}`
pub async fn get_month(
    State(state): State<Arc<ApiState>>,
    Path(month): Path<String>,
) -> Result<Json<PeriodRecord>, ApiError> {
    services::get_period(&state.month_period_list, &month)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("period {}", month)))
}

/// `POST /months`
pub async fn put_month(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<PeriodRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PeriodRecord>), ApiError> {
    let Json(request) = payload?;
    let record =
        services::update_period(&state.month_period_update, &request.month, request.data).await?;
    Ok((StatusCode::CREATED, Json(record)))
}
