//! `/transactions` routes.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState};
use crate::model::TransactionRecord;
use crate::services;

#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<TransactionRecord>,
}

#[derive(Debug, Deserialize)]
pub struct CategoryUpdateRequest {
    pub description: String,
    pub category: String,
}

#[derive(Debug, Serialize)]
pub struct CategoryUpdateResponse {
    pub description: String,
    pub category: String,
    pub updated: usize,
}

/// `GET /transactions`
pub async fn list_transactions(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    let transactions = services::list_transactions(&state.transaction_list).await?;
    Ok(Json(TransactionsResponse { transactions }))
}

/// `PUT /transactions/category`
pub async fn update_category(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<CategoryUpdateRequest>, JsonRejection>,
) -> Result<Json<CategoryUpdateResponse>, ApiError> {
    let Json(request) = payload?;
    let update =
        services::update_category(&state.category_update, &request.description, &request.category)
            .await?;

    Ok(Json(CategoryUpdateResponse {
        description: update.description,
        category: update.category,
        updated: update.updated,
    }))
}
