//! Authorized HTTP API.
//!
//! Every route except `/health` sits behind the shared-secret authorizer.
//! Each route holds its own [`ScopedStores`] with only the grants it needs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::{middleware, Json, Router};
use serde_json::json;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{require_authorization, Authorizer};
use crate::capability::{grants, CapabilitySet};
use crate::config::ApiConfig;
use crate::storage::{ScopedStores, Stores};

mod error;
mod months;
mod transactions;

pub use error::ApiError;
pub use months::PeriodRequest;
pub use transactions::{CategoryUpdateRequest, CategoryUpdateResponse, TransactionsResponse};

/// Per-route store views.
pub struct ApiState {
    pub transaction_list: ScopedStores,
    pub category_update: ScopedStores,
    pub month_period_list: ScopedStores,
    pub month_period_update: ScopedStores,
}

impl ApiState {
    pub fn new(stores: Stores, op_timeout: Duration) -> Self {
        let scoped = |holder: &'static str, grants: CapabilitySet| {
            ScopedStores::new(holder, stores.clone(), grants, op_timeout)
        };
        Self {
            transaction_list: scoped("transaction-list", grants::transaction_list()),
            category_update: scoped("category-update", grants::category_update()),
            month_period_list: scoped("month-period-list", grants::month_period_list()),
            month_period_update: scoped("month-period-update", grants::month_period_update()),
        }
    }
}

/// Build the router.
///
/// `request_timeout` bounds each request end to end.
pub fn router(state: ApiState, authorizer: Arc<Authorizer>, request_timeout: Duration) -> Router {
    let protected = Router::new()
        .route("/transactions", get(transactions::list_transactions))
        .route("/transactions/category", put(transactions::update_category))
        .route("/months/:month", get(months::get_month))
        .route("/months", post(months::put_month))
        .route_layer(middleware::from_fn_with_state(
            authorizer,
            require_authorization,
        ))
        .with_state(Arc::new(state));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Serve `router` on the configured address until `shutdown` resolves.
pub async fn serve(
    config: &ApiConfig,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(address = %address, "Finance API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Finance API stopped");
    Ok(())
}
