use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use diesel::prelude::*;
use std::sync::Arc;

use angel_shared::types::api::{HealthCheck, HealthResponse};

use crate::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = match state.db.get() {
        Ok(mut conn) => match diesel::sql_query("SELECT 1").execute(&mut conn) {
            Ok(_) => HealthCheck::passed("database"),
            Err(e) => HealthCheck::failed("database", e.to_string()),
        },
        Err(e) => HealthCheck::failed("database", e.to_string()),
    };

    let health = HealthResponse::healthy("angel-api", env!("CARGO_PKG_VERSION")).with_checks(vec![database]);
    let status = health.status_code();
    if status != StatusCode::OK {
        tracing::warn!("health check failed");
    }
    (status, Json(health))
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
