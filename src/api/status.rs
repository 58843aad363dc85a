use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::AppState;

#[derive(Serialize)]
struct Message {
    status: &'static str,
    version: &'static str,
}

pub async fn status() -> impl IntoResponse {
    Json(Message {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let store_healthy = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Store health check failed");
            false
        }
    };

    let (code, status) = if store_healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(json!({
            "status": status,
            "services": {
                "store": if store_healthy { "healthy" } else { "unhealthy" },
                "rate_limiting": if state.rate_limiter.is_enabled() { "enabled" } else { "disabled" },
            },
        })),
    )
}
