use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    errors::AppError,
    models::rate_limit::{Decision, RateLimit},
    services::rate_limit_service::RateController,
};

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Quota attached to one route when the router is built.
#[derive(Clone)]
pub struct RouteLimit {
    pub controller: RateController,
    pub operation: &'static str,
    pub limit: RateLimit,
}

impl RouteLimit {
    pub fn new(controller: &RateController, operation: &'static str, limit: RateLimit) -> Self {
        Self {
            controller: controller.clone(),
            operation,
            limit,
        }
    }
}

fn client_id(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit_middleware(
    State(route): State<RouteLimit>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_id(&request);

    match route.controller.check(&client, route.operation, route.limit).await {
        Decision::Deny => {
            let mut response = AppError::TooManyRequests.into_response();
            let headers = response.headers_mut();
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(route.limit.requests));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u32));
            headers.insert(RETRY_AFTER, HeaderValue::from(route.limit.period_secs));
            response
        }
        Decision::Allow { remaining } => {
            let mut response = next.run(request).await;
            if let Some(remaining) = remaining {
                let headers = response.headers_mut();
                headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(route.limit.requests));
                headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
            }
            response
        }
    }
}
