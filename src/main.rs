use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod db;
mod errors;
mod middleware;
mod models;
mod services;
mod utils;
#[cfg(test)]
mod tests;

use crate::{
    config::{Config, RateLimitConfig, StoreBackend},
    db::{KeyValueStore, MemoryStore, RedisStore},
    middleware::{
        auth::auth_middleware,
        rate_limit::{RouteLimit, rate_limit_middleware},
    },
    services::{
        auth_service::AuthService,
        credential_service::CredentialService,
        identity::{IdentityStore, SqliteIdentityStore},
        rate_limit_service::RateController,
    },
    utils::clock::{Clock, SystemClock},
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn KeyValueStore>,
    pub credentials: CredentialService,
    pub rate_limiter: RateController,
    pub auth: AuthService,
}

impl AppState {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        identity: Arc<dyn IdentityStore>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        let credentials =
            CredentialService::new(store.clone(), identity.clone(), clock.clone(), &config.tokens);
        let rate_limiter = RateController::new(store.clone(), clock, config.rate_limits.enabled);
        let auth = AuthService::new(identity, credentials.clone());

        Self {
            store,
            credentials,
            rate_limiter,
            auth,
        }
    }
}

pub fn create_router(state: AppState, limits: &RateLimitConfig) -> Router {
    // Create a CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let limited = |operation, limit| {
        axum_middleware::from_fn_with_state(
            RouteLimit::new(&state.rate_limiter, operation, limit),
            rate_limit_middleware,
        )
    };
    // Quota checks run before authentication.
    let authenticated = axum_middleware::from_fn_with_state(state.clone(), auth_middleware);

    Router::new()
        .route(
            "/auth/me",
            get(api::user::get_current_user).layer(
                ServiceBuilder::new()
                    .layer(limited("auth.me", limits.default))
                    .layer(authenticated.clone()),
            ),
        )
        .route(
            "/auth/logout-all",
            post(api::auth::logout_all).layer(
                ServiceBuilder::new()
                    .layer(limited("auth.logout_all", limits.default))
                    .layer(authenticated.clone()),
            ),
        )
        .route(
            "/auth/change-password",
            post(api::auth::change_password).layer(
                ServiceBuilder::new()
                    .layer(limited("auth.change_password", limits.default))
                    .layer(authenticated),
            ),
        )
        .route(
            "/auth/register",
            post(api::auth::register).layer(limited("auth.register", limits.register)),
        )
        .route(
            "/auth/login",
            post(api::auth::login).layer(limited("auth.login", limits.login)),
        )
        .route(
            "/auth/refresh",
            post(api::auth::refresh).layer(limited("auth.refresh", limits.refresh)),
        )
        .route("/auth/logout", post(api::auth::logout))
        .route(
            "/api/status",
            get(api::status::status).layer(limited("api.status", limits.default)),
        )
        .route("/api/health", get(api::status::health))
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn KeyValueStore> = match config.store_backend {
        StoreBackend::Redis => Arc::new(RedisStore::connect(&config.redis_url, config.store_timeout).await?),
        StoreBackend::Memory => {
            tracing::warn!("Using in-process store; state is not shared between instances");
            Arc::new(MemoryStore::new(clock.clone()))
        }
    };

    let pool = db::create_db_pool(&config.database_url).await?;
    let identity: Arc<dyn IdentityStore> = Arc::new(SqliteIdentityStore::new(pool, config.bcrypt_cost));

    let state = AppState::new(store, identity, clock, &config);
    let app = create_router(state, &config.rate_limits);

    tracing::info!("listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
