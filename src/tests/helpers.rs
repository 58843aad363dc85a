use std::{collections::HashMap, sync::Arc, time::Duration as StdDuration};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode},
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::sync::Once;
use tower::ServiceExt;
use tracing::{Level, info};
use tracing_subscriber::fmt::format::FmtSpan;

use crate::{
    AppState,
    config::{Config, RateLimitConfig, StoreBackend, TokenConfig},
    create_router,
    db::MemoryStore,
    models::{rate_limit::RateLimit, user::Principal},
    services::identity::{IdentityError, IdentityStore, SqliteIdentityStore},
    utils::clock::Clock,
};

static INIT: Once = Once::new();

/// Cheapest cost bcrypt accepts; keeps hashing out of test runtimes.
pub const TEST_BCRYPT_COST: u32 = 4;

/// Initialize logging exactly once
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_target(false)
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_max_level(Level::ERROR)
            .with_span_events(FmtSpan::NONE)
            .init();
    });
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        let start = DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp");
        Self {
            now: Mutex::new(start),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Fixed set of principals whose password is always `password123`.
#[derive(Default)]
pub struct StaticIdentity {
    users: Mutex<HashMap<i64, Principal>>,
}

impl StaticIdentity {
    pub fn with_users(users: &[(i64, &str, &str)]) -> Self {
        let users = users
            .iter()
            .map(|&(id, email, name)| {
                (
                    id,
                    Principal {
                        id,
                        email: email.to_string(),
                        name: name.to_string(),
                    },
                )
            })
            .collect();
        Self {
            users: Mutex::new(users),
        }
    }
}

#[async_trait]
impl IdentityStore for StaticIdentity {
    async fn lookup_by_email(&self, email: &str) -> Result<Option<Principal>, IdentityError> {
        Ok(self.users.lock().values().find(|u| u.email == email).cloned())
    }

    async fn lookup_by_id(&self, id: i64) -> Result<Option<Principal>, IdentityError> {
        Ok(self.users.lock().get(&id).cloned())
    }

    async fn verify_password(&self, principal: &Principal, plaintext: &str) -> Result<bool, IdentityError> {
        Ok(self.users.lock().contains_key(&principal.id) && plaintext == "password123")
    }

    async fn create_principal(
        &self,
        email: &str,
        name: &str,
        _plaintext: &str,
    ) -> Result<Principal, IdentityError> {
        let mut users = self.users.lock();
        if users.values().any(|u| u.email == email) {
            return Err(IdentityError::EmailTaken);
        }
        let id = users.keys().max().copied().unwrap_or_default() + 1;
        let principal = Principal {
            id,
            email: email.to_string(),
            name: name.to_string(),
        };
        users.insert(id, principal.clone());
        Ok(principal)
    }

    async fn update_password(&self, id: i64, _plaintext: &str) -> Result<(), IdentityError> {
        if !self.users.lock().contains_key(&id) {
            return Err(IdentityError::UnknownUser(id));
        }
        Ok(())
    }
}

pub fn test_token_config() -> TokenConfig {
    TokenConfig {
        secret: "test-secret-key".to_string(),
        access_ttl_secs: 3_600,
        refresh_ttl_secs: 2_592_000,
    }
}

pub fn test_config() -> Config {
    let generous = RateLimit::new(1_000, 3_600);
    Config {
        bind_addr: ([127, 0, 0, 1], 0).into(),
        database_url: "sqlite::memory:".to_string(),
        redis_url: "redis://127.0.0.1:6379".to_string(),
        store_backend: StoreBackend::Memory,
        store_timeout: StdDuration::from_millis(250),
        bcrypt_cost: TEST_BCRYPT_COST,
        tokens: test_token_config(),
        rate_limits: RateLimitConfig {
            enabled: true,
            default: generous,
            register: generous,
            login: generous,
            refresh: generous,
        },
    }
}

pub async fn setup_test_db() -> SqlitePool {
    init_tracing();
    info!("Setting up test database");

    // A single connection keeps the in-memory database alive and shared
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

pub struct TestApp {
    pub router: Router,
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
}

pub async fn create_test_app(config: Config) -> TestApp {
    let pool = setup_test_db().await;
    let clock = Arc::new(ManualClock::default());
    let store = MemoryStore::new(clock.clone());
    let identity = Arc::new(SqliteIdentityStore::new(pool, config.bcrypt_cost));

    let state = AppState::new(Arc::new(store.clone()), identity, clock.clone(), &config);
    let router = create_router(state, &config.rate_limits);

    TestApp {
        router,
        store,
        clock,
    }
}

pub async fn test_request(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    bearer: Option<&str>,
) -> (StatusCode, Value, HeaderMap) {
    let body = match body {
        Some(json) => Body::from(serde_json::to_string(&json).unwrap()),
        None => Body::empty(),
    };

    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = bearer {
        request = request.header("authorization", format!("Bearer {token}"));
    }
    let request = request.body(body).unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    (status, body, headers)
}
