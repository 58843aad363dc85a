use std::sync::Arc;

use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::{
    db::{KeyValueStore, WindowAdmission, WindowOutcome},
    models::rate_limit::{Decision, RateLimit},
    utils::clock::Clock,
};

fn window_key(client_id: &str, operation: &str) -> String {
    format!("rate_limit:{client_id}:{operation}")
}

/// Sliding-window-log rate limiter over the shared store.
///
/// Fails open: if the store cannot be consulted the request is allowed.
#[derive(Clone)]
pub struct RateController {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    enabled: bool,
}

impl RateController {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, enabled: bool) -> Self {
        Self {
            store,
            clock,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn check(&self, client_id: &str, operation: &str, limit: RateLimit) -> Decision {
        self.check_and_consume(client_id, operation, limit.requests, limit.period_secs)
            .await
    }

    /// Count this request against `(client_id, operation)` if the trailing
    /// `period_secs` window still has room. Denied attempts are not recorded.
    #[instrument(skip(self))]
    pub async fn check_and_consume(
        &self,
        client_id: &str,
        operation: &str,
        limit: u32,
        period_secs: u64,
    ) -> Decision {
        if !self.enabled {
            return Decision::Allow { remaining: None };
        }

        let now = self.clock.now().timestamp_millis() as f64 / 1000.0;
        let key = window_key(client_id, operation);
        let member = Uuid::new_v4().to_string();
        let admission = WindowAdmission {
            key: &key,
            member: &member,
            now,
            window_start: now - period_secs as f64,
            limit,
            ttl_secs: period_secs,
        };

        match self.store.admit_in_window(admission).await {
            Ok(WindowOutcome::Admitted { count }) => {
                debug!(count, "Request admitted");
                Decision::Allow {
                    remaining: Some(limit.saturating_sub(count)),
                }
            }
            Ok(WindowOutcome::Rejected { count }) => {
                warn!(count, "Rate limit exceeded");
                Decision::Deny
            }
            Err(e) => {
                error!(error = %e, "Rate limit check failed, allowing request");
                Decision::Allow { remaining: None }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{db::MemoryStore, tests::helpers::ManualClock};

    fn controller() -> (RateController, MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryStore::new(clock.clone());
        let controller = RateController::new(Arc::new(store.clone()), clock.clone(), true);
        (controller, store, clock)
    }

    #[tokio::test]
    async fn window_denies_over_limit_and_recovers_after_period() {
        let (limiter, _, clock) = controller();

        for _ in 0..3 {
            assert!(limiter.check_and_consume("10.0.0.1", "login", 3, 60).await.is_allowed());
            clock.advance(Duration::seconds(1));
        }

        // t = 3
        assert_eq!(
            limiter.check_and_consume("10.0.0.1", "login", 3, 60).await,
            Decision::Deny
        );

        clock.advance(Duration::seconds(58));
        // t = 61, the t = 0 event has aged out
        assert!(limiter.check_and_consume("10.0.0.1", "login", 3, 60).await.is_allowed());
    }

    #[tokio::test]
    async fn event_exactly_one_period_old_no_longer_counts() {
        let (limiter, _, clock) = controller();

        assert!(limiter.check_and_consume("c", "op", 1, 60).await.is_allowed());
        clock.advance(Duration::seconds(59));
        assert_eq!(limiter.check_and_consume("c", "op", 1, 60).await, Decision::Deny);

        clock.advance(Duration::seconds(1));
        assert!(limiter.check_and_consume("c", "op", 1, 60).await.is_allowed());
    }

    #[tokio::test]
    async fn denied_attempts_are_not_recorded() {
        let (limiter, _, clock) = controller();

        assert!(limiter.check_and_consume("c", "op", 1, 10).await.is_allowed());
        for _ in 0..5 {
            clock.advance(Duration::seconds(1));
            assert_eq!(limiter.check_and_consume("c", "op", 1, 10).await, Decision::Deny);
        }

        // Only the first request sits in the window; it leaves at t = 10.
        clock.advance(Duration::seconds(5));
        assert!(limiter.check_and_consume("c", "op", 1, 10).await.is_allowed());
    }

    #[tokio::test]
    async fn reports_remaining_quota() {
        let (limiter, _, _) = controller();

        assert_eq!(
            limiter.check("c", "op", RateLimit::new(3, 60)).await,
            Decision::Allow { remaining: Some(2) }
        );
        assert_eq!(
            limiter.check("c", "op", RateLimit::new(3, 60)).await,
            Decision::Allow { remaining: Some(1) }
        );
    }

    #[tokio::test]
    async fn quotas_are_scoped_per_client_and_operation() {
        let (limiter, _, _) = controller();

        assert!(limiter.check_and_consume("a", "login", 1, 60).await.is_allowed());
        assert_eq!(limiter.check_and_consume("a", "login", 1, 60).await, Decision::Deny);

        assert!(limiter.check_and_consume("b", "login", 1, 60).await.is_allowed());
        assert!(limiter.check_and_consume("a", "register", 1, 60).await.is_allowed());
    }

    #[tokio::test]
    async fn fails_open_when_store_is_unreachable() {
        let (limiter, store, _) = controller();
        store.set_unavailable(true);

        for _ in 0..10 {
            assert_eq!(
                limiter.check_and_consume("c", "op", 1, 60).await,
                Decision::Allow { remaining: None }
            );
        }
    }

    #[tokio::test]
    async fn disabled_controller_allows_everything() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryStore::new(clock.clone());
        let limiter = RateController::new(Arc::new(store), clock, false);

        for _ in 0..5 {
            assert!(limiter.check_and_consume("c", "op", 0, 60).await.is_allowed());
        }
    }

    #[tokio::test]
    async fn zero_limit_denies_every_request() {
        let (limiter, _, _) = controller();
        assert_eq!(limiter.check_and_consume("c", "op", 0, 60).await, Decision::Deny);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_never_exceed_the_limit() {
        let (limiter, _, _) = controller();
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..50 {
            let limiter = limiter.clone();
            tasks.spawn(async move { limiter.check_and_consume("c", "op", 5, 60).await });
        }

        let mut allowed = 0;
        while let Some(decision) = tasks.join_next().await {
            if decision.unwrap().is_allowed() {
                allowed += 1;
            }
        }

        assert_eq!(allowed, 5);
    }
}
