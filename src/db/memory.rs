use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use super::{KeyValueStore, StoreError, StoreResult, WindowAdmission, WindowOutcome};
use crate::utils::clock::Clock;

enum Value {
    Text(String),
    Window(Vec<(f64, String)>),
}

struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

/// Process-local stand-in for Redis, for single-instance development and tests.
///
/// Expiry is evaluated against the injected clock: on read for the key in
/// question, and across the whole map on every write.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }

    fn live<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<&'a mut Entry> {
        let expired = entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            entries.remove(key);
        }
        entries.get_mut(key)
    }

    fn sweep_expired(entries: &mut HashMap<String, Entry>, now: DateTime<Utc>) {
        entries.retain(|_, entry| entry.expires_at.is_none_or(|at| at > now));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// `None` when the TTL is too large to represent; such an entry never expires.
fn expiry(now: DateTime<Utc>, ttl_secs: u64) -> Option<DateTime<Utc>> {
    i64::try_from(ttl_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        self.check_available()?;
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        Self::sweep_expired(&mut entries, now);
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: expiry(now, ttl_secs),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_available()?;
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        Ok(match Self::live(&mut entries, key, now) {
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Some(text.clone()),
            _ => None,
        })
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_available()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn admit_in_window(&self, admission: WindowAdmission<'_>) -> StoreResult<WindowOutcome> {
        self.check_available()?;
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        Self::sweep_expired(&mut entries, now);

        let mut window = match entries.get_mut(admission.key) {
            Some(Entry {
                value: Value::Window(members),
                ..
            }) => std::mem::take(members),
            _ => Vec::new(),
        };
        window.retain(|(score, _)| *score > admission.window_start);

        let count = window.len() as u32;
        let outcome = if count >= admission.limit {
            WindowOutcome::Rejected { count }
        } else {
            window.push((admission.now, admission.member.to_string()));
            WindowOutcome::Admitted { count: count + 1 }
        };

        let expires_at = match (outcome, entries.get(admission.key)) {
            (WindowOutcome::Admitted { .. }, _) => expiry(now, admission.ttl_secs),
            (WindowOutcome::Rejected { .. }, Some(existing)) => existing.expires_at,
            (WindowOutcome::Rejected { .. }, None) => None,
        };

        if window.is_empty() {
            entries.remove(admission.key);
        } else {
            entries.insert(
                admission.key.to_string(),
                Entry {
                    value: Value::Window(window),
                    expires_at,
                },
            );
        }

        Ok(outcome)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }
}
