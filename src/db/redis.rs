use std::{future::Future, time::Duration};

use ::redis::{AsyncCommands, Client, RedisResult, Script, aio::ConnectionManager};
use async_trait::async_trait;
use tracing::{error, info, instrument};

use super::{KeyValueStore, StoreError, StoreResult, WindowAdmission, WindowOutcome};

// KEYS[1] = window key
// ARGV = window_start, now, member, limit, ttl
const SLIDING_WINDOW_SCRIPT: &str = r"
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local count = redis.call('ZCARD', KEYS[1])
if count >= tonumber(ARGV[4]) then
    return {0, count}
end
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[3])
redis.call('EXPIRE', KEYS[1], ARGV[5])
return {1, count + 1}
";

#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    window_script: Script,
    op_timeout: Duration,
}

impl RedisStore {
    #[instrument(skip(redis_url))]
    pub async fn connect(redis_url: &str, op_timeout: Duration) -> RedisResult<Self> {
        info!("Initializing Redis connection");

        let client = Client::open(redis_url).map_err(|e| {
            error!(error = %e, "Failed to create Redis client");
            e
        })?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            error!(error = %e, "Failed to establish Redis connection");
            e
        })?;

        info!("Redis connection established");
        Ok(Self {
            manager,
            window_script: Script::new(SLIDING_WINDOW_SCRIPT),
            op_timeout,
        })
    }

    async fn bounded<T, F>(&self, call: F) -> StoreResult<T>
    where
        F: Future<Output = RedisResult<T>> + Send,
    {
        match tokio::time::timeout(self.op_timeout, call).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.op_timeout)),
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        let mut con = self.manager.clone();
        self.bounded(con.set_ex::<_, _, ()>(key, value, ttl_secs)).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut con = self.manager.clone();
        self.bounded(con.get::<_, Option<String>>(key)).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut con = self.manager.clone();
        self.bounded(con.del::<_, ()>(key)).await
    }

    async fn admit_in_window(&self, admission: WindowAdmission<'_>) -> StoreResult<WindowOutcome> {
        let mut con = self.manager.clone();
        let mut invocation = self.window_script.key(admission.key);
        invocation
            .arg(admission.window_start)
            .arg(admission.now)
            .arg(admission.member)
            .arg(admission.limit)
            .arg(admission.ttl_secs);

        let reply: Vec<i64> = self
            .bounded(invocation.invoke_async::<_, Vec<i64>>(&mut con))
            .await?;

        let count = reply.get(1).copied().unwrap_or_default().max(0) as u32;
        match reply.first() {
            Some(1) => Ok(WindowOutcome::Admitted { count }),
            _ => Ok(WindowOutcome::Rejected { count }),
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut con = self.manager.clone();
        self.bounded(::redis::cmd("PING").query_async::<_, String>(&mut con))
            .await
            .map(|_| ())
    }
}
