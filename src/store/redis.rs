use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::core::StoreError;
use crate::traits::KeyStore;

/// Redis-backed [`KeyStore`].
///
/// Holds a `redis::aio::ConnectionManager`, which multiplexes commands over
/// a single auto-reconnecting connection and is cheap to clone per call, the
/// same pattern `nebula-resource`'s Redis pool wrapper uses.
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connects to `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Transport(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Wraps an already-established connection manager.
    pub fn from_connection_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl KeyStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| StoreError::Transport(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str, expire_ms: u64, create_only: bool) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("PX").arg(expire_ms);
        if create_only {
            cmd.arg("NX");
        }
        let reply: Option<String> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        conn.del(key).await.map_err(|e| StoreError::Transport(e.to_string()))
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        conn.ttl(key).await.map_err(|e| StoreError::Transport(e.to_string()))
    }

    async fn eval(&self, script: &str, keys: &[&str], args: &[&str]) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(script).arg(keys.len() as i64);
        for key in keys {
            cmd.arg(*key);
        }
        for arg in args {
            cmd.arg(*arg);
        }
        cmd.query_async(&mut conn).await.map_err(|e| StoreError::Transport(e.to_string()))
    }
}
