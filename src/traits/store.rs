use async_trait::async_trait;

use crate::core::StoreError;

/// Capability interface over a Redis-compatible key-value backend.
///
/// Every method is atomic at the store level and moves opaque string
/// blobs; neither serialization nor key namespacing happens here — that is
/// the caller's responsibility (see [`crate::lock::RaceLock`] and
/// [`crate::loader::Loader`]).
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Returns the stored blob, or `None` if the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` under `key` with a millisecond expiry.
    ///
    /// When `create_only` is set the write is a conditional `SET .. NX`:
    /// it only takes effect if `key` does not already hold an unexpired
    /// value. Returns `true` if the write took effect, `false` on a
    /// `create_only` conflict.
    async fn set(&self, key: &str, value: &str, expire_ms: u64, create_only: bool) -> Result<bool, StoreError>;

    /// Unconditionally deletes `key`. Returns the number of keys removed (0 or 1).
    async fn del(&self, key: &str) -> Result<u64, StoreError>;

    /// Returns the remaining TTL in seconds: `-1` if the key has no expiry,
    /// `-2` if the key is absent.
    async fn ttl(&self, key: &str) -> Result<i64, StoreError>;

    /// Evaluates a short server-side script atomically, returning an
    /// integer result. This crate's only caller is the lock release script
    /// in [`crate::lock`].
    async fn eval(&self, script: &str, keys: &[&str], args: &[&str]) -> Result<i64, StoreError>;
}
