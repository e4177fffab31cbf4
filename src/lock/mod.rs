//! Distributed single-flight primitive on top of a [`KeyStore`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;

use crate::core::LockError;
use crate::traits::KeyStore;

/// The exact safe-release script: a token-guarded compare-then-delete.
/// Prevents a caller whose lock expired from deleting a successor's lock.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  return redis.call("DEL", KEYS[1])
else
  return 0
end
"#;

const DEFAULT_LOCK_KEY_PREFIX: &str = "nwlock";
const DEFAULT_CHECK_LOCK_DELAY: Duration = Duration::from_millis(100);

/// Outcome of a [`RaceLock::race`] call.
#[derive(Debug, Clone)]
pub struct RaceOutcome<T> {
    /// Whether this caller acquired the lock and ran `task`.
    pub executed: bool,
    /// The task's return value, present only when `executed` is `true`.
    pub result: Option<T>,
}

/// Generates a fresh 160-bit token, hex-encoded to 40 characters.
fn generate_token() -> String {
    let mut bytes = [0u8; 20];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().fold(String::with_capacity(40), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

/// Distributed lock built on the KeyStore's atomic `SET NX` and a
/// token-guarded release script. Provides two modes: [`RaceLock::all`]
/// (serialize: poll until acquired, no upper bound on wait) and
/// [`RaceLock::race`] (single-flight: one acquisition attempt, contended
/// callers either skip or wait for release without executing).
///
/// Cheap to clone (an `Arc<dyn KeyStore>` and two small fields) so a
/// detached background task can own one independently of the `Loader`
/// that spawned it.
#[derive(Clone)]
pub struct RaceLock {
    store: Arc<dyn KeyStore>,
    key_prefix: String,
    check_lock_delay: Duration,
}

impl RaceLock {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            key_prefix: DEFAULT_LOCK_KEY_PREFIX.to_string(),
            check_lock_delay: DEFAULT_CHECK_LOCK_DELAY,
        }
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn with_check_lock_delay(mut self, delay: Duration) -> Self {
        self.check_lock_delay = delay;
        self
    }

    async fn safe_release(&self, lock_key: &str, token: &str) -> Result<i64, LockError> {
        self.store
            .eval(RELEASE_SCRIPT, &[lock_key], &[token])
            .await
            .map_err(LockError::from)
    }

    /// Serialize mode: polls `SET NX` until acquired (no upper bound), then
    /// runs `task(delayed)` where `delayed` is true iff at least one retry
    /// occurred. Always releases after the task completes, re-raising the
    /// task's error (if any) after release.
    pub async fn all<F, Fut, T, E>(&self, name: &str, timeout: Duration, task: F) -> Result<T, E>
    where
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let lock_key = format!("{}:{}:all", self.key_prefix, name);
        let token = generate_token();
        let timeout_ms = timeout.as_millis() as u64;

        let mut delayed = false;
        loop {
            match self.store.set(&lock_key, &token, timeout_ms, true).await {
                Ok(true) => break,
                Ok(false) => {
                    delayed = true;
                    tokio::time::sleep(self.check_lock_delay).await;
                }
                Err(e) => return Err(E::from(LockError::from(e))),
            }
        }

        let result = task(delayed).await;
        if let Err(e) = self.safe_release(&lock_key, &token).await {
            tracing::warn!(lock = %lock_key, error = %e, "serialize-mode lock release failed");
        }
        result
    }

    /// Single-flight mode: one acquisition attempt. If acquired, runs
    /// `task(false)` and releases, returning `{executed: true, result}`. If
    /// contended and `ignore` is true, returns `{executed: false, result:
    /// None}` immediately. If contended and `ignore` is false, polls until
    /// the lock key is absent (released or expired) then returns
    /// `{executed: false, result: None}` without running `task` or
    /// attempting release (no token is owned in that case).
    pub async fn race<F, Fut, T, E>(
        &self,
        name: &str,
        timeout: Duration,
        task: F,
        ignore: bool,
    ) -> Result<RaceOutcome<T>, E>
    where
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        let lock_key = format!("{}:{}:race", self.key_prefix, name);
        let token = generate_token();
        let timeout_ms = timeout.as_millis() as u64;

        match self.store.set(&lock_key, &token, timeout_ms, true).await {
            Ok(true) => {
                let result = task(false).await;
                if let Err(e) = self.safe_release(&lock_key, &token).await {
                    tracing::warn!(lock = %lock_key, error = %e, "race-mode lock release failed");
                }
                result.map(|value| RaceOutcome { executed: true, result: Some(value) })
            }
            Ok(false) if ignore => Ok(RaceOutcome { executed: false, result: None }),
            Ok(false) => {
                loop {
                    match self.store.get(&lock_key).await {
                        Ok(None) => break,
                        Ok(Some(_)) => tokio::time::sleep(self.check_lock_delay).await,
                        Err(e) => return Err(E::from(LockError::from(e))),
                    }
                }
                Ok(RaceOutcome { executed: false, result: None })
            }
            Err(e) => Err(E::from(LockError::from(e))),
        }
    }
}
