//! The cache-refresh orchestrator: key derivation, freshness inference from
//! the store's remaining TTL, staleness-triggered background refresh, and
//! result delivery to every waiter.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{CacheEntry, CacheError, LoaderError, StoreError, derive_key, now_millis, validate_name};
use crate::lock::RaceLock;
use crate::traits::KeyStore;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type LoaderFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, LoaderError>> + Send + Sync>;

const DEFAULT_TTL_SECS: u64 = 30;
const DEFAULT_KEY_PREFIX: &str = "nwloader";
const MINIMUM_TTL_SECS: u64 = 2;

/// Construction options for a [`Loader`]. Every field defaults to the
/// value documented in the specification's External Interfaces section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderOptions {
    /// User TTL in seconds; must be `>= 2`. Defaults to 30.
    pub ttl: Option<u64>,
    /// Namespace for data keys. Defaults to `"nwloader"`.
    pub key_prefix: Option<String>,
    /// Namespace for lock keys. Defaults to `"nwlock"`.
    pub lock_key_prefix: Option<String>,
    /// Delay between lock-acquisition polls.
    #[serde(default, with = "humantime_serde::option")]
    pub check_lock_delay: Option<Duration>,
    /// Lock PX expiry / race-lock timeout. Defaults to 10 seconds.
    #[serde(default, with = "humantime_serde::option")]
    pub default_timeout: Option<Duration>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self { ttl: None, key_prefix: None, lock_key_prefix: None, check_lock_delay: None, default_timeout: None }
    }
}

/// Read-through cache with single-flight loading and stale-while-revalidate
/// refresh for one logical data source, identified by `name`.
///
/// Construct once per logical loader (e.g. "users", "session-tokens") and
/// reuse across calls — `Loader` is cheap to clone (an `Arc<dyn KeyStore>`
/// and a handful of `String`/`Duration` fields) and safe to share across
/// tasks.
pub struct Loader {
    name: String,
    store: Arc<dyn KeyStore>,
    lock: RaceLock,
    loader_fn: LoaderFn,
    ttl: Duration,
    key_prefix: String,
    default_timeout: Duration,
}

impl Loader {
    /// Validates `name` and `options.ttl` synchronously, then constructs a
    /// `Loader` wrapping `store` and `loader_fn`.
    ///
    /// `loader_fn` is the user-supplied function producing a fresh value
    /// for a cache key; it is treated as an opaque external collaborator —
    /// this crate never retries, times out, or caches its failures.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        store: Arc<dyn KeyStore>,
        options: LoaderOptions,
        loader_fn: F,
    ) -> Result<Self, CacheError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, LoaderError>> + Send + 'static,
    {
        let name = name.into();
        validate_name(&name)?;

        let ttl_secs = options.ttl.unwrap_or(DEFAULT_TTL_SECS);
        if ttl_secs < MINIMUM_TTL_SECS {
            return Err(CacheError::ValidationFail(format!(
                "ttl must be >= {MINIMUM_TTL_SECS} seconds, got {ttl_secs}"
            )));
        }

        let key_prefix = options.key_prefix.unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());
        let lock_key_prefix = options.lock_key_prefix.unwrap_or_else(|| "nwlock".to_string());
        let check_lock_delay = options.check_lock_delay.unwrap_or(Duration::from_millis(100));
        let default_timeout = options.default_timeout.unwrap_or(Duration::from_secs(10));

        let lock = RaceLock::new(Arc::clone(&store))
            .with_key_prefix(lock_key_prefix)
            .with_check_lock_delay(check_lock_delay);

        let loader_fn: LoaderFn = Arc::new(move |args| {
            Box::pin(loader_fn(args)) as BoxFuture<'static, Result<Value, LoaderError>>
        });

        Ok(Self {
            name,
            store,
            lock,
            loader_fn,
            ttl: Duration::from_secs(ttl_secs),
            key_prefix,
            default_timeout,
        })
    }

    fn data_key(&self, base_key: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, self.name, base_key)
    }

    /// Loads the value for `args`, serving from cache when fresh, serving
    /// stale-but-valid cache while refreshing in the background, or
    /// blocking on a single-flight refresh on a cold cache.
    pub async fn load<A: Serialize>(&self, args: A) -> Result<Value, CacheError> {
        let args_value = serde_json::to_value(&args)
            .map_err(|e| CacheError::ValidationFail(format!("failed to serialize loader arguments: {e}")))?;
        self.load_value(args_value).await
    }

    async fn load_value(&self, args_value: Value) -> Result<Value, CacheError> {
        let base_key = derive_key(&args_value);
        let data_key = self.data_key(&base_key);

        let mut did = false;
        let mut cached: Option<Value> = None;

        match self.store.get(&data_key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(entry) => {
                    cached = Some(entry.value);
                    did = true;
                }
                Err(err) => {
                    tracing::warn!(key = %data_key, error = %err, "failed to decode cached entry, treating as miss");
                }
            },
            Ok(None) => {}
            Err(err) => {
                tracing::debug!(key = %data_key, error = %err, "store read failed, treating as miss");
            }
        }

        let needs_refresh = match self.store.ttl(&data_key).await {
            Ok(remaining) => remaining <= self.ttl.as_secs() as i64,
            Err(err) => {
                tracing::debug!(key = %data_key, error = %err, "ttl probe failed, forcing refresh");
                true
            }
        };

        if !needs_refresh {
            if let Some(value) = cached {
                return Ok(value);
            }
        }

        if did {
            // Stale but valid: the caller gets the cached value immediately
            // and the refresh runs detached. This is the stale-while-
            // revalidate path — the caller must never wait on the loader
            // here, only a cold miss (below) blocks.
            let value = cached.expect("did implies a cached value was decoded above");
            self.spawn_background_refresh(base_key, args_value);
            return Ok(value);
        }

        // Cold miss: nothing to serve, so this caller blocks on a
        // single-flight refresh (`ignore = false`: contended callers wait
        // for the lock holder's write rather than skipping).
        let loader_fn = Arc::clone(&self.loader_fn);
        let store = Arc::clone(&self.store);
        let key_prefix = self.key_prefix.clone();
        let name = self.name.clone();
        let prime_ttl_ms = self.ttl.as_millis() as u64 * 2;
        let task_base_key = base_key.clone();

        let outcome = self
            .lock
            .race(
                &base_key,
                self.default_timeout,
                move |_delayed| {
                    Self::refresh(loader_fn, store, key_prefix, name, args_value, task_base_key, prime_ttl_ms)
                },
                false,
            )
            .await;

        match outcome {
            Ok(race_outcome) if race_outcome.executed => {
                Ok(race_outcome.result.expect("race outcome executed implies a result"))
            }
            Ok(_) => {
                // Post-lock fallback: someone else ran the refresh while we
                // had no cache hit of our own. A single direct re-read
                // should now observe the freshly primed entry; per the
                // design note this happens at most once per `load` call,
                // so it is inlined here rather than recursing into
                // `load_value` again.
                match self.store.get(&data_key).await {
                    Ok(Some(raw)) => serde_json::from_str::<CacheEntry>(&raw)
                        .map(|entry| entry.value)
                        .map_err(|e| CacheError::ParseFail(e.to_string())),
                    Ok(None) => Err(CacheError::StoreFail(StoreError::Transport(
                        "cache still empty after waiting for concurrent refresh".into(),
                    ))),
                    Err(err) => Err(CacheError::StoreFail(err)),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Runs `loader_fn` once and writes the result back to the store under
    /// `2 * ttl` expiry. Shared by the blocking cold-miss path and the
    /// detached stale-while-revalidate task — a free function (not a
    /// method) so it owns everything it touches and has no lifetime tied
    /// to `&self`, which a `tokio::spawn`'d task cannot hold.
    async fn refresh(
        loader_fn: LoaderFn,
        store: Arc<dyn KeyStore>,
        key_prefix: String,
        name: String,
        args: Value,
        base_key: String,
        prime_ttl_ms: u64,
    ) -> Result<Value, CacheError> {
        let value = (loader_fn)(args).await.map_err(|source| CacheError::LoaderFail {
            name: name.clone(),
            key: base_key.clone(),
            source: Box::new(source),
        })?;

        let data_key = format!("{key_prefix}:{name}:{base_key}");
        let entry = CacheEntry { create_time: now_millis(), value: value.clone() };
        match serde_json::to_string(&entry) {
            Ok(encoded) => {
                if let Err(e) = store.set(&data_key, &encoded, prime_ttl_ms, false).await {
                    tracing::warn!(key = %base_key, error = %e, "failed to prime cache after refresh");
                }
            }
            Err(e) => {
                tracing::warn!(key = %base_key, error = %e, "failed to encode refreshed entry");
            }
        }
        Ok(value)
    }

    /// Spawns the stale-while-revalidate refresh for `base_key`/`args_value`
    /// on the runtime, detached from the caller that is about to return the
    /// cached value. Single-flight against concurrent stale hits: a
    /// refresh already in flight makes contended callers skip (`ignore =
    /// true`) instead of piling onto the same loader invocation.
    fn spawn_background_refresh(&self, base_key: String, args_value: Value) {
        let lock = self.lock.clone();
        let loader_fn = Arc::clone(&self.loader_fn);
        let store = Arc::clone(&self.store);
        let key_prefix = self.key_prefix.clone();
        let name = self.name.clone();
        let prime_ttl_ms = self.ttl.as_millis() as u64 * 2;
        let timeout = self.default_timeout;
        let race_base_key = base_key.clone();

        tokio::spawn(async move {
            let outcome = lock
                .race(
                    &race_base_key,
                    timeout,
                    move |_delayed| Self::refresh(loader_fn, store, key_prefix, name, args_value, base_key, prime_ttl_ms),
                    true,
                )
                .await;
            if let Err(err) = outcome {
                tracing::error!(key = %race_base_key, error = %err, "background refresh failed");
            }
        });
    }

    /// Deletes the cached entry for `key` (the derived/base key, not raw
    /// loader arguments). Returns 1 if an entry was removed, 0 otherwise.
    pub async fn clear(&self, key: &str) -> Result<u64, CacheError> {
        let data_key = self.data_key(key);
        self.store.del(&data_key).await.map_err(CacheError::from)
    }

    /// Overwrites the cached entry for `key` with `value`, stamped with the
    /// current time, expiring after `2 * ttl`. Returns `true` on success.
    pub async fn prime(&self, key: &str, value: Value) -> Result<bool, CacheError> {
        let data_key = self.data_key(key);
        let entry = CacheEntry { create_time: now_millis(), value };
        let encoded =
            serde_json::to_string(&entry).map_err(|e| CacheError::ValidationFail(e.to_string()))?;
        let ttl_ms = self.ttl.as_millis() as u64 * 2;
        self.store.set(&data_key, &encoded, ttl_ms, false).await.map(|_| true).map_err(CacheError::from)
    }
}
