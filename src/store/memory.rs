use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as DashEntry;

use crate::core::StoreError;
use crate::traits::KeyStore;

struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|t| Instant::now() >= t).unwrap_or(false)
    }
}

/// In-process [`KeyStore`] backed by a `DashMap`.
///
/// Doubles as a first-class backend for single-node deployments that don't
/// need cross-process coordination, and as a deterministic test double —
/// the same role `storage::memory::MemoryStateStore` plays for `StateStore`
/// in the credential manager this crate is modeled on. `eval` does not run
/// an embedded Lua interpreter: it implements the compare-then-delete
/// semantics of the one script this crate ever evaluates (the lock release
/// script) directly against the map.
#[derive(Default)]
pub struct MemoryStore {
    data: DashMap<String, Slot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { data: DashMap::new() }
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let found = self.data.get(key).map(|slot| {
            if slot.is_expired() { None } else { Some(slot.value.clone()) }
        });
        match found {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.data.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, expire_ms: u64, create_only: bool) -> Result<bool, StoreError> {
        let expires_at = Some(Instant::now() + Duration::from_millis(expire_ms));
        if !create_only {
            self.data.insert(key.to_string(), Slot { value: value.to_string(), expires_at });
            return Ok(true);
        }
        match self.data.entry(key.to_string()) {
            DashEntry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(Slot { value: value.to_string(), expires_at });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            DashEntry::Vacant(vacant) => {
                vacant.insert(Slot { value: value.to_string(), expires_at });
                Ok(true)
            }
        }
    }

    async fn del(&self, key: &str) -> Result<u64, StoreError> {
        Ok(if self.data.remove(key).is_some() { 1 } else { 0 })
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        match self.data.get(key) {
            Some(slot) if !slot.is_expired() => match slot.expires_at {
                Some(deadline) => Ok(deadline.saturating_duration_since(Instant::now()).as_secs() as i64),
                None => Ok(-1),
            },
            _ => Ok(-2),
        }
    }

    async fn eval(&self, _script: &str, keys: &[&str], args: &[&str]) -> Result<i64, StoreError> {
        let key = keys
            .first()
            .ok_or_else(|| StoreError::Transport("eval requires exactly one key".into()))?;
        let token = args
            .first()
            .ok_or_else(|| StoreError::Transport("eval requires exactly one arg".into()))?;

        let matches = match self.data.get(*key) {
            Some(slot) if !slot.is_expired() && slot.value == *token => true,
            _ => false,
        };
        if matches {
            self.data.remove(*key);
            Ok(1)
        } else {
            Ok(0)
        }
    }
}
