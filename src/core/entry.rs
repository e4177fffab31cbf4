use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The unit stored under every data key: the loader's value plus the
/// timestamp it was produced at. `create_time` is informational only — all
/// freshness decisions are driven by the store's own TTL (see `traits::KeyStore::ttl`),
/// never by comparing `create_time` to `now`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(rename = "createTime")]
    pub create_time: i64,
    pub value: Value,
}

/// Current time as milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
