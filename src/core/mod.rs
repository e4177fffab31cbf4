//! Core types shared by the store, lock, and loader layers.

mod entry;
mod error;
mod key;

pub use entry::{CacheEntry, now_millis};
pub use error::{CacheError, LockError, LoaderError, StoreError};
pub(crate) use key::{derive_key, validate_name};
