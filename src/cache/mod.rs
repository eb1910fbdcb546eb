//! Named response stores for offline fallback.
//!
//! A store maps a request identity (method + URL) to the last response copy
//! written for it. Stores are created on first open and only ever removed
//! wholesale.

mod handle;
mod key;
mod storage;
mod traits;

pub use handle::{Cache, Caches};
pub use storage::{CacheStorage, CachedResponse, SqliteStorage};
pub use traits::{CacheResult, CacheSource};
