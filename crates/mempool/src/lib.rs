//! Unconfirmed-transaction pool.

mod pool;

pub use pool::{MemoryUtCache, UtCacheConfig};
