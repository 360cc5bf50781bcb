pub mod cache;
pub mod kv;

pub use cache::{CacheKey, CacheStore};
pub use kv::{FileStore, KeyValueStore, MemoryStore};
