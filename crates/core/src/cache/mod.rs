//! Process-wide cache with per-entry expiry and a durable mirror.

mod disk;
/// In-memory store with write-through persistence and sweeping.
pub mod store;

pub use store::{CacheEntry, CacheStats, CacheStore};

/// Key prefix under which per-user collections are cached.
pub const COLLECTION_PREFIX: &str = "collection:";

/// Cache key for a user's normalized collection.
pub fn collection_key(username: &str) -> String {
    format!("{COLLECTION_PREFIX}{username}")
}
