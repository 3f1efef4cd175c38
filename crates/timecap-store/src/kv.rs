//! The key/value port.
//!
//! Exactly the single-key operations the delivery core needs, nothing more.
//! Every operation is atomic on its own; there are no cross-key
//! transactions, so multi-step writes above this trait can be interrupted
//! mid-sequence. The dispatcher self-heals the resulting stray index
//! entries instead of assuming coordination.

use std::collections::HashMap;

use async_trait::async_trait;
use timecap_core::error::Result;

#[async_trait]
pub trait Kv: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Set hash fields, creating the hash if absent.
    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()>;
    /// All fields of a hash; empty map when the key is absent.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Add (or re-score) a sorted-set member.
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()>;
    async fn zrem(&self, key: &str, member: &str) -> Result<()>;
    /// Members with `min <= score <= max`, ascending score order.
    async fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<Vec<String>>;
    /// All members, ascending score order.
    async fn zrange_all(&self, key: &str) -> Result<Vec<String>>;
    /// All members, descending score order.
    async fn zrevrange_all(&self, key: &str) -> Result<Vec<String>>;

    async fn rpush(&self, key: &str, value: &str) -> Result<()>;
    async fn lrange_all(&self, key: &str) -> Result<Vec<String>>;
    /// Remove the first occurrence of an exact value from a list.
    async fn lrem(&self, key: &str, value: &str) -> Result<()>;

    /// Atomic rename; errors if the source key does not exist.
    async fn rename(&self, src: &str, dst: &str) -> Result<()>;
}
