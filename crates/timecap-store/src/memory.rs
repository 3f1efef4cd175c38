//! In-memory `Kv` backend.
//!
//! Used by tests and as a dev fallback when no Redis is reachable. Matches
//! Redis semantics where the store relies on them: per-operation atomicity,
//! ascending (score, member) ordering for range reads, rename errors on a
//! missing source.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use timecap_core::error::{Result, TimecapError};

use crate::kv::Kv;

#[derive(Default)]
struct Tables {
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    zsets: HashMap<String, HashMap<String, i64>>,
    lists: HashMap<String, Vec<String>>,
}

impl Tables {
    fn holds(&self, key: &str) -> bool {
        self.strings.contains_key(key)
            || self.hashes.contains_key(key)
            || self.zsets.contains_key(key)
            || self.lists.contains_key(key)
    }

    fn sorted_members(&self, key: &str) -> Vec<(String, i64)> {
        let mut members: Vec<(String, i64)> = self
            .zsets
            .get(key)
            .map(|z| z.iter().map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        members
    }
}

/// Process-local `Kv` implementation behind a single mutex.
#[derive(Default)]
pub struct MemoryKv {
    inner: Mutex<Tables>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_err() -> TimecapError {
    TimecapError::Store("memory store poisoned".into())
}

#[async_trait]
impl Kv for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let t = self.inner.lock().map_err(|_| lock_err())?;
        Ok(t.strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut t = self.inner.lock().map_err(|_| lock_err())?;
        t.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut t = self.inner.lock().map_err(|_| lock_err())?;
        t.strings.remove(key);
        t.hashes.remove(key);
        t.zsets.remove(key);
        t.lists.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let t = self.inner.lock().map_err(|_| lock_err())?;
        Ok(t.holds(key))
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        let mut t = self.inner.lock().map_err(|_| lock_err())?;
        let hash = t.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert((*field).to_string(), value.clone());
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let t = self.inner.lock().map_err(|_| lock_err())?;
        Ok(t.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let mut t = self.inner.lock().map_err(|_| lock_err())?;
        t.zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut t = self.inner.lock().map_err(|_| lock_err())?;
        if let Some(z) = t.zsets.get_mut(key) {
            z.remove(member);
            if z.is_empty() {
                t.zsets.remove(key);
            }
        }
        Ok(())
    }

    async fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<Vec<String>> {
        let t = self.inner.lock().map_err(|_| lock_err())?;
        Ok(t.sorted_members(key)
            .into_iter()
            .filter(|(_, s)| *s >= min && *s <= max)
            .map(|(m, _)| m)
            .collect())
    }

    async fn zrange_all(&self, key: &str) -> Result<Vec<String>> {
        let t = self.inner.lock().map_err(|_| lock_err())?;
        Ok(t.sorted_members(key).into_iter().map(|(m, _)| m).collect())
    }

    async fn zrevrange_all(&self, key: &str) -> Result<Vec<String>> {
        let t = self.inner.lock().map_err(|_| lock_err())?;
        let mut members: Vec<String> =
            t.sorted_members(key).into_iter().map(|(m, _)| m).collect();
        members.reverse();
        Ok(members)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        let mut t = self.inner.lock().map_err(|_| lock_err())?;
        t.lists
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        Ok(())
    }

    async fn lrange_all(&self, key: &str) -> Result<Vec<String>> {
        let t = self.inner.lock().map_err(|_| lock_err())?;
        Ok(t.lists.get(key).cloned().unwrap_or_default())
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<()> {
        let mut t = self.inner.lock().map_err(|_| lock_err())?;
        if let Some(list) = t.lists.get_mut(key) {
            if let Some(pos) = list.iter().position(|v| v == value) {
                list.remove(pos);
            }
            if list.is_empty() {
                t.lists.remove(key);
            }
        }
        Ok(())
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let mut t = self.inner.lock().map_err(|_| lock_err())?;
        if !t.holds(src) {
            return Err(TimecapError::Store(format!("rename: no such key '{src}'")));
        }
        if let Some(v) = t.strings.remove(src) {
            t.strings.insert(dst.to_string(), v);
        }
        if let Some(v) = t.hashes.remove(src) {
            t.hashes.insert(dst.to_string(), v);
        }
        if let Some(v) = t.zsets.remove(src) {
            t.zsets.insert(dst.to_string(), v);
        }
        if let Some(v) = t.lists.remove(src) {
            t.lists.insert(dst.to_string(), v);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zrange_by_score_is_inclusive_and_ordered() {
        let kv = MemoryKv::new();
        kv.zadd("z", "c", 30).await.unwrap();
        kv.zadd("z", "a", 10).await.unwrap();
        kv.zadd("z", "b", 20).await.unwrap();

        let hits = kv.zrange_by_score("z", 0, 20).await.unwrap();
        assert_eq!(hits, vec!["a", "b"]);

        let all = kv.zrange_all("z").await.unwrap();
        assert_eq!(all, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn rename_moves_the_key_and_fails_on_missing_source() {
        let kv = MemoryKv::new();
        kv.zadd("old", "m", 1).await.unwrap();
        kv.rename("old", "new").await.unwrap();

        assert!(!kv.exists("old").await.unwrap());
        assert!(kv.exists("new").await.unwrap());
        assert!(kv.rename("old", "elsewhere").await.is_err());
    }

    #[tokio::test]
    async fn lrem_removes_first_match_only() {
        let kv = MemoryKv::new();
        kv.rpush("l", "x").await.unwrap();
        kv.rpush("l", "y").await.unwrap();
        kv.rpush("l", "x").await.unwrap();

        kv.lrem("l", "x").await.unwrap();
        assert_eq!(kv.lrange_all("l").await.unwrap(), vec!["y", "x"]);
    }
}
