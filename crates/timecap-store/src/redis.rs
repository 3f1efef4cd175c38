//! Redis `Kv` backend.
//!
//! One `ConnectionManager` per process (it multiplexes and reconnects
//! internally); the store clones it per call. Constructed once at startup
//! and injected — never looked up from ambient state.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use timecap_core::error::{Result, TimecapError};

use crate::kv::Kv;

pub struct RedisKv {
    manager: ConnectionManager,
}

impl RedisKv {
    /// Connect and verify the server is reachable.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| TimecapError::Store(format!("redis url: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| TimecapError::Store(format!("redis connect: {e}")))?;
        tracing::info!("💾 Redis connected: {url}");
        Ok(Self { manager })
    }
}

fn store_err(e: redis::RedisError) -> TimecapError {
    TimecapError::Store(format!("redis: {e}"))
}

#[async_trait]
impl Kv for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut con = self.manager.clone();
        con.get(key).await.map_err(store_err)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut con = self.manager.clone();
        let _: () = con.set(key, value).await.map_err(store_err)?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut con = self.manager.clone();
        let _: () = con.del(key).await.map_err(store_err)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut con = self.manager.clone();
        con.exists(key).await.map_err(store_err)
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        let mut con = self.manager.clone();
        let _: () = con.hset_multiple(key, fields).await.map_err(store_err)?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut con = self.manager.clone();
        con.hgetall(key).await.map_err(store_err)
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let mut con = self.manager.clone();
        let _: () = con.zadd(key, member, score).await.map_err(store_err)?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut con = self.manager.clone();
        let _: () = con.zrem(key, member).await.map_err(store_err)?;
        Ok(())
    }

    async fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<Vec<String>> {
        let mut con = self.manager.clone();
        con.zrangebyscore(key, min, max).await.map_err(store_err)
    }

    async fn zrange_all(&self, key: &str) -> Result<Vec<String>> {
        let mut con = self.manager.clone();
        con.zrange(key, 0, -1).await.map_err(store_err)
    }

    async fn zrevrange_all(&self, key: &str) -> Result<Vec<String>> {
        let mut con = self.manager.clone();
        con.zrevrange(key, 0, -1).await.map_err(store_err)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<()> {
        let mut con = self.manager.clone();
        let _: () = con.rpush(key, value).await.map_err(store_err)?;
        Ok(())
    }

    async fn lrange_all(&self, key: &str) -> Result<Vec<String>> {
        let mut con = self.manager.clone();
        con.lrange(key, 0, -1).await.map_err(store_err)
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<()> {
        let mut con = self.manager.clone();
        let _: () = con.lrem(key, 1, value).await.map_err(store_err)?;
        Ok(())
    }

    async fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let mut con = self.manager.clone();
        let _: () = con.rename(src, dst).await.map_err(store_err)?;
        Ok(())
    }
}
