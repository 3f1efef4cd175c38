//! # TimeCap Store
//! Durable capsule/user storage over a Redis-shaped key/value port.
//!
//! The [`Kv`] trait is the seam: production uses [`RedisKv`], tests use
//! [`MemoryKv`]. [`CapsuleStore`] layers the typed contract (records,
//! indexes, lifecycle transitions) on top of whichever backend is injected.

pub mod keys;
pub mod kv;
pub mod memory;
pub mod redis;
pub mod store;

pub use kv::Kv;
pub use memory::MemoryKv;
pub use redis::RedisKv;
pub use store::{CapsuleStore, PreferencesPatch};
