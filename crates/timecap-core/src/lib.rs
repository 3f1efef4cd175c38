//! # TimeCap Core
//! Shared types, configuration, error taxonomy, and the delivery adapter
//! traits used across the TimeCap crates.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;
