//! # TimeCap Delivery
//! The scheduling core: due-set scanning, multi-channel fan-out dispatch,
//! and the one-shot legacy schema migration.

pub mod message;
pub mod migrate;
pub mod sweep;

pub use migrate::Migrator;
pub use sweep::Sweeper;
