//! # TimeCap Gateway
//! The HTTP surface: capsule CRUD, preference updates, push subscription
//! management, and the operational triggers for sweep and migration.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
