//! Core tagbox library (config, storage, content records).

pub mod config;
pub mod kv;
pub mod record;
pub mod store;
pub mod telemetry;
