//! CLI command handlers.

pub mod bot;
pub mod config;
pub mod webhook;
