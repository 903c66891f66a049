//! Core persistence
//!
//! Servers, members, per-module settings and the event log live in one
//! SQLite database shared by the bot, the modules and the dashboard.

pub mod storage;

pub use storage::Storage;
