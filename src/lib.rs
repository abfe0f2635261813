//! Polls account-scoped API collections and reports what changed between refreshes.

pub mod api;
pub mod config;
pub mod event;
pub mod logging;
pub mod poll;
