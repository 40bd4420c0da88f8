//! Relational store access.
//!
//! - [`config`] - pool sizing and statement logging.
//! - [`manager`] - the lazily connected, shared pool.
//! - [`retry`] - bounded retry policy used at startup.
//! - [`migrate`] / [`seed`] - idempotent schema and reference data.
//! - [`bootstrap`] - the startup sequence tying the above together.
//! - [`users`] - request-path queries.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod manager;
pub mod migrate;
pub mod retry;
pub mod seed;
pub mod users;

#[cfg(test)]
pub mod testing;
