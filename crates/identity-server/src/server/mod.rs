//! Server-side components of the identity service.
//!
//! ## Submodules
//!
//! - [`config`] - command line and environment configuration.
//! - [`database`] - connection management, retries, migrations and seeding.
//! - [`interceptor`] - per-call logging, redaction and panic containment.
//! - [`service`] - the `IdentityService` handlers.
//! - [`telemetry`] - `tracing` subscriber and optional OpenTelemetry export.
//!
//! These components are wired together in the server's `main.rs`.

pub mod config;
pub mod database;
pub mod interceptor;
pub mod service;
pub mod telemetry;
