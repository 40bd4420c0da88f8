//! Request observability for unary RPCs.
//!
//! - [`config`] - the immutable [`InterceptorConfig`](config::InterceptorConfig).
//! - [`redact`] - coarse substring redaction for payloads and metadata.
//! - [`boundary`] - the panic boundary around handler futures.
//! - [`unary`] - [`UnaryInterceptor`](unary::UnaryInterceptor), which ties the
//!   above together.

pub mod boundary;
pub mod config;
pub mod redact;
pub mod unary;

#[cfg(test)]
pub mod testing;
