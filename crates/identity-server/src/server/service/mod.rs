//! gRPC service implementation.
//!
//! - [`handler`] - `IdentityService` handlers over the shared pool.
//! - [`intercepted`] - the wrapper applying the logging interceptor to every
//!   method.
//! - [`password`] - password hashing for newly stored users.

pub mod handler;
pub mod intercepted;
pub mod password;
