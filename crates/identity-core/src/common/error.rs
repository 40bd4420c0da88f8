//! Error types for the identity service.
//!
//! This module defines the central `Error` enum returned by request handlers.
//! It implements `From<Error>` for `tonic::Status` so handlers can propagate
//! failures with `?` and callers receive an appropriate status code.
//!
//! ## Error Cases
//! - `NotFound`: The requested record does not exist.
//! - `InvalidRequest`: The client request was malformed.
//! - `AlreadyExists`: A uniqueness constraint (e.g. e-mail) would be violated.
//! - `Unavailable`: The backing store is not connected.
//! - `Database`: A query failed. Details are logged server-side; the caller
//!   only sees a generic internal error.
//! - `Internal`: Any other server-side failure.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the identity service.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// The requested entity was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The client request was invalid.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The entity already exists.
    #[error("{entity} already exists: {key}")]
    AlreadyExists { entity: &'static str, key: String },

    /// No live database handle is available for this request.
    #[error("Service unavailable: {reason}")]
    Unavailable { reason: String },

    /// A database operation failed.
    #[error("Database error: {context}")]
    Database { context: String },

    /// Unexpected server-side failure.
    #[error("Internal error: {context}")]
    Internal { context: String },
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { entity, id } => Status::not_found(format!("{entity} {id} not found")),
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::AlreadyExists { entity, key } => {
                Status::already_exists(format!("{entity} {key} already exists"))
            }
            Error::Unavailable { reason } => Status::unavailable(reason),
            Error::Database { .. } | Error::Internal { .. } => {
                Status::internal("internal server error")
            }
        }
    }
}
