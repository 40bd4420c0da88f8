//! Types shared between the identity server and its clients.

pub mod error;
pub mod types;

pub use error::{Error, Result};

/// Generated protobuf messages and gRPC stubs for `identity.v1`.
pub mod proto {
    tonic::include_proto!("identity.v1");

    /// Encoded descriptor set consumed by the reflection service.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("identity_descriptor");
}
