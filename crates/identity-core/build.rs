/// Builds the gRPC client and server code for `identity.proto` using
/// `tonic-prost-build`.
///
/// The generated module, plus an encoded file descriptor set used by the
/// reflection service, is written to `OUT_DIR` and included from
/// `src/lib.rs`:
///
/// ```rust
/// pub mod proto {
///     tonic::include_proto!("identity.v1");
/// }
/// ```
///
/// # Panics
///
/// Panics if code generation fails (for example when `protoc` is missing).
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("identity_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/identity.proto"], &["proto"])
        .unwrap();
}
