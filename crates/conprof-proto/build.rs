// Build script to generate the gRPC client and server stubs.
//
// Messages are declared by hand in src/storepb.rs with prost derives, so the
// services are described here with tonic-build's manual builder and no .proto
// file or protoc is needed at compile time.

use tonic_build::manual::{Builder, Method, Service};

const CODEC: &str = "tonic::codec::ProstCodec";

fn unary(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::storepb::{}", input))
        .output_type(format!("crate::storepb::{}", output))
        .codec_path(CODEC)
        .build()
}

fn main() {
    // Read + write surface served by the store process.
    let profile_store = Service::builder()
        .name("ProfileStore")
        .package("conprof.store")
        .method(unary("write", "Write", "WriteRequest", "WriteResponse"))
        .method(unary("profile", "Profile", "ProfileRequest", "ProfileResponse"))
        .method(
            Method::builder()
                .name("series")
                .route_name("Series")
                .input_type("crate::storepb::SeriesRequest")
                .output_type("crate::storepb::SeriesResponse")
                .codec_path(CODEC)
                .server_streaming()
                .build(),
        )
        .build();

    // Write-only surface used by producers that forward profiles.
    let writable_profile_store = Service::builder()
        .name("WritableProfileStore")
        .package("conprof.store")
        .method(unary("write", "Write", "WriteRequest", "WriteResponse"))
        .build();

    Builder::new()
        .build_client(true)
        .build_server(true)
        .compile(&[profile_store, writable_profile_store]);
}
