//! Build script for kubelink-proto
//!
//! Compiles protobuf definitions using tonic-prost-build.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_root = "../../proto";

    let protos = [
        "kubelink/v1/tunnel.proto",
        "kubelink/v1/registration.proto",
        "kubelink/v1/cluster.proto",
    ];

    let proto_paths: Vec<_> = protos
        .iter()
        .map(|p| format!("{proto_root}/{p}"))
        .collect();

    for path in &proto_paths {
        println!("cargo:rerun-if-changed={path}");
    }

    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        // `TunnelService.Connect` would collide with the generated
        // `Client::connect(dst)` constructor; clients use `::new(channel)`.
        .build_transport(false)
        .compile_protos(&proto_paths, &[proto_root.to_string()])?;

    Ok(())
}
