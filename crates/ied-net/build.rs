//! ---
//! ied_section: "05-networking-external-interfaces"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Protobuf code generation for the proxy RPC surface."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
fn main() {
    let protoc = protoc_bin_vendored::protoc_bin_path().expect("failed to locate protoc");
    std::env::set_var("PROTOC", protoc);

    println!("cargo:rerun-if-changed=proto/ied/proxy/v1/proxy.proto");
    println!("cargo:rerun-if-changed=proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/ied/proxy/v1/proxy.proto"], &["proto"])
        .expect("failed to compile gRPC definitions");
}
