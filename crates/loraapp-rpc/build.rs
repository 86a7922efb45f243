fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let protos = ["proto/api.proto", "proto/appserver.proto"];
    for proto in &protos {
        println!("cargo:rerun-if-changed={proto}");
    }

    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    // JSON shape served by the gateway: lowerCamelCase names, every field
    // emitted, enums by name, bytes as base64.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .message_attribute(".", "#[derive(serde::Serialize, serde::Deserialize)]")
        .message_attribute(".", "#[serde(rename_all = \"camelCase\", default)]")
        .field_attribute("rx_window", "#[serde(with = \"crate::json::rx_window\")]")
        .field_attribute("error_type", "#[serde(with = \"crate::json::error_type\")]")
        .field_attribute("data", "#[serde(with = \"crate::json::base64_bytes\")]")
        .compile_protos(&protos, &["proto"])?;

    Ok(())
}
