fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The proto subset is vendored so builds stay hermetic; field numbers
    // match the upstream onnx.proto wire format.
    println!("cargo:rerun-if-changed=proto/onnx.proto");
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    prost_build::Config::new().compile_protos(&["proto/onnx.proto"], &["proto"])?;
    Ok(())
}
