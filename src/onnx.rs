//! Generated protobuf bindings for the vendored ONNX schema subset.

// include generated protobuf code inside a small module so we can silence
// lints originating from the generated file only.
#[allow(clippy::all)]
#[allow(rustdoc::all)]
mod generated {
    include!(concat!(env!("OUT_DIR"), "/onnx.rs"));
}

pub use generated::*;

/// `TensorProto.DataType` values this compiler cares about.
pub const DT_FLOAT: i32 = 1;
pub const DT_INT64: i32 = 7;

pub fn dtype_name(dtype: i32) -> &'static str {
    match dtype {
        0 => "undefined",
        1 => "float32",
        2 => "uint8",
        3 => "int8",
        4 => "uint16",
        5 => "int16",
        6 => "int32",
        7 => "int64",
        8 => "string",
        9 => "bool",
        10 => "float16",
        11 => "float64",
        12 => "uint32",
        13 => "uint64",
        16 => "bfloat16",
        _ => "unknown",
    }
}
