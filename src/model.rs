//! Model loading and preparation: protobuf decode, dynamic-dimension fixing
//! and the external-simplifier adapter.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use prost::Message;
use tracing::{info, warn};

use crate::errors::{O2CError, O2CResult};
use crate::onnx::{tensor_shape_proto, type_proto, ModelProto};

pub fn debug_enabled() -> bool {
    std::env::var("ONNX2CODE_DEBUG").map(|v| v == "1").unwrap_or(false)
}

pub fn load_model(path: &Path) -> O2CResult<ModelProto> {
    let bytes = fs::read(path)?;
    let model = ModelProto::decode(bytes.as_slice())?;
    if model.graph.is_none() {
        return Err(O2CError::InvalidModel("no graph found in model".to_string()));
    }
    Ok(model)
}

/// Resolves every dynamic input dimension (`dim_param` or a non-positive
/// `dim_value`) to 1, in place.
pub fn fix_dynamic_dims(model: &mut ModelProto) {
    let Some(graph) = model.graph.as_mut() else {
        return;
    };
    for input in &mut graph.input {
        let Some(type_proto::Value::TensorType(tensor_type)) =
            input.r#type.as_mut().and_then(|t| t.value.as_mut())
        else {
            continue;
        };
        let Some(shape) = tensor_type.shape.as_mut() else {
            continue;
        };
        for dim in &mut shape.dim {
            match dim.value {
                Some(tensor_shape_proto::dimension::Value::DimValue(v)) if v > 0 => {}
                _ => dim.value = Some(tensor_shape_proto::dimension::Value::DimValue(1)),
            }
        }
    }
}

/// Simplifier adapter: runs the external `onnxsim` tool over a scratch copy.
/// A missing tool or a rejected graph is not fatal, the raw graph is used
/// with a warning.
pub fn simplify(model: &ModelProto) -> ModelProto {
    match try_simplify(model) {
        Ok(simplified) => {
            info!("model simplified");
            simplified
        }
        Err(e) => {
            warn!("model simplification failed ({e}), falling back to the raw graph");
            model.clone()
        }
    }
}

fn try_simplify(model: &ModelProto) -> O2CResult<ModelProto> {
    let scratch = scratch_dir("simplify")?;
    let input = scratch.join("model.onnx");
    let output = scratch.join("model-sim.onnx");
    fs::write(&input, model.encode_to_vec())?;

    let result = Command::new("python3")
        .arg("-m")
        .arg("onnxsim")
        .arg(&input)
        .arg(&output)
        .output()
        .map_err(|e| O2CError::Tool(format!("onnxsim: {e}")))?;
    if !result.status.success() {
        return Err(O2CError::Tool(format!(
            "onnxsim exited with {}: {}",
            result.status,
            String::from_utf8_lossy(&result.stderr).trim()
        )));
    }

    let simplified = ModelProto::decode(fs::read(&output)?.as_slice())?;
    if !debug_enabled() {
        let _ = fs::remove_dir_all(&scratch);
    }
    Ok(simplified)
}

/// Full ingestion pipeline: decode, fix input shapes, simplify.
pub fn prepare(path: &Path) -> O2CResult<ModelProto> {
    let mut model = load_model(path)?;
    fix_dynamic_dims(&mut model);
    let model = simplify(&model);

    if debug_enabled() {
        fs::create_dir_all("tmp")?;
        fs::write("tmp/model.onnx", model.encode_to_vec())?;
    }
    Ok(model)
}

/// A process-scoped scratch directory; kept around under `ONNX2CODE_DEBUG`.
pub fn scratch_dir(what: &str) -> O2CResult<PathBuf> {
    let dir = if debug_enabled() {
        PathBuf::from("tmp").join(what)
    } else {
        std::env::temp_dir().join(format!("onnx2code-{what}-{}", std::process::id()))
    };
    fs::create_dir_all(&dir)?;
    Ok(dir)
}
