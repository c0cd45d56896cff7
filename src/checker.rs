//! Correctness harness for `--checks N`: the compiled module and the
//! reference runtime (onnxruntime, reached through a narrow python3
//! subprocess contract) must agree elementwise on random inputs.

use std::fs;
use std::path::Path;
use std::process::Command;

use ndarray::{ArrayD, IxDyn};
use ndarray_rand::RandomExt;
use rand::distributions::Uniform;
use tracing::info;

use crate::errors::{O2CError, O2CResult};
use crate::generator::ModelResult;
use crate::model;
use crate::service::ModelService;

/// atol of the agreement check; the relative term mirrors allclose defaults.
const ATOL: f32 = 1e-5;
const RTOL: f32 = 1e-5;

const REFERENCE_SCRIPT: &str = "\
import sys
import numpy as np
import onnxruntime

sess = onnxruntime.InferenceSession(sys.argv[1])
raw = np.fromfile(sys.argv[2], dtype=np.float32)
feeds = {}
offset = 0
for inp in sess.get_inputs():
    shape = [d if isinstance(d, int) and d > 0 else 1 for d in inp.shape]
    count = int(np.prod(shape)) if shape else 1
    feeds[inp.name] = raw[offset:offset + count].reshape(shape)
    offset += count
outputs = sess.run(None, feeds)
np.concatenate([o.reshape(-1).astype(np.float32) for o in outputs]).tofile(sys.argv[3])
";

pub fn check_model(model_path: &Path, result: &ModelResult, n_inputs: usize) -> O2CResult<()> {
    let mut service = ModelService::start(result)?;
    let scratch = model::scratch_dir("checker")?;

    for sample in 0..n_inputs {
        let inputs = random_inputs(result);
        let ours = service.infer(&inputs)?;
        let reference = reference_outputs(model_path, &inputs, &scratch)?;

        if ours.len() != reference.len() {
            return Err(O2CError::CheckFailed(format!(
                "sample {sample}: {} outputs vs {} reference outputs",
                ours.len(),
                reference.len()
            )));
        }
        for (i, (&a, &b)) in ours.iter().zip(&reference).enumerate() {
            if (a - b).abs() > ATOL + RTOL * b.abs() {
                if model::debug_enabled() {
                    dump_failing_sample(&inputs, &reference)?;
                }
                return Err(O2CError::CheckFailed(format!(
                    "sample {sample}: output {i} differs ({a} vs {b})"
                )));
            }
        }
        info!(sample, "outputs match the reference");
    }

    if !model::debug_enabled() {
        let _ = fs::remove_dir_all(&scratch);
    }
    Ok(())
}

/// Uniform random floats in [-1, 1), one tensor per declared input,
/// concatenated in catalogue order.
fn random_inputs(result: &ModelResult) -> Vec<f32> {
    let mut flat = Vec::with_capacity(result.inputs_size());
    for (_, shape) in &result.input_shapes {
        let tensor = ArrayD::<f32>::random(IxDyn(shape), Uniform::new(-1.0, 1.0));
        flat.extend(tensor.iter().copied());
    }
    flat
}

fn reference_outputs(model_path: &Path, inputs: &[f32], scratch: &Path) -> O2CResult<Vec<f32>> {
    let inputs_file = scratch.join("inputs.bin");
    let outputs_file = scratch.join("outputs.bin");
    let bytes: Vec<u8> = inputs.iter().flat_map(|f| f.to_le_bytes()).collect();
    fs::write(&inputs_file, bytes)?;

    let output = Command::new("python3")
        .arg("-c")
        .arg(REFERENCE_SCRIPT)
        .arg(model_path)
        .arg(&inputs_file)
        .arg(&outputs_file)
        .output()
        .map_err(|e| O2CError::Tool(format!("reference runtime: {e}")))?;
    if !output.status.success() {
        return Err(O2CError::Tool(format!(
            "reference runtime failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(fs::read(&outputs_file)?
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn dump_failing_sample(inputs: &[f32], reference: &[f32]) -> O2CResult<()> {
    fs::create_dir_all("tmp")?;
    let to_bytes = |vals: &[f32]| -> Vec<u8> { vals.iter().flat_map(|f| f.to_le_bytes()).collect() };
    fs::write("tmp/sample_inputs.bin", to_bytes(inputs))?;
    fs::write("tmp/sample_outputs.bin", to_bytes(reference))?;
    Ok(())
}
