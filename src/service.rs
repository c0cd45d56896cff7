//! Compiles the generated artifacts with the external toolchain (NASM plus a
//! C++ compiler) and drives the resulting process over stdin/stdout pipes.
//! Used by the checker and for local evaluation; the emitted module itself
//! never depends on this.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use tracing::info;

use crate::errors::{O2CError, O2CResult};
use crate::generator::ModelResult;
use crate::model;

pub struct ModelService {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    inputs_size: usize,
    outputs_size: usize,
}

impl ModelService {
    /// Writes the artifacts to a scratch directory, compiles them together
    /// with a small pipe driver and spawns the resulting executable.
    pub fn start(result: &ModelResult) -> O2CResult<Self> {
        let scratch = model::scratch_dir("service")?;
        result.write_to(&scratch)?;

        let driver = driver_source(
            result.inputs_size(),
            result.outputs_size(),
            result.weights.len(),
        );
        std::fs::write(scratch.join("driver.c"), driver)?;

        let executable = compile(&scratch)?;
        info!(executable = %executable.display(), "model service compiled");

        let mut child = Command::new(&executable)
            .arg(scratch.join("weights.bin"))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| O2CError::Tool(format!("service process: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| O2CError::Tool("service stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| O2CError::Tool("service stdout unavailable".to_string()))?;

        Ok(ModelService {
            child,
            stdin,
            stdout,
            inputs_size: result.inputs_size(),
            outputs_size: result.outputs_size(),
        })
    }

    /// One inference round trip over the pipes.
    pub fn infer(&mut self, inputs: &[f32]) -> O2CResult<Vec<f32>> {
        if inputs.len() != self.inputs_size {
            return Err(O2CError::Internal(format!(
                "expected {} input floats, got {}",
                self.inputs_size,
                inputs.len()
            )));
        }

        let bytes: Vec<u8> = inputs.iter().flat_map(|f| f.to_le_bytes()).collect();
        self.stdin
            .write_all(&bytes)
            .and_then(|_| self.stdin.flush())
            .map_err(|e| O2CError::Tool(format!("service write: {e}")))?;

        let mut buffer = vec![0u8; self.outputs_size * 4];
        self.stdout
            .read_exact(&mut buffer)
            .map_err(|e| O2CError::Tool(format!("service read: {e}")))?;

        Ok(buffer
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

impl Drop for ModelService {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn run_tool(command: &mut Command, what: &str) -> O2CResult<()> {
    let output = command
        .output()
        .map_err(|e| O2CError::Tool(format!("{what}: {e}")))?;
    if !output.status.success() {
        return Err(O2CError::Tool(format!(
            "{what} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

fn compile(scratch: &Path) -> O2CResult<PathBuf> {
    let asm_object = scratch.join("model-asm.o");
    run_tool(
        Command::new("nasm")
            .arg("-f")
            .arg("elf64")
            .arg(scratch.join("model.asm"))
            .arg("-o")
            .arg(&asm_object),
        "nasm",
    )?;

    let executable = scratch.join("service");
    run_tool(
        Command::new("c++")
            .arg("-O2")
            .arg("-I")
            .arg(scratch)
            .arg("-x")
            .arg("c++")
            .arg(scratch.join("model.c"))
            .arg(scratch.join("driver.c"))
            .arg("-x")
            .arg("none")
            .arg(&asm_object)
            .arg("-o")
            .arg(&executable)
            .arg("-lm"),
        "c++",
    )?;

    Ok(executable)
}

/// A minimal driver: weights from argv, one inference per input block read
/// from stdin, outputs written back to stdout.
fn driver_source(inputs_size: usize, outputs_size: usize, weights_size: usize) -> String {
    format!(
        "\
#include <stdio.h>
#include <stdlib.h>
#include \"model.h\"

static float weights[{weights_alloc}];
static float inputs[{inputs_alloc}];
static float outputs[{outputs_alloc}];

int main(int argc, char** argv) {{
    if (argc > 1 && {weights_size} > 0) {{
        FILE* f = fopen(argv[1], \"rb\");
        if (!f) return 1;
        if (fread(weights, sizeof(float), {weights_size}, f) != {weights_size}) {{
            fclose(f);
            return 1;
        }}
        fclose(f);
    }}
    while (fread(inputs, sizeof(float), {inputs_size}, stdin) == {inputs_size}) {{
        inference(weights, inputs, outputs);
        fwrite(outputs, sizeof(float), {outputs_size}, stdout);
        fflush(stdout);
    }}
    return 0;
}}
",
        weights_alloc = weights_size.max(1),
        inputs_alloc = inputs_size.max(1),
        outputs_alloc = outputs_size.max(1),
    )
}
