use std::path::PathBuf;
use std::process::exit;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use onnx2code::checker;
use onnx2code::generator::{Generator, ModelResult};
use onnx2code::model;
use onnx2code::util::shape_str;

/// Compiles an ONNX model into a self-contained C/assembly inference module.
#[derive(Parser)]
#[command(name = "onnx2code", version)]
struct Cli {
    /// Input .onnx file
    input_model: PathBuf,
    /// Output folder for model.c, model.h, model.asm and weights.bin
    output_folder: PathBuf,
    /// Variant preference list, e.g. libxsmm,loop-tiling,c
    #[arg(long = "variations", visible_alias = "vars", value_delimiter = ',')]
    variations: Vec<String>,
    /// Compile and test the model against the reference runtime with the
    /// provided amount of random inputs
    #[arg(long, default_value_t = 0)]
    checks: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let model = match model::prepare(&cli.input_model) {
        Ok(model) => model,
        Err(e) => {
            error!("Error loading ONNX model: {e}");
            exit(1);
        }
    };

    let result = match generate(&model, &cli.variations, &cli.output_folder) {
        Ok(result) => result,
        Err(e) => {
            error!("Error generating code: {e:#}");
            exit(2);
        }
    };

    for (name, shape) in &result.input_shapes {
        info!("input  {name}: {}", shape_str(shape));
    }
    for (name, shape) in &result.output_shapes {
        info!("output {name}: {}", shape_str(shape));
    }
    info!("weights size (floats): {}", result.weights.len());

    if cli.checks > 0 {
        info!("checking model with {} random inputs", cli.checks);
        if let Err(e) = checker::check_model(&cli.input_model, &result, cli.checks) {
            error!("Error checking model: {e}");
            exit(3);
        }
    }

    info!("Done");
}

fn generate(
    model: &onnx2code::onnx::ModelProto,
    variations: &[String],
    output_folder: &std::path::Path,
) -> anyhow::Result<ModelResult> {
    let result = Generator::new(model, variations)?.generate()?;
    result
        .write_to(output_folder)
        .with_context(|| format!("writing artifacts to {}", output_folder.display()))?;
    info!("artifacts written to {}", output_folder.display());
    Ok(result)
}
