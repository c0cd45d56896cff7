//! onnx2code — ahead-of-time compiler from ONNX models to a self-contained
//! native inference module: one C/C++ translation unit, one x86-64 assembly
//! translation unit, a packed weights blob and a header exposing a single
//! `inference(weights, inputs, outputs)` entry point.
//!
//! ```no_run
//! use onnx2code::generator::Generator;
//!
//! let model = onnx2code::model::prepare("model.onnx".as_ref())?;
//! let result = Generator::new(&model, &[])?.generate()?;
//! result.write_to("out".as_ref())?;
//! # Ok::<(), onnx2code::O2CError>(())
//! ```

pub mod checker;
pub mod emit;
pub mod errors;
pub mod generator;
pub mod memory;
pub mod model;
pub mod onnx;
pub mod ops;
pub mod registry;
pub mod service;
pub mod tensor;
pub mod util;

pub use errors::{O2CError, O2CResult};
pub use generator::{Generator, ModelResult};
