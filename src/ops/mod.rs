//! Operator implementations and the records they emit.
//!
//! Each operator module parses its node, produces an [`OpCall`] (the mangled
//! function name plus invocation metadata) and an [`OpImpl`] (the function
//! body with any auxiliary sources). Variants of one operator register
//! themselves in the [`crate::registry`] under their tags and priority.

pub mod broadcast;
pub mod concat;
pub mod conv;
pub mod elementwise;
pub mod gemm;
pub mod gemm_tiling;
pub mod identity;
pub mod pooling;
pub mod softmax;
pub mod transpose;

use crate::errors::{O2CError, O2CResult};
use crate::onnx::NodeProto;
use crate::tensor::TensorRecord;

/// Node under emission with its resolved tensor records. Optional inputs
/// declared as empty names are dropped; positional operators that care consult
/// `node.input` directly.
pub struct OpContext<'a> {
    pub node: &'a NodeProto,
    pub inputs: Vec<&'a TensorRecord>,
    pub outputs: Vec<&'a TensorRecord>,
}

impl<'a> OpContext<'a> {
    pub fn op_type(&self) -> &str {
        self.node.op_type()
    }

    /// Resolves the node input at `position`, honoring empty names that mark
    /// omitted optional inputs.
    pub fn optional_input(&self, position: usize) -> Option<&'a TensorRecord> {
        let name = self.node.input.get(position)?;
        if name.is_empty() {
            return None;
        }
        let non_empty_before = self.node.input[..position]
            .iter()
            .filter(|n| !n.is_empty())
            .count();
        self.inputs.get(non_empty_before).copied()
    }

    /// Exactly `n_in`..=`n_in_max` inputs and one output, the common case.
    pub fn expect_arity(&self, n_in: usize, n_in_max: usize) -> O2CResult<()> {
        if self.inputs.len() < n_in || self.inputs.len() > n_in_max {
            return crate::errors::unsupported(format!(
                "{}: expected {n_in}..={n_in_max} inputs, found {}",
                self.op_type(),
                self.inputs.len()
            ));
        }
        if self.outputs.len() != 1 {
            return crate::errors::unsupported(format!(
                "{}: expected one output, found {}",
                self.op_type(),
                self.outputs.len()
            ));
        }
        Ok(())
    }
}

/// What a variant hands back to the driver.
#[derive(Debug, Clone)]
pub struct Emission {
    pub call: OpCall,
    pub impl_: OpImpl,
}

/// One emitted call site. `name` is mangled from the signature name and the
/// parameter tuple, so nodes with identical configurations share a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpCall {
    pub name: String,
    /// C parameter names, inputs first then outputs.
    pub params: Vec<String>,
    pub input_vars: Vec<String>,
    pub output_vars: Vec<String>,
}

impl OpCall {
    pub fn new(
        sig_name: &str,
        sig_params: &[String],
        params: &[&str],
        inputs: &[&TensorRecord],
        outputs: &[&TensorRecord],
    ) -> O2CResult<Self> {
        if params.len() != inputs.len() + outputs.len() {
            return Err(O2CError::Internal(format!(
                "{sig_name}: {} parameter names for {} tensors",
                params.len(),
                inputs.len() + outputs.len()
            )));
        }
        let mut name = String::from(sig_name);
        for param in sig_params {
            name.push('_');
            name.push_str(param);
        }
        Ok(OpCall {
            name,
            params: params.iter().map(|p| p.to_string()).collect(),
            input_vars: inputs.iter().map(|t| t.variable.clone()).collect(),
            output_vars: outputs.iter().map(|t| t.variable.clone()).collect(),
        })
    }

    /// `void Name(const float* A, float* OUT)` — inputs are const.
    pub fn signature(&self) -> String {
        let n_inputs = self.input_vars.len();
        let args = self
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| {
                if i < n_inputs {
                    format!("const float* {p}")
                } else {
                    format!("float* {p}")
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("void {}({})", self.name, args)
    }

    /// `Name(T0, T3, T7)` — catalogue variables in parameter order.
    pub fn invocation(&self) -> String {
        let args = self
            .input_vars
            .iter()
            .chain(self.output_vars.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", self.name, args)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lang {
    C,
    Asm,
}

/// An auxiliary routine emitted into the assembly translation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmAuxFunction {
    /// Global label of the routine.
    pub name: String,
    /// C-visible signature, e.g. `void unit_update(const float*, const float*, float*)`.
    pub signature: String,
    pub body: String,
}

/// A source file shipped with the compiler and inlined verbatim into the
/// generated translation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalFile {
    pub name: &'static str,
    pub contents: &'static str,
}

/// One unique emitted function body. Two nodes producing value-equal impls
/// share a single function definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpImpl {
    pub lang: Lang,
    pub source: String,
    pub cpp_aux_functions: Vec<String>,
    pub asm_aux_functions: Vec<AsmAuxFunction>,
    pub external_files: Vec<ExternalFile>,
}

impl OpImpl {
    pub fn c(source: impl Into<String>) -> Self {
        OpImpl {
            lang: Lang::C,
            source: source.into(),
            cpp_aux_functions: Vec::new(),
            asm_aux_functions: Vec::new(),
            external_files: Vec::new(),
        }
    }

    pub fn asm(source: impl Into<String>) -> Self {
        OpImpl {
            lang: Lang::Asm,
            source: source.into(),
            cpp_aux_functions: Vec::new(),
            asm_aux_functions: Vec::new(),
            external_files: Vec::new(),
        }
    }
}

/// Positional parameter names for variadic operators: A, B, C, ... then INn.
pub fn input_letter(i: usize) -> String {
    const LETTERS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
    if i < LETTERS.len() {
        (LETTERS[i] as char).to_string()
    } else {
        format!("IN{i}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tag;

    fn record(variable: &str) -> TensorRecord {
        TensorRecord {
            name: variable.to_lowercase(),
            shape: vec![2, 3],
            size: 6,
            tag: Tag::Intermediate,
            dtype: 1,
            data: None,
            variable: variable.to_string(),
        }
    }

    #[test]
    fn call_renders_signature_and_invocation() {
        let a = record("T0");
        let b = record("T4");
        let out = record("T7");
        let call = OpCall::new(
            "Gemm",
            &["2x3x4".to_string()],
            &["A", "B", "OUT"],
            &[&a, &b],
            &[&out],
        )
        .unwrap();
        assert_eq!(call.name, "Gemm_2x3x4");
        assert_eq!(
            call.signature(),
            "void Gemm_2x3x4(const float* A, const float* B, float* OUT)"
        );
        assert_eq!(call.invocation(), "Gemm_2x3x4(T0, T4, T7)");
    }

    #[test]
    fn call_rejects_mismatched_params() {
        let a = record("T0");
        let out = record("T1");
        let result = OpCall::new("Relu", &[], &["A"], &[&a], &[&out]);
        assert!(matches!(result, Err(O2CError::Internal(_))));
    }

    #[test]
    fn impl_value_equality() {
        let a = OpImpl::c("for(...) {}");
        let b = OpImpl::c("for(...) {}");
        let c = OpImpl::asm("ret");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn letters_stay_distinct_from_reserved_params() {
        assert_eq!(input_letter(0), "A");
        assert_eq!(input_letter(23), "Z");
        assert_eq!(input_letter(24), "IN24");
    }
}
