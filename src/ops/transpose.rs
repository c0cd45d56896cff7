//! Transpose via precomputed source and destination strides.

use crate::errors::{unsupported, O2CResult};
use crate::ops::{Emission, OpCall, OpContext, OpImpl};
use crate::registry::VariantDef;
use crate::util::{compute_strides, get_ints_attr, shape_str};

const OP_TYPES: &[&str] = &["Transpose"];

pub(crate) fn variants() -> Vec<VariantDef> {
    vec![VariantDef {
        op_types: OP_TYPES,
        tags: &["c"],
        priority: 1,
        emit: emit_c,
    }]
}

fn emit_c(ctx: &OpContext) -> O2CResult<Emission> {
    ctx.expect_arity(1, 1)?;

    let x = ctx.inputs[0];
    let y = ctx.outputs[0];
    if x.size != y.size {
        return unsupported("Transpose: input and output sizes disagree");
    }
    let rank = x.shape.len();

    // reversed axes when the attribute is absent, per the ONNX default
    let perm: Vec<usize> = match get_ints_attr(ctx.node, "perm") {
        Some(p) => p.iter().map(|&v| v as usize).collect(),
        None => (0..rank).rev().collect(),
    };
    if perm.len() != rank {
        return unsupported(format!("Transpose: perm of rank {}", perm.len()));
    }
    let mut seen = vec![false; rank];
    for &p in &perm {
        if p >= rank || seen[p] {
            return unsupported("Transpose: perm is not a permutation");
        }
        seen[p] = true;
    }
    let expected: Vec<usize> = perm.iter().map(|&p| x.shape[p]).collect();
    if y.shape != expected {
        return unsupported(format!(
            "Transpose: output shape {} does not match permuted input",
            y.shape_str()
        ));
    }

    let input_strides = compute_strides(&x.shape);
    let output_strides = compute_strides(&y.shape);

    let mut loops = String::new();
    let mut out_index = Vec::with_capacity(rank);
    let mut in_index = Vec::with_capacity(rank);
    for d in 0..rank {
        loops.push_str(&format!(
            "for (int d{d} = 0; d{d} < {extent}; ++d{d}) {{\n",
            extent = y.shape[d]
        ));
        out_index.push(format!("d{d} * {}", output_strides[d]));
        in_index.push(format!("d{d} * {}", input_strides[perm[d]]));
    }

    let source = format!(
        "{loops}OUT[{}] = A[{}];\n{closing}",
        out_index.join(" + "),
        in_index.join(" + "),
        closing = "}\n".repeat(rank)
    );

    let perm_str = perm
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join("x");
    let call = OpCall::new(
        "Transpose",
        &[shape_str(&x.shape), format!("p{perm_str}")],
        &["A", "OUT"],
        &ctx.inputs,
        &ctx.outputs,
    )?;

    Ok(Emission {
        call,
        impl_: OpImpl::c(source),
    })
}
