//! Softmax along one axis, emitted as the numerically stable three-pass
//! form: running maximum, exp-shifted sum, normalisation.

use crate::errors::{unsupported, O2CResult};
use crate::ops::{Emission, OpCall, OpContext, OpImpl};
use crate::registry::VariantDef;
use crate::util::{compute_strides, get_int_attr, shape_str};

const OP_TYPES: &[&str] = &["Softmax"];

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
        return unsupported("Softmax: input and output sizes disagree");
    }

    let rank = x.shape.len().max(1);
    let mut axis = get_int_attr(ctx.node, "axis").unwrap_or(-1);
    if axis < 0 {
        axis += rank as i64;
    }
    if axis < 0 || axis as usize >= rank {
        return unsupported(format!("Softmax: axis {axis} out of range"));
    }
    let axis = axis as usize;

    let strides = compute_strides(&x.shape);
    let labels_size = x.shape.get(axis).copied().unwrap_or(1);
    let labels_stride = strides.get(axis).copied().unwrap_or(1);

    // iterate every dim except the softmax axis
    let mut loops = String::new();
    let mut offset = format!("i * {labels_stride}");
    let mut closing = String::new();
    for (d, (&size, &stride)) in x.shape.iter().zip(&strides).enumerate() {
        if d == axis {
            continue;
        }
        loops.push_str(&format!("for (int d{d} = 0; d{d} < {size}; ++d{d}) {{\n"));
        offset.push_str(&format!(" + d{d} * {stride}"));
        closing.push_str("}\n");
    }

    let source = format!(
        "\
{loops}float max = -INFINITY;
float sum = 0.0f;
for (int i = 0; i < {labels_size}; ++i) {{
    max = fmaxf(max, X[{offset}]);
}}
for (int i = 0; i < {labels_size}; ++i) {{
    OUT[{offset}] = expf(X[{offset}] - max);
    sum += OUT[{offset}];
}}
for (int i = 0; i < {labels_size}; ++i) {{
    OUT[{offset}] /= sum;
}}
{closing}"
    );

    let call = OpCall::new(
        "Softmax",
        &[shape_str(&x.shape), format!("ax{axis}")],
        &["X", "OUT"],
        &ctx.inputs,
        &ctx.outputs,
    )?;

    Ok(Emission {
        call,
        impl_: OpImpl::c(source),
    })
}
