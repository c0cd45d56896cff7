//! Concatenation along one axis: one loop nest per input with an
//! accumulating axis offset into the output.

use crate::errors::{unsupported, O2CResult};
use crate::ops::{input_letter, Emission, OpCall, OpContext, OpImpl};
use crate::registry::VariantDef;
use crate::util::{compute_strides, get_int_attr, shape_str};

const OP_TYPES: &[&str] = &["Concat"];

pub(crate) fn variants() -> Vec<VariantDef> {
    vec![VariantDef {
        op_types: OP_TYPES,
        tags: &["c"],
        priority: 1,
        emit: emit_c,
    }]
}

fn emit_c(ctx: &OpContext) -> O2CResult<Emission> {
    if ctx.inputs.is_empty() || ctx.outputs.len() != 1 {
        return unsupported("Concat: expected at least one input and one output");
    }

    let out = ctx.outputs[0];
    let rank = out.shape.len();

    let Some(mut axis) = get_int_attr(ctx.node, "axis") else {
        return unsupported("Concat: axis is not set");
    };
    if axis < 0 {
        axis += rank as i64;
    }
    if axis < 0 || axis as usize >= rank {
        return unsupported(format!("Concat: axis {axis} out of range"));
    }
    let axis = axis as usize;

    if ctx.inputs.iter().any(|t| t.shape.len() != rank) {
        return unsupported("Concat: all inputs must share the output rank");
    }

    let output_strides = compute_strides(&out.shape);
    let mut source = String::new();
    let mut axis_offset = 0usize;

    for (k, input) in ctx.inputs.iter().enumerate() {
        let input_strides = compute_strides(&input.shape);

        let mut out_index = Vec::with_capacity(rank);
        let mut in_index = Vec::with_capacity(rank);
        for (d, &stride) in output_strides.iter().enumerate() {
            if d == axis {
                out_index.push(format!("({axis_offset} + d{d}) * {stride}"));
            } else {
                out_index.push(format!("d{d} * {stride}"));
            }
            in_index.push(format!("d{d} * {}", input_strides[d]));
        }

        for (d, &extent) in input.shape.iter().enumerate() {
            source.push_str(&format!("for (int d{d} = 0; d{d} < {extent}; d{d}++) {{\n"));
        }
        source.push_str(&format!(
            "OUT[{}] = {}[{}];\n",
            out_index.join(" + "),
            input_letter(k),
            in_index.join(" + ")
        ));
        source.push_str(&"}\n".repeat(rank));

        axis_offset += input.shape[axis];
    }

    if axis_offset != out.shape[axis] {
        return unsupported(format!(
            "Concat: inputs cover {axis_offset} of {} along axis {axis}",
            out.shape[axis]
        ));
    }

    let mut sig_params = vec![format!("ax{axis}")];
    sig_params.extend(ctx.inputs.iter().map(|t| shape_str(&t.shape)));

    let letters: Vec<String> = (0..ctx.inputs.len()).map(input_letter).collect();
    let mut params: Vec<&str> = letters.iter().map(String::as_str).collect();
    params.push("OUT");
    let call = OpCall::new("Concat", &sig_params, &params, &ctx.inputs, &ctx.outputs)?;

    Ok(Emission {
        call,
        impl_: OpImpl::c(source),
    })
}
