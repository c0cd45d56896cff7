//! Elementwise operators: one flat loop with a per-operator expression.

use crate::errors::{unsupported, O2CResult};
use crate::ops::{input_letter, Emission, OpCall, OpContext, OpImpl};
use crate::registry::VariantDef;
use crate::tensor::TensorRecord;
use crate::util::get_float_attr;

const OP_TYPES: &[&str] = &["Relu", "Tanh", "Sigmoid", "Clip", "Sum"];

pub(crate) fn variants() -> Vec<VariantDef> {
    vec![VariantDef {
        op_types: OP_TYPES,
        tags: &["c"],
        priority: 1,
        emit: emit_c,
    }]
}

/// Formats a float as a C literal. Whole values get an explicit fraction so
/// the `f` suffix stays valid.
pub fn c_float(value: f32) -> String {
    if value == f32::INFINITY {
        return "INFINITY".to_string();
    }
    if value == f32::NEG_INFINITY {
        return "-INFINITY".to_string();
    }
    let mut text = format!("{value}");
    if !text.contains('.') && !text.contains('e') {
        text.push_str(".0");
    }
    text.push('f');
    text
}

/// Clip bounds live in attributes up to opset 6 and in scalar constant
/// inputs from opset 11 on.
fn clip_bounds(ctx: &OpContext) -> O2CResult<(Option<f32>, Option<f32>)> {
    let scalar = |record: Option<&&TensorRecord>, what: &str| -> O2CResult<Option<f32>> {
        match record {
            None => Ok(None),
            Some(r) => {
                if r.size != 1 {
                    return unsupported(format!("Clip: {what} is not a scalar"));
                }
                match r.data.as_ref().and_then(|d| d.iter().next().copied()) {
                    Some(v) => Ok(Some(v)),
                    None => unsupported(format!("Clip: {what} is not constant")),
                }
            }
        }
    };

    if ctx.node.input.len() > 1 {
        let min = scalar(ctx.optional_input(1).as_ref(), "min")?;
        let max = scalar(ctx.optional_input(2).as_ref(), "max")?;
        Ok((min, max))
    } else {
        Ok((
            get_float_attr(ctx.node, "min"),
            get_float_attr(ctx.node, "max"),
        ))
    }
}

fn emit_c(ctx: &OpContext) -> O2CResult<Emission> {
    let op = ctx.op_type().to_string();

    if op == "Sum" {
        return emit_sum(ctx);
    }

    ctx.expect_arity(1, 3)?;
    let x = ctx.inputs[0];
    let y = ctx.outputs[0];
    if x.size != y.size {
        return unsupported(format!("{op}: input and output sizes disagree"));
    }

    let mut sig_params = vec![x.size.to_string()];
    let expr = match op.as_str() {
        "Relu" => "A[i] > 0.0f ? A[i] : 0.0f".to_string(),
        "Tanh" => "tanhf(A[i])".to_string(),
        "Sigmoid" => "1.0f / (1.0f + expf(-A[i]))".to_string(),
        "Clip" => {
            let (min, max) = clip_bounds(ctx)?;
            let mut expr = "A[i]".to_string();
            if let Some(lo) = min {
                expr = format!("MAX({expr}, {})", c_float(lo));
                sig_params.push(format!("{:08x}", lo.to_bits()));
            }
            if let Some(hi) = max {
                expr = format!("MIN({expr}, {})", c_float(hi));
                sig_params.push(format!("{:08x}", hi.to_bits()));
            }
            expr
        }
        other => return unsupported(format!("elementwise operator {other}")),
    };

    let source = format!(
        "\
for (int i = 0; i < {size}; i++) {{
    OUT[i] = {expr};
}}
",
        size = x.size
    );

    // Clip bound tensors are baked into the expression, only the data input
    // flows through the call.
    let call = OpCall::new(
        &op,
        &sig_params,
        &["A", "OUT"],
        &ctx.inputs[..1],
        &ctx.outputs,
    )?;

    Ok(Emission {
        call,
        impl_: OpImpl::c(source),
    })
}

/// N-ary elementwise addition; broadcasting between summands is rejected.
fn emit_sum(ctx: &OpContext) -> O2CResult<Emission> {
    if ctx.inputs.is_empty() || ctx.outputs.len() != 1 {
        return unsupported("Sum: expected at least one input and one output");
    }
    let y = ctx.outputs[0];
    if ctx.inputs.iter().any(|t| t.size != y.size) {
        return unsupported("Sum: all operands must share the output size");
    }

    let letters: Vec<String> = (0..ctx.inputs.len()).map(input_letter).collect();
    let expr = letters
        .iter()
        .map(|l| format!("{l}[i]"))
        .collect::<Vec<_>>()
        .join(" + ");

    let source = format!(
        "\
for (int i = 0; i < {size}; i++) {{
    OUT[i] = {expr};
}}
",
        size = y.size
    );

    let mut params: Vec<&str> = letters.iter().map(String::as_str).collect();
    params.push("OUT");
    let call = OpCall::new(
        "Sum",
        &[format!("{}w{}", y.size, ctx.inputs.len())],
        &params,
        &ctx.inputs,
        &ctx.outputs,
    )?;

    Ok(Emission {
        call,
        impl_: OpImpl::c(source),
    })
}
