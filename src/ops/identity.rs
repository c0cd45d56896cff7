//! Identity: a plain copy loop in C and a scalar-register loop in assembly.
//! Shape-only operators never reach here, the driver welds them away.

use crate::errors::{unsupported, O2CResult};
use crate::ops::{Emission, OpCall, OpContext, OpImpl};
use crate::registry::VariantDef;
use crate::tensor::TensorRecord;

const OP_TYPES: &[&str] = &["Identity"];

pub(crate) fn variants() -> Vec<VariantDef> {
    vec![
        VariantDef {
            op_types: OP_TYPES,
            tags: &["asm"],
            priority: 1,
            emit: emit_asm,
        },
        VariantDef {
            op_types: OP_TYPES,
            tags: &["c"],
            priority: 1,
            emit: emit_c,
        },
    ]
}

fn check(ctx: &OpContext) -> O2CResult<usize> {
    ctx.expect_arity(1, 1)?;
    let size = ctx.inputs[0].size;
    if size != ctx.outputs[0].size {
        return unsupported("Identity: input and output sizes disagree");
    }
    Ok(size)
}

fn call(ctx: &OpContext, size: usize) -> O2CResult<OpCall> {
    OpCall::new(
        "Identity",
        &[size.to_string()],
        &["A", "OUT"],
        &ctx.inputs,
        &ctx.outputs,
    )
}

/// Emission for a pass-through the driver could not weld, e.g. a reshape
/// from a graph input straight onto a graph output, where the two buffers
/// are distinct and a real copy is required.
pub(crate) fn passthrough_copy(
    input: &TensorRecord,
    output: &TensorRecord,
) -> O2CResult<Emission> {
    let call = OpCall::new(
        "Identity",
        &[output.size.to_string()],
        &["A", "OUT"],
        &[input],
        &[output],
    )?;
    Ok(Emission {
        call,
        impl_: OpImpl::c(copy_source(output.size)),
    })
}

fn copy_source(size: usize) -> String {
    format!(
        "\
for (int i = 0; i < {size}; i++) {{
    OUT[i] = A[i];
}}
"
    )
}

fn emit_c(ctx: &OpContext) -> O2CResult<Emission> {
    let size = check(ctx)?;
    Ok(Emission {
        call: call(ctx, size)?,
        impl_: OpImpl::c(copy_source(size)),
    })
}

fn emit_asm(ctx: &OpContext) -> O2CResult<Emission> {
    let size = check(ctx)?;
    let source = format!(
        "\
xor rax, rax
.next:
cmp rax, {size}
jge .done
mov ecx, [rdi + rax * 4]
mov [rsi + rax * 4], ecx
inc rax
jmp .next
.done:
ret
"
    );
    Ok(Emission {
        call: call(ctx, size)?,
        impl_: OpImpl::asm(source),
    })
}
