//! Broadcast arithmetic (`Add`, `Sub`, `Mul`, `Div`).
//!
//! Instead of generating runtime index arithmetic, the broadcast is walked at
//! compile time into a flat schedule of contiguous runs: within one run each
//! operand either advances with stride 1 or stays fixed (stride 0). Broadcasts
//! that cannot be decomposed this way are rejected.

use crate::errors::{unsupported, O2CResult};
use crate::ops::{Emission, OpCall, OpContext, OpImpl};
use crate::registry::VariantDef;
use crate::util::{compute_strides, shape_str};

const OP_TYPES: &[&str] = &["Add", "Sub", "Mul", "Div"];

pub(crate) fn variants() -> Vec<VariantDef> {
    vec![VariantDef {
        op_types: OP_TYPES,
        tags: &["c"],
        priority: 1,
        emit: emit_c,
    }]
}

/// One straight-line sub-loop of the schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub len: usize,
    pub out0: usize,
    pub a0: usize,
    /// 1 when A advances with the run, 0 when it repeats one element.
    pub a_step: usize,
    pub b0: usize,
    pub b_step: usize,
}

/// Strides of `shape` right-aligned against `out_shape`; broadcast dimensions
/// get stride 0.
fn aligned_strides(shape: &[usize], out_shape: &[usize]) -> O2CResult<Vec<usize>> {
    if shape.len() > out_shape.len() {
        return unsupported(format!(
            "shape {} has higher rank than output {}",
            shape_str(shape),
            shape_str(out_shape)
        ));
    }
    let own = compute_strides(shape);
    let offset = out_shape.len() - shape.len();
    let mut strides = vec![0usize; out_shape.len()];
    for (d, &out_dim) in out_shape.iter().enumerate().skip(offset) {
        let dim = shape[d - offset];
        if dim == out_dim {
            strides[d] = own[d - offset];
        } else if dim == 1 {
            strides[d] = 0;
        } else {
            return unsupported(format!(
                "shape {} is not broadcastable to {}",
                shape_str(shape),
                shape_str(out_shape)
            ));
        }
    }
    Ok(strides)
}

/// True if `strides` over the dim suffix starting at `split` are either all
/// zero or exactly the row-major strides of that suffix, i.e. the operand
/// advances by one element per output step inside the run.
fn suffix_conforms(strides: &[usize], out_shape: &[usize], split: usize) -> bool {
    let rank = out_shape.len();
    let varying = (split..rank).any(|d| out_shape[d] > 1 && strides[d] != 0);
    if !varying {
        return true;
    }
    let mut acc = 1usize;
    for d in (split..rank).rev() {
        if out_shape[d] > 1 && strides[d] != acc {
            return false;
        }
        acc *= out_shape[d];
    }
    true
}

/// Decomposes the broadcast into contiguous runs, row-major.
pub fn schedule(
    a_shape: &[usize],
    b_shape: &[usize],
    out_shape: &[usize],
) -> O2CResult<Vec<Run>> {
    let a_strides = aligned_strides(a_shape, out_shape)?;
    let b_strides = aligned_strides(b_shape, out_shape)?;
    let rank = out_shape.len();

    // grow the run suffix from the innermost dim while both operands stay
    // stride-1 or stride-0 within it
    let mut split = rank;
    for d in (0..rank).rev() {
        if suffix_conforms(&a_strides, out_shape, d) && suffix_conforms(&b_strides, out_shape, d) {
            split = d;
        } else {
            break;
        }
    }

    let run_len: usize = out_shape[split..].iter().product::<usize>().max(1);
    let step = |strides: &[usize]| -> usize {
        usize::from((split..rank).any(|d| out_shape[d] > 1 && strides[d] != 0))
    };
    let a_step = step(&a_strides);
    let b_step = step(&b_strides);

    let mut runs = Vec::new();
    let mut index = vec![0usize; split];
    let mut out0 = 0usize;
    loop {
        let a0: usize = index.iter().zip(&a_strides).map(|(i, s)| i * s).sum();
        let b0: usize = index.iter().zip(&b_strides).map(|(i, s)| i * s).sum();
        runs.push(Run {
            len: run_len,
            out0,
            a0,
            a_step,
            b0,
            b_step,
        });
        out0 += run_len;

        // advance the leading multi-index
        let mut d = split;
        loop {
            if d == 0 {
                return Ok(runs);
            }
            d -= 1;
            index[d] += 1;
            if index[d] < out_shape[d] {
                break;
            }
            index[d] = 0;
        }
    }
}

fn emit_c(ctx: &OpContext) -> O2CResult<Emission> {
    ctx.expect_arity(2, 2)?;

    let op = ctx.op_type();
    let symbol = match op {
        "Add" => "+",
        "Sub" => "-",
        "Mul" => "*",
        "Div" => "/",
        other => return unsupported(format!("broadcast operator {other}")),
    };

    let a = ctx.inputs[0];
    let b = ctx.inputs[1];
    let out = ctx.outputs[0];

    let mut source = String::new();
    if b.size == 1 {
        // scalar fast path
        source.push_str(&format!(
            "\
const float D = B[0];
for (int i = 0; i < {size}; i++) {{
    OUT[i] = A[i] {symbol} D;
}}
",
            size = out.size
        ));
    } else {
        for run in schedule(&a.shape, &b.shape, &out.shape)? {
            let a_index = if run.a_step == 1 {
                format!("{} + i", run.a0)
            } else {
                run.a0.to_string()
            };
            let b_index = if run.b_step == 1 {
                format!("{} + i", run.b0)
            } else {
                run.b0.to_string()
            };
            source.push_str(&format!(
                "for (int i = 0; i < {len}; i++) OUT[{out0} + i] = A[{a_index}] {symbol} B[{b_index}];\n",
                len = run.len,
                out0 = run.out0,
            ));
        }
    }

    let call = OpCall::new(
        op,
        &[shape_str(&a.shape), shape_str(&b.shape)],
        &["A", "B", "OUT"],
        &ctx.inputs,
        &ctx.outputs,
    )?;

    Ok(Emission {
        call,
        impl_: OpImpl::c(source),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_broadcast_splits_on_leading_dims() {
        // C[i,j,k,l] = A[i,j,k,l] + B[k,l]
        let runs = schedule(&[3, 4, 5, 6], &[5, 6], &[3, 4, 5, 6]).unwrap();
        assert_eq!(runs.len(), 12);
        assert!(runs.iter().all(|r| r.len == 30 && r.a_step == 1 && r.b_step == 1));
        assert_eq!(runs[0].a0, 0);
        assert_eq!(runs[1].a0, 30);
        assert!(runs.iter().all(|r| r.b0 == 0));
        assert_eq!(runs.last().unwrap().out0, 11 * 30);
    }

    #[test]
    fn inner_broadcast_repeats_one_element() {
        // B fixed along the innermost axis
        let runs = schedule(&[3, 4, 5], &[3, 4, 1], &[3, 4, 5]).unwrap();
        assert_eq!(runs.len(), 12);
        assert!(runs.iter().all(|r| r.len == 5 && r.a_step == 1 && r.b_step == 0));
        assert_eq!(runs[1].b0, 1);
    }

    #[test]
    fn broadcast_on_the_left_operand() {
        let runs = schedule(&[3, 1], &[3, 4], &[3, 4]).unwrap();
        assert_eq!(runs.len(), 3);
        assert!(runs.iter().all(|r| r.len == 4 && r.a_step == 0 && r.b_step == 1));
        assert_eq!(runs[2].a0, 2);
        assert_eq!(runs[2].b0, 8);
    }

    #[test]
    fn equal_shapes_collapse_to_one_run() {
        let runs = schedule(&[2, 3], &[2, 3], &[2, 3]).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].len, 6);
        assert_eq!((runs[0].a_step, runs[0].b_step), (1, 1));
    }

    #[test]
    fn incompatible_shapes_are_rejected() {
        assert!(schedule(&[3, 4], &[5], &[3, 4]).is_err());
    }
}
