//! General matrix multiplication: `OUT = A * B (+ C)` for `Gemm` and
//! `MatMul` nodes, row-major, with an optional transposed B.

use std::process::Command;

use crate::errors::{unsupported, O2CResult};
use crate::ops::gemm_tiling::{self, LoopTilingParams};
use crate::ops::{Emission, OpCall, OpContext, OpImpl};
use crate::registry::VariantDef;
use crate::util::{get_float_attr, get_int_attr};

const OP_TYPES: &[&str] = &["Gemm", "MatMul"];

/// External microkernel generator; must be reachable through PATH.
const LIBXSMM_PATH: &str = "libxsmm_gemm_generator";

pub(crate) fn variants() -> Vec<VariantDef> {
    vec![
        VariantDef {
            op_types: OP_TYPES,
            tags: &["asm", "libxsmm"],
            priority: 0,
            emit: emit_libxsmm,
        },
        VariantDef {
            op_types: OP_TYPES,
            tags: &["c", "loop-tiling"],
            priority: 1,
            emit: emit_loop_tiling,
        },
        VariantDef {
            op_types: OP_TYPES,
            tags: &["c", "gemm-naive"],
            priority: 2,
            emit: emit_naive,
        },
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bias {
    None,
    /// One value per output column, shape `[N]`.
    Vector,
    /// Full `[M, N]` matrix.
    Full,
}

struct Gemm {
    m: usize,
    k: usize,
    n: usize,
    trans_b: bool,
    bias: Bias,
}

impl Gemm {
    fn parse(ctx: &OpContext) -> O2CResult<Self> {
        ctx.expect_arity(2, 3)?;

        if get_int_attr(ctx.node, "transA").unwrap_or(0) != 0 {
            return unsupported("Gemm: transA not supported");
        }
        if get_float_attr(ctx.node, "alpha").unwrap_or(1.0) != 1.0 {
            return unsupported("Gemm: alpha != 1 not supported");
        }
        if get_float_attr(ctx.node, "beta").unwrap_or(1.0) != 1.0 {
            return unsupported("Gemm: beta != 1 not supported");
        }
        let trans_b = get_int_attr(ctx.node, "transB").unwrap_or(0) != 0;

        let a = ctx.inputs[0];
        let b = ctx.inputs[1];
        let y = ctx.outputs[0];
        if a.shape.len() != 2 || b.shape.len() != 2 {
            return unsupported("Gemm: only rank-2 operands supported");
        }

        let m = a.shape[0];
        let k = a.shape[1];
        let (k_b, n) = if trans_b {
            (b.shape[1], b.shape[0])
        } else {
            (b.shape[0], b.shape[1])
        };
        if k_b != k {
            return unsupported(format!("Gemm: inner dimensions disagree ({k} vs {k_b})"));
        }
        if y.size != m * n {
            return unsupported(format!(
                "Gemm: output size {} does not match {m}x{n}",
                y.size
            ));
        }

        let bias = match ctx.inputs.get(2) {
            None => Bias::None,
            Some(c) if c.size == n => Bias::Vector,
            Some(c) if c.size == m * n => Bias::Full,
            Some(c) => {
                return unsupported(format!(
                    "Gemm: bias of size {} not broadcastable to {m}x{n}",
                    c.size
                ))
            }
        };

        Ok(Gemm {
            m,
            k,
            n,
            trans_b,
            bias,
        })
    }

    fn sig_params(&self) -> Vec<String> {
        let mut params = vec![format!("{}x{}x{}", self.m, self.k, self.n)];
        if self.trans_b {
            params.push("tB".to_string());
        }
        match self.bias {
            Bias::None => {}
            Bias::Vector => params.push("bv".to_string()),
            Bias::Full => params.push("bf".to_string()),
        }
        params
    }

    fn call(&self, ctx: &OpContext) -> O2CResult<OpCall> {
        let params: &[&str] = if self.bias == Bias::None {
            &["A", "B", "OUT"]
        } else {
            &["A", "B", "C", "OUT"]
        };
        OpCall::new("Gemm", &self.sig_params(), params, &ctx.inputs, &ctx.outputs)
    }

    fn bias_expr(&self) -> String {
        match self.bias {
            Bias::None => String::new(),
            Bias::Vector => " + C[col]".to_string(),
            Bias::Full => format!(" + C[row * {} + col]", self.n),
        }
    }
}

/// Triple loop, no blocking.
fn emit_naive(ctx: &OpContext) -> O2CResult<Emission> {
    let g = Gemm::parse(ctx)?;
    let (m, k, n) = (g.m, g.k, g.n);

    let index_b = if g.trans_b {
        format!("col * {k} + i")
    } else {
        format!("i * {n} + col")
    };

    let source = format!(
        "\
for (int row = 0; row < {m}; row++) {{
    for (int col = 0; col < {n}; col++) {{
        float sum = 0.0f;
        for (int i = 0; i < {k}; i++) {{
            sum += A[row * {k} + i] * B[{index_b}];
        }}
        OUT[row * {n} + col] = sum{bias};
    }}
}}
",
        bias = g.bias_expr()
    );

    Ok(Emission {
        call: g.call(ctx)?,
        impl_: OpImpl::c(source),
    })
}

/// Five-loop cache-blocked GEMM instantiating the shipped C++ template.
fn emit_loop_tiling(ctx: &OpContext) -> O2CResult<Emission> {
    let g = Gemm::parse(ctx)?;
    if g.trans_b {
        return unsupported("loop-tiling Gemm: transB not supported");
    }
    if g.bias != Bias::None {
        return unsupported("loop-tiling Gemm: bias not supported");
    }

    let params = LoopTilingParams::default();
    let mut impl_ = OpImpl::c(format!(
        "{}\n",
        gemm_tiling::call_gemm(g.m, g.k, g.n, &params, "A, B, OUT")
    ));
    impl_.external_files = gemm_tiling::EXTERNAL_FILES.to_vec();

    Ok(Emission {
        call: g.call(ctx)?,
        impl_,
    })
}

/// Microkernel produced by the external libxsmm generator and inlined as an
/// auxiliary function. The generator emits column-major code, so operands are
/// swapped at the call site to express row-major `A * B`.
fn emit_libxsmm(ctx: &OpContext) -> O2CResult<Emission> {
    let g = Gemm::parse(ctx)?;
    if g.trans_b {
        return unsupported("libxsmm Gemm: transB not supported");
    }

    let aux_name = format!("libxsmm_gemm_{}_{}_{}", g.m, g.k, g.n);
    let aux_fn = generate_microkernel(&aux_name, g.m, g.k, g.n)?;

    let mut source = format!("{aux_name}(B, A, OUT);\n");
    match g.bias {
        Bias::None => {}
        Bias::Vector => {
            source.push_str(&format!(
                "\
for (int row = 0; row < {m}; row++) {{
    for (int col = 0; col < {n}; col++) {{
        OUT[row * {n} + col] += C[col];
    }}
}}
",
                m = g.m,
                n = g.n
            ));
        }
        Bias::Full => {
            source.push_str(&format!(
                "\
for (int i = 0; i < {size}; i++) {{
    OUT[i] += C[i];
}}
",
                size = g.m * g.n
            ));
        }
    }

    let mut impl_ = OpImpl::c(source);
    impl_.cpp_aux_functions = vec![aux_fn];

    Ok(Emission {
        call: g.call(ctx)?,
        impl_,
    })
}

/// Runs the generator and captures its output, stripped of artifact markers.
/// Any failure degrades into an unsupported-configuration rejection so the
/// driver can fall through to the next variant.
fn generate_microkernel(name: &str, m: usize, k: usize, n: usize) -> O2CResult<String> {
    // The generator speaks BLAS column-major: sizes and leading dimensions
    // are given for OUT^T = B^T * A^T.
    let args: Vec<String> = vec![
        "dense".to_string(),
        "/dev/stdout".to_string(),
        name.to_string(),
        n.to_string(),
        m.to_string(),
        k.to_string(),
        // lda, ldb, ldc
        n.to_string(),
        k.to_string(),
        n.to_string(),
        // alpha, beta: OUT = 1 * A * B + 0 * OUT
        "1".to_string(),
        "0".to_string(),
        // unaligned A and C
        "0".to_string(),
        "0".to_string(),
        // haswell targets AVX2, no prefetch, single precision
        "hsw".to_string(),
        "nopf".to_string(),
        "SP".to_string(),
    ];
    let output = Command::new(LIBXSMM_PATH)
        .args(&args)
        .output()
        .map_err(|e| {
            crate::errors::O2CError::Unsupported(format!("libxsmm generator not available: {e}"))
        })?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() || !stderr.is_empty() {
        return unsupported(format!("libxsmm generator failed: {}", stderr.trim()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let aux_fn = stdout
        .lines()
        .filter(|line| !line.starts_with("libxsmm_num_total_flops") && !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if aux_fn.is_empty() {
        return unsupported("libxsmm generator produced no output");
    }
    Ok(aux_fn)
}
