//! 2-D convolution, NCHW layout, `group = 1` only. Two variants: a direct
//! seven-loop nest and an im2col rearrangement that reduces to the blocked
//! GEMM template.

use crate::errors::{unsupported, O2CResult};
use crate::ops::gemm_tiling::{self, LoopTilingParams};
use crate::ops::{Emission, OpCall, OpContext, OpImpl};
use crate::registry::VariantDef;
use crate::util::{compute_strides, get_int_attr, get_ints_attr, resolve_padding, resolve_stride, shape_str};

const OP_TYPES: &[&str] = &["Conv"];

pub(crate) fn variants() -> Vec<VariantDef> {
    vec![
        VariantDef {
            op_types: OP_TYPES,
            tags: &["c"],
            priority: 1,
            emit: emit_naive,
        },
        VariantDef {
            op_types: OP_TYPES,
            tags: &["im2col"],
            priority: 1,
            emit: emit_im2col,
        },
    ]
}

struct Conv {
    // input NCHW
    nb: usize,
    h: usize,
    w: usize,
    // filter F x KC x KH x KW
    f: usize,
    kc: usize,
    kh: usize,
    kw: usize,
    // output spatial extent
    oh: usize,
    ow: usize,
    stride: (usize, usize),
    /// [top, left, bottom, right]
    pads: [usize; 4],
    has_bias: bool,
    input_strides: Vec<usize>,
    kernel_strides: Vec<usize>,
    output_strides: Vec<usize>,
}

impl Conv {
    fn parse(ctx: &OpContext) -> O2CResult<Self> {
        ctx.expect_arity(2, 3)?;

        let x = ctx.inputs[0];
        let w = ctx.inputs[1];
        let y = ctx.outputs[0];
        if x.shape.len() != 4 || w.shape.len() != 4 || y.shape.len() != 4 {
            return unsupported("Conv: only 2-D spatial convolutions supported");
        }
        if get_int_attr(ctx.node, "group").unwrap_or(1) != 1 {
            return unsupported("Conv: grouped/depthwise convolution not supported");
        }
        if let Some(dilations) = get_ints_attr(ctx.node, "dilations") {
            if dilations.iter().any(|&d| d != 1) {
                return unsupported("Conv: dilations not supported");
            }
        }

        let (nb, c, h, w_in) = (x.shape[0], x.shape[1], x.shape[2], x.shape[3]);
        let (f, kc, kh, kw) = (w.shape[0], w.shape[1], w.shape[2], w.shape[3]);
        if kc != c {
            return unsupported(format!(
                "Conv: kernel channels {kc} do not match input channels {c}"
            ));
        }

        let stride = resolve_stride(ctx.node)?;
        let pads = resolve_padding(ctx.node, (h, w_in), (kh, kw), stride)?;

        let oh = (h + pads[0] + pads[2] - kh) / stride.0 + 1;
        let ow = (w_in + pads[1] + pads[3] - kw) / stride.1 + 1;
        if y.shape != [nb, f, oh, ow] {
            return unsupported(format!(
                "Conv: output shape {} does not match computed {nb}x{f}x{oh}x{ow}",
                y.shape_str()
            ));
        }

        let has_bias = match ctx.inputs.get(2) {
            None => false,
            Some(b) if b.size == f => true,
            Some(b) => {
                return unsupported(format!("Conv: bias of size {} for {f} filters", b.size))
            }
        };

        Ok(Conv {
            nb,
            h,
            w: w_in,
            f,
            kc,
            kh,
            kw,
            oh,
            ow,
            stride,
            pads,
            has_bias,
            input_strides: compute_strides(&x.shape),
            kernel_strides: compute_strides(&w.shape),
            output_strides: compute_strides(&y.shape),
        })
    }

    fn call(&self, ctx: &OpContext) -> O2CResult<OpCall> {
        let sig_params = vec![
            shape_str(&ctx.inputs[0].shape),
            shape_str(&ctx.inputs[1].shape),
            format!("s{}x{}", self.stride.0, self.stride.1),
            format!(
                "p{}x{}x{}x{}",
                self.pads[0], self.pads[1], self.pads[2], self.pads[3]
            ),
        ];
        let params: &[&str] = if self.has_bias {
            &["X", "W", "B", "OUT"]
        } else {
            &["X", "W", "OUT"]
        };
        OpCall::new("Conv", &sig_params, params, &ctx.inputs, &ctx.outputs)
    }
}

/// Direct loop nest with explicit pad tests.
fn emit_naive(ctx: &OpContext) -> O2CResult<Emission> {
    let c = Conv::parse(ctx)?;
    let accum_init = if c.has_bias { "B[f]" } else { "0.0f" };
    let (is0, is1, is2, is3) = (
        c.input_strides[0],
        c.input_strides[1],
        c.input_strides[2],
        c.input_strides[3],
    );
    let (ks0, ks1, ks2, ks3) = (
        c.kernel_strides[0],
        c.kernel_strides[1],
        c.kernel_strides[2],
        c.kernel_strides[3],
    );
    let (os0, os1, os2, os3) = (
        c.output_strides[0],
        c.output_strides[1],
        c.output_strides[2],
        c.output_strides[3],
    );

    let source = format!(
        "\
for (int b = 0; b < {nb}; b++) {{
    for (int f = 0; f < {nf}; f++) {{
        for (int h = 0; h < {oh}; h++) {{
            for (int w = 0; w < {ow}; w++) {{
                float accum = {accum_init};
                for (int cc = 0; cc < {kc}; cc++) {{
                    for (int hh = 0; hh < {kh}; hh++) {{
                        for (int ww = 0; ww < {kw}; ww++) {{
                            const int ih = -{pt} + (h * {sh}) + hh;
                            const int iw = -{pl} + (w * {sw}) + ww;
                            if (ih >= 0 && ih < {ih_max} && iw >= 0 && iw < {iw_max}) {{
                                accum += X[b * {is0} + cc * {is1} + ih * {is2} + iw * {is3}]
                                       * W[f * {ks0} + cc * {ks1} + hh * {ks2} + ww * {ks3}];
                            }}
                        }}
                    }}
                }}
                OUT[b * {os0} + f * {os1} + h * {os2} + w * {os3}] = accum;
            }}
        }}
    }}
}}
",
        nb = c.nb,
        nf = c.f,
        oh = c.oh,
        ow = c.ow,
        kc = c.kc,
        kh = c.kh,
        kw = c.kw,
        pt = c.pads[0],
        pl = c.pads[1],
        sh = c.stride.0,
        sw = c.stride.1,
        ih_max = c.h,
        iw_max = c.w,
    );

    Ok(Emission {
        call: c.call(ctx)?,
        impl_: OpImpl::c(source),
    })
}

/// Rearranges input patches into a (KC*KH*KW) x P column matrix, then runs
/// the blocked GEMM with M = F, K = KC*KH*KW, N = P; bias is a post-pass.
fn emit_im2col(ctx: &OpContext) -> O2CResult<Emission> {
    let c = Conv::parse(ctx)?;
    let kdim = c.kc * c.kh * c.kw;
    let p = c.oh * c.ow;

    let params = LoopTilingParams::default();
    let gemm_call = gemm_tiling::call_gemm(c.f, kdim, p, &params, "W, cols, y");

    let bias_pass = if c.has_bias {
        format!(
            "
    for (int f = 0; f < {nf}; f++) {{
        for (int q = 0; q < {p}; q++) {{
            y[f * {p} + q] += B[f];
        }}
    }}",
            nf = c.f
        )
    } else {
        String::new()
    };

    let source = format!(
        "\
static float cols[{cols_size}];
for (int b = 0; b < {nb}; b++) {{
    const float* x = X + b * {is0};
    float* y = OUT + b * {os0};
    int col = 0;
    for (int h = 0; h < {oh}; h++) {{
        for (int w = 0; w < {ow}; w++) {{
            int row = 0;
            for (int cc = 0; cc < {kc}; cc++) {{
                for (int hh = 0; hh < {kh}; hh++) {{
                    for (int ww = 0; ww < {kw}; ww++) {{
                        const int ih = -{pt} + (h * {sh}) + hh;
                        const int iw = -{pl} + (w * {sw}) + ww;
                        cols[row * {p} + col] =
                            (ih >= 0 && ih < {ih_max} && iw >= 0 && iw < {iw_max})
                                ? x[cc * {is1} + ih * {is2} + iw * {is3}]
                                : 0.0f;
                        row++;
                    }}
                }}
            }}
            col++;
        }}
    }}
    {gemm_call}{bias_pass}
}}
",
        cols_size = kdim * p,
        nb = c.nb,
        is0 = c.input_strides[0],
        os0 = c.output_strides[0],
        oh = c.oh,
        ow = c.ow,
        kc = c.kc,
        kh = c.kh,
        kw = c.kw,
        pt = c.pads[0],
        pl = c.pads[1],
        sh = c.stride.0,
        sw = c.stride.1,
        ih_max = c.h,
        iw_max = c.w,
        is1 = c.input_strides[1],
        is2 = c.input_strides[2],
        is3 = c.input_strides[3],
    );

    let mut impl_ = OpImpl::c(source);
    impl_.external_files = gemm_tiling::EXTERNAL_FILES.to_vec();

    Ok(Emission {
        call: c.call(ctx)?,
        impl_,
    })
}
