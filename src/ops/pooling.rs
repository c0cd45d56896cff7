//! Max and average pooling over 2-D spatial NCHW tensors. Average pooling
//! divides by the number of valid (non-padded) samples; `count_include_pad`
//! is rejected.

use crate::errors::{unsupported, O2CResult};
use crate::ops::{Emission, OpCall, OpContext, OpImpl};
use crate::registry::VariantDef;
use crate::util::{compute_strides, get_int_attr, get_ints_attr, resolve_padding, resolve_stride, shape_str};

const OP_TYPES: &[&str] = &["MaxPool", "AveragePool"];

pub(crate) fn variants() -> Vec<VariantDef> {
    vec![VariantDef {
        op_types: OP_TYPES,
        tags: &["c"],
        priority: 1,
        emit: emit_c,
    }]
}

struct Pooling {
    is_max: bool,
    nb: usize,
    c: usize,
    h: usize,
    w: usize,
    kh: usize,
    kw: usize,
    oh: usize,
    ow: usize,
    stride: (usize, usize),
    pads: [usize; 4],
    input_strides: Vec<usize>,
    output_strides: Vec<usize>,
}

impl Pooling {
    fn parse(ctx: &OpContext) -> O2CResult<Self> {
        ctx.expect_arity(1, 1)?;

        if get_int_attr(ctx.node, "count_include_pad").unwrap_or(0) != 0 {
            return unsupported("AveragePool: count_include_pad not supported");
        }
        if get_int_attr(ctx.node, "ceil_mode").unwrap_or(0) != 0 {
            return unsupported("pooling: ceil_mode not supported");
        }
        if let Some(dilations) = get_ints_attr(ctx.node, "dilations") {
            if dilations.iter().any(|&d| d != 1) {
                return unsupported("pooling: dilations not supported");
            }
        }

        let x = ctx.inputs[0];
        let y = ctx.outputs[0];
        if x.shape.len() != 4 || y.shape.len() != 4 {
            return unsupported("pooling: only 2-D spatial pooling supported");
        }

        let Some(kernel_shape) = get_ints_attr(ctx.node, "kernel_shape") else {
            return unsupported("pooling: kernel_shape not set");
        };
        if kernel_shape.len() != 2 {
            return unsupported(format!(
                "pooling: kernel of rank {}",
                kernel_shape.len()
            ));
        }
        let (kh, kw) = (kernel_shape[0] as usize, kernel_shape[1] as usize);

        let (nb, c, h, w) = (x.shape[0], x.shape[1], x.shape[2], x.shape[3]);
        let stride = resolve_stride(ctx.node)?;
        let pads = resolve_padding(ctx.node, (h, w), (kh, kw), stride)?;

        let oh = (h + pads[0] + pads[2] - kh) / stride.0 + 1;
        let ow = (w + pads[1] + pads[3] - kw) / stride.1 + 1;
        if y.shape != [nb, c, oh, ow] {
            return unsupported(format!(
                "pooling: output shape {} does not match computed {nb}x{c}x{oh}x{ow}",
                y.shape_str()
            ));
        }

        Ok(Pooling {
            is_max: ctx.op_type() == "MaxPool",
            nb,
            c,
            h,
            w,
            kh,
            kw,
            oh,
            ow,
            stride,
            pads,
            input_strides: compute_strides(&x.shape),
            output_strides: compute_strides(&y.shape),
        })
    }

    fn call(&self, ctx: &OpContext) -> O2CResult<OpCall> {
        let sig_params = vec![
            shape_str(&ctx.inputs[0].shape),
            format!("k{}x{}", self.kh, self.kw),
            format!("s{}x{}", self.stride.0, self.stride.1),
            format!(
                "p{}x{}x{}x{}",
                self.pads[0], self.pads[1], self.pads[2], self.pads[3]
            ),
        ];
        OpCall::new(ctx.op_type(), &sig_params, &["A", "OUT"], &ctx.inputs, &ctx.outputs)
    }
}

fn emit_c(ctx: &OpContext) -> O2CResult<Emission> {
    let p = Pooling::parse(ctx)?;

    let (init, update, finish, count_decl, count_bump) = if p.is_max {
        ("-INFINITY", "acc = acc > val ? acc : val;", "", "", "")
    } else {
        (
            "0.0f",
            "acc = acc + val;",
            " / (float)count",
            "\n                int count = 0;",
            "\n                                count++;",
        )
    };

    let source = format!(
        "\
for (int b = 0; b < {nb}; b++) {{
    for (int c = 0; c < {nc}; c++) {{
        for (int h = 0; h < {oh}; h++) {{
            for (int w = 0; w < {ow}; w++) {{
                float acc = {init};{count_decl}
                for (int hh = 0; hh < {kh}; hh++) {{
                    for (int ww = 0; ww < {kw}; ww++) {{
                        const int ih = -{pt} + (h * {sh}) + hh;
                        const int iw = -{pl} + (w * {sw}) + ww;
                        if (ih >= 0 && ih < {ih_max} && iw >= 0 && iw < {iw_max}) {{
                            const float val =
                                A[b * {is0} + c * {is1} + ih * {is2} + iw * {is3}];
                            {update}{count_bump}
                        }}
                    }}
                }}
                OUT[b * {os0} + c * {os1} + h * {os2} + w * {os3}] = acc{finish};
            }}
        }}
    }}
}}
",
        nb = p.nb,
        nc = p.c,
        oh = p.oh,
        ow = p.ow,
        kh = p.kh,
        kw = p.kw,
        pt = p.pads[0],
        pl = p.pads[1],
        sh = p.stride.0,
        sw = p.stride.1,
        ih_max = p.h,
        iw_max = p.w,
        is0 = p.input_strides[0],
        is1 = p.input_strides[1],
        is2 = p.input_strides[2],
        is3 = p.input_strides[3],
        os0 = p.output_strides[0],
        os1 = p.output_strides[1],
        os2 = p.output_strides[2],
        os3 = p.output_strides[3],
    );

    Ok(Emission {
        call: p.call(ctx)?,
        impl_: OpImpl::c(source),
    })
}
