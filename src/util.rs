//! Shape arithmetic and ONNX attribute access helpers.

use crate::errors::{unsupported, O2CResult};
use crate::onnx::{attribute_proto::AttributeType, NodeProto, TensorProto};

/// Formats a shape as `1x3x224x224`. Scalars render as `1`.
pub fn shape_str(shape: &[usize]) -> String {
    if shape.is_empty() {
        return "1".to_string();
    }
    shape
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("x")
}

/// Row-major strides, in elements.
pub fn compute_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

fn find_attr<'a>(node: &'a NodeProto, name: &str) -> Option<&'a crate::onnx::AttributeProto> {
    node.attribute.iter().find(|a| a.name() == name)
}

pub fn get_int_attr(node: &NodeProto, name: &str) -> Option<i64> {
    let attr = find_attr(node, name)?;
    (attr.r#type == Some(AttributeType::Int as i32)).then(|| attr.i())
}

pub fn get_float_attr(node: &NodeProto, name: &str) -> Option<f32> {
    let attr = find_attr(node, name)?;
    (attr.r#type == Some(AttributeType::Float as i32)).then(|| attr.f())
}

pub fn get_ints_attr(node: &NodeProto, name: &str) -> Option<Vec<i64>> {
    let attr = find_attr(node, name)?;
    (attr.r#type == Some(AttributeType::Ints as i32)).then(|| attr.ints.clone())
}

pub fn get_string_attr(node: &NodeProto, name: &str) -> Option<String> {
    let attr = find_attr(node, name)?;
    if attr.r#type != Some(AttributeType::String as i32) {
        return None;
    }
    String::from_utf8(attr.s().to_vec()).ok()
}

pub fn get_tensor_attr<'a>(node: &'a NodeProto, name: &str) -> Option<&'a TensorProto> {
    let attr = find_attr(node, name)?;
    if attr.r#type != Some(AttributeType::Tensor as i32) {
        return None;
    }
    attr.t.as_ref()
}

/// `strides` attribute of a 2-D spatial operator, defaulting to 1x1.
pub fn resolve_stride(node: &NodeProto) -> O2CResult<(usize, usize)> {
    match get_ints_attr(node, "strides") {
        Some(s) if s.len() >= 2 => Ok((s[0] as usize, s[1] as usize)),
        Some(s) => unsupported(format!("strides of rank {}", s.len())),
        None => Ok((1, 1)),
    }
}

/// Head/tail padding `[top, left, bottom, right]` of a 2-D spatial operator.
///
/// An explicit `pads` attribute wins; otherwise the split is derived from
/// `auto_pad` with `pad = max(0, (ceil(in/stride)-1)*stride + kernel - in)`.
pub fn resolve_padding(
    node: &NodeProto,
    in_hw: (usize, usize),
    kernel_hw: (usize, usize),
    stride_hw: (usize, usize),
) -> O2CResult<[usize; 4]> {
    if let Some(pads) = get_ints_attr(node, "pads") {
        if pads.len() != 4 {
            return unsupported(format!("pads of rank {}", pads.len()));
        }
        if pads.iter().any(|&p| p < 0) {
            return unsupported("negative pads");
        }
        // ONNX order: [h_begin, w_begin, h_end, w_end]
        return Ok([
            pads[0] as usize,
            pads[1] as usize,
            pads[2] as usize,
            pads[3] as usize,
        ]);
    }

    let auto_pad = get_string_attr(node, "auto_pad").unwrap_or_else(|| "NOTSET".to_string());
    match auto_pad.as_str() {
        "NOTSET" | "VALID" => Ok([0, 0, 0, 0]),
        "SAME_UPPER" | "SAME_LOWER" => {
            let total = |input: usize, kernel: usize, stride: usize| -> usize {
                let out = input.div_ceil(stride);
                ((out - 1) * stride + kernel).saturating_sub(input)
            };
            let total_h = total(in_hw.0, kernel_hw.0, stride_hw.0);
            let total_w = total(in_hw.1, kernel_hw.1, stride_hw.1);
            let split = |total: usize| -> (usize, usize) {
                if auto_pad == "SAME_UPPER" {
                    (total / 2, total - total / 2)
                } else {
                    (total - total / 2, total / 2)
                }
            };
            let (top, bottom) = split(total_h);
            let (left, right) = split(total_w);
            Ok([top, left, bottom, right])
        }
        other => unsupported(format!("auto_pad mode {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onnx::AttributeProto;

    fn node_with_ints(name: &str, ints: &[i64]) -> NodeProto {
        NodeProto {
            attribute: vec![AttributeProto {
                name: Some(name.to_string()),
                ints: ints.to_vec(),
                r#type: Some(AttributeType::Ints as i32),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn strides_row_major() {
        assert_eq!(compute_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(compute_strides(&[5]), vec![1]);
        assert!(compute_strides(&[]).is_empty());
    }

    #[test]
    fn shape_formatting() {
        assert_eq!(shape_str(&[1, 3, 2]), "1x3x2");
        assert_eq!(shape_str(&[]), "1");
    }

    #[test]
    fn explicit_pads_win() {
        let node = node_with_ints("pads", &[1, 2, 3, 4]);
        let pads = resolve_padding(&node, (28, 28), (3, 3), (1, 1)).unwrap();
        assert_eq!(pads, [1, 2, 3, 4]);
    }

    #[test]
    fn same_upper_splits_tail_heavy() {
        let mut node = NodeProto::default();
        node.attribute.push(AttributeProto {
            name: Some("auto_pad".to_string()),
            s: Some(b"SAME_UPPER".to_vec()),
            r#type: Some(AttributeType::String as i32),
            ..Default::default()
        });
        // in=5, k=2, stride=1 -> total pad 1, head 0 tail 1
        let pads = resolve_padding(&node, (5, 5), (2, 2), (1, 1)).unwrap();
        assert_eq!(pads, [0, 0, 1, 1]);
    }

    #[test]
    fn no_attrs_means_no_padding() {
        let node = NodeProto::default();
        assert_eq!(
            resolve_padding(&node, (4, 4), (2, 2), (2, 2)).unwrap(),
            [0, 0, 0, 0]
        );
        assert_eq!(resolve_stride(&node).unwrap(), (1, 1));
    }
}
