//! Builders for constructing ONNX model protos in tests without fixture
//! files.

#![allow(dead_code)]

use onnx2code::onnx::attribute_proto::AttributeType;
use onnx2code::onnx::{
    tensor_shape_proto, type_proto, AttributeProto, GraphProto, ModelProto, NodeProto,
    TensorProto, TensorShapeProto, TypeProto, ValueInfoProto,
};

pub fn value_info(name: &str, shape: &[i64]) -> ValueInfoProto {
    let dim = shape
        .iter()
        .map(|&d| tensor_shape_proto::Dimension {
            value: Some(tensor_shape_proto::dimension::Value::DimValue(d)),
            denotation: None,
        })
        .collect();
    ValueInfoProto {
        name: Some(name.to_string()),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: Some(1),
                shape: Some(TensorShapeProto { dim }),
            })),
            denotation: None,
        }),
        doc_string: None,
    }
}

pub fn node(op_type: &str, inputs: &[&str], outputs: &[&str]) -> NodeProto {
    node_with_attrs(op_type, inputs, outputs, vec![])
}

pub fn node_with_attrs(
    op_type: &str,
    inputs: &[&str],
    outputs: &[&str],
    attrs: Vec<AttributeProto>,
) -> NodeProto {
    NodeProto {
        input: inputs.iter().map(|s| s.to_string()).collect(),
        output: outputs.iter().map(|s| s.to_string()).collect(),
        name: Some(format!("{op_type}_node")),
        op_type: Some(op_type.to_string()),
        attribute: attrs,
        doc_string: None,
        domain: None,
    }
}

pub fn attr_int(name: &str, value: i64) -> AttributeProto {
    AttributeProto {
        name: Some(name.to_string()),
        i: Some(value),
        r#type: Some(AttributeType::Int as i32),
        ..Default::default()
    }
}

pub fn attr_ints(name: &str, values: &[i64]) -> AttributeProto {
    AttributeProto {
        name: Some(name.to_string()),
        ints: values.to_vec(),
        r#type: Some(AttributeType::Ints as i32),
        ..Default::default()
    }
}

pub fn attr_float(name: &str, value: f32) -> AttributeProto {
    AttributeProto {
        name: Some(name.to_string()),
        f: Some(value),
        r#type: Some(AttributeType::Float as i32),
        ..Default::default()
    }
}

pub fn attr_string(name: &str, value: &str) -> AttributeProto {
    AttributeProto {
        name: Some(name.to_string()),
        s: Some(value.as_bytes().to_vec()),
        r#type: Some(AttributeType::String as i32),
        ..Default::default()
    }
}

pub fn attr_tensor(name: &str, tensor: TensorProto) -> AttributeProto {
    AttributeProto {
        name: Some(name.to_string()),
        t: Some(tensor),
        r#type: Some(AttributeType::Tensor as i32),
        ..Default::default()
    }
}

pub fn init_f32(name: &str, shape: &[i64], values: &[f32]) -> TensorProto {
    TensorProto {
        dims: shape.to_vec(),
        data_type: Some(1),
        float_data: values.to_vec(),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

pub fn init_i64(name: &str, shape: &[i64], values: &[i64]) -> TensorProto {
    TensorProto {
        dims: shape.to_vec(),
        data_type: Some(7),
        int64_data: values.to_vec(),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

pub fn graph(
    inputs: Vec<ValueInfoProto>,
    outputs: Vec<ValueInfoProto>,
    value_infos: Vec<ValueInfoProto>,
    initializers: Vec<TensorProto>,
    nodes: Vec<NodeProto>,
) -> GraphProto {
    GraphProto {
        node: nodes,
        name: Some("test_graph".to_string()),
        initializer: initializers,
        input: inputs,
        output: outputs,
        value_info: value_infos,
        ..Default::default()
    }
}

pub fn model(graph: GraphProto) -> ModelProto {
    ModelProto {
        ir_version: Some(8),
        producer_name: Some("onnx2code-tests".to_string()),
        graph: Some(graph),
        ..Default::default()
    }
}

pub fn generate(
    model_proto: &ModelProto,
    variations: &[&str],
) -> onnx2code::O2CResult<onnx2code::ModelResult> {
    let tags: Vec<String> = variations.iter().map(|s| s.to_string()).collect();
    onnx2code::Generator::new(model_proto, &tags)?.generate()
}
