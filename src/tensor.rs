//! Tensor catalogue: every named tensor of the graph with its shape,
//! classification tag, optional weight payload and synthesised C variable.

use std::collections::HashMap;

use ndarray::{ArrayD, IxDyn};
use serde::Serialize;

use crate::errors::{O2CError, O2CResult};
use crate::onnx::{tensor_shape_proto, type_proto, ModelProto, TensorProto, ValueInfoProto, DT_FLOAT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    Input,
    Output,
    Weight,
    Intermediate,
    Welded,
}

#[derive(Debug, Clone, Serialize)]
pub struct TensorRecord {
    pub name: String,
    pub shape: Vec<usize>,
    pub size: usize,
    pub tag: Tag,
    /// `TensorProto.DataType` value; weights of dtypes other than float32 are
    /// tolerated but excluded from the packed blob and the generated source.
    pub dtype: i32,
    #[serde(skip)]
    pub data: Option<ArrayD<f32>>,
    pub variable: String,
}

impl TensorRecord {
    pub fn shape_str(&self) -> String {
        crate::util::shape_str(&self.shape)
    }

    /// Weight payload that participates in the packed blob.
    pub fn packed_data(&self) -> Option<&ArrayD<f32>> {
        if self.tag == Tag::Weight && self.dtype == DT_FLOAT {
            self.data.as_ref()
        } else {
            None
        }
    }
}

/// Insertion-ordered tensor catalogue. Iteration order is the accession
/// order, which fixes the layout of the weights blob and the IO buffers.
#[derive(Debug, Default)]
pub struct Catalogue {
    records: Vec<TensorRecord>,
    index: HashMap<String, usize>,
}

impl Catalogue {
    /// Ingests the graph's tensor universe: declared inputs (minus those
    /// shadowed by initializers), declared outputs, intermediate value-infos,
    /// then initializers. Payloads of `Constant` nodes are attached to their
    /// output tensor, which is reclassified as a weight.
    pub fn parse(model: &ModelProto) -> O2CResult<Self> {
        let graph = model
            .graph
            .as_ref()
            .ok_or_else(|| O2CError::InvalidModel("no graph found in model".to_string()))?;

        let mut catalogue = Catalogue::default();

        let initializer_names: Vec<&str> = graph.initializer.iter().map(|t| t.name()).collect();

        for input in &graph.input {
            if initializer_names.contains(&input.name()) {
                continue;
            }
            catalogue.push(record_from_value(input, Tag::Input, catalogue.records.len())?)?;
        }

        for output in &graph.output {
            catalogue.push(record_from_value(output, Tag::Output, catalogue.records.len())?)?;
        }

        for value_info in &graph.value_info {
            catalogue.push(record_from_value(
                value_info,
                Tag::Intermediate,
                catalogue.records.len(),
            )?)?;
        }

        for initializer in &graph.initializer {
            catalogue.push(record_from_initializer(initializer, catalogue.records.len())?)?;
        }

        // Constant nodes hold their payload in a `value` attribute; the output
        // tensor becomes a weight and the node itself is never emitted.
        for node in &graph.node {
            if node.op_type() != "Constant" || node.output.is_empty() {
                continue;
            }
            let Some(tensor) = crate::util::get_tensor_attr(node, "value") else {
                return Err(O2CError::InvalidModel(format!(
                    "Constant node {} has no value attribute",
                    node.name()
                )));
            };
            if let Some(idx) = catalogue.index.get(node.output[0].as_str()).copied() {
                let record = &mut catalogue.records[idx];
                record.dtype = tensor.data_type.unwrap_or(0);
                record.data = decode_f32_payload(tensor, &record.shape)?;
                record.tag = Tag::Weight;
            }
        }

        Ok(catalogue)
    }

    fn push(&mut self, record: TensorRecord) -> O2CResult<()> {
        if self.index.contains_key(&record.name) {
            return Err(O2CError::InvalidModel(format!(
                "duplicate tensor name {}",
                record.name
            )));
        }
        self.index.insert(record.name.clone(), self.records.len());
        self.records.push(record);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TensorRecord> {
        self.index.get(name).map(|&i| &self.records[i])
    }

    pub fn require(&self, name: &str) -> O2CResult<&TensorRecord> {
        self.get(name)
            .ok_or_else(|| O2CError::InvalidModel(format!("tensor {name} not found in catalogue")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TensorRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Welds two tensors: the destination aliases the origin's variable so
    /// both resolve to the same buffer at runtime. Output tensors keep their
    /// tag so final emission still binds them to the output buffer.
    pub fn weld(&mut self, name_from: &str, name_to: &str) -> O2CResult<()> {
        let variable = self.require(name_from)?.variable.clone();
        let idx = *self
            .index
            .get(name_to)
            .ok_or_else(|| O2CError::InvalidModel(format!("tensor {name_to} not found in catalogue")))?;
        let record = &mut self.records[idx];
        record.variable = variable;
        if record.tag != Tag::Output {
            record.tag = Tag::Welded;
        }
        Ok(())
    }

    /// Variables of every output tensor; used to detect intermediates that
    /// were welded onto an output and must bind to the output buffer.
    pub fn output_variables(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.tag == Tag::Output)
            .map(|r| r.variable.as_str())
            .collect()
    }
}

fn shape_from_value(value_info: &ValueInfoProto) -> O2CResult<Vec<usize>> {
    let tensor_type = match value_info.r#type.as_ref().and_then(|t| t.value.as_ref()) {
        Some(type_proto::Value::TensorType(t)) => t,
        None => {
            return Err(O2CError::InvalidModel(format!(
                "tensor {} has no type information",
                value_info.name()
            )))
        }
    };
    let Some(shape) = tensor_type.shape.as_ref() else {
        return Ok(Vec::new());
    };
    let mut dims = Vec::with_capacity(shape.dim.len());
    for dim in &shape.dim {
        match dim.value {
            Some(tensor_shape_proto::dimension::Value::DimValue(v)) if v > 0 => {
                dims.push(v as usize)
            }
            _ => {
                return Err(O2CError::InvalidModel(format!(
                    "tensor {} has an unresolved dimension",
                    value_info.name()
                )))
            }
        }
    }
    Ok(dims)
}

fn record_from_value(
    value_info: &ValueInfoProto,
    tag: Tag,
    var_index: usize,
) -> O2CResult<TensorRecord> {
    let shape = shape_from_value(value_info)?;
    let size = shape.iter().product::<usize>().max(1);
    let dtype = match value_info.r#type.as_ref().and_then(|t| t.value.as_ref()) {
        Some(type_proto::Value::TensorType(t)) => t.elem_type.unwrap_or(0),
        None => 0,
    };
    Ok(TensorRecord {
        name: value_info.name().to_string(),
        shape,
        size,
        tag,
        dtype,
        data: None,
        variable: format!("T{var_index}"),
    })
}

fn record_from_initializer(initializer: &TensorProto, var_index: usize) -> O2CResult<TensorRecord> {
    let shape: Vec<usize> = initializer
        .dims
        .iter()
        .map(|&d| {
            if d > 0 {
                Ok(d as usize)
            } else {
                Err(O2CError::InvalidModel(format!(
                    "initializer {} has a non-positive dimension",
                    initializer.name()
                )))
            }
        })
        .collect::<O2CResult<_>>()?;
    let size = shape.iter().product::<usize>().max(1);
    let data = decode_f32_payload(initializer, &shape)?;
    if data.is_none() {
        tracing::debug!(
            initializer = initializer.name(),
            dtype = crate::onnx::dtype_name(initializer.data_type.unwrap_or(0)),
            "non-float initializer, excluded from the packed blob"
        );
    }
    Ok(TensorRecord {
        name: initializer.name().to_string(),
        shape,
        size,
        tag: Tag::Weight,
        dtype: initializer.data_type.unwrap_or(0),
        data,
        variable: format!("T{var_index}"),
    })
}

/// Decodes a float32 payload from `float_data` or little-endian `raw_data`.
/// Non-float dtypes yield `None`.
fn decode_f32_payload(tensor: &TensorProto, shape: &[usize]) -> O2CResult<Option<ArrayD<f32>>> {
    if tensor.data_type.unwrap_or(0) != DT_FLOAT {
        return Ok(None);
    }
    let values: Vec<f32> = if !tensor.float_data.is_empty() {
        tensor.float_data.clone()
    } else if let Some(raw) = tensor.raw_data.as_ref() {
        raw.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    } else {
        Vec::new()
    };
    let size = shape.iter().product::<usize>().max(1);
    if values.len() != size {
        return Err(O2CError::InvalidModel(format!(
            "initializer {} has {} values for shape {}",
            tensor.name(),
            values.len(),
            crate::util::shape_str(shape)
        )));
    }
    let array = ArrayD::from_shape_vec(IxDyn(shape), values)
        .map_err(|e| O2CError::InvalidModel(format!("initializer {}: {e}", tensor.name())))?;
    Ok(Some(array))
}
