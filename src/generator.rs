//! Emission driver: walks the graph in declared order, welds shape-only
//! operators away, selects one variant per node, deduplicates implementation
//! bodies and plans the intermediate arena.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::emit::{self, ArenaLayout};
use crate::errors::{O2CError, O2CResult};
use crate::memory::{self, TensorUsageRecord};
use crate::model;
use crate::onnx::{ModelProto, NodeProto};
use crate::ops::{identity, Emission, OpCall, OpContext, OpImpl};
use crate::registry::Registry;
use crate::tensor::{Catalogue, Tag};

/// Shape-only operators implemented by welding the data input onto the
/// output, at zero runtime cost. BatchNormalization and Dropout are identity
/// under inference semantics (the graph is expected to be pre-folded).
const WELD_OPS: &[&str] = &[
    "Reshape",
    "Squeeze",
    "Unsqueeze",
    "Flatten",
    "Dropout",
    "BatchNormalization",
];

pub struct Generator<'m> {
    model: &'m ModelProto,
    pub tensors: Catalogue,
    variations: Vec<String>,
    impls: Vec<(OpImpl, OpCall)>,
    calls: Vec<OpCall>,
}

impl<'m> Generator<'m> {
    /// The universal tags `asm` and `c` are always appended after the user's
    /// preference list, so every known operator has a candidate.
    pub fn new(model: &'m ModelProto, variations: &[String]) -> O2CResult<Self> {
        let tensors = Catalogue::parse(model)?;

        let mut tags: Vec<String> = variations
            .iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        for universal in ["asm", "c"] {
            if !tags.iter().any(|t| t == universal) {
                tags.push(universal.to_string());
            }
        }

        Ok(Generator {
            model,
            tensors,
            variations: tags,
            impls: Vec::new(),
            calls: Vec::new(),
        })
    }

    #[tracing::instrument(skip(self), name = "generate")]
    pub fn generate(mut self) -> O2CResult<ModelResult> {
        let graph = self
            .model
            .graph
            .as_ref()
            .ok_or_else(|| O2CError::InvalidModel("no graph found in model".to_string()))?;

        for node in &graph.node {
            let op_type = node.op_type();

            // already materialised into the catalogue as a weight
            if op_type == "Constant" {
                continue;
            }

            if WELD_OPS.contains(&op_type) {
                self.weld_node(node)?;
                continue;
            }

            let emission = self.emit_node(node)?;
            self.record(emission)?;
        }

        let arena = self.plan_arena();
        info!(
            calls = self.calls.len(),
            functions = self.impls.len(),
            arena_floats = arena.size,
            "code generation finished"
        );

        if model::debug_enabled() {
            self.dump_debug_artifacts(&arena)?;
        }

        let shapes = |tag: Tag| -> Vec<(String, Vec<usize>)> {
            self.tensors
                .iter()
                .filter(|t| t.tag == tag)
                .map(|t| (t.name.clone(), t.shape.clone()))
                .collect()
        };

        Ok(ModelResult {
            input_shapes: shapes(Tag::Input),
            output_shapes: shapes(Tag::Output),
            source_c: emit::c_source(&self.tensors, &self.impls, &self.calls, &arena),
            source_h: emit::header_source(),
            source_asm: emit::asm_source(&self.impls),
            weights: self.pack_weights(),
        })
    }

    /// Welds the sole data input onto the sole output. A pass-through from a
    /// graph input (or a weight) straight onto a graph output cannot alias,
    /// those buffers are caller-owned and distinct, so it degrades into a
    /// real copy.
    fn weld_node(&mut self, node: &NodeProto) -> O2CResult<()> {
        let Some(from) = node.input.first().filter(|n| !n.is_empty()) else {
            return Err(O2CError::InvalidModel(format!(
                "{}: expected a data input",
                node.op_type()
            )));
        };
        let Some(to) = node.output.first().filter(|n| !n.is_empty()) else {
            return Err(O2CError::InvalidModel(format!(
                "{}: expected one output",
                node.op_type()
            )));
        };

        let producer = self.tensors.require(from)?;
        let consumer = self.tensors.require(to)?;
        if consumer.tag == Tag::Output && matches!(producer.tag, Tag::Input | Tag::Weight) {
            let emission = identity::passthrough_copy(producer, consumer)?;
            return self.record(emission);
        }

        debug!(op = node.op_type(), %from, %to, "welding tensors");
        self.tensors.weld(from, to)
    }

    /// Walks the candidate variants in preference order; the first one that
    /// does not reject the node wins. If every candidate rejects, the first
    /// rejection reason is surfaced.
    fn emit_node(&self, node: &NodeProto) -> O2CResult<Emission> {
        let op_type = node.op_type();
        let registry = Registry::global();
        if !registry.knows(op_type) {
            return Err(O2CError::UnknownOp(op_type.to_string()));
        }

        let inputs = node
            .input
            .iter()
            .filter(|n| !n.is_empty())
            .map(|n| self.tensors.require(n))
            .collect::<O2CResult<Vec<_>>>()?;
        let outputs = node
            .output
            .iter()
            .filter(|n| !n.is_empty())
            .map(|n| self.tensors.require(n))
            .collect::<O2CResult<Vec<_>>>()?;
        let ctx = OpContext {
            node,
            inputs,
            outputs,
        };

        let mut first_rejection: Option<String> = None;
        for variant in registry.lookup(op_type, &self.variations) {
            match (variant.emit)(&ctx) {
                Ok(emission) => return Ok(emission),
                Err(O2CError::Unsupported(reason)) => {
                    debug!(op = op_type, %reason, "variant rejected node");
                    first_rejection.get_or_insert(reason);
                }
                Err(other) => return Err(other),
            }
        }

        Err(O2CError::Unsupported(first_rejection.unwrap_or_else(|| {
            format!("no variant available for {op_type}")
        })))
    }

    /// Records a call and its implementation. Value-equal impls share one
    /// function definition; their mangled names must agree.
    fn record(&mut self, emission: Emission) -> O2CResult<()> {
        if let Some((_, existing)) = self.impls.iter().find(|(i, _)| *i == emission.impl_) {
            if existing.name != emission.call.name {
                return Err(O2CError::Internal(format!(
                    "implementation dedup name mismatch: {} vs {}",
                    existing.name, emission.call.name
                )));
            }
        } else {
            self.impls.push((emission.impl_, emission.call.clone()));
        }
        self.calls.push(emission.call);
        Ok(())
    }

    /// Live ranges per variable over the recorded call sequence, then the
    /// best offset layout. Intermediates welded onto an output bind to the
    /// output buffer and are excluded from planning.
    fn plan_arena(&self) -> ArenaLayout {
        let mut first: HashMap<&str, usize> = HashMap::new();
        let mut last: HashMap<&str, usize> = HashMap::new();
        for (i, call) in self.calls.iter().enumerate() {
            for var in &call.output_vars {
                first.entry(var.as_str()).or_insert(i);
            }
            for var in &call.input_vars {
                last.insert(var.as_str(), i);
            }
        }

        let output_vars = self.tensors.output_variables();
        let mut records = Vec::new();
        let mut variables = Vec::new();
        for tensor in self.tensors.iter() {
            if tensor.tag != Tag::Intermediate {
                continue;
            }
            if output_vars.contains(&tensor.variable.as_str()) {
                continue;
            }
            let Some(&first_op) = first.get(tensor.variable.as_str()) else {
                debug!(tensor = %tensor.name, "intermediate never written, skipping");
                continue;
            };
            // a tensor nothing reads later stays live one extra step
            let last_op = last
                .get(tensor.variable.as_str())
                .copied()
                .filter(|&l| l > first_op)
                .unwrap_or(first_op + 1);
            records.push(TensorUsageRecord {
                first_op,
                last_op,
                size: tensor.size,
            });
            variables.push(tensor.variable.clone());
        }

        let layout = memory::best_layout(&records);
        ArenaLayout {
            size: layout.total,
            offsets: variables.into_iter().zip(layout.offsets).collect(),
        }
    }

    /// Concatenation, in catalogue order, of every float32 weight tensor.
    fn pack_weights(&self) -> Vec<f32> {
        let mut weights = Vec::new();
        for tensor in self.tensors.iter() {
            if let Some(data) = tensor.packed_data() {
                weights.extend(data.iter().copied());
            }
        }
        weights
    }

    fn dump_debug_artifacts(&self, arena: &ArenaLayout) -> O2CResult<()> {
        let dir = Path::new("tmp");
        fs::create_dir_all(dir)?;
        let records: Vec<_> = self.tensors.iter().collect();
        let catalogue = serde_json::to_string_pretty(&records)
            .map_err(|e| O2CError::Internal(format!("catalogue dump failed: {e}")))?;
        fs::write(dir.join("catalogue.json"), catalogue)?;
        let layout = serde_json::to_string_pretty(arena)
            .map_err(|e| O2CError::Internal(format!("layout dump failed: {e}")))?;
        fs::write(dir.join("layout.json"), layout)?;
        warn!("ONNX2CODE_DEBUG: wrote tmp/catalogue.json and tmp/layout.json");
        Ok(())
    }
}

/// The four artifacts of one compilation.
#[derive(Debug, Clone)]
pub struct ModelResult {
    pub input_shapes: Vec<(String, Vec<usize>)>,
    pub output_shapes: Vec<(String, Vec<usize>)>,
    pub source_c: String,
    pub source_h: String,
    pub source_asm: String,
    pub weights: Vec<f32>,
}

impl ModelResult {
    pub fn inputs_size(&self) -> usize {
        self.input_shapes
            .iter()
            .map(|(_, s)| s.iter().product::<usize>().max(1))
            .sum()
    }

    pub fn outputs_size(&self) -> usize {
        self.output_shapes
            .iter()
            .map(|(_, s)| s.iter().product::<usize>().max(1))
            .sum()
    }

    /// Writes `model.c`, `model.h`, `model.asm` and `weights.bin`. Callers
    /// should treat the presence of all four files as the success indicator.
    pub fn write_to(&self, dir: &Path) -> O2CResult<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join("model.c"), &self.source_c)?;
        fs::write(dir.join("model.h"), &self.source_h)?;
        fs::write(dir.join("model.asm"), &self.source_asm)?;
        let bytes: Vec<u8> = self
            .weights
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .collect();
        fs::write(dir.join("weights.bin"), bytes)?;
        Ok(())
    }
}
