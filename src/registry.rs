//! Operator registry: maps ONNX operator type names to the ordered list of
//! variant implementations that can emit them.
//!
//! The table is process-wide, built once on first use and immutable after;
//! no locking is needed beyond the `OnceLock` initialisation.

use std::sync::OnceLock;

use crate::errors::O2CResult;
use crate::ops::{self, Emission, OpContext};

/// One registered operator variant.
pub struct VariantDef {
    /// ONNX operator type names this variant handles.
    pub op_types: &'static [&'static str],
    /// Tags identifying the emission strategy, e.g. `c`, `asm`, `loop-tiling`.
    pub tags: &'static [&'static str],
    /// Lower is preferred among variants matching the same tag.
    pub priority: u8,
    pub emit: fn(&OpContext) -> O2CResult<Emission>,
}

pub struct Registry {
    variants: Vec<VariantDef>,
}

impl Registry {
    pub fn global() -> &'static Registry {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(Registry::build)
    }

    fn build() -> Registry {
        let mut variants = Vec::new();
        variants.extend(ops::gemm::variants());
        variants.extend(ops::conv::variants());
        variants.extend(ops::pooling::variants());
        variants.extend(ops::softmax::variants());
        variants.extend(ops::elementwise::variants());
        variants.extend(ops::broadcast::variants());
        variants.extend(ops::concat::variants());
        variants.extend(ops::transpose::variants());
        variants.extend(ops::identity::variants());
        Registry { variants }
    }

    pub fn knows(&self, op_type: &str) -> bool {
        self.variants.iter().any(|v| v.op_types.contains(&op_type))
    }

    /// Candidate variants for `op_type`, in preference-tag order, stably
    /// sorted by priority within each tag, deduplicated.
    pub fn lookup(&self, op_type: &str, tags: &[String]) -> Vec<&VariantDef> {
        let mut out: Vec<&VariantDef> = Vec::new();
        for tag in tags {
            let mut matched: Vec<&VariantDef> = self
                .variants
                .iter()
                .filter(|v| v.op_types.contains(&op_type) && v.tags.contains(&tag.as_str()))
                .collect();
            matched.sort_by_key(|v| v.priority);
            for variant in matched {
                if !out.iter().any(|o| std::ptr::eq(*o, variant)) {
                    out.push(variant);
                }
            }
        }
        out
    }
}
