//! Source assembler: renders the C translation unit, the NASM translation
//! unit and the header from the driver's collected impls and calls.
//!
//! Every iteration below follows insertion order (catalogue accession,
//! impl/call recording), so two runs over the same graph produce
//! byte-identical artifacts.

use std::collections::HashMap;

use serde::Serialize;

use crate::ops::{Lang, OpCall, OpImpl};
use crate::tensor::{Catalogue, Tag};

/// SysV AMD64 integer argument registers, in order.
pub const REGISTER_ORDER: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

pub const INFERENCE_SIGNATURE: &str =
    "void inference(const float* weights, const float* inputs, float* outputs)";

/// Arena size and per-variable element offsets computed by the planner.
#[derive(Debug, Default, Serialize)]
pub struct ArenaLayout {
    pub size: usize,
    pub offsets: HashMap<String, usize>,
}

fn indent(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{prefix}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn extern_c_block(decls: &[String]) -> String {
    let mut block = String::from("#ifdef __cplusplus\nextern \"C\" {\n#endif\n");
    for decl in decls {
        block.push_str(decl);
        block.push('\n');
    }
    block.push_str("#ifdef __cplusplus\n}\n#endif\n\n");
    block
}

pub fn header_source() -> String {
    format!(
        "\
#ifdef __cplusplus
extern \"C\" {{
#endif
extern {INFERENCE_SIGNATURE};
#ifdef __cplusplus
}}
#endif
"
    )
}

pub fn c_source(
    tensors: &Catalogue,
    impls: &[(OpImpl, OpCall)],
    calls: &[OpCall],
    arena: &ArenaLayout,
) -> String {
    let mut src = String::new();

    // 1. headers and helper macros
    src.push_str("#include <math.h>\n#include <string.h>\n\n");
    src.push_str("#define MIN(a, b) (((a) < (b)) ? (a) : (b))\n");
    src.push_str("#define MAX(a, b) (((a) > (b)) ? (a) : (b))\n\n");

    // 2. externs for assembly auxiliary functions
    let mut aux_decls: Vec<String> = Vec::new();
    for (impl_, _) in impls {
        for aux in &impl_.asm_aux_functions {
            let decl = format!("extern {};", aux.signature);
            if !aux_decls.contains(&decl) {
                aux_decls.push(decl);
            }
        }
    }
    if !aux_decls.is_empty() {
        src.push_str(&extern_c_block(&aux_decls));
    }

    // 3. shipped source files, verbatim, unique by name in reference order
    let mut seen_files: Vec<&str> = Vec::new();
    for (impl_, _) in impls {
        for file in &impl_.external_files {
            if !seen_files.contains(&file.name) {
                seen_files.push(file.name);
                src.push_str(file.contents);
                src.push('\n');
            }
        }
    }

    // 4. auxiliary C++ function bodies, unique
    let mut seen_aux: Vec<&str> = Vec::new();
    for (impl_, _) in impls {
        for aux in &impl_.cpp_aux_functions {
            if !seen_aux.contains(&aux.as_str()) {
                seen_aux.push(aux);
                src.push_str(aux);
                src.push_str("\n\n");
            }
        }
    }

    // 5. externs for assembly operator implementations
    let asm_decls: Vec<String> = impls
        .iter()
        .filter(|(impl_, _)| impl_.lang == Lang::Asm)
        .map(|(_, call)| format!("extern {};", call.signature()))
        .collect();
    if !asm_decls.is_empty() {
        src.push_str(&extern_c_block(&asm_decls));
    }

    // 6. C operator bodies
    for (impl_, call) in impls {
        if impl_.lang != Lang::C {
            continue;
        }
        src.push_str(&call.signature());
        src.push_str(" {\n");
        src.push_str(&indent(impl_.source.trim(), "    "));
        src.push_str("\n}\n\n");
    }

    // 7. the intermediate arena
    if arena.size > 0 {
        src.push_str(&format!("static float arena[{}];\n\n", arena.size));
    }

    // 8. the inference entry point
    src.push_str("#ifdef __cplusplus\nextern \"C\"\n#endif\n");
    src.push_str(INFERENCE_SIGNATURE);
    src.push_str(" {\n");

    let output_vars = tensors.output_variables();
    let mut input_offset = 0usize;
    let mut output_offset = 0usize;
    let mut weight_offset = 0usize;

    for tensor in tensors.iter() {
        let decl = match tensor.tag {
            Tag::Input => {
                let decl = format!(
                    "const float* {} = inputs + {};",
                    tensor.variable, input_offset
                );
                input_offset += tensor.size;
                decl
            }
            Tag::Output => {
                let decl = format!(
                    "float* {} = outputs + {};",
                    tensor.variable, output_offset
                );
                output_offset += tensor.size;
                decl
            }
            Tag::Weight => {
                // non-float weights are absent from the blob and the source
                if tensor.packed_data().is_none() {
                    continue;
                }
                let decl = format!(
                    "const float* {} = weights + {};",
                    tensor.variable, weight_offset
                );
                weight_offset += tensor.size;
                decl
            }
            Tag::Intermediate => {
                // an intermediate welded onto an output binds to the output
                // buffer; dead intermediates have no storage at all
                if output_vars.contains(&tensor.variable.as_str()) {
                    continue;
                }
                let Some(&offset) = arena.offsets.get(&tensor.variable) else {
                    continue;
                };
                format!("float* {} = arena + {};", tensor.variable, offset)
            }
            Tag::Welded => continue,
        };
        src.push_str(&format!(
            "    {decl:<42} // ({}) {}\n",
            tensor.shape_str(),
            tensor.name
        ));
    }

    src.push('\n');
    for call in calls {
        src.push_str(&format!("    {};\n", call.invocation()));
    }
    src.push_str("}\n");

    src
}

pub fn asm_source(impls: &[(OpImpl, OpCall)]) -> String {
    let mut src = String::new();

    // auxiliary routines first
    let mut seen_aux: Vec<&str> = Vec::new();
    for (impl_, _) in impls {
        for aux in &impl_.asm_aux_functions {
            if seen_aux.contains(&aux.name.as_str()) {
                continue;
            }
            seen_aux.push(&aux.name);
            src.push_str(&format!("global {}\n{}:\n", aux.name, aux.name));
            src.push_str(&indent(aux.body.trim(), "    "));
            src.push_str("\n\n");
        }
    }

    // operator implementations with their register mapping documented
    for (impl_, call) in impls {
        if impl_.lang != Lang::Asm {
            continue;
        }
        src.push_str(&format!(";; {}\n", call.signature()));
        for (i, param) in call.params.iter().enumerate() {
            let register = REGISTER_ORDER.get(i).copied().unwrap_or("stack");
            src.push_str(&format!(";; {param}: {register}\n"));
        }
        src.push_str(&format!("global {}\n{}:\n", call.name, call.name));
        src.push_str(&indent(impl_.source.trim(), "    "));
        src.push_str("\n\n");
    }

    src
}
