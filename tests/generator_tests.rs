//! Pipeline-level tests: welding, deduplication, planning, determinism and
//! the packed weights blob, asserted on the generated artifacts.

mod common;

use common::*;
use onnx2code::O2CError;

#[test]
fn dense_matmul_emits_naive_gemm() {
    let m = model(graph(
        vec![value_info("x", &[2, 3])],
        vec![value_info("y", &[2, 4])],
        vec![],
        vec![init_f32("w", &[3, 4], &[0.5; 12])],
        vec![node("MatMul", &["x", "w"], &["y"])],
    ));
    let result = generate(&m, &["gemm-naive"]).unwrap();

    assert!(result
        .source_c
        .contains("void Gemm_2x3x4(const float* A, const float* B, float* OUT)"));
    assert!(result.source_c.contains("sum += A[row * 3 + i] * B[i * 4 + col];"));
    assert!(result.source_c.contains("Gemm_2x3x4(T0, T2, T1);"));
    assert!(result.source_c.contains("const float* T0 = inputs + 0;"));
    assert!(result.source_c.contains("float* T1 = outputs + 0;"));
    assert!(result.source_c.contains("const float* T2 = weights + 0;"));
    assert!(!result.source_c.contains("static float arena"));
    assert_eq!(result.weights, vec![0.5; 12]);
    assert!(result.source_h.contains(
        "extern void inference(const float* weights, const float* inputs, float* outputs);"
    ));
}

#[test]
fn welding_chain_shares_one_variable() {
    // x -> Reshape -> t -> Reshape -> u -> Relu -> y
    let m = model(graph(
        vec![value_info("x", &[1, 4])],
        vec![value_info("y", &[4])],
        vec![value_info("t", &[2, 2]), value_info("u", &[4])],
        vec![
            init_i64("shape1", &[2], &[2, 2]),
            init_i64("shape2", &[1], &[4]),
        ],
        vec![
            node("Reshape", &["x", "shape1"], &["t"]),
            node("Reshape", &["t", "shape2"], &["u"]),
            node("Relu", &["u"], &["y"]),
        ],
    ));
    let result = generate(&m, &["c"]).unwrap();

    // welding A->B->C leaves all three on the input's variable
    assert!(result.source_c.contains("Relu_4(T0, T1);"));
    // shape-only tensors have no storage of their own
    assert!(!result.source_c.contains("float* T2"));
    assert!(!result.source_c.contains("float* T3"));
    assert!(!result.source_c.contains("static float arena"));
    // int64 shape initializers stay out of the blob
    assert!(result.weights.is_empty());
}

#[test]
fn weld_onto_output_binds_the_output_buffer() {
    // x -> Relu -> t -> Reshape -> y: t and y share storage, bound to outputs
    let m = model(graph(
        vec![value_info("x", &[1, 4])],
        vec![value_info("y", &[4])],
        vec![value_info("t", &[1, 4])],
        vec![init_i64("shape", &[1], &[4])],
        vec![
            node("Relu", &["x"], &["t"]),
            node("Reshape", &["t", "shape"], &["y"]),
        ],
    ));
    let result = generate(&m, &["c"]).unwrap();

    assert!(result.source_c.contains("float* T2 = outputs + 0;"));
    assert!(result.source_c.contains("Relu_4(T0, T2);"));
    assert!(!result.source_c.contains("static float arena"));
}

#[test]
fn passthrough_from_input_to_output_copies() {
    // a reshape straight from a graph input onto a graph output cannot be
    // welded, the buffers are distinct
    let m = model(graph(
        vec![value_info("x", &[1, 3])],
        vec![value_info("y", &[3])],
        vec![],
        vec![init_i64("shape", &[1], &[3])],
        vec![node("Reshape", &["x", "shape"], &["y"])],
    ));
    let result = generate(&m, &["c"]).unwrap();

    assert!(result.source_c.contains("void Identity_3(const float* A, float* OUT)"));
    assert!(result.source_c.contains("Identity_3(T0, T1);"));
}

#[test]
fn identity_prefers_assembly_by_default() {
    let m = model(graph(
        vec![value_info("x", &[1, 3])],
        vec![value_info("y", &[1, 3])],
        vec![],
        vec![],
        vec![node("Identity", &["x"], &["y"])],
    ));

    let result = generate(&m, &[]).unwrap();
    assert!(result.source_asm.contains("global Identity_3"));
    assert!(result.source_asm.contains(";; A: rdi"));
    assert!(result.source_asm.contains(";; OUT: rsi"));
    assert!(result
        .source_c
        .contains("extern void Identity_3(const float* A, float* OUT);"));
    assert!(!result.source_c.contains("void Identity_3(const float* A, float* OUT) {"));

    // with a c-only preference the assembly translation unit stays empty
    let result = generate(&m, &["c"]).unwrap();
    assert!(result.source_asm.is_empty());
    assert!(result.source_c.contains("void Identity_3(const float* A, float* OUT) {"));
}

#[test]
fn variant_preference_order_wins() {
    let m = model(graph(
        vec![value_info("x", &[8, 8])],
        vec![value_info("y", &[8, 8])],
        vec![],
        vec![init_f32("w", &[8, 8], &[0.1; 64])],
        vec![node("MatMul", &["x", "w"], &["y"])],
    ));

    let naive_first = generate(&m, &["gemm-naive", "loop-tiling"]).unwrap();
    assert!(naive_first.source_c.contains("sum += A[row * 8 + i]"));
    assert!(!naive_first.source_c.contains("gemm<"));

    let tiling_first = generate(&m, &["loop-tiling", "gemm-naive"]).unwrap();
    assert!(tiling_first.source_c.contains("gemm<8,8,8,8,256,256,4,8,4,4>(A, B, OUT);"));
    assert!(!tiling_first.source_c.contains("sum += A[row * 8 + i]"));
}

#[test]
fn equal_nodes_share_one_function_body() {
    let m = model(graph(
        vec![value_info("x", &[1, 6])],
        vec![value_info("y", &[1, 6])],
        vec![value_info("t", &[1, 6])],
        vec![],
        vec![
            node("Relu", &["x"], &["t"]),
            node("Relu", &["t"], &["y"]),
        ],
    ));
    let result = generate(&m, &["c"]).unwrap();

    assert_eq!(result.source_c.matches("void Relu_6(").count(), 1);
    assert!(result.source_c.contains("Relu_6(T0, T2);"));
    assert!(result.source_c.contains("Relu_6(T2, T1);"));
}

#[test]
fn unknown_operator_is_fatal() {
    let m = model(graph(
        vec![value_info("x", &[1, 3])],
        vec![value_info("y", &[1, 3])],
        vec![],
        vec![],
        vec![node("Foobar", &["x"], &["y"])],
    ));
    match generate(&m, &[]) {
        Err(O2CError::UnknownOp(op)) => assert_eq!(op, "Foobar"),
        other => panic!("expected UnknownOp, got {other:?}"),
    }
}

#[test]
fn rejected_configuration_surfaces_first_reason() {
    let m = model(graph(
        vec![value_info("x", &[3, 2])],
        vec![value_info("y", &[2, 4])],
        vec![],
        vec![init_f32("w", &[3, 4], &[0.0; 12])],
        vec![node_with_attrs(
            "Gemm",
            &["x", "w"],
            &["y"],
            vec![attr_int("transA", 1)],
        )],
    ));
    match generate(&m, &[]) {
        Err(O2CError::Unsupported(reason)) => assert!(reason.contains("transA")),
        other => panic!("expected Unsupported, got {other:?}"),
    }
}

#[test]
fn constant_nodes_become_weights() {
    let m = model(graph(
        vec![value_info("x", &[2])],
        vec![value_info("y", &[2])],
        vec![value_info("c", &[2])],
        vec![],
        vec![
            node_with_attrs(
                "Constant",
                &[],
                &["c"],
                vec![attr_tensor("value", init_f32("cval", &[2], &[1.5, -2.5]))],
            ),
            node("Add", &["x", "c"], &["y"]),
        ],
    ));
    let result = generate(&m, &["c"]).unwrap();

    // the constant payload lands in the blob, the node emits no call
    assert_eq!(result.weights, vec![1.5, -2.5]);
    assert!(result.source_c.contains("const float* T2 = weights + 0;"));
    assert!(!result.source_c.contains("Constant"));
    assert!(result.source_c.contains("Add_2_2(T0, T2, T1);"));
}

#[test]
fn weights_blob_round_trips_in_catalogue_order() {
    let w1 = [1.0f32, 2.0, 3.0, 4.0];
    let w2 = [9.0f32, 8.0, 7.0];
    let m = model(graph(
        vec![value_info("x", &[1, 4])],
        vec![value_info("y", &[4])],
        vec![value_info("t", &[1, 4]), value_info("u", &[1, 4])],
        vec![
            init_f32("w1", &[2, 2], &w1),
            init_i64("shape", &[1], &[4]),
            init_f32("w2", &[3], &w2),
        ],
        vec![
            node("Relu", &["x"], &["t"]),
            node("Relu", &["t"], &["u"]),
            node("Reshape", &["u", "shape"], &["y"]),
        ],
    ));
    let result = generate(&m, &["c"]).unwrap();

    // f32 tensors only, in accession order; splitting by size recovers them
    assert_eq!(result.weights.len(), w1.len() + w2.len());
    assert_eq!(&result.weights[..4], &w1);
    assert_eq!(&result.weights[4..], &w2);
}

fn mnist_like_model() -> onnx2code::onnx::ModelProto {
    model(graph(
        vec![value_info("x", &[1, 1, 8, 8])],
        vec![value_info("y", &[1, 10])],
        vec![
            value_info("c1", &[1, 4, 8, 8]),
            value_info("p1", &[1, 4, 4, 4]),
            value_info("f1", &[1, 64]),
            value_info("d1", &[1, 10]),
        ],
        vec![
            init_f32("conv_w", &[4, 1, 3, 3], &[0.01; 36]),
            init_f32("conv_b", &[4], &[0.1; 4]),
            init_i64("flat_shape", &[2], &[1, 64]),
            init_f32("dense_w", &[64, 10], &[0.02; 640]),
        ],
        vec![
            node_with_attrs(
                "Conv",
                &["x", "conv_w", "conv_b"],
                &["c1"],
                vec![
                    attr_ints("pads", &[1, 1, 1, 1]),
                    attr_ints("strides", &[1, 1]),
                    attr_ints("kernel_shape", &[3, 3]),
                ],
            ),
            node_with_attrs(
                "MaxPool",
                &["c1"],
                &["p1"],
                vec![
                    attr_ints("kernel_shape", &[2, 2]),
                    attr_ints("strides", &[2, 2]),
                ],
            ),
            node("Reshape", &["p1", "flat_shape"], &["f1"]),
            node("MatMul", &["f1", "dense_w"], &["d1"]),
            node("Softmax", &["d1"], &["y"]),
        ],
    ))
}

#[test]
fn classifier_pipeline_plans_a_shared_arena() {
    let result = generate(&mnist_like_model(), &["gemm-naive", "c"]).unwrap();

    assert!(result
        .source_c
        .contains("void Conv_1x1x8x8_4x1x3x3_s1x1_p1x1x1x1("));
    assert!(result
        .source_c
        .contains("void MaxPool_1x4x8x8_k2x2_s2x2_p0x0x0x0("));
    assert!(result.source_c.contains("void Gemm_1x64x10("));
    assert!(result.source_c.contains("void Softmax_1x10_ax1("));

    // conv output (256) and pool output (64) overlap back to back; the gemm
    // output (10) reuses offset 0 after the conv output dies
    assert!(result.source_c.contains("static float arena[320];"));
    assert!(result.source_c.contains("float* T2 = arena + 0;"));
    assert!(result.source_c.contains("float* T3 = arena + 256;"));
    assert!(result.source_c.contains("float* T5 = arena + 0;"));

    // the flatten reshape welds p1's variable through to the gemm input
    assert!(result.source_c.contains("Gemm_1x64x10(T3, T9, T5);"));
    assert!(result.source_c.contains("Softmax_1x10_ax1(T5, T1);"));

    assert_eq!(result.weights.len(), 36 + 4 + 640);
}

#[test]
fn generation_is_deterministic() {
    let m = mnist_like_model();
    let first = generate(&m, &["gemm-naive", "c"]).unwrap();
    let second = generate(&m, &["gemm-naive", "c"]).unwrap();

    assert_eq!(first.source_c, second.source_c);
    assert_eq!(first.source_h, second.source_h);
    assert_eq!(first.source_asm, second.source_asm);
    assert_eq!(first.weights, second.weights);
}

#[test]
fn arena_ranges_never_alias_for_live_tensors() {
    let result = generate(&mnist_like_model(), &["gemm-naive", "c"]).unwrap();

    // reconstruct (offset, size) pairs of the arena-resident tensors from the
    // emitted declarations and check the overlapping pair is disjoint
    let decl = |var: &str| -> Option<usize> {
        let marker = format!("float* {var} = arena + ");
        let start = result.source_c.find(&marker)? + marker.len();
        let rest = &result.source_c[start..];
        let end = rest.find(';')?;
        rest[..end].parse().ok()
    };
    let conv_out = decl("T2").unwrap();
    let pool_out = decl("T3").unwrap();
    // conv output [0, 256) and pool output live at the same time
    assert!(conv_out + 256 <= pool_out || pool_out + 64 <= conv_out);
}
