mod common;

use common::*;
use opflow::cfg::{BranchSemantics, EdgeKind};
use opflow::DotOptions;
use petgraph::algo::has_path_connecting;
use petgraph::graph::NodeIndex;

fn try_catch_body() -> opflow::Operation {
    block(vec![try_stmt(
        block(vec![expr_stmt(call("Work"))]),
        vec![catch_typed("IOException", Some("e"), block(vec![]))],
        None,
    )])
}

#[test]
fn test_text_lists_regions_and_edges() {
    let body = try_catch_body();
    let (graph, _) = build(&body);
    let text = graph.to_text();

    assert!(text.starts_with("Block[B0] - Entry\n"), "{}", text);
    assert!(text.contains(".try {R1, R2}"), "{}", text);
    assert!(text.contains(".catch {R3} (IOException)"), "{}", text);
    assert!(text.contains("Locals: [IOException e]"), "{}", text);
    assert!(text.contains("Block[B1] - Block"), "{}", text);
    assert!(text.contains("Work();"), "{}", text);
    assert!(text.contains("Next (Regular) Block[B3]"), "{}", text);
    assert!(text.contains("Leaving: {R2} {R1}"), "{}", text);
    assert!(text.contains("e = CaughtException(IOException)"), "{}", text);
    assert!(text.contains("Block[B3] - Exit"), "{}", text);
    assert!(text.contains("Predecessors: [B1] [B2]"), "{}", text);
}

#[test]
fn test_text_marks_unreachable_blocks() {
    let body = block(vec![throw(null()), assign_stmt("x", int(1))]);
    let (graph, _) = build(&body);
    let text = graph.to_text();

    assert!(text.contains("Next (Throw) Block[null]"), "{}", text);
    assert!(text.contains("Block[B2] - Block [UnReachable]"), "{}", text);
    assert!(text.contains("Predecessors (0)"), "{}", text);
}

#[test]
fn test_text_shows_finalizing_and_captures() {
    let body = block(vec![try_stmt(
        block(vec![return_stmt(Some(conditional(local_ref("c"), int(1), int(2), "c ? 1 : 2")))]),
        vec![],
        Some(block(vec![expr_stmt(call("Cleanup"))])),
    )]);
    let (graph, _) = build(&body);
    let text = graph.to_text();

    assert!(text.contains("CaptureIds: [0]"), "{}", text);
    assert!(text.contains("Jump if False (Regular) to Block[B3]"), "{}", text);
    assert!(text.contains("Next (Return) Block[B6]"), "{}", text);
    assert!(text.contains("Finalizing: {R3}"), "{}", text);
    assert!(text.contains(".finally {R3}"), "{}", text);
    assert!(text.contains("Next (StructuredExceptionHandling) Block[null]"), "{}", text);
}

#[test]
fn test_dot_output() {
    let body = try_catch_body();
    let (graph, _) = build(&body);

    let dot = graph.to_dot(&DotOptions::default());
    assert!(dot.starts_with("digraph CFG {"));
    assert!(dot.contains("subgraph cluster_1 {"));
    assert!(dot.contains("B0 -> B1 [color=\"black\"];"), "{}", dot);
    assert!(dot.contains("B1 [label=\"B1\"];"));

    let plain = graph.to_dot(&DotOptions {
        include_regions: false,
        include_node_details: true,
        ..DotOptions::default()
    });
    assert!(!plain.contains("subgraph"));
    assert!(plain.contains("Work();"));
}

#[test]
fn test_digraph_export() {
    let body = try_catch_body();
    let (graph, _) = build(&body);
    let digraph = graph.to_digraph();

    assert_eq!(digraph.node_count(), graph.blocks().len());
    assert_eq!(digraph.edge_count(), 3);
    assert!(digraph
        .edge_weights()
        .all(|kind| *kind == EdgeKind::Next(BranchSemantics::Regular)));

    // the catch is only reached through exception dispatch
    assert!(has_path_connecting(&digraph, NodeIndex::new(0), NodeIndex::new(3), None));
    assert!(!has_path_connecting(&digraph, NodeIndex::new(0), NodeIndex::new(2), None));
}
