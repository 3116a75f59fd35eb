mod common;

use common::*;
use opflow::cfg::{self, RegionId};
use opflow::{AnnotatedConstants, BuildOptions, ControlFlowGraph, Diagnostics, FlowDiagnostic, NoConstants, Operation};

fn sample_bodies() -> Vec<Operation> {
    vec![
        block(vec![
            if_stmt(bool_lit(false), block(vec![assign_stmt("x", int(1))]), None),
            assign_stmt("y", int(2)),
        ]),
        block(vec![try_stmt(
            block(vec![
                try_stmt(
                    block(vec![throw(null())]),
                    vec![],
                    Some(block(vec![assign_stmt("x", int(1))])),
                ),
                assign_stmt("x", int(2)),
            ]),
            vec![catch_typed("E", Some("e"), block(vec![rethrow()]))],
            Some(block(vec![assign_stmt("x", int(3))])),
        )]),
        block(vec![
            while_stmt(
                local_ref("c"),
                block(vec![
                    if_stmt(local_ref("d"), continue_stmt(), None),
                    return_stmt(Some(conditional(local_ref("a"), int(1), int(2), "a ? 1 : 2"))),
                ]),
            ),
            goto("end"),
            assign_stmt("z", int(0)),
            labeled("end", None),
        ]),
    ]
}

/// If every predecessor of a block is unreachable and the block is not a handler entry,
/// it is unreachable too
fn assert_monotonic(graph: &ControlFlowGraph<'_>) {
    let handler_entries: Vec<usize> = graph
        .regions()
        .iter()
        .filter(|region| region.id != RegionId::ROOT)
        .filter_map(|region| region.first_block)
        .collect();
    for block in graph.blocks() {
        if block.ordinal == 0 || handler_entries.contains(&block.ordinal) {
            continue;
        }
        let all_dead = block
            .predecessors
            .iter()
            .all(|&p| !graph.block(p).unwrap().is_reachable);
        if all_dead {
            assert!(!block.is_reachable, "B{} is reachable without a live predecessor", block.ordinal);
        }
    }
}

#[test]
fn test_constant_false_branch_is_dead() {
    let bodies = sample_bodies();
    let (graph, diagnostics) = build(&bodies[0]);

    assert_eq!(graph.blocks().len(), 5);
    assert!(graph.block(1).unwrap().is_reachable);
    assert!(!graph.block(2).unwrap().is_reachable);
    assert!(graph.block(3).unwrap().is_reachable);
    assert_eq!(
        diagnostics.iter().collect::<Vec<_>>(),
        vec![&FlowDiagnostic::UnreachableCode {
            syntax: "x = 1;".to_string()
        }]
    );
}

#[test]
fn test_without_oracle_both_arms_are_live() {
    let bodies = sample_bodies();
    let mut diagnostics = Diagnostics::new();
    let graph = cfg::build(&bodies[0], &NoConstants, &BuildOptions::default(), &mut diagnostics).unwrap();
    assert!(graph.blocks().iter().all(|block| block.is_reachable));
    assert!(diagnostics.is_empty());
}

#[test]
fn test_closure_oracle() {
    let body = block(vec![if_stmt(call("Debug"), assign_stmt("x", int(1)), None)]);
    let oracle = |op: &Operation| (op.syntax == "Debug()").then_some(false);
    let mut diagnostics = Diagnostics::new();
    let graph = cfg::build(&body, &oracle, &BuildOptions::default(), &mut diagnostics).unwrap();
    assert!(!graph.block(2).unwrap().is_reachable);
}

#[test]
fn test_one_warning_per_unreachable_run() {
    let body = block(vec![
        return_stmt(None),
        assign_stmt("x", int(1)),
        assign_stmt("y", int(2)),
        expr_stmt(call("Z")),
    ]);
    let (_, diagnostics) = build(&body);
    assert_eq!(
        diagnostics.warnings().collect::<Vec<_>>(),
        vec![&FlowDiagnostic::UnreachableCode {
            syntax: "x = 1;".to_string()
        }]
    );
}

#[test]
fn test_unreachable_warnings_can_be_disabled() {
    let body = block(vec![return_stmt(None), assign_stmt("x", int(1))]);
    let mut diagnostics = Diagnostics::new();
    let graph = cfg::build(
        &body,
        &AnnotatedConstants,
        &BuildOptions::without_unreachable_warnings(),
        &mut diagnostics,
    )
    .unwrap();
    assert!(diagnostics.is_empty());
    assert!(!graph.block(2).unwrap().is_reachable);
}

#[test]
fn test_reachability_is_monotonic() {
    for body in sample_bodies() {
        let (graph, _) = build(&body);
        assert_monotonic(&graph);
    }
}

#[test]
fn test_builds_are_deterministic() {
    for body in sample_bodies() {
        let (first, first_diagnostics) = build(&body);
        let (second, second_diagnostics) = build(&body);
        assert_eq!(first, second);
        assert_eq!(first.to_text(), second.to_text());
        assert_eq!(first_diagnostics, second_diagnostics);
    }
}

#[test]
fn test_edges_follow_region_paths() {
    for body in sample_bodies() {
        let (graph, _) = build(&body);
        let regions = graph.regions();
        for block in graph.blocks() {
            for branch in block.branches() {
                let ancestor = match branch.destination {
                    Some(d) => regions.common_ancestor(block.region, graph.block(d).unwrap().region),
                    None => RegionId::ROOT,
                };
                assert_eq!(branch.leaving, regions.path_to_ancestor(block.region, ancestor));
                assert!(branch
                    .finalizing
                    .iter()
                    .all(|&finally| branch.leaving.iter().any(|&left| regions.parent(left) == regions.parent(finally))));
            }
        }
    }
}

#[test]
fn test_every_region_covers_its_blocks() {
    for body in sample_bodies() {
        let (graph, _) = build(&body);
        for block in graph.blocks() {
            let region = graph.regions().get(block.region).unwrap();
            assert!(region.contains_block(block.ordinal));
        }
    }
}

/// try { if (c) { x = 1; } } finally { throw null; } y = 2;
#[test]
fn test_conditional_exit_waits_for_its_finally() {
    let body = block(vec![
        try_stmt(
            block(vec![if_stmt(local_ref("c"), block(vec![assign_stmt("x", int(1))]), None)]),
            vec![],
            Some(block(vec![throw(null())])),
        ),
        assign_stmt("y", int(2)),
    ]);
    let (graph, diagnostics) = build(&body);
    assert_eq!(graph.blocks().len(), 6);

    let exit_edge = &graph.block(1).unwrap().conditional.as_ref().unwrap().branch;
    assert_eq!(exit_edge.destination, Some(4));
    assert_eq!(exit_edge.finalizing, vec![RegionId(3)]);

    assert!(graph.block(1).unwrap().is_reachable);
    assert!(graph.block(2).unwrap().is_reachable);
    assert!(graph.block(3).unwrap().is_reachable);
    assert!(!graph.block(4).unwrap().is_reachable);
    assert!(!graph.exit().is_reachable);
    assert_eq!(
        diagnostics.warnings().collect::<Vec<_>>(),
        vec![&FlowDiagnostic::UnreachableCode {
            syntax: "y = 2;".to_string()
        }]
    );
}

/// try { if (c) { x = 1; } } finally { x = 3; } y = 2;
#[test]
fn test_conditional_exit_through_completing_finally() {
    let body = block(vec![
        try_stmt(
            block(vec![if_stmt(local_ref("c"), block(vec![assign_stmt("x", int(1))]), None)]),
            vec![],
            Some(block(vec![assign_stmt("x", int(3))])),
        ),
        assign_stmt("y", int(2)),
    ]);
    let (graph, diagnostics) = build(&body);

    assert!(graph.block(4).unwrap().is_reachable);
    assert!(graph.exit().is_reachable);
    assert_eq!(diagnostics.warnings().count(), 0);
}
