//! Structural invariants of a finished graph
//!
//! Any failure here is a defect of the builder, never of the input program, and is
//! reported as [`Error::Internal`].

use crate::cfg::block::{BlockKind, BranchSemantics};
use crate::cfg::dispatch;
use crate::cfg::regions::RegionKind;
use crate::cfg::ControlFlowGraph;
use crate::error::{Error, Result};
use std::collections::BTreeSet;

/// Check every structural invariant of `graph`
pub fn validate(graph: &ControlFlowGraph<'_>) -> Result<()> {
    check_regions(graph)?;
    check_blocks(graph)?;
    check_edges(graph)?;
    check_captures(graph)?;
    check_local_scoping(graph)?;
    Ok(())
}

fn fail<T>(message: String) -> Result<T> {
    Err(Error::internal(message))
}

fn check_regions(graph: &ControlFlowGraph<'_>) -> Result<()> {
    let regions = graph.regions();
    let root = regions.root();
    if root.kind != RegionKind::Root || root.parent.is_some() {
        return fail("region 0 is not a parentless root".to_string());
    }

    for region in regions.iter() {
        let (Some(first), Some(last)) = (region.first_block, region.last_block) else {
            return fail(format!("{} owns no blocks", region.id));
        };
        if first > last || last >= graph.blocks().len() {
            return fail(format!("{} has a bad block range {}..={}", region.id, first, last));
        }

        if let Some(parent_id) = region.parent {
            let parent = regions.region(parent_id)?;
            if !parent.children.contains(&region.id) {
                return fail(format!("{} is missing from its parent's children", region.id));
            }
            if !region.kind.allowed_parents().contains(&parent.kind) {
                return fail(format!(
                    "{:?} region {} cannot nest in {:?} region {}",
                    region.kind, region.id, parent.kind, parent.id
                ));
            }
            if !(parent.contains_block(first) && parent.contains_block(last)) {
                return fail(format!("{} is not inside its parent {}", region.id, parent.id));
            }
        }

        let mut previous_end: Option<usize> = None;
        for &child in &region.children {
            let child = regions.region(child)?;
            if child.parent != Some(region.id) {
                return fail(format!("{} lists {} as a child", region.id, child.id));
            }
            if let (Some(start), Some(end)) = (child.first_block, child.last_block) {
                if previous_end.is_some_and(|previous| start <= previous) {
                    return fail(format!("children of {} overlap or are out of order", region.id));
                }
                previous_end = Some(end);
            }
        }

        match region.kind {
            RegionKind::TryAndCatch | RegionKind::TryAndFinally => {
                let first_child = region.children.first().and_then(|&c| regions.kind(c));
                if first_child != Some(RegionKind::Try) || region.children.len() < 2 {
                    return fail(format!("{} must start with a Try and have handlers", region.id));
                }
            }
            RegionKind::FilterAndHandler => {
                let kinds: Vec<_> = region.children.iter().filter_map(|&c| regions.kind(c)).collect();
                if kinds != [RegionKind::Filter, RegionKind::Handler] {
                    return fail(format!("{} must hold a Filter then a Handler", region.id));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_blocks(graph: &ControlFlowGraph<'_>) -> Result<()> {
    let blocks = graph.blocks();
    let count = blocks.len();
    if count < 2 {
        return fail("a graph needs an Entry and an Exit block".to_string());
    }

    for (index, block) in blocks.iter().enumerate() {
        if block.ordinal != index {
            return fail(format!("block at {} has ordinal {}", index, block.ordinal));
        }
        let expected = match index {
            0 => BlockKind::Entry,
            i if i + 1 == count => BlockKind::Exit,
            _ => BlockKind::Block,
        };
        if block.kind != expected {
            return fail(format!("B{} is {:?}, expected {:?}", index, block.kind, expected));
        }

        let innermost = graph.regions().innermost_containing(index);
        if innermost != block.region {
            return fail(format!(
                "B{} claims {} but lies in {}",
                index, block.region, innermost
            ));
        }

        match (block.kind, &block.fall_through) {
            (BlockKind::Exit, Some(_)) => return fail("the Exit block has a successor".to_string()),
            (BlockKind::Exit, None) => {}
            (_, None) => return fail(format!("B{} has no exit edge", index)),
            _ => {}
        }
        if block.kind == BlockKind::Exit && block.conditional.is_some() {
            return fail("the Exit block branches".to_string());
        }
    }
    Ok(())
}

fn check_edges(graph: &ControlFlowGraph<'_>) -> Result<()> {
    let blocks = graph.blocks();
    let regions = graph.regions();

    for block in blocks {
        for branch in block.branches() {
            if branch.source != block.ordinal {
                return fail(format!("edge of B{} names source B{}", block.ordinal, branch.source));
            }
            let destination_region = match (branch.semantics.is_non_local(), branch.destination) {
                (true, None) => None,
                (false, Some(destination)) => match blocks.get(destination) {
                    Some(target) => Some(target.region),
                    None => return fail(format!("B{} branches out of range", block.ordinal)),
                },
                (true, Some(_)) => {
                    return fail(format!("{} edge of B{} has a destination", branch.semantics, block.ordinal))
                }
                (false, None) => {
                    return fail(format!("{} edge of B{} has no destination", branch.semantics, block.ordinal))
                }
            };
            if branch.semantics == BranchSemantics::Return
                && branch.destination != Some(blocks.len() - 1)
            {
                return fail(format!("return from B{} does not reach Exit", block.ordinal));
            }

            let expected = dispatch::plan_transition(regions, block.region, destination_region);
            if expected.leaving != branch.leaving
                || expected.entering != branch.entering
                || expected.finalizing != branch.finalizing
            {
                return fail(format!("edge from B{} has stale region annotations", block.ordinal));
            }
        }

        for &predecessor in &block.predecessors {
            let links = blocks
                .get(predecessor)
                .is_some_and(|source| source.successors().any(|s| s == block.ordinal));
            if !links {
                return fail(format!("B{} lists B{} as a predecessor", block.ordinal, predecessor));
            }
        }
    }
    Ok(())
}

fn check_captures(graph: &ControlFlowGraph<'_>) -> Result<()> {
    let regions = graph.regions();
    let mut declared = BTreeSet::new();
    for region in regions.iter() {
        for &id in &region.capture_ids {
            if !declared.insert(id) {
                return fail(format!("capture {} is declared twice", id));
            }
        }
    }

    for block in graph.blocks() {
        for op in block.all_operations() {
            let mut violation = None;
            op.for_each_capture(&mut |id, _| {
                let in_scope = regions.ancestors(block.region).any(|region| {
                    regions
                        .get(region)
                        .is_some_and(|region| region.capture_ids.contains(&id))
                });
                if !in_scope && violation.is_none() {
                    violation = Some(id);
                }
            });
            if let Some(id) = violation {
                return fail(format!("capture {} used out of scope in B{}", id, block.ordinal));
            }
        }
    }
    Ok(())
}

/// Locals the builder declared must be in scope wherever they are used.
///
/// Names never declared by any region (fields, or locals the input did not declare) are
/// outside the builder's responsibility and are ignored.
fn check_local_scoping(graph: &ControlFlowGraph<'_>) -> Result<()> {
    let regions = graph.regions();
    for block in graph.blocks() {
        for op in block.all_operations() {
            for name in op.local_names() {
                if regions.declares_local_anywhere(name) && !regions.local_in_scope(block.region, name) {
                    return fail(format!("local `{}` used outside its region in B{}", name, block.ordinal));
                }
            }
        }
    }
    Ok(())
}
