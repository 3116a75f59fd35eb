//! Reachability marking
//!
//! Forward sweep from Entry. Edges that resume exception dispatch are not followed, and
//! neither is the untaken side of a branch on a constant condition. Handlers are reached
//! conservatively: once any block of a protected region is live, every catch, filter and
//! finally of that region is live too. An edge that runs finally regions on the way only
//! reaches its destination when each of those finally regions can complete.

use crate::cfg::block::{BasicBlock, BranchSemantics, ControlFlowBranch};
use crate::cfg::dispatch::dispatch_targets;
use crate::cfg::regions::{RegionId, RegionKind, RegionTree};
use log::{debug, trace};
use std::collections::VecDeque;

/// Set `is_reachable` on every block
pub fn mark(blocks: &mut [BasicBlock<'_>], regions: &RegionTree) {
    let mut reachable = vec![false; blocks.len()];
    let mut worklist = VecDeque::new();
    // edges waiting on finally regions to complete: (destination, finalizing)
    let mut deferred: Vec<(usize, Vec<RegionId>)> = Vec::new();

    if !blocks.is_empty() {
        visit(0, &mut reachable, &mut worklist);
    }

    loop {
        while let Some(ordinal) = worklist.pop_front() {
            let block = &blocks[ordinal];
            trace!("B{} is reachable", ordinal);

            for region in regions.ancestors(block.region) {
                for target in dispatch_targets(regions, region) {
                    if let Some(handler) = target.block() {
                        visit(handler, &mut reachable, &mut worklist);
                    }
                }
            }

            if let Some(conditional) = &block.conditional {
                if conditional.is_taken() != Some(false) {
                    follow(&conditional.branch, &mut reachable, &mut worklist, &mut deferred);
                }
            }
            let falls_through = block
                .conditional
                .as_ref()
                .map_or(true, |conditional| conditional.is_taken() != Some(true));
            if let Some(branch) = block.fall_through.as_ref().filter(|_| falls_through) {
                follow(branch, &mut reachable, &mut worklist, &mut deferred);
            }
        }

        let mut progressed = false;
        let mut still_waiting = Vec::new();
        for (destination, finalizing) in deferred.drain(..) {
            let completes = finalizing
                .iter()
                .all(|&finally| finally_completes(blocks, regions, &reachable, finally));
            if completes {
                if !reachable[destination] {
                    progressed = true;
                }
                visit(destination, &mut reachable, &mut worklist);
            } else {
                still_waiting.push((destination, finalizing));
            }
        }
        deferred = still_waiting;
        if !progressed {
            break;
        }
    }

    for (block, reachable) in blocks.iter_mut().zip(reachable) {
        block.is_reachable = reachable;
    }
    debug!(
        "{} of {} blocks reachable",
        blocks.iter().filter(|block| block.is_reachable).count(),
        blocks.len()
    );
}

/// Visit the destination of `branch` now, or once its finally regions can complete
fn follow(
    branch: &ControlFlowBranch,
    reachable: &mut [bool],
    worklist: &mut VecDeque<usize>,
    deferred: &mut Vec<(usize, Vec<RegionId>)>,
) {
    let Some(destination) = branch.destination else {
        return;
    };
    if branch.finalizing.is_empty() {
        visit(destination, reachable, worklist);
    } else {
        deferred.push((destination, branch.finalizing.clone()));
    }
}

fn visit(ordinal: usize, reachable: &mut [bool], worklist: &mut VecDeque<usize>) {
    if let Some(slot) = reachable.get_mut(ordinal) {
        if !*slot {
            *slot = true;
            worklist.push_back(ordinal);
        }
    }
}

/// Whether control can fall off the end of `finally`
fn finally_completes(
    blocks: &[BasicBlock<'_>],
    regions: &RegionTree,
    reachable: &[bool],
    finally: RegionId,
) -> bool {
    let Some(region) = regions.get(finally) else {
        return false;
    };
    let (Some(first), Some(last)) = (region.first_block, region.last_block) else {
        return false;
    };
    (first..=last).any(|ordinal| {
        let Some(block) = blocks.get(ordinal) else {
            return false;
        };
        reachable.get(ordinal).copied().unwrap_or(false)
            && block.fall_through.as_ref().is_some_and(|branch| {
                branch.semantics == BranchSemantics::StructuredExceptionHandling
            })
            && regions.nearest_of_kind(block.region, &[RegionKind::Finally, RegionKind::Filter])
                == Some(finally)
    })
}
