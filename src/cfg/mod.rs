//! Control Flow Graph (CFG) module
//!
//! This module lowers a structured operation tree into basic blocks nested in a tree of
//! regions, with explicit exception dispatch, flow captures and reachability.

pub mod block;
pub mod builder;
pub mod capture;
pub mod dispatch;
pub mod reachability;
pub mod regions;
pub mod validate;
pub mod visualization;

pub use block::{
    BasicBlock, BlockKind, BranchSemantics, ConditionalBranch, ControlFlowBranch, FlowOp,
    ImplicitCall,
};
pub use builder::GraphBuilder;
pub use capture::CaptureId;
pub use regions::{Region, RegionId, RegionKind, RegionTree};
pub use visualization::DotOptions;

use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::operation::{ConstantOracle, Operation};
use crate::options::BuildOptions;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;

/// Edge kind in the exported petgraph view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Conditional branch taken when the condition is true
    JumpIfTrue,
    /// Conditional branch taken when the condition is false
    JumpIfFalse,
    /// Fall-through edge with its semantics
    Next(BranchSemantics),
}

/// A finished control flow graph: blocks in ordinal order plus the region tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlFlowGraph<'a> {
    blocks: Vec<BasicBlock<'a>>,
    regions: RegionTree,
}

impl<'a> ControlFlowGraph<'a> {
    pub(crate) fn new(blocks: Vec<BasicBlock<'a>>, regions: RegionTree) -> Self {
        Self { blocks, regions }
    }

    pub fn blocks(&self) -> &[BasicBlock<'a>] {
        &self.blocks
    }

    pub fn block(&self, ordinal: usize) -> Option<&BasicBlock<'a>> {
        self.blocks.get(ordinal)
    }

    pub fn regions(&self) -> &RegionTree {
        &self.regions
    }

    pub fn entry(&self) -> &BasicBlock<'a> {
        &self.blocks[0]
    }

    pub fn exit(&self) -> &BasicBlock<'a> {
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn reachable_blocks(&self) -> impl Iterator<Item = &BasicBlock<'a>> {
        self.blocks.iter().filter(|block| block.is_reachable)
    }

    /// Petgraph view: node weights are block ordinals, node index `i` is block `i`.
    ///
    /// Edges without a destination block (throw, rethrow, unwinding) have no counterpart.
    pub fn to_digraph(&self) -> DiGraph<usize, EdgeKind> {
        let mut graph = DiGraph::with_capacity(self.blocks.len(), self.blocks.len() * 2);
        for block in &self.blocks {
            graph.add_node(block.ordinal);
        }
        for block in &self.blocks {
            let source = NodeIndex::new(block.ordinal);
            if let Some(conditional) = &block.conditional {
                if let Some(destination) = conditional.branch.destination {
                    let kind = if conditional.jump_if_true {
                        EdgeKind::JumpIfTrue
                    } else {
                        EdgeKind::JumpIfFalse
                    };
                    graph.add_edge(source, NodeIndex::new(destination), kind);
                }
            }
            if let Some(branch) = &block.fall_through {
                if let Some(destination) = branch.destination {
                    graph.add_edge(
                        source,
                        NodeIndex::new(destination),
                        EdgeKind::Next(branch.semantics),
                    );
                }
            }
        }
        graph
    }

    /// Deterministic text rendering of blocks and regions
    pub fn to_text(&self) -> String {
        visualization::render_text(self)
    }

    pub fn to_dot(&self, options: &DotOptions) -> String {
        visualization::generate_dot(self, options)
    }
}

/// Build the control flow graph of one body.
///
/// Program-level problems (misplaced rethrow, undefined label, unreachable code) are added to
/// `diagnostics` and the graph is still produced; `Err` is returned only for internal defects.
pub fn build<'a>(
    root: &'a Operation,
    oracle: &dyn ConstantOracle,
    options: &BuildOptions,
    diagnostics: &mut Diagnostics,
) -> Result<ControlFlowGraph<'a>> {
    GraphBuilder::new(oracle, options, diagnostics).build(root)
}
