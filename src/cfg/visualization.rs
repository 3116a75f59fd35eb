//! CFG visualization module
//!
//! A deterministic text dump of blocks nested in their regions, and a Graphviz DOT export.

use crate::cfg::block::{BasicBlock, BlockKind, BranchSemantics, ControlFlowBranch};
use crate::cfg::regions::{Region, RegionId, RegionKind, RegionTree};
use crate::cfg::{ControlFlowGraph, EdgeKind};
use petgraph::visit::EdgeRef;
use std::fmt::Write;

/// DOT generation options
#[derive(Debug, Clone)]
pub struct DotOptions {
    /// Include edge labels
    pub include_labels: bool,
    /// Include edge colors
    pub include_colors: bool,
    /// Include the operations of each block in its node
    pub include_node_details: bool,
    /// Draw regions as nested clusters
    pub include_regions: bool,
}

impl Default for DotOptions {
    fn default() -> Self {
        Self {
            include_labels: true,
            include_colors: true,
            include_node_details: false,
            include_regions: true,
        }
    }
}

/// Render the graph as text, blocks nested under their region headers
pub fn render_text(graph: &ControlFlowGraph<'_>) -> String {
    let mut out = String::new();
    let root = graph.regions().root();
    write_region_contents(&mut out, graph, root, 0);
    out
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn region_list(regions: &[RegionId]) -> String {
    regions
        .iter()
        .map(|region| format!("{{{}}}", region))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Blocks and child regions of `region`, in ordinal order
fn write_region_contents(
    out: &mut String,
    graph: &ControlFlowGraph<'_>,
    region: &Region,
    depth: usize,
) {
    let regions = graph.regions();
    let prefix = indent(depth);

    if !region.locals.is_empty() {
        let locals: Vec<String> = region.locals.iter().map(|local| local.to_string()).collect();
        let _ = writeln!(out, "{}Locals: {}", prefix, locals.join(" "));
    }
    if !region.capture_ids.is_empty() {
        let ids: Vec<String> = region.capture_ids.iter().map(|id| format!("[{}]", id.0)).collect();
        let _ = writeln!(out, "{}CaptureIds: {}", prefix, ids.join(" "));
    }

    let (Some(first), Some(last)) = (region.first_block, region.last_block) else {
        return;
    };
    let mut ordinal = first;
    while ordinal <= last {
        let child = region
            .children
            .iter()
            .filter_map(|&child| regions.get(child))
            .find(|child| child.contains_block(ordinal));
        match child {
            Some(child) => {
                write_region(out, graph, child, depth);
                ordinal = child.last_block.map_or(ordinal + 1, |end| end + 1);
            }
            None => {
                if let Some(block) = graph.block(ordinal) {
                    write_block(out, graph, block, depth);
                }
                ordinal += 1;
            }
        }
    }
}

/// A region with its heading; try/catch and try/finally wrappers share the heading of
/// their protected `Try` child
fn write_region(out: &mut String, graph: &ControlFlowGraph<'_>, region: &Region, depth: usize) {
    let regions = graph.regions();
    if matches!(region.kind, RegionKind::TryAndCatch | RegionKind::TryAndFinally) {
        for (index, &child) in region.children.iter().enumerate() {
            let Some(child) = regions.get(child) else {
                continue;
            };
            let heading = if index == 0 {
                format!(".try {{{}, {}}}", region.id, child.id)
            } else {
                heading(child)
            };
            write_braced(out, graph, child, &heading, depth);
        }
        return;
    }
    write_braced(out, graph, region, &heading(region), depth);
}

fn heading(region: &Region) -> String {
    let caught = region.exception_type.as_deref().unwrap_or("object");
    match region.kind {
        RegionKind::Root => format!(".root {{{}}}", region.id),
        RegionKind::Locals => format!(".locals {{{}}}", region.id),
        RegionKind::Try => format!(".try {{{}}}", region.id),
        RegionKind::Catch => format!(".catch {{{}}} ({})", region.id, caught),
        RegionKind::FilterAndHandler => format!(".catch {{{}}} ({})", region.id, caught),
        RegionKind::Filter => format!(".filter {{{}}}", region.id),
        RegionKind::Handler => format!(".handler {{{}}}", region.id),
        RegionKind::Finally => format!(".finally {{{}}}", region.id),
        RegionKind::TryAndCatch | RegionKind::TryAndFinally => format!(".try {{{}}}", region.id),
    }
}

fn write_braced(
    out: &mut String,
    graph: &ControlFlowGraph<'_>,
    region: &Region,
    heading: &str,
    depth: usize,
) {
    let prefix = indent(depth);
    let _ = writeln!(out, "{}{}", prefix, heading);
    let _ = writeln!(out, "{}{{", prefix);
    write_region_contents(out, graph, region, depth + 1);
    let _ = writeln!(out, "{}}}", prefix);
}

fn write_block(out: &mut String, graph: &ControlFlowGraph<'_>, block: &BasicBlock<'_>, depth: usize) {
    let prefix = indent(depth);
    let inner = indent(depth + 1);
    let detail = indent(depth + 2);

    let kind = match block.kind {
        BlockKind::Entry => "Entry",
        BlockKind::Exit => "Exit",
        BlockKind::Block => "Block",
    };
    let marker = if block.is_reachable { "" } else { " [UnReachable]" };
    let _ = writeln!(out, "{}Block[B{}] - {}{}", prefix, block.ordinal, kind, marker);

    if block.predecessors.is_empty() {
        if block.kind != BlockKind::Entry {
            let _ = writeln!(out, "{}Predecessors (0)", inner);
        }
    } else {
        let predecessors: Vec<String> =
            block.predecessors.iter().map(|p| format!("B{}", p)).collect();
        let _ = writeln!(out, "{}Predecessors: [{}]", inner, predecessors.join("] ["));
    }

    let _ = writeln!(out, "{}Statements ({})", inner, block.operations.len());
    for op in &block.operations {
        let _ = writeln!(out, "{}{}", detail, op);
    }

    if let Some(conditional) = &block.conditional {
        let sense = if conditional.jump_if_true { "True" } else { "False" };
        let _ = writeln!(
            out,
            "{}Jump if {} ({}) to Block[{}]",
            inner,
            sense,
            conditional.branch.semantics,
            destination(&conditional.branch)
        );
        let _ = writeln!(out, "{}{}", detail, conditional.condition);
        write_annotations(out, &conditional.branch, &detail);
        let _ = writeln!(out);
    }

    if let Some(branch) = &block.fall_through {
        let _ = writeln!(out, "{}Next ({}) Block[{}]", inner, branch.semantics, destination(branch));
        if let Some(value) = &block.branch_value {
            let _ = writeln!(out, "{}{}", detail, value);
        }
        write_annotations(out, branch, &detail);
    }

    if block.ordinal + 1 < graph.blocks().len() {
        let _ = writeln!(out);
    }
}

fn destination(branch: &ControlFlowBranch) -> String {
    branch
        .destination
        .map_or_else(|| "null".to_string(), |d| format!("B{}", d))
}

fn write_annotations(out: &mut String, branch: &ControlFlowBranch, prefix: &str) {
    if !branch.finalizing.is_empty() {
        let _ = writeln!(out, "{}Finalizing: {}", prefix, region_list(&branch.finalizing));
    }
    if !branch.leaving.is_empty() {
        let _ = writeln!(out, "{}Leaving: {}", prefix, region_list(&branch.leaving));
    }
    if !branch.entering.is_empty() {
        let _ = writeln!(out, "{}Entering: {}", prefix, region_list(&branch.entering));
    }
}

/// Generate DOT representation of a CFG
pub fn generate_dot(graph: &ControlFlowGraph<'_>, options: &DotOptions) -> String {
    let digraph = graph.to_digraph();
    let mut dot = String::new();
    dot.push_str("digraph CFG {\n");
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [shape=box];\n\n");

    if options.include_regions {
        write_cluster(&mut dot, graph, graph.regions(), RegionId::ROOT, options, 1);
    } else {
        for block in graph.blocks() {
            write_node(&mut dot, block, options, 1);
        }
    }
    dot.push('\n');

    // non-local exits have no target node; draw them as plain sinks
    for block in graph.blocks() {
        if let Some(branch) = block.fall_through.as_ref().filter(|b| b.destination.is_none()) {
            let sink = format!("{}_{}", sink_name(branch.semantics), block.ordinal);
            let _ = writeln!(dot, "  {} [shape=point];", sink);
            let mut attributes = Vec::new();
            if options.include_labels {
                attributes.push(format!("label=\"{}\"", branch.semantics));
            }
            if options.include_colors {
                attributes.push("color=\"purple\", style=\"dashed\"".to_string());
            }
            let _ = writeln!(
                dot,
                "  B{} -> {}{};",
                block.ordinal,
                sink,
                format_attributes(&attributes)
            );
        }
    }

    for edge in digraph.edge_references() {
        let (source, target) = (&digraph[edge.source()], &digraph[edge.target()]);
        let kind = edge.weight();
        let mut attributes = Vec::new();

        if options.include_labels {
            if let Some(label) = get_edge_label(kind) {
                attributes.push(format!("label=\"{}\"", label));
            }
        }
        if options.include_colors {
            if let Some(color) = get_edge_color(kind) {
                attributes.push(format!("color=\"{}\"", color));
            }
        }

        let _ = writeln!(
            dot,
            "  B{} -> B{}{};",
            source,
            target,
            format_attributes(&attributes)
        );
    }

    dot.push_str("}\n");
    dot
}

fn format_attributes(attributes: &[String]) -> String {
    if attributes.is_empty() {
        String::new()
    } else {
        format!(" [{}]", attributes.join(", "))
    }
}

fn sink_name(semantics: BranchSemantics) -> &'static str {
    match semantics {
        BranchSemantics::Throw => "throw",
        BranchSemantics::Rethrow => "rethrow",
        _ => "unwind",
    }
}

fn write_cluster(
    dot: &mut String,
    graph: &ControlFlowGraph<'_>,
    regions: &RegionTree,
    id: RegionId,
    options: &DotOptions,
    depth: usize,
) {
    let Some(region) = regions.get(id) else {
        return;
    };
    let pad = "  ".repeat(depth);
    let nested = id != RegionId::ROOT;
    let inner_depth = if nested { depth + 1 } else { depth };
    if nested {
        let _ = writeln!(dot, "{}subgraph cluster_{} {{", pad, id.0);
        let _ = writeln!(dot, "{}  label=\"{}\";", pad, heading(region));
        let _ = writeln!(dot, "{}  style=\"rounded\";", pad);
    }

    for block in graph.blocks().iter().filter(|block| block.region == id) {
        write_node(dot, block, options, inner_depth);
    }
    for &child in &region.children {
        write_cluster(dot, graph, regions, child, options, inner_depth);
    }

    if nested {
        let _ = writeln!(dot, "{}}}", pad);
    }
}

fn write_node(dot: &mut String, block: &BasicBlock<'_>, options: &DotOptions, depth: usize) {
    let label = format_block_label(block, options);
    let style = if block.is_reachable { "" } else { ", style=\"dashed\"" };
    let _ = writeln!(
        dot,
        "{}B{} [label=\"{}\"{}];",
        "  ".repeat(depth),
        block.ordinal,
        label,
        style
    );
}

/// Format a block label for DOT
fn format_block_label(block: &BasicBlock<'_>, options: &DotOptions) -> String {
    let title = match block.kind {
        BlockKind::Entry => format!("B{} (Entry)", block.ordinal),
        BlockKind::Exit => format!("B{} (Exit)", block.ordinal),
        BlockKind::Block => format!("B{}", block.ordinal),
    };
    if !options.include_node_details {
        return title;
    }
    let mut label = title;
    for op in block.all_operations() {
        label.push_str("\\n");
        label.push_str(&escape(&op.to_string()));
    }
    label
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Get edge label for DOT
fn get_edge_label(kind: &EdgeKind) -> Option<String> {
    match kind {
        EdgeKind::JumpIfTrue => Some("T".to_string()),
        EdgeKind::JumpIfFalse => Some("F".to_string()),
        EdgeKind::Next(BranchSemantics::Regular) => None,
        EdgeKind::Next(semantics) => Some(semantics.to_string()),
    }
}

/// Get edge color for DOT
fn get_edge_color(kind: &EdgeKind) -> Option<&'static str> {
    match kind {
        EdgeKind::JumpIfTrue => Some("green"),
        EdgeKind::JumpIfFalse => Some("red"),
        EdgeKind::Next(BranchSemantics::Return) => Some("blue"),
        EdgeKind::Next(_) => Some("black"),
    }
}
