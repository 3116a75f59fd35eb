//! CFG builder module
//!
//! Lowers a structured operation tree into basic blocks in one recursive descent.
//!
//! Blocks are allocated as builder ids and placed (given an ordinal and a region) when
//! code is first emitted into them, so ordinals follow lexical order and every region
//! covers a contiguous ordinal range. Join points are placed lazily: a join block that
//! is still empty when control moves on is forwarded to whatever block comes next
//! instead of becoming an empty block of its own. Region annotations of edges,
//! predecessors, capture scopes and reachability are all computed once the whole body
//! has been lowered.

use crate::cfg::block::{
    BasicBlock, BlockKind, BranchSemantics, ConditionalBranch, ControlFlowBranch, FlowOp,
    ImplicitCall, LOCK_TAKEN,
};
use crate::cfg::capture::{CaptureId, FlowCaptureAllocator};
use crate::cfg::dispatch::{self, RethrowContext};
use crate::cfg::regions::{RegionId, RegionKind, RegionTree};
use crate::cfg::{reachability, validate, ControlFlowGraph};
use crate::diagnostics::{Diagnostics, FlowDiagnostic};
use crate::error::{Error, Result};
use crate::operation::{
    BinaryOperator, CaseLabel, CatchClause, ConstantOracle, ConstantValue, Local, Operation,
    OperationKind, SwitchCase, SwitchExpressionArm, UnaryOperator,
};
use crate::options::BuildOptions;
use log::{debug, trace};
use std::collections::HashMap;

/// Builder-internal block handle, stable before placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BlockId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// Placed; statements are appended to it
    Open,
    /// Placed but closed for statements, for example after a region boundary or a
    /// conditional branch; the next statement starts a new block it falls into
    Sealed,
    /// Join block not placed yet
    Pending,
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    block: BlockId,
    state: CursorState,
}

impl Cursor {
    fn open(block: BlockId) -> Self {
        Self {
            block,
            state: CursorState::Open,
        }
    }
}

#[derive(Debug, Clone)]
struct PendingBranch<'a> {
    target: Option<BlockId>,
    semantics: BranchSemantics,
    /// Syntax of the explicit jump that produced the edge
    origin: Option<&'a str>,
}

#[derive(Debug, Clone)]
struct PendingConditional<'a> {
    condition: FlowOp<'a>,
    jump_if_true: bool,
    constant: Option<bool>,
    target: BlockId,
}

#[derive(Debug)]
struct BlockBuilder<'a> {
    kind: BlockKind,
    placement: Option<(usize, RegionId)>,
    /// Set when an empty join block was merged into another block
    forward: Option<BlockId>,
    operations: Vec<FlowOp<'a>>,
    branch_value: Option<FlowOp<'a>>,
    conditional: Option<PendingConditional<'a>>,
    fall_through: Option<PendingBranch<'a>>,
}

impl BlockBuilder<'_> {
    fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            placement: None,
            forward: None,
            operations: Vec::new(),
            branch_value: None,
            conditional: None,
            fall_through: None,
        }
    }
}

#[derive(Debug)]
struct PendingGoto<'a> {
    source: BlockId,
    label: &'a str,
    syntax: &'a str,
}

#[derive(Debug, Clone, Copy)]
struct JumpScope {
    break_target: BlockId,
    continue_target: Option<BlockId>,
}

/// Where a statement's first operation landed
#[derive(Debug, Clone, Copy)]
enum Anchor {
    Block(BlockId),
    /// The block placed at this ordinal
    Placement(usize),
}

#[derive(Debug)]
struct StatementRecord<'a> {
    anchor: Anchor,
    syntax: &'a str,
}

/// Recursive-descent graph builder for one body
pub struct GraphBuilder<'a, 'o> {
    oracle: &'o dyn ConstantOracle,
    options: &'o BuildOptions,
    diagnostics: &'o mut Diagnostics,
    blocks: Vec<BlockBuilder<'a>>,
    /// Placement order of builder ids
    order: Vec<BlockId>,
    current: Option<Cursor>,
    regions: RegionTree,
    region_stack: Vec<RegionId>,
    labels: HashMap<&'a str, BlockId>,
    pending_gotos: Vec<PendingGoto<'a>>,
    jump_scopes: Vec<JumpScope>,
    captures: FlowCaptureAllocator,
    statements: Vec<StatementRecord<'a>>,
    entry: BlockId,
    exit: BlockId,
}

impl<'a, 'o> GraphBuilder<'a, 'o> {
    /// Create a builder; the root region and the Entry and Exit blocks exist from the start
    pub fn new(
        oracle: &'o dyn ConstantOracle,
        options: &'o BuildOptions,
        diagnostics: &'o mut Diagnostics,
    ) -> Self {
        let blocks = vec![
            BlockBuilder::new(BlockKind::Entry),
            BlockBuilder::new(BlockKind::Exit),
        ];
        Self {
            oracle,
            options,
            diagnostics,
            blocks,
            order: Vec::new(),
            current: None,
            regions: RegionTree::new(),
            region_stack: vec![RegionId::ROOT],
            labels: HashMap::new(),
            pending_gotos: Vec::new(),
            jump_scopes: Vec::new(),
            captures: FlowCaptureAllocator::new(),
            statements: Vec::new(),
            entry: BlockId(0),
            exit: BlockId(1),
        }
    }

    /// Lower `body` and finish the graph
    pub fn build(mut self, body: &'a Operation) -> Result<ControlFlowGraph<'a>> {
        debug!("Building control flow graph for {}", body.kind_name());

        let entry = self.entry;
        self.place(entry);
        self.current = Some(Cursor {
            block: entry,
            state: CursorState::Sealed,
        });

        self.visit_statement(body)?;

        let exit = self.exit;
        self.link_current_to(exit);
        if self.region_stack != [RegionId::ROOT] {
            return Err(Error::internal(format!(
                "unbalanced region stack at end of body: {:?}",
                self.region_stack
            )));
        }
        self.place(exit);

        self.finish()
    }

    // ---------------------------------------------------------------------------------
    // Blocks and the cursor

    fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BlockBuilder::new(BlockKind::Block));
        id
    }

    fn current_region(&self) -> RegionId {
        self.region_stack.last().copied().unwrap_or(RegionId::ROOT)
    }

    fn resolve(&self, mut block: BlockId) -> BlockId {
        while let Some(next) = self.blocks[block.0].forward {
            block = next;
        }
        block
    }

    fn place(&mut self, block: BlockId) {
        let ordinal = self.order.len();
        let region = self.current_region();
        self.order.push(block);
        self.blocks[block.0].placement = Some((ordinal, region));
        self.regions.note_block(region, ordinal);
        trace!("Placed B{} in {}", ordinal, region);
    }

    /// Give `from` a regular fall-through to `to` unless it already has an exit
    fn link_if_open(&mut self, from: BlockId, to: BlockId) {
        let block = &mut self.blocks[from.0];
        if block.fall_through.is_none() {
            block.fall_through = Some(PendingBranch {
                target: Some(to),
                semantics: BranchSemantics::Regular,
                origin: None,
            });
        }
    }

    /// Merge an empty pending join block into `target`
    fn forward_pending(&mut self, pending: BlockId, target: BlockId) {
        if self.resolve(target) == pending {
            self.place(pending);
            self.link_if_open(pending, pending);
            return;
        }
        trace!("Forwarding join {:?} to {:?}", pending, target);
        self.blocks[pending.0].forward = Some(target);
    }

    /// Place `block` right away and make it the current block
    fn append_new_block(&mut self, block: BlockId) {
        match self.current.take() {
            Some(Cursor {
                block: pending,
                state: CursorState::Pending,
            }) => self.forward_pending(pending, block),
            Some(Cursor { block: previous, .. }) => self.link_if_open(previous, block),
            None => {}
        }
        self.place(block);
        self.current = Some(Cursor::open(block));
    }

    /// Make the join `block` current without placing it yet
    fn append_join_block(&mut self, block: BlockId) {
        match self.current.take() {
            Some(Cursor {
                block: pending,
                state: CursorState::Pending,
            }) => self.forward_pending(pending, block),
            Some(Cursor { block: previous, .. }) => self.link_if_open(previous, block),
            None => {}
        }
        self.current = Some(Cursor {
            block,
            state: CursorState::Pending,
        });
    }

    /// The block statements go into, creating and placing one when needed
    fn current_block(&mut self) -> BlockId {
        match self.current {
            Some(Cursor {
                block,
                state: CursorState::Open,
            }) => block,
            Some(Cursor {
                block,
                state: CursorState::Pending,
            }) => {
                self.place(block);
                self.current = Some(Cursor::open(block));
                block
            }
            _ => {
                let block = self.new_block();
                self.append_new_block(block);
                block
            }
        }
    }

    fn seal(&mut self) {
        if let Some(cursor) = self.current.as_mut() {
            if cursor.state == CursorState::Open {
                cursor.state = CursorState::Sealed;
            }
        }
    }

    /// Send the current block (if control can still reach its end) to `target`
    fn link_current_to(&mut self, target: BlockId) {
        match self.current.take() {
            Some(Cursor {
                block,
                state: CursorState::Pending,
            }) => self.forward_pending(block, target),
            Some(Cursor { block, .. }) => self.link_if_open(block, target),
            None => {}
        }
    }

    /// End `block` with an explicit exit; nothing follows it
    fn terminate(
        &mut self,
        block: BlockId,
        semantics: BranchSemantics,
        target: Option<BlockId>,
        origin: Option<&'a str>,
    ) {
        self.blocks[block.0].fall_through = Some(PendingBranch {
            target,
            semantics,
            origin,
        });
        self.current = None;
    }

    fn add_operation(&mut self, operation: FlowOp<'a>) {
        let block = self.current_block();
        self.blocks[block.0].operations.push(operation);
    }

    /// End the current block with a conditional branch to `target`; returns the block
    fn conditional_branch(
        &mut self,
        condition: FlowOp<'a>,
        jump_if_true: bool,
        target: BlockId,
        constant: Option<bool>,
    ) -> BlockId {
        let block = self.current_block();
        self.blocks[block.0].conditional = Some(PendingConditional {
            condition,
            jump_if_true,
            constant,
            target,
        });
        self.seal();
        block
    }

    // ---------------------------------------------------------------------------------
    // Regions

    fn enter_region(
        &mut self,
        kind: RegionKind,
        exception_type: Option<String>,
    ) -> Result<RegionId> {
        self.seal();
        let parent = self.current_region();
        let region = self.regions.add(kind, parent, exception_type)?;
        self.region_stack.push(region);
        debug!("Entered {:?} region {} under {}", kind, region, parent);
        Ok(region)
    }

    /// Make sure the current region owns at least one block
    fn ensure_region_block(&mut self) -> Result<()> {
        let region = self.current_region();
        if self.regions.region(region)?.first_block.is_none() {
            self.current_block();
        }
        Ok(())
    }

    fn leave_region(&mut self, expected: RegionId) -> Result<()> {
        match self.region_stack.last() {
            Some(&top) if top == expected && top != RegionId::ROOT => {}
            Some(&top) => {
                return Err(Error::internal(format!(
                    "region stack mismatch: leaving {} while {} is innermost",
                    expected, top
                )))
            }
            None => return Err(Error::internal("region stack underflow")),
        }
        self.ensure_region_block()?;
        self.seal();
        self.region_stack.pop();
        debug!("Left region {}", expected);
        Ok(())
    }

    fn declare_locals(&mut self, region: RegionId, locals: &[Local]) -> Result<()> {
        self.regions
            .region_mut(region)?
            .locals
            .extend(locals.iter().cloned());
        Ok(())
    }

    /// Open a `Locals` region when there is anything to declare
    fn enter_locals(&mut self, locals: &[Local]) -> Result<Option<RegionId>> {
        if locals.is_empty() {
            return Ok(None);
        }
        let region = self.enter_region(RegionKind::Locals, None)?;
        self.declare_locals(region, locals)?;
        Ok(Some(region))
    }

    fn leave_locals(&mut self, region: Option<RegionId>) -> Result<()> {
        match region {
            Some(region) => self.leave_region(region),
            None => Ok(()),
        }
    }

    // ---------------------------------------------------------------------------------
    // Statements

    fn record_statement(&mut self, op: &'a Operation) {
        let anchor = match self.current {
            Some(Cursor {
                block,
                state: CursorState::Open,
            }) => Anchor::Block(block),
            _ => Anchor::Placement(self.order.len()),
        };
        self.statements.push(StatementRecord {
            anchor,
            syntax: op.display_text(),
        });
    }

    fn visit_statement(&mut self, op: &'a Operation) -> Result<()> {
        let recorded = !matches!(
            op.kind,
            OperationKind::Block { .. }
                | OperationKind::Empty
                | OperationKind::Labeled { .. }
                | OperationKind::VariableDeclaration {
                    initializer: None,
                    ..
                }
        );
        if recorded {
            self.record_statement(op);
        }

        match &op.kind {
            OperationKind::Block { locals, operations } => self.visit_block(locals, operations),
            OperationKind::ExpressionStatement { operation } => {
                let value = self.visit_value(operation)?;
                self.add_operation(rewrap(op, operation, value));
                Ok(())
            }
            OperationKind::VariableDeclaration { initializer, .. } => {
                if let Some(initializer) = initializer {
                    let value = self.visit_value(initializer)?;
                    self.add_operation(rewrap(op, initializer, value));
                }
                Ok(())
            }
            OperationKind::Empty => Ok(()),
            OperationKind::If {
                condition,
                when_true,
                when_false,
            } => self.visit_if(condition, when_true, when_false.as_deref()),
            OperationKind::While { condition, body } => self.visit_while(condition, body),
            OperationKind::DoWhile { body, condition } => self.visit_do_while(body, condition),
            OperationKind::For {
                locals,
                before,
                condition,
                at_loop_bottom,
                body,
            } => self.visit_for(locals, before, condition.as_deref(), at_loop_bottom, body),
            OperationKind::Switch {
                value,
                cases,
                locals,
            } => self.visit_switch(value, cases, locals),
            OperationKind::Labeled { label, operation } => {
                self.visit_labeled(label, operation.as_deref())
            }
            OperationKind::Goto { label } => {
                self.visit_goto(op, label);
                Ok(())
            }
            OperationKind::Break => {
                self.visit_break(op);
                Ok(())
            }
            OperationKind::Continue => {
                self.visit_continue(op);
                Ok(())
            }
            OperationKind::Return { value } => self.visit_return(op, value.as_deref()),
            OperationKind::Throw { exception } => self.visit_throw(op, exception.as_deref()),
            OperationKind::Try {
                body,
                catches,
                finally,
            } => self.visit_try(body, catches, finally.as_deref()),
            OperationKind::Using {
                locals,
                resources,
                body,
            } => self.visit_using(locals, resources, body),
            OperationKind::Lock { value, body } => self.visit_lock(value, body),
            OperationKind::ForEach {
                local,
                collection,
                body,
            } => self.visit_for_each(local, collection, body),
            _ => {
                let value = self.visit_value(op)?;
                self.add_operation(value);
                Ok(())
            }
        }
    }

    fn visit_block(&mut self, locals: &'a [Local], operations: &'a [Operation]) -> Result<()> {
        let region = self.enter_locals(locals)?;
        for operation in operations {
            self.visit_statement(operation)?;
        }
        self.leave_locals(region)
    }

    /// Lower the body of a try, catch or finally; its locals belong to `region`
    fn visit_region_body(&mut self, region: RegionId, body: &'a Operation) -> Result<()> {
        match &body.kind {
            OperationKind::Block { locals, operations } => {
                self.declare_locals(region, locals)?;
                for operation in operations {
                    self.visit_statement(operation)?;
                }
                Ok(())
            }
            _ => self.visit_statement(body),
        }
    }

    fn visit_if(
        &mut self,
        condition: &'a Operation,
        when_true: &'a Operation,
        when_false: Option<&'a Operation>,
    ) -> Result<()> {
        let after = self.new_block();
        match when_false {
            None => {
                self.visit_condition(condition, false, after)?;
                self.visit_statement(when_true)?;
            }
            Some(when_false) => {
                let otherwise = self.new_block();
                self.visit_condition(condition, false, otherwise)?;
                self.visit_statement(when_true)?;
                self.link_current_to(after);
                self.append_new_block(otherwise);
                self.visit_statement(when_false)?;
            }
        }
        self.append_join_block(after);
        Ok(())
    }

    fn visit_while(&mut self, condition: &'a Operation, body: &'a Operation) -> Result<()> {
        let condition_block = self.new_block();
        let after = self.new_block();

        self.append_new_block(condition_block);
        self.visit_condition(condition, false, after)?;

        self.jump_scopes.push(JumpScope {
            break_target: after,
            continue_target: Some(condition_block),
        });
        self.visit_statement(body)?;
        self.jump_scopes.pop();

        self.link_current_to(condition_block);
        self.append_join_block(after);
        Ok(())
    }

    fn visit_do_while(&mut self, body: &'a Operation, condition: &'a Operation) -> Result<()> {
        let body_block = self.new_block();
        let condition_block = self.new_block();
        let after = self.new_block();

        self.append_new_block(body_block);
        self.jump_scopes.push(JumpScope {
            break_target: after,
            continue_target: Some(condition_block),
        });
        self.visit_statement(body)?;
        self.jump_scopes.pop();

        self.append_join_block(condition_block);
        self.visit_condition(condition, true, body_block)?;
        self.append_join_block(after);
        Ok(())
    }

    fn visit_for(
        &mut self,
        locals: &'a [Local],
        before: &'a [Operation],
        condition: Option<&'a Operation>,
        at_loop_bottom: &'a [Operation],
        body: &'a Operation,
    ) -> Result<()> {
        let region = self.enter_locals(locals)?;
        for statement in before {
            self.visit_statement(statement)?;
        }

        let condition_block = self.new_block();
        let continue_block = self.new_block();
        let after = self.new_block();

        self.append_new_block(condition_block);
        if let Some(condition) = condition {
            self.visit_condition(condition, false, after)?;
        }

        self.jump_scopes.push(JumpScope {
            break_target: after,
            continue_target: Some(continue_block),
        });
        self.visit_statement(body)?;
        self.jump_scopes.pop();

        self.append_join_block(continue_block);
        for statement in at_loop_bottom {
            self.visit_statement(statement)?;
        }
        self.link_current_to(condition_block);

        self.leave_locals(region)?;
        self.append_join_block(after);
        Ok(())
    }

    fn visit_switch(
        &mut self,
        value: &'a Operation,
        cases: &'a [SwitchCase],
        locals: &'a [Local],
    ) -> Result<()> {
        let region = self.enter_locals(locals)?;

        let lowered = self.visit_value(value)?;
        let scope = self.current_region();
        let (subject, write) = self.captures.capture(scope, lowered);
        self.add_operation(write);

        let after = self.new_block();
        let case_blocks: Vec<BlockId> = cases.iter().map(|_| self.new_block()).collect();
        let mut default = None;

        for (case, &case_block) in cases.iter().zip(&case_blocks) {
            for label in &case.labels {
                match label {
                    CaseLabel::Default => default = Some(case_block),
                    CaseLabel::Pattern { pattern, guard } => {
                        let test = FlowOp::PatternTest {
                            value: Box::new(self.captures.reference(subject)),
                            pattern,
                        };
                        match guard {
                            None => {
                                self.conditional_branch(test, true, case_block, None);
                            }
                            Some(guard) => {
                                let next = self.new_block();
                                self.conditional_branch(test, false, next, None);
                                self.visit_condition(guard, true, case_block)?;
                                self.append_new_block(next);
                            }
                        }
                    }
                }
            }
        }
        self.link_current_to(default.unwrap_or(after));

        self.jump_scopes.push(JumpScope {
            break_target: after,
            continue_target: None,
        });
        for (case, &case_block) in cases.iter().zip(&case_blocks) {
            self.append_new_block(case_block);
            for statement in &case.body {
                self.visit_statement(statement)?;
            }
            self.link_current_to(after);
        }
        self.jump_scopes.pop();

        self.leave_locals(region)?;
        self.append_join_block(after);
        Ok(())
    }

    fn visit_labeled(&mut self, label: &'a str, operation: Option<&'a Operation>) -> Result<()> {
        let block = self.new_block();
        if self.labels.contains_key(label) {
            self.diagnostics.report(FlowDiagnostic::DuplicateLabel {
                label: label.to_string(),
            });
        } else {
            self.labels.insert(label, block);
        }
        self.append_new_block(block);
        match operation {
            Some(operation) => self.visit_statement(operation),
            None => Ok(()),
        }
    }

    fn visit_goto(&mut self, op: &'a Operation, label: &'a str) {
        let source = self.current_block();
        match self.labels.get(label).copied() {
            Some(target) => {
                self.terminate(
                    source,
                    BranchSemantics::Regular,
                    Some(target),
                    Some(op.display_text()),
                );
            }
            None => {
                trace!("Forward goto {}; patched after lowering", label);
                self.pending_gotos.push(PendingGoto {
                    source,
                    label,
                    syntax: op.display_text(),
                });
                self.current = None;
            }
        }
    }

    fn visit_break(&mut self, op: &'a Operation) {
        match self.jump_scopes.last().copied() {
            Some(scope) => {
                let source = self.current_block();
                self.terminate(
                    source,
                    BranchSemantics::Regular,
                    Some(scope.break_target),
                    Some(op.display_text()),
                );
            }
            None => self.diagnostics.report(FlowDiagnostic::BreakOutsideLoop {
                syntax: op.display_text().to_string(),
            }),
        }
    }

    fn visit_continue(&mut self, op: &'a Operation) {
        let target = self
            .jump_scopes
            .iter()
            .rev()
            .find_map(|scope| scope.continue_target);
        match target {
            Some(target) => {
                let source = self.current_block();
                self.terminate(
                    source,
                    BranchSemantics::Regular,
                    Some(target),
                    Some(op.display_text()),
                );
            }
            None => self.diagnostics.report(FlowDiagnostic::ContinueOutsideLoop {
                syntax: op.display_text().to_string(),
            }),
        }
    }

    fn visit_return(&mut self, op: &'a Operation, value: Option<&'a Operation>) -> Result<()> {
        let value = value.map(|value| self.visit_value(value)).transpose()?;
        let source = self.current_block();
        self.blocks[source.0].branch_value = value;
        let exit = self.exit;
        self.terminate(
            source,
            BranchSemantics::Return,
            Some(exit),
            Some(op.display_text()),
        );
        Ok(())
    }

    fn visit_throw(&mut self, op: &'a Operation, exception: Option<&'a Operation>) -> Result<()> {
        if let Some(exception) = exception {
            let value = self.visit_value(exception)?;
            let source = self.current_block();
            self.blocks[source.0].branch_value = Some(value);
            self.terminate(source, BranchSemantics::Throw, None, None);
            return Ok(());
        }

        let syntax = op.display_text().to_string();
        match dispatch::rethrow_context(&self.regions, self.current_region()) {
            RethrowContext::Permitted => {
                let source = self.current_block();
                self.terminate(source, BranchSemantics::Rethrow, None, None);
            }
            RethrowContext::InsideFinally => {
                self.diagnostics
                    .report(FlowDiagnostic::RethrowInsideFinally { syntax });
                self.add_operation(FlowOp::Original(op));
            }
            RethrowContext::OutsideCatch => {
                self.diagnostics
                    .report(FlowDiagnostic::RethrowOutsideCatch { syntax });
                self.add_operation(FlowOp::Original(op));
            }
        }
        Ok(())
    }

    fn visit_try(
        &mut self,
        body: &'a Operation,
        catches: &'a [CatchClause],
        finally: Option<&'a Operation>,
    ) -> Result<()> {
        if catches.is_empty() && finally.is_none() {
            return self.visit_statement(body);
        }

        let after = self.new_block();
        match finally {
            Some(finally) => self.visit_try_finally(
                after,
                |this| this.visit_try_catch(body, catches, after),
                |this| {
                    let region = this.current_region();
                    this.visit_region_body(region, finally)
                },
            ),
            None => {
                self.visit_try_catch(body, catches, after)?;
                self.append_join_block(after);
                Ok(())
            }
        }
    }

    /// Lower `body` and its catches; without catches the body goes straight into the
    /// current region
    fn visit_try_catch(
        &mut self,
        body: &'a Operation,
        catches: &'a [CatchClause],
        after: BlockId,
    ) -> Result<()> {
        if catches.is_empty() {
            let region = self.current_region();
            return self.visit_region_body(region, body);
        }

        let outer = self.enter_region(RegionKind::TryAndCatch, None)?;
        let protected = self.enter_region(RegionKind::Try, None)?;
        self.visit_region_body(protected, body)?;
        self.ensure_region_block()?;
        self.link_current_to(after);
        self.leave_region(protected)?;

        for clause in catches {
            self.visit_catch(clause, after)?;
        }
        self.leave_region(outer)
    }

    /// Open a `TryAndFinally`, lower `body` into its `Try` and `finally` into its `Finally`,
    /// then continue at `after`
    fn visit_try_finally(
        &mut self,
        after: BlockId,
        body: impl FnOnce(&mut Self) -> Result<()>,
        finally: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        let outer = self.enter_region(RegionKind::TryAndFinally, None)?;
        let protected = self.enter_region(RegionKind::Try, None)?;
        body(self)?;
        self.ensure_region_block()?;
        self.link_current_to(after);
        self.leave_region(protected)?;

        let region = self.enter_region(RegionKind::Finally, None)?;
        finally(self)?;
        self.ensure_region_block()?;
        self.end_finally();
        self.leave_region(region)?;
        self.leave_region(outer)?;

        self.append_join_block(after);
        Ok(())
    }

    fn visit_using(
        &mut self,
        locals: &'a [Local],
        resources: &'a Operation,
        body: &'a Operation,
    ) -> Result<()> {
        let region = self.enter_locals(locals)?;
        let declarations = resource_declarations(resources);
        if declarations.is_empty() {
            let value = self.visit_value(resources)?;
            let scope = self.current_region();
            let (id, write) = self.captures.capture(scope, value);
            self.add_operation(write);
            let resource = self.captures.reference(id);
            self.visit_disposing(resource, |this| this.visit_statement(body))?;
        } else {
            self.visit_using_declarations(&declarations, body)?;
        }
        self.leave_locals(region)
    }

    /// Each declared resource protects the declarations after it and the body
    fn visit_using_declarations(
        &mut self,
        declarations: &[(&'a Operation, &'a Local)],
        body: &'a Operation,
    ) -> Result<()> {
        let Some((&(declaration, local), rest)) = declarations.split_first() else {
            return self.visit_statement(body);
        };
        self.visit_statement(declaration)?;
        self.visit_disposing(FlowOp::LocalReference { local }, |this| {
            this.visit_using_declarations(rest, body)
        })
    }

    /// Lower `body` in a try whose finally disposes `resource` unless it is null
    fn visit_disposing(
        &mut self,
        resource: FlowOp<'a>,
        body: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        let after = self.new_block();
        self.visit_try_finally(after, body, |this| {
            this.dispose_unless_null(resource);
            Ok(())
        })
    }

    fn dispose_unless_null(&mut self, resource: FlowOp<'a>) {
        let done = self.new_block();
        let is_null = FlowOp::IsNull {
            operand: Box::new(resource.clone()),
        };
        self.conditional_branch(is_null, true, done, None);
        self.add_operation(FlowOp::ImplicitCall {
            call: ImplicitCall::Dispose,
            operands: vec![resource],
        });
        self.append_join_block(done);
    }

    fn visit_lock(&mut self, value: &'a Operation, body: &'a Operation) -> Result<()> {
        let region = self.enter_region(RegionKind::Locals, None)?;
        self.declare_locals(region, &[Local::new(LOCK_TAKEN, "bool")])?;

        let lowered = self.visit_value(value)?;
        let (monitor, write) = self.captures.capture(region, lowered);
        self.add_operation(write);

        let after = self.new_block();
        self.visit_try_finally(
            after,
            |this| {
                let operands = vec![this.captures.reference(monitor), FlowOp::LockTaken];
                this.add_operation(FlowOp::ImplicitCall {
                    call: ImplicitCall::MonitorEnter,
                    operands,
                });
                this.visit_statement(body)
            },
            |this| {
                // the monitor is only exited when entering it succeeded
                let done = this.new_block();
                this.conditional_branch(FlowOp::LockTaken, false, done, None);
                let operands = vec![this.captures.reference(monitor)];
                this.add_operation(FlowOp::ImplicitCall {
                    call: ImplicitCall::MonitorExit,
                    operands,
                });
                this.append_join_block(done);
                Ok(())
            },
        )?;
        self.leave_region(region)
    }

    fn visit_for_each(
        &mut self,
        local: &'a Local,
        collection: &'a Operation,
        body: &'a Operation,
    ) -> Result<()> {
        let lowered = self.visit_value(collection)?;
        let scope = self.current_region();
        let (enumerator, write) = self.captures.capture(
            scope,
            FlowOp::ImplicitCall {
                call: ImplicitCall::GetEnumerator,
                operands: vec![lowered],
            },
        );
        self.add_operation(write);

        let condition_block = self.new_block();
        let after = self.new_block();
        self.visit_try_finally(
            after,
            |this| {
                this.append_new_block(condition_block);
                let move_next = FlowOp::ImplicitCall {
                    call: ImplicitCall::MoveNext,
                    operands: vec![this.captures.reference(enumerator)],
                };
                this.conditional_branch(move_next, false, after, None);

                let region = this.enter_region(RegionKind::Locals, None)?;
                this.declare_locals(region, std::slice::from_ref(local))?;
                let current = FlowOp::ImplicitCall {
                    call: ImplicitCall::Current,
                    operands: vec![this.captures.reference(enumerator)],
                };
                this.add_operation(FlowOp::LocalInitializer {
                    local,
                    value: Box::new(current),
                });

                this.jump_scopes.push(JumpScope {
                    break_target: after,
                    continue_target: Some(condition_block),
                });
                this.visit_statement(body)?;
                this.jump_scopes.pop();

                this.link_current_to(condition_block);
                this.leave_region(region)
            },
            |this| {
                let resource = this.captures.reference(enumerator);
                this.dispose_unless_null(resource);
                Ok(())
            },
        )
    }

    /// Falling off a finally resumes whatever transfer was in progress
    fn end_finally(&mut self) {
        let Some(cursor) = self.current else {
            return;
        };
        let block = match cursor.state {
            CursorState::Pending => self.current_block(),
            _ => cursor.block,
        };
        if self.blocks[block.0].fall_through.is_none() {
            self.terminate(
                block,
                BranchSemantics::StructuredExceptionHandling,
                None,
                None,
            );
        }
        self.current = None;
    }

    fn visit_catch(&mut self, clause: &'a CatchClause, after: BlockId) -> Result<()> {
        let initializer = clause.local.as_ref().map(|local| FlowOp::CatchLocalInitializer {
            local,
            exception_type: clause.exception_type.as_deref(),
        });

        let Some(filter) = clause.filter.as_deref() else {
            let region = self.enter_region(RegionKind::Catch, clause.exception_type.clone())?;
            if let Some(local) = &clause.local {
                self.declare_locals(region, std::slice::from_ref(local))?;
            }
            if let Some(initializer) = initializer {
                self.add_operation(initializer);
            }
            self.visit_region_body(region, &clause.handler)?;
            self.ensure_region_block()?;
            self.link_current_to(after);
            return self.leave_region(region);
        };

        let outer =
            self.enter_region(RegionKind::FilterAndHandler, clause.exception_type.clone())?;
        if let Some(local) = &clause.local {
            self.declare_locals(outer, std::slice::from_ref(local))?;
        }
        self.declare_locals(outer, &clause.filter_locals)?;

        let filter_region = self.enter_region(RegionKind::Filter, None)?;
        if let Some(initializer) = initializer {
            self.add_operation(initializer);
        }
        let constant = self.oracle.try_get_constant_bool(filter);
        let value = self.visit_value(filter)?;
        let handler_block = self.new_block();
        let test = self.conditional_branch(value, true, handler_block, constant);
        // a false filter resumes the search for a handler
        self.terminate(
            test,
            BranchSemantics::StructuredExceptionHandling,
            None,
            None,
        );
        self.leave_region(filter_region)?;

        let handler_region = self.enter_region(RegionKind::Handler, None)?;
        self.append_new_block(handler_block);
        self.visit_region_body(handler_region, &clause.handler)?;
        self.link_current_to(after);
        self.leave_region(handler_region)?;

        self.leave_region(outer)
    }

    // ---------------------------------------------------------------------------------
    // Conditions

    /// Branch to `target` when `condition` evaluates to `jump_if_true`; otherwise fall
    /// through to whatever is emitted next
    fn visit_condition(
        &mut self,
        condition: &'a Operation,
        jump_if_true: bool,
        target: BlockId,
    ) -> Result<()> {
        match &condition.kind {
            OperationKind::Unary {
                operator: UnaryOperator::Not,
                operand,
            } => self.visit_condition(operand, !jump_if_true, target),
            OperationKind::Binary {
                operator: BinaryOperator::ConditionalAnd,
                left,
                right,
            } => {
                if jump_if_true {
                    let skip = self.new_block();
                    self.visit_condition(left, false, skip)?;
                    self.visit_condition(right, true, target)?;
                    self.append_join_block(skip);
                } else {
                    self.visit_condition(left, false, target)?;
                    self.visit_condition(right, false, target)?;
                }
                Ok(())
            }
            OperationKind::Binary {
                operator: BinaryOperator::ConditionalOr,
                left,
                right,
            } => {
                if jump_if_true {
                    self.visit_condition(left, true, target)?;
                    self.visit_condition(right, true, target)?;
                } else {
                    let skip = self.new_block();
                    self.visit_condition(left, true, skip)?;
                    self.visit_condition(right, false, target)?;
                    self.append_join_block(skip);
                }
                Ok(())
            }
            _ => {
                let constant = self.oracle.try_get_constant_bool(condition);
                let value = self.visit_value(condition)?;
                self.conditional_branch(value, jump_if_true, target, constant);
                Ok(())
            }
        }
    }

    // ---------------------------------------------------------------------------------
    // Values

    /// Lower an expression whose value is consumed by the caller
    fn visit_value(&mut self, op: &'a Operation) -> Result<FlowOp<'a>> {
        if !op.has_control_flow() {
            return Ok(FlowOp::Original(op));
        }
        match &op.kind {
            OperationKind::Binary {
                operator: BinaryOperator::ConditionalAnd,
                left,
                right,
            } => self.visit_short_circuit_value(left, right, false),
            OperationKind::Binary {
                operator: BinaryOperator::ConditionalOr,
                left,
                right,
            } => self.visit_short_circuit_value(left, right, true),
            OperationKind::Conditional {
                condition,
                when_true,
                when_false,
            } => self.visit_conditional_value(condition, when_true, when_false),
            OperationKind::Coalesce { value, when_null } => {
                self.visit_coalesce_value(value, when_null)
            }
            OperationKind::ThrowExpression { exception } => {
                self.visit_throw_expression(exception)?;
                Ok(FlowOp::Original(op))
            }
            OperationKind::SwitchExpression { value, arms } => {
                self.visit_switch_value(op, value, arms)
            }
            _ => self.visit_operands(op),
        }
    }

    /// Lower the operands of `op` in order, spilling the ones evaluated before a later
    /// operand that branches
    fn visit_operands(&mut self, op: &'a Operation) -> Result<FlowOp<'a>> {
        let children = op.children();
        let last_branching = children.iter().rposition(|child| child.has_control_flow());
        let mut operands = Vec::with_capacity(children.len());

        for (index, child) in children.into_iter().enumerate() {
            let lowered = self.visit_value(child)?;
            let spill = last_branching.is_some_and(|last| index < last)
                && !child.is_stable()
                && !matches!(lowered, FlowOp::FlowCaptureReference { .. });
            if spill {
                let scope = self.current_region();
                let (id, write) = self.captures.capture(scope, lowered);
                self.add_operation(write);
                operands.push(self.captures.reference(id));
            } else {
                operands.push(lowered);
            }
        }

        Ok(FlowOp::Rewritten {
            origin: op,
            operands,
        })
    }

    fn visit_short_circuit_value(
        &mut self,
        left: &'a Operation,
        right: &'a Operation,
        is_or: bool,
    ) -> Result<FlowOp<'a>> {
        let scope = self.current_region();
        let result = self.captures.allocate(scope);
        let short_circuit = self.new_block();
        let join = self.new_block();

        self.visit_condition(left, is_or, short_circuit)?;
        self.visit_arm_value(result, right)?;
        self.link_current_to(join);

        self.append_new_block(short_circuit);
        let write = self.captures.write(
            result,
            FlowOp::Constant {
                value: ConstantValue::Bool(is_or),
            },
        );
        self.add_operation(write);

        self.append_join_block(join);
        Ok(self.captures.reference(result))
    }

    fn visit_conditional_value(
        &mut self,
        condition: &'a Operation,
        when_true: &'a Operation,
        when_false: &'a Operation,
    ) -> Result<FlowOp<'a>> {
        let scope = self.current_region();
        let result = self.captures.allocate(scope);
        let otherwise = self.new_block();
        let join = self.new_block();

        self.visit_condition(condition, false, otherwise)?;
        self.visit_arm_value(result, when_true)?;
        self.link_current_to(join);

        self.append_new_block(otherwise);
        self.visit_arm_value(result, when_false)?;

        self.append_join_block(join);
        Ok(self.captures.reference(result))
    }

    fn visit_coalesce_value(
        &mut self,
        value: &'a Operation,
        when_null: &'a Operation,
    ) -> Result<FlowOp<'a>> {
        let lowered = self.visit_value(value)?;
        let scope = self.current_region();
        let (tested, write) = self.captures.capture(scope, lowered);
        self.add_operation(write);

        let null_block = self.new_block();
        let join = self.new_block();
        let condition = FlowOp::IsNull {
            operand: Box::new(self.captures.reference(tested)),
        };
        self.conditional_branch(condition, true, null_block, None);

        // `x ?? throw e` needs no second capture: the value is `x` whenever control
        // reaches the join
        let result = if matches!(when_null.kind, OperationKind::ThrowExpression { .. }) {
            self.link_current_to(join);
            self.append_new_block(null_block);
            self.visit_arm_value(tested, when_null)?;
            tested
        } else {
            let result = self.captures.allocate(scope);
            let write = self
                .captures
                .write(result, self.captures.reference(tested));
            self.add_operation(write);
            self.link_current_to(join);
            self.append_new_block(null_block);
            self.visit_arm_value(result, when_null)?;
            result
        };

        self.append_join_block(join);
        Ok(self.captures.reference(result))
    }

    /// Lower one arm of a value-producing branch into `result`
    fn visit_arm_value(&mut self, result: CaptureId, arm: &'a Operation) -> Result<()> {
        if let OperationKind::ThrowExpression { exception } = &arm.kind {
            return self.visit_throw_expression(exception);
        }
        let value = self.visit_value(arm)?;
        let write = self.captures.write(result, value);
        self.add_operation(write);
        Ok(())
    }

    fn visit_throw_expression(&mut self, exception: &'a Operation) -> Result<()> {
        let value = self.visit_value(exception)?;
        let source = self.current_block();
        self.blocks[source.0].branch_value = Some(value);
        self.terminate(source, BranchSemantics::Throw, None, None);
        Ok(())
    }

    fn visit_switch_value(
        &mut self,
        op: &'a Operation,
        value: &'a Operation,
        arms: &'a [SwitchExpressionArm],
    ) -> Result<FlowOp<'a>> {
        let lowered = self.visit_value(value)?;
        let scope = self.current_region();
        let (subject, write) = self.captures.capture(scope, lowered);
        self.add_operation(write);
        let result = self.captures.allocate(scope);
        let join = self.new_block();

        let mut exhausted = false;
        for arm in arms {
            let region = self.enter_locals(&arm.locals)?;
            let exhaustive = arm.pattern.is_irrefutable() && arm.guard.is_none();
            let next = if exhaustive {
                None
            } else {
                Some(self.new_block())
            };

            if let Some(next) = next {
                if !arm.pattern.is_irrefutable() {
                    let test = FlowOp::PatternTest {
                        value: Box::new(self.captures.reference(subject)),
                        pattern: &arm.pattern,
                    };
                    self.conditional_branch(test, false, next, None);
                }
                if let Some(guard) = arm.guard.as_deref() {
                    self.visit_condition(guard, false, next)?;
                }
            }
            self.visit_arm_value(result, &arm.value)?;
            self.link_current_to(join);
            self.leave_locals(region)?;

            if let Some(next) = next {
                self.append_new_block(next);
            }
            exhausted = next.is_none();
        }

        if !exhausted {
            let source = self.current_block();
            self.blocks[source.0].branch_value = Some(FlowOp::NoMatchingArm { origin: op });
            self.terminate(source, BranchSemantics::Throw, None, None);
        }

        self.append_join_block(join);
        Ok(self.captures.reference(result))
    }

    // ---------------------------------------------------------------------------------
    // Finalization

    fn resolve_pending_gotos(&mut self) {
        for goto in std::mem::take(&mut self.pending_gotos) {
            let (target, origin) = match self.labels.get(goto.label).copied() {
                Some(target) => (target, Some(goto.syntax)),
                None => {
                    self.diagnostics.report(FlowDiagnostic::UndefinedLabel {
                        label: goto.label.to_string(),
                        syntax: goto.syntax.to_string(),
                    });
                    (self.exit, None)
                }
            };
            self.blocks[goto.source.0].fall_through = Some(PendingBranch {
                target: Some(target),
                semantics: BranchSemantics::Regular,
                origin,
            });
        }
    }

    fn make_branch(
        &mut self,
        source: (usize, RegionId),
        target: Option<BlockId>,
        semantics: BranchSemantics,
        origin: Option<&'a str>,
        placements: &[Option<(usize, RegionId)>],
    ) -> Result<ControlFlowBranch> {
        let (ordinal, source_region) = source;
        let destination = match target {
            Some(target) => Some(placements[target.0].ok_or_else(|| {
                Error::internal(format!("B{} branches to a block that was never placed", ordinal))
            })?),
            None => None,
        };
        let destination_region = destination.map(|(_, region)| region);

        if let Some(syntax) = origin {
            if !semantics.is_non_local() {
                if let Some(finally) =
                    dispatch::escaped_finally(&self.regions, source_region, destination_region)
                {
                    debug!("B{} leaves finally {}", ordinal, finally);
                    self.diagnostics.report(FlowDiagnostic::LeavingFinally {
                        syntax: syntax.to_string(),
                    });
                }
            }
        }

        let transition =
            dispatch::plan_transition(&self.regions, source_region, destination_region);
        Ok(ControlFlowBranch {
            source: ordinal,
            destination: destination.map(|(ordinal, _)| ordinal),
            semantics,
            finalizing: transition.finalizing,
            leaving: transition.leaving,
            entering: transition.entering,
        })
    }

    fn finish(mut self) -> Result<ControlFlowGraph<'a>> {
        self.resolve_pending_gotos();

        let placements: Vec<Option<(usize, RegionId)>> = (0..self.blocks.len())
            .map(|index| self.blocks[self.resolve(BlockId(index)).0].placement)
            .collect();

        let order = std::mem::take(&mut self.order);
        let mut slots: Vec<Option<BlockBuilder<'a>>> = std::mem::take(&mut self.blocks)
            .into_iter()
            .map(Some)
            .collect();

        let mut blocks = Vec::with_capacity(order.len());
        for (ordinal, id) in order.into_iter().enumerate() {
            let builder = slots
                .get_mut(id.0)
                .and_then(Option::take)
                .ok_or_else(|| Error::internal(format!("block {:?} placed twice", id)))?;
            let (_, region) = builder
                .placement
                .ok_or_else(|| Error::internal(format!("block {:?} has no placement", id)))?;

            let conditional = match builder.conditional {
                Some(pending) => {
                    let branch = self.make_branch(
                        (ordinal, region),
                        Some(pending.target),
                        BranchSemantics::Regular,
                        None,
                        &placements,
                    )?;
                    Some(ConditionalBranch {
                        condition: pending.condition,
                        jump_if_true: pending.jump_if_true,
                        constant: pending.constant,
                        branch,
                    })
                }
                None => None,
            };
            let fall_through = match builder.fall_through {
                Some(pending) => Some(self.make_branch(
                    (ordinal, region),
                    pending.target,
                    pending.semantics,
                    pending.origin,
                    &placements,
                )?),
                None => None,
            };

            blocks.push(BasicBlock {
                ordinal,
                kind: builder.kind,
                operations: builder.operations,
                branch_value: builder.branch_value,
                conditional,
                fall_through,
                predecessors: Vec::new(),
                is_reachable: false,
                region,
            });
        }

        let edges: Vec<(usize, usize)> = blocks
            .iter()
            .flat_map(|block| {
                block
                    .branches()
                    .filter_map(|branch| branch.destination.map(|d| (branch.source, d)))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (source, destination) in edges {
            if let Some(block) = blocks.get_mut(destination) {
                block.predecessors.push(source);
            }
        }
        for block in &mut blocks {
            block.predecessors.sort_unstable();
            block.predecessors.dedup();
        }

        self.captures.resolve_scopes(&mut self.regions, &blocks)?;
        reachability::mark(&mut blocks, &self.regions);

        if self.options.report_unreachable {
            self.report_unreachable(&blocks, &placements);
        }

        debug!(
            "Built {} blocks in {} regions with {} captures",
            blocks.len(),
            self.regions.len(),
            self.captures.len()
        );
        let graph = ControlFlowGraph::new(blocks, self.regions);
        if self.options.validate {
            validate::validate(&graph)?;
        }
        Ok(graph)
    }

    /// Warn once per run of consecutive unreachable statements
    fn report_unreachable(
        &mut self,
        blocks: &[BasicBlock<'a>],
        placements: &[Option<(usize, RegionId)>],
    ) {
        let mut previous_unreachable = false;
        for record in &self.statements {
            let ordinal = match record.anchor {
                Anchor::Block(id) => placements.get(id.0).copied().flatten().map(|(o, _)| o),
                Anchor::Placement(ordinal) => Some(ordinal),
            };
            let unreachable = ordinal
                .and_then(|ordinal| blocks.get(ordinal))
                .is_some_and(|block| !block.is_reachable);
            if unreachable && !previous_unreachable {
                self.diagnostics.report(FlowDiagnostic::UnreachableCode {
                    syntax: record.syntax.to_string(),
                });
            }
            previous_unreachable = unreachable;
        }
    }
}

/// Declarations of a `using` resource list, each with the local it declares
fn resource_declarations(resources: &Operation) -> Vec<(&Operation, &Local)> {
    match &resources.kind {
        OperationKind::VariableDeclaration { local, .. } => vec![(resources, local)],
        OperationKind::Block { operations, .. } => operations
            .iter()
            .filter_map(|op| match &op.kind {
                OperationKind::VariableDeclaration { local, .. } => Some((op, local)),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// The lowered form of statement `op` whose single operand `child` lowered to `value`
fn rewrap<'a>(op: &'a Operation, child: &'a Operation, value: FlowOp<'a>) -> FlowOp<'a> {
    match value {
        FlowOp::Original(inner) if std::ptr::eq(inner, child) => FlowOp::Original(op),
        value => FlowOp::Rewritten {
            origin: op,
            operands: vec![value],
        },
    }
}
