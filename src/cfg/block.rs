//! Basic block module
//!
//! Blocks, branches and the lowered operations blocks hold.

use crate::cfg::capture::CaptureId;
use crate::cfg::regions::RegionId;
use crate::operation::{ConstantValue, Local, Operation, Pattern};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BlockKind {
    Entry,
    Exit,
    Block,
}

/// How control leaves a block along an edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BranchSemantics {
    Regular,
    Return,
    Throw,
    Rethrow,
    /// Fall-off from a finally or a failed filter: resume the exception dispatch search
    StructuredExceptionHandling,
}

impl BranchSemantics {
    /// Whether edges with these semantics never name a destination block
    pub fn is_non_local(self) -> bool {
        matches!(
            self,
            BranchSemantics::Throw
                | BranchSemantics::Rethrow
                | BranchSemantics::StructuredExceptionHandling
        )
    }
}

impl fmt::Display for BranchSemantics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BranchSemantics::Regular => "Regular",
            BranchSemantics::Return => "Return",
            BranchSemantics::Throw => "Throw",
            BranchSemantics::Rethrow => "Rethrow",
            BranchSemantics::StructuredExceptionHandling => "StructuredExceptionHandling",
        };
        f.write_str(name)
    }
}

/// An edge out of a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlFlowBranch {
    pub source: usize,
    /// Target block; `None` for throw, rethrow and unwind edges
    pub destination: Option<usize>,
    pub semantics: BranchSemantics,
    /// Finally regions run on the way, innermost first
    pub finalizing: Vec<RegionId>,
    /// Regions exited, innermost first
    pub leaving: Vec<RegionId>,
    /// Regions entered, outermost first
    pub entering: Vec<RegionId>,
}

/// The conditional half of a two-way block exit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionalBranch<'a> {
    pub condition: FlowOp<'a>,
    /// Branch is taken when the condition evaluates to this value
    pub jump_if_true: bool,
    /// Value of the condition when it is a compile-time constant
    pub constant: Option<bool>,
    pub branch: ControlFlowBranch,
}

impl ConditionalBranch<'_> {
    /// Whether the constant condition makes this branch always or never taken
    pub fn is_taken(&self) -> Option<bool> {
        self.constant.map(|value| value == self.jump_if_true)
    }
}

/// A basic block of the finished graph
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasicBlock<'a> {
    pub ordinal: usize,
    pub kind: BlockKind,
    pub operations: Vec<FlowOp<'a>>,
    /// Returned value or thrown operand
    pub branch_value: Option<FlowOp<'a>>,
    pub conditional: Option<ConditionalBranch<'a>>,
    pub fall_through: Option<ControlFlowBranch>,
    pub predecessors: Vec<usize>,
    pub is_reachable: bool,
    pub region: RegionId,
}

impl<'a> BasicBlock<'a> {
    /// Outgoing edges, conditional branch first
    pub fn branches(&self) -> impl Iterator<Item = &ControlFlowBranch> {
        self.conditional
            .as_ref()
            .map(|conditional| &conditional.branch)
            .into_iter()
            .chain(self.fall_through.as_ref())
    }

    /// Destination ordinals of all outgoing edges
    pub fn successors(&self) -> impl Iterator<Item = usize> + '_ {
        self.branches().filter_map(|branch| branch.destination)
    }

    /// Whether the block leaves through throw, rethrow or unwinding
    pub fn has_non_local_exit(&self) -> bool {
        self.fall_through
            .as_ref()
            .is_some_and(|branch| branch.semantics.is_non_local())
    }

    /// Every lowered operation of the block, including the condition and branch value
    pub fn all_operations(&self) -> impl Iterator<Item = &FlowOp<'a>> {
        self.operations
            .iter()
            .chain(self.conditional.as_ref().map(|c| &c.condition))
            .chain(self.branch_value.as_ref())
    }
}

/// Name of the flag `lock` sets once the monitor is entered
pub const LOCK_TAKEN: &str = "lockTaken";

/// Calls inserted by the lowering of `using`, `lock` and `foreach`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ImplicitCall {
    GetEnumerator,
    MoveNext,
    Current,
    Dispose,
    MonitorEnter,
    MonitorExit,
}

impl fmt::Display for ImplicitCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImplicitCall::GetEnumerator => "GetEnumerator",
            ImplicitCall::MoveNext => "MoveNext",
            ImplicitCall::Current => "Current",
            ImplicitCall::Dispose => "Dispose",
            ImplicitCall::MonitorEnter => "MonitorEnter",
            ImplicitCall::MonitorExit => "MonitorExit",
        };
        f.write_str(name)
    }
}

/// How a flow operation touches a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureUse {
    Write,
    Read,
}

/// An operation as stored in a block.
///
/// Nodes that need no rewriting point straight into the input tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op")]
pub enum FlowOp<'a> {
    Original(&'a Operation),
    /// `origin` with some operands replaced by their lowered forms
    Rewritten {
        origin: &'a Operation,
        operands: Vec<FlowOp<'a>>,
    },
    FlowCapture {
        id: CaptureId,
        value: Box<FlowOp<'a>>,
    },
    FlowCaptureReference {
        id: CaptureId,
    },
    /// Synthesized constant, such as the short-circuit result of `&&`
    Constant {
        value: ConstantValue,
    },
    IsNull {
        operand: Box<FlowOp<'a>>,
    },
    PatternTest {
        value: Box<FlowOp<'a>>,
        pattern: &'a Pattern,
    },
    /// Binds the caught exception to the catch local
    CatchLocalInitializer {
        local: &'a Local,
        exception_type: Option<&'a str>,
    },
    /// Thrown operand when no switch expression arm matches
    NoMatchingArm {
        origin: &'a Operation,
    },
    ImplicitCall {
        call: ImplicitCall,
        operands: Vec<FlowOp<'a>>,
    },
    /// Read of a local that has no reference node in the input, such as a `using` resource
    LocalReference {
        local: &'a Local,
    },
    /// Assignment to a local declared by the lowered statement, such as a `foreach` variable
    LocalInitializer {
        local: &'a Local,
        value: Box<FlowOp<'a>>,
    },
    /// The flag set by entering the monitor of a `lock`
    LockTaken,
}

impl<'a> FlowOp<'a> {
    /// Call `visitor` for every capture written or read, in evaluation order
    pub fn for_each_capture(&self, visitor: &mut dyn FnMut(CaptureId, CaptureUse)) {
        match self {
            FlowOp::FlowCapture { id, value } => {
                value.for_each_capture(visitor);
                visitor(*id, CaptureUse::Write);
            }
            FlowOp::FlowCaptureReference { id } => visitor(*id, CaptureUse::Read),
            FlowOp::Rewritten { operands, .. } => {
                for operand in operands {
                    operand.for_each_capture(visitor);
                }
            }
            FlowOp::IsNull { operand } => operand.for_each_capture(visitor),
            FlowOp::PatternTest { value, .. } => value.for_each_capture(visitor),
            FlowOp::ImplicitCall { operands, .. } => {
                for operand in operands {
                    operand.for_each_capture(visitor);
                }
            }
            FlowOp::LocalInitializer { value, .. } => value.for_each_capture(visitor),
            FlowOp::Original(_)
            | FlowOp::Constant { .. }
            | FlowOp::CatchLocalInitializer { .. }
            | FlowOp::NoMatchingArm { .. }
            | FlowOp::LocalReference { .. }
            | FlowOp::LockTaken => {}
        }
    }

    /// Input node this operation was lowered from, if any
    pub fn origin(&self) -> Option<&'a Operation> {
        match self {
            FlowOp::Original(origin)
            | FlowOp::Rewritten { origin, .. }
            | FlowOp::NoMatchingArm { origin } => Some(*origin),
            _ => None,
        }
    }

    /// Names of locals the operation touches
    pub fn local_names(&self) -> Vec<&'a str> {
        match self {
            FlowOp::Original(op) => op.local_names(),
            FlowOp::Rewritten { operands, .. } => {
                operands.iter().flat_map(|operand| operand.local_names()).collect()
            }
            FlowOp::FlowCapture { value, .. } => value.local_names(),
            FlowOp::IsNull { operand } => operand.local_names(),
            FlowOp::PatternTest { value, pattern } => {
                let mut names = value.local_names();
                names.extend(pattern.declared_local().map(|local| local.name.as_str()));
                names
            }
            FlowOp::CatchLocalInitializer { local, .. } | FlowOp::LocalReference { local } => {
                vec![local.name.as_str()]
            }
            FlowOp::ImplicitCall { operands, .. } => {
                operands.iter().flat_map(|operand| operand.local_names()).collect()
            }
            FlowOp::LocalInitializer { local, value } => {
                let mut names = vec![local.name.as_str()];
                names.extend(value.local_names());
                names
            }
            FlowOp::LockTaken => vec![LOCK_TAKEN],
            FlowOp::FlowCaptureReference { .. }
            | FlowOp::Constant { .. }
            | FlowOp::NoMatchingArm { .. } => Vec::new(),
        }
    }
}

impl fmt::Display for FlowOp<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowOp::Original(op) => write!(f, "{}", op.display_text()),
            FlowOp::Rewritten { origin, operands } => {
                write!(f, "{}(", origin.kind_name())?;
                for (index, operand) in operands.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", operand)?;
                }
                write!(f, ")")
            }
            FlowOp::FlowCapture { id, value } => write!(f, "{} = {}", id, value),
            FlowOp::FlowCaptureReference { id } => write!(f, "{}", id),
            FlowOp::Constant { value } => write!(f, "{}", value),
            FlowOp::IsNull { operand } => write!(f, "IsNull({})", operand),
            FlowOp::PatternTest { value, pattern } => write!(f, "{} is {}", value, pattern),
            FlowOp::CatchLocalInitializer {
                local,
                exception_type,
            } => write!(
                f,
                "{} = CaughtException({})",
                local.name,
                exception_type.unwrap_or("object")
            ),
            FlowOp::NoMatchingArm { .. } => write!(f, "SwitchExpressionException()"),
            FlowOp::ImplicitCall { call, operands } => {
                write!(f, "{}(", call)?;
                for (index, operand) in operands.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", operand)?;
                }
                write!(f, ")")
            }
            FlowOp::LocalReference { local } => write!(f, "{}", local.name),
            FlowOp::LocalInitializer { local, value } => write!(f, "{} = {}", local.name, value),
            FlowOp::LockTaken => f.write_str(LOCK_TAKEN),
        }
    }
}
