//! Operation tree
//!
//! The input of the graph builder: a structured, already type-checked statement body.
//! Nodes are immutable; the builder only ever holds `&'a Operation` references into the
//! tree. Symbols are resolved to names and types are carried as display strings, which is
//! all the graph needs.

pub mod constant;

pub use constant::{AnnotatedConstants, ConstantOracle, NoConstants};

use serde::{Deserialize, Serialize};
use std::fmt;

/// A compile-time constant value attached to a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstantValue {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
}

impl fmt::Display for ConstantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstantValue::Null => write!(f, "null"),
            ConstantValue::Bool(value) => write!(f, "{}", value),
            ConstantValue::Int(value) => write!(f, "{}", value),
            ConstantValue::String(value) => write!(f, "{:?}", value),
        }
    }
}

/// A declared local variable
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Local {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

impl Local {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }
}

impl fmt::Display for Local {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]", self.ty, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOperator {
    Not,
    Minus,
    Plus,
    BitwiseNegation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
    ExclusiveOr,
    /// `&&`, only evaluates the right operand when the left is true
    ConditionalAnd,
    /// `||`, only evaluates the right operand when the left is false
    ConditionalOr,
}

impl BinaryOperator {
    pub fn is_short_circuit(self) -> bool {
        matches!(
            self,
            BinaryOperator::ConditionalAnd | BinaryOperator::ConditionalOr
        )
    }
}

/// Patterns used by `is`, switch case labels and switch expression arms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pattern {
    /// `_`
    Discard,
    /// Matches a constant value
    Constant { value: Box<Operation> },
    /// Matches a runtime type
    Type {
        #[serde(rename = "type")]
        ty: String,
    },
    /// `T x` or `var x`; `ty: None` is `var`
    Declaration {
        #[serde(default, rename = "type")]
        ty: Option<String>,
        #[serde(default)]
        local: Option<Local>,
    },
    Not { pattern: Box<Pattern> },
}

impl Pattern {
    /// Whether the pattern matches every value of the input type
    pub fn is_irrefutable(&self) -> bool {
        matches!(self, Pattern::Discard | Pattern::Declaration { ty: None, .. })
    }

    /// Local bound by the pattern, if any
    pub fn declared_local(&self) -> Option<&Local> {
        match self {
            Pattern::Declaration { local, .. } => local.as_ref(),
            Pattern::Not { pattern } => pattern.declared_local(),
            _ => None,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Discard => write!(f, "_"),
            Pattern::Constant { value } => write!(f, "{}", value.display_text()),
            Pattern::Type { ty } => write!(f, "{}", ty),
            Pattern::Declaration { ty, local } => {
                write!(f, "{}", ty.as_deref().unwrap_or("var"))?;
                if let Some(local) = local {
                    write!(f, " {}", local.name)?;
                }
                Ok(())
            }
            Pattern::Not { pattern } => write!(f, "not {}", pattern),
        }
    }
}

/// One `catch` clause of a try statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    /// Caught exception type; `None` catches everything
    #[serde(default)]
    pub exception_type: Option<String>,
    /// Local the exception is bound to
    #[serde(default)]
    pub local: Option<Local>,
    /// `when (...)` filter
    #[serde(default)]
    pub filter: Option<Box<Operation>>,
    /// Locals declared by patterns inside the filter, shared with the handler
    #[serde(default)]
    pub filter_locals: Vec<Local>,
    pub handler: Box<Operation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaseLabel {
    Default,
    Pattern {
        pattern: Pattern,
        #[serde(default)]
        guard: Option<Box<Operation>>,
    },
}

/// A section of a switch statement: its labels and the statements they select
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub labels: Vec<CaseLabel>,
    #[serde(default)]
    pub body: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchExpressionArm {
    pub pattern: Pattern,
    #[serde(default)]
    pub guard: Option<Box<Operation>>,
    pub value: Box<Operation>,
    /// Locals bound by the pattern, scoped to this arm
    #[serde(default)]
    pub locals: Vec<Local>,
}

/// Node kinds, statements first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationKind {
    Block {
        #[serde(default)]
        locals: Vec<Local>,
        #[serde(default)]
        operations: Vec<Operation>,
    },
    ExpressionStatement {
        operation: Box<Operation>,
    },
    VariableDeclaration {
        local: Local,
        #[serde(default)]
        initializer: Option<Box<Operation>>,
    },
    Empty,
    If {
        condition: Box<Operation>,
        when_true: Box<Operation>,
        #[serde(default)]
        when_false: Option<Box<Operation>>,
    },
    While {
        condition: Box<Operation>,
        body: Box<Operation>,
    },
    DoWhile {
        body: Box<Operation>,
        condition: Box<Operation>,
    },
    For {
        #[serde(default)]
        locals: Vec<Local>,
        #[serde(default)]
        before: Vec<Operation>,
        #[serde(default)]
        condition: Option<Box<Operation>>,
        #[serde(default)]
        at_loop_bottom: Vec<Operation>,
        body: Box<Operation>,
    },
    Switch {
        value: Box<Operation>,
        cases: Vec<SwitchCase>,
        #[serde(default)]
        locals: Vec<Local>,
    },
    Labeled {
        label: String,
        #[serde(default)]
        operation: Option<Box<Operation>>,
    },
    Goto {
        label: String,
    },
    Break,
    Continue,
    Return {
        #[serde(default)]
        value: Option<Box<Operation>>,
    },
    /// `throw e;`, or a bare `throw;` rethrow when `exception` is absent
    Throw {
        #[serde(default)]
        exception: Option<Box<Operation>>,
    },
    Try {
        body: Box<Operation>,
        #[serde(default)]
        catches: Vec<CatchClause>,
        #[serde(default)]
        finally: Option<Box<Operation>>,
    },
    /// `using (resources) body`.
    ///
    /// `resources` is a declaration, a block of declarations, or an expression whose value
    /// is disposed.
    Using {
        #[serde(default)]
        locals: Vec<Local>,
        resources: Box<Operation>,
        body: Box<Operation>,
    },
    Lock {
        value: Box<Operation>,
        body: Box<Operation>,
    },
    /// `foreach (local in collection) body`
    ForEach {
        local: Local,
        collection: Box<Operation>,
        body: Box<Operation>,
    },

    /// Constant leaf; the value lives in [`Operation::constant`]
    Literal,
    LocalReference {
        name: String,
    },
    ParameterReference {
        name: String,
    },
    Assignment {
        target: Box<Operation>,
        value: Box<Operation>,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<Operation>,
    },
    Binary {
        operator: BinaryOperator,
        left: Box<Operation>,
        right: Box<Operation>,
    },
    /// `c ? x : y`
    Conditional {
        condition: Box<Operation>,
        when_true: Box<Operation>,
        when_false: Box<Operation>,
    },
    /// `x ?? y`
    Coalesce {
        value: Box<Operation>,
        when_null: Box<Operation>,
    },
    ThrowExpression {
        exception: Box<Operation>,
    },
    Invocation {
        method: String,
        #[serde(default)]
        instance: Option<Box<Operation>>,
        #[serde(default)]
        arguments: Vec<Operation>,
    },
    Argument {
        #[serde(default)]
        parameter: Option<String>,
        value: Box<Operation>,
    },
    IsPattern {
        value: Box<Operation>,
        pattern: Pattern,
    },
    SwitchExpression {
        value: Box<Operation>,
        arms: Vec<SwitchExpressionArm>,
    },
}

/// A node of the operation tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(flatten)]
    pub kind: OperationKind,
    /// Source text of the node, used for rendering and diagnostics
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub syntax: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constant: Option<ConstantValue>,
}

impl Operation {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            syntax: String::new(),
            ty: None,
            constant: None,
        }
    }

    pub fn with_syntax(mut self, syntax: impl Into<String>) -> Self {
        self.syntax = syntax.into();
        self
    }

    pub fn with_type(mut self, ty: impl Into<String>) -> Self {
        self.ty = Some(ty.into());
        self
    }

    pub fn with_constant(mut self, constant: ConstantValue) -> Self {
        self.constant = Some(constant);
        self
    }

    /// Short name of the node kind
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            OperationKind::Block { .. } => "Block",
            OperationKind::ExpressionStatement { .. } => "ExpressionStatement",
            OperationKind::VariableDeclaration { .. } => "VariableDeclaration",
            OperationKind::Empty => "Empty",
            OperationKind::If { .. } => "If",
            OperationKind::While { .. } => "While",
            OperationKind::DoWhile { .. } => "DoWhile",
            OperationKind::For { .. } => "For",
            OperationKind::Switch { .. } => "Switch",
            OperationKind::Labeled { .. } => "Labeled",
            OperationKind::Goto { .. } => "Goto",
            OperationKind::Break => "Break",
            OperationKind::Continue => "Continue",
            OperationKind::Return { .. } => "Return",
            OperationKind::Throw { .. } => "Throw",
            OperationKind::Try { .. } => "Try",
            OperationKind::Using { .. } => "Using",
            OperationKind::Lock { .. } => "Lock",
            OperationKind::ForEach { .. } => "ForEach",
            OperationKind::Literal => "Literal",
            OperationKind::LocalReference { .. } => "LocalReference",
            OperationKind::ParameterReference { .. } => "ParameterReference",
            OperationKind::Assignment { .. } => "Assignment",
            OperationKind::Unary { .. } => "Unary",
            OperationKind::Binary { .. } => "Binary",
            OperationKind::Conditional { .. } => "Conditional",
            OperationKind::Coalesce { .. } => "Coalesce",
            OperationKind::ThrowExpression { .. } => "ThrowExpression",
            OperationKind::Invocation { .. } => "Invocation",
            OperationKind::Argument { .. } => "Argument",
            OperationKind::IsPattern { .. } => "IsPattern",
            OperationKind::SwitchExpression { .. } => "SwitchExpression",
        }
    }

    /// Source text, or the kind name when the node carries none
    pub fn display_text(&self) -> &str {
        if self.syntax.is_empty() {
            self.kind_name()
        } else {
            &self.syntax
        }
    }

    /// Whether the node is a statement rather than an expression
    pub fn is_statement(&self) -> bool {
        matches!(
            self.kind,
            OperationKind::Block { .. }
                | OperationKind::ExpressionStatement { .. }
                | OperationKind::VariableDeclaration { .. }
                | OperationKind::Empty
                | OperationKind::If { .. }
                | OperationKind::While { .. }
                | OperationKind::DoWhile { .. }
                | OperationKind::For { .. }
                | OperationKind::Switch { .. }
                | OperationKind::Labeled { .. }
                | OperationKind::Goto { .. }
                | OperationKind::Break
                | OperationKind::Continue
                | OperationKind::Return { .. }
                | OperationKind::Throw { .. }
                | OperationKind::Try { .. }
                | OperationKind::Using { .. }
                | OperationKind::Lock { .. }
                | OperationKind::ForEach { .. }
        )
    }

    /// Value operands in evaluation order.
    ///
    /// Nested statements of compound statements are not operands and are not returned.
    pub fn children(&self) -> Vec<&Operation> {
        match &self.kind {
            OperationKind::ExpressionStatement { operation } => vec![operation.as_ref()],
            OperationKind::VariableDeclaration { initializer, .. } => {
                initializer.iter().map(|op| op.as_ref()).collect()
            }
            OperationKind::Return { value } => value.iter().map(|op| op.as_ref()).collect(),
            OperationKind::Throw { exception } => {
                exception.iter().map(|op| op.as_ref()).collect()
            }
            OperationKind::Assignment { target, value } => vec![target.as_ref(), value.as_ref()],
            OperationKind::Unary { operand, .. } => vec![operand.as_ref()],
            OperationKind::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            OperationKind::Conditional {
                condition,
                when_true,
                when_false,
            } => vec![condition.as_ref(), when_true.as_ref(), when_false.as_ref()],
            OperationKind::Coalesce { value, when_null } => vec![value.as_ref(), when_null.as_ref()],
            OperationKind::ThrowExpression { exception } => vec![exception.as_ref()],
            OperationKind::Invocation {
                instance,
                arguments,
                ..
            } => instance
                .iter()
                .map(|op| op.as_ref())
                .chain(arguments.iter())
                .collect(),
            OperationKind::Argument { value, .. } => vec![value.as_ref()],
            OperationKind::IsPattern { value, .. } => vec![value.as_ref()],
            OperationKind::SwitchExpression { value, arms } => {
                let mut children: Vec<&Operation> = vec![value.as_ref()];
                for arm in arms {
                    children.extend(arm.guard.as_deref());
                    children.push(arm.value.as_ref());
                }
                children
            }
            _ => Vec::new(),
        }
    }

    /// Whether evaluating this expression needs more than one basic block
    pub fn has_control_flow(&self) -> bool {
        match &self.kind {
            OperationKind::Binary { operator, .. } if operator.is_short_circuit() => true,
            OperationKind::Conditional { .. }
            | OperationKind::Coalesce { .. }
            | OperationKind::ThrowExpression { .. }
            | OperationKind::SwitchExpression { .. } => true,
            _ => self.children().iter().any(|child| child.has_control_flow()),
        }
    }

    /// Whether reading the value later yields the same result as reading it now.
    ///
    /// Stable operands are not spilled to captures when a later operand branches.
    pub fn is_stable(&self) -> bool {
        matches!(self.kind, OperationKind::Literal) || self.constant.is_some()
    }

    /// Visit this node and all value descendants in evaluation order
    pub fn walk<'a>(&'a self, visitor: &mut dyn FnMut(&'a Operation)) {
        visitor(self);
        for child in self.children() {
            child.walk(visitor);
        }
    }

    /// Names of locals this node reads, writes or declares
    pub fn local_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.walk(&mut |op| match &op.kind {
            OperationKind::LocalReference { name } => names.push(name.as_str()),
            OperationKind::VariableDeclaration { local, .. } => names.push(local.name.as_str()),
            OperationKind::IsPattern { pattern, .. } => {
                if let Some(local) = pattern.declared_local() {
                    names.push(local.name.as_str());
                }
            }
            _ => {}
        });
        names
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_text())
    }
}
