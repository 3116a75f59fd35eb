//! Constructors for operation trees used across the integration tests
#![allow(dead_code)]

use opflow::cfg::{self, ControlFlowGraph};
use opflow::operation::{
    BinaryOperator, CaseLabel, CatchClause, ConstantValue, Local, Pattern, SwitchCase,
    SwitchExpressionArm,
};
use opflow::{AnnotatedConstants, BuildOptions, Diagnostics, Operation, OperationKind};

pub fn build(body: &Operation) -> (ControlFlowGraph<'_>, Diagnostics) {
    let mut diagnostics = Diagnostics::new();
    let graph = cfg::build(body, &AnnotatedConstants, &BuildOptions::default(), &mut diagnostics)
        .expect("graph builds");
    (graph, diagnostics)
}

pub fn block(operations: Vec<Operation>) -> Operation {
    Operation::new(OperationKind::Block {
        locals: Vec::new(),
        operations,
    })
}

pub fn block_with_locals(locals: Vec<Local>, operations: Vec<Operation>) -> Operation {
    Operation::new(OperationKind::Block { locals, operations })
}

pub fn local(name: &str) -> Local {
    Local::new(name, "int")
}

pub fn local_ref(name: &str) -> Operation {
    Operation::new(OperationKind::LocalReference {
        name: name.to_string(),
    })
    .with_syntax(name)
}

pub fn int(value: i64) -> Operation {
    Operation::new(OperationKind::Literal)
        .with_syntax(value.to_string())
        .with_type("int")
        .with_constant(ConstantValue::Int(value))
}

pub fn bool_lit(value: bool) -> Operation {
    Operation::new(OperationKind::Literal)
        .with_syntax(value.to_string())
        .with_type("bool")
        .with_constant(ConstantValue::Bool(value))
}

pub fn null() -> Operation {
    Operation::new(OperationKind::Literal)
        .with_syntax("null")
        .with_constant(ConstantValue::Null)
}

/// A call whose syntax is `name()`
pub fn call(name: &str) -> Operation {
    Operation::new(OperationKind::Invocation {
        method: name.to_string(),
        instance: None,
        arguments: Vec::new(),
    })
    .with_syntax(format!("{}()", name))
    .with_type("bool")
}

pub fn call_with(name: &str, arguments: Vec<Operation>, syntax: &str) -> Operation {
    Operation::new(OperationKind::Invocation {
        method: name.to_string(),
        instance: None,
        arguments,
    })
    .with_syntax(syntax)
}

pub fn binary(operator: BinaryOperator, left: Operation, right: Operation, syntax: &str) -> Operation {
    Operation::new(OperationKind::Binary {
        operator,
        left: Box::new(left),
        right: Box::new(right),
    })
    .with_syntax(syntax)
}

pub fn or(left: Operation, right: Operation, syntax: &str) -> Operation {
    binary(BinaryOperator::ConditionalOr, left, right, syntax).with_type("bool")
}

pub fn and(left: Operation, right: Operation, syntax: &str) -> Operation {
    binary(BinaryOperator::ConditionalAnd, left, right, syntax).with_type("bool")
}

pub fn greater(left: Operation, right: Operation, syntax: &str) -> Operation {
    binary(BinaryOperator::GreaterThan, left, right, syntax).with_type("bool")
}

pub fn conditional(condition: Operation, when_true: Operation, when_false: Operation, syntax: &str) -> Operation {
    Operation::new(OperationKind::Conditional {
        condition: Box::new(condition),
        when_true: Box::new(when_true),
        when_false: Box::new(when_false),
    })
    .with_syntax(syntax)
}

pub fn coalesce(value: Operation, when_null: Operation, syntax: &str) -> Operation {
    Operation::new(OperationKind::Coalesce {
        value: Box::new(value),
        when_null: Box::new(when_null),
    })
    .with_syntax(syntax)
}

pub fn throw_expression(exception: Operation, syntax: &str) -> Operation {
    Operation::new(OperationKind::ThrowExpression {
        exception: Box::new(exception),
    })
    .with_syntax(syntax)
}

pub fn assign(name: &str, value: Operation) -> Operation {
    let syntax = format!("{} = {}", name, value.display_text());
    Operation::new(OperationKind::Assignment {
        target: Box::new(local_ref(name)),
        value: Box::new(value),
    })
    .with_syntax(syntax)
}

/// `name = value;` as a statement
pub fn assign_stmt(name: &str, value: Operation) -> Operation {
    expr_stmt(assign(name, value))
}

pub fn expr_stmt(operation: Operation) -> Operation {
    let syntax = format!("{};", operation.display_text());
    Operation::new(OperationKind::ExpressionStatement {
        operation: Box::new(operation),
    })
    .with_syntax(syntax)
}

pub fn declare(name: &str, initializer: Option<Operation>) -> Operation {
    let syntax = match &initializer {
        Some(value) => format!("int {} = {};", name, value.display_text()),
        None => format!("int {};", name),
    };
    Operation::new(OperationKind::VariableDeclaration {
        local: local(name),
        initializer: initializer.map(Box::new),
    })
    .with_syntax(syntax)
}

pub fn if_stmt(condition: Operation, when_true: Operation, when_false: Option<Operation>) -> Operation {
    let syntax = format!("if ({})", condition.display_text());
    Operation::new(OperationKind::If {
        condition: Box::new(condition),
        when_true: Box::new(when_true),
        when_false: when_false.map(Box::new),
    })
    .with_syntax(syntax)
}

pub fn while_stmt(condition: Operation, body: Operation) -> Operation {
    let syntax = format!("while ({})", condition.display_text());
    Operation::new(OperationKind::While {
        condition: Box::new(condition),
        body: Box::new(body),
    })
    .with_syntax(syntax)
}

pub fn do_while(body: Operation, condition: Operation) -> Operation {
    let syntax = format!("do ... while ({});", condition.display_text());
    Operation::new(OperationKind::DoWhile {
        body: Box::new(body),
        condition: Box::new(condition),
    })
    .with_syntax(syntax)
}

pub fn for_stmt(
    locals: Vec<Local>,
    before: Vec<Operation>,
    condition: Option<Operation>,
    at_loop_bottom: Vec<Operation>,
    body: Operation,
) -> Operation {
    Operation::new(OperationKind::For {
        locals,
        before,
        condition: condition.map(Box::new),
        at_loop_bottom,
        body: Box::new(body),
    })
    .with_syntax("for (...)")
}

pub fn switch_stmt(value: Operation, cases: Vec<SwitchCase>) -> Operation {
    let syntax = format!("switch ({})", value.display_text());
    Operation::new(OperationKind::Switch {
        value: Box::new(value),
        cases,
        locals: Vec::new(),
    })
    .with_syntax(syntax)
}

pub fn case(labels: Vec<CaseLabel>, body: Vec<Operation>) -> SwitchCase {
    SwitchCase { labels, body }
}

pub fn case_value(value: i64) -> CaseLabel {
    CaseLabel::Pattern {
        pattern: Pattern::Constant {
            value: Box::new(int(value)),
        },
        guard: None,
    }
}

pub fn switch_expression(value: Operation, arms: Vec<SwitchExpressionArm>, syntax: &str) -> Operation {
    Operation::new(OperationKind::SwitchExpression {
        value: Box::new(value),
        arms,
    })
    .with_syntax(syntax)
}

pub fn arm(pattern: Pattern, guard: Option<Operation>, value: Operation) -> SwitchExpressionArm {
    SwitchExpressionArm {
        pattern,
        guard: guard.map(Box::new),
        value: Box::new(value),
        locals: Vec::new(),
    }
}

pub fn labeled(label: &str, operation: Option<Operation>) -> Operation {
    Operation::new(OperationKind::Labeled {
        label: label.to_string(),
        operation: operation.map(Box::new),
    })
    .with_syntax(format!("{}:", label))
}

pub fn goto(label: &str) -> Operation {
    Operation::new(OperationKind::Goto {
        label: label.to_string(),
    })
    .with_syntax(format!("goto {};", label))
}

pub fn break_stmt() -> Operation {
    Operation::new(OperationKind::Break).with_syntax("break;")
}

pub fn continue_stmt() -> Operation {
    Operation::new(OperationKind::Continue).with_syntax("continue;")
}

pub fn return_stmt(value: Option<Operation>) -> Operation {
    let syntax = match &value {
        Some(value) => format!("return {};", value.display_text()),
        None => "return;".to_string(),
    };
    Operation::new(OperationKind::Return {
        value: value.map(Box::new),
    })
    .with_syntax(syntax)
}

pub fn throw(exception: Operation) -> Operation {
    let syntax = format!("throw {};", exception.display_text());
    Operation::new(OperationKind::Throw {
        exception: Some(Box::new(exception)),
    })
    .with_syntax(syntax)
}

pub fn rethrow() -> Operation {
    Operation::new(OperationKind::Throw { exception: None }).with_syntax("throw;")
}

pub fn try_stmt(body: Operation, catches: Vec<CatchClause>, finally: Option<Operation>) -> Operation {
    Operation::new(OperationKind::Try {
        body: Box::new(body),
        catches,
        finally: finally.map(Box::new),
    })
    .with_syntax("try")
}

pub fn using_stmt(locals: Vec<Local>, resources: Operation, body: Operation) -> Operation {
    let syntax = format!("using ({})", resources.display_text());
    Operation::new(OperationKind::Using {
        locals,
        resources: Box::new(resources),
        body: Box::new(body),
    })
    .with_syntax(syntax)
}

pub fn lock_stmt(value: Operation, body: Operation) -> Operation {
    let syntax = format!("lock ({})", value.display_text());
    Operation::new(OperationKind::Lock {
        value: Box::new(value),
        body: Box::new(body),
    })
    .with_syntax(syntax)
}

pub fn for_each(name: &str, collection: Operation, body: Operation) -> Operation {
    let syntax = format!("foreach (var {} in {})", name, collection.display_text());
    Operation::new(OperationKind::ForEach {
        local: local(name),
        collection: Box::new(collection),
        body: Box::new(body),
    })
    .with_syntax(syntax)
}

pub fn catch_all(handler: Operation) -> CatchClause {
    CatchClause {
        exception_type: None,
        local: None,
        filter: None,
        filter_locals: Vec::new(),
        handler: Box::new(handler),
    }
}

pub fn catch_typed(exception_type: &str, local_name: Option<&str>, handler: Operation) -> CatchClause {
    CatchClause {
        exception_type: Some(exception_type.to_string()),
        local: local_name.map(|name| Local::new(name, exception_type)),
        filter: None,
        filter_locals: Vec::new(),
        handler: Box::new(handler),
    }
}

pub fn catch_filtered(
    exception_type: Option<&str>,
    local_name: Option<&str>,
    filter: Operation,
    handler: Operation,
) -> CatchClause {
    CatchClause {
        exception_type: exception_type.map(str::to_string),
        local: local_name.map(|name| Local::new(name, exception_type.unwrap_or("object"))),
        filter: Some(Box::new(filter)),
        filter_locals: Vec::new(),
        handler: Box::new(handler),
    }
}
