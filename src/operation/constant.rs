//! Constant oracle
//!
//! Classifying compile-time constants is not the graph builder's job. The builder only asks
//! whether a boolean condition has a known value, and uses the answer to mark the untaken
//! side of a branch unreachable. The branch itself is always built.

use super::{ConstantValue, Operation};

/// Answers "is this boolean expression a compile-time constant, and which one?"
pub trait ConstantOracle {
    fn try_get_constant_bool(&self, operation: &Operation) -> Option<bool>;
}

/// Oracle that trusts the `constant` annotations already present on the tree
#[derive(Debug, Default, Clone, Copy)]
pub struct AnnotatedConstants;

impl ConstantOracle for AnnotatedConstants {
    fn try_get_constant_bool(&self, operation: &Operation) -> Option<bool> {
        match operation.constant {
            Some(ConstantValue::Bool(value)) => Some(value),
            _ => None,
        }
    }
}

/// Oracle that never resolves anything; every branch stays two-way
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConstants;

impl ConstantOracle for NoConstants {
    fn try_get_constant_bool(&self, _operation: &Operation) -> Option<bool> {
        None
    }
}

impl<F> ConstantOracle for F
where
    F: Fn(&Operation) -> Option<bool>,
{
    fn try_get_constant_bool(&self, operation: &Operation) -> Option<bool> {
        self(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationKind;

    #[test]
    fn annotated_constants_reads_bool_annotations_only() {
        let oracle = AnnotatedConstants;
        let yes = Operation::new(OperationKind::Literal).with_constant(ConstantValue::Bool(true));
        let one = Operation::new(OperationKind::Literal).with_constant(ConstantValue::Int(1));
        let unknown = Operation::new(OperationKind::LocalReference { name: "b".into() });

        assert_eq!(oracle.try_get_constant_bool(&yes), Some(true));
        assert_eq!(oracle.try_get_constant_bool(&one), None);
        assert_eq!(oracle.try_get_constant_bool(&unknown), None);
    }

    #[test]
    fn closures_are_oracles() {
        let oracle = |op: &Operation| (op.syntax == "A()").then_some(true);
        let call = Operation::new(OperationKind::Invocation {
            method: "A".into(),
            instance: None,
            arguments: Vec::new(),
        })
        .with_syntax("A()");

        assert_eq!(oracle.try_get_constant_bool(&call), Some(true));
        assert_eq!(NoConstants.try_get_constant_bool(&call), None);
    }
}
