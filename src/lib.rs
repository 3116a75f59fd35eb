//! opflow: control flow graphs for structured operation trees
//!
//! This library lowers a type-checked, tree-shaped operation representation of a method
//! body into basic blocks nested in exception-handling and scoping regions. Short-circuit
//! and conditional expressions are split across blocks with flow captures, and every block
//! is marked reachable or not.

pub mod cfg;
pub mod cli;
pub mod diagnostics;
pub mod error;
pub mod operation;
pub mod options;

pub use cfg::{build, ControlFlowGraph, DotOptions, GraphBuilder};
pub use diagnostics::{Diagnostics, FlowDiagnostic};
pub use error::{Error, Result};
pub use operation::{AnnotatedConstants, ConstantOracle, NoConstants, Operation, OperationKind};
pub use options::BuildOptions;
