//! Diagnostics for problems in the input program
//!
//! These never abort a build. The builder reports them while lowering the offending
//! construct and keeps going, so callers always get a best-effort graph back.

use miette::{Diagnostic, Severity};
use serde::Serialize;
use thiserror::Error;

/// A problem found in the program being lowered
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum FlowDiagnostic {
    #[error("A rethrow is not allowed inside a finally clause nested in a catch: `{syntax}`")]
    #[diagnostic(
        code(opflow::rethrow_inside_finally),
        help("rethrow the exception from the catch clause itself")
    )]
    RethrowInsideFinally { syntax: String },

    #[error("A rethrow is only allowed inside a catch clause: `{syntax}`")]
    #[diagnostic(code(opflow::rethrow_outside_catch))]
    RethrowOutsideCatch { syntax: String },

    #[error("Control cannot leave the body of a finally clause: `{syntax}`")]
    #[diagnostic(code(opflow::leaving_finally))]
    LeavingFinally { syntax: String },

    #[error("Unreachable code detected: `{syntax}`")]
    #[diagnostic(code(opflow::unreachable_code), severity(Warning))]
    UnreachableCode { syntax: String },

    #[error("No such label `{label}` within the scope of the goto: `{syntax}`")]
    #[diagnostic(code(opflow::undefined_label))]
    UndefinedLabel { label: String, syntax: String },

    #[error("The label `{label}` is a duplicate")]
    #[diagnostic(code(opflow::duplicate_label))]
    DuplicateLabel { label: String },

    #[error("No enclosing loop or switch out of which to break: `{syntax}`")]
    #[diagnostic(code(opflow::break_outside_loop))]
    BreakOutsideLoop { syntax: String },

    #[error("No enclosing loop to continue: `{syntax}`")]
    #[diagnostic(code(opflow::continue_outside_loop))]
    ContinueOutsideLoop { syntax: String },
}

impl FlowDiagnostic {
    /// Severity of this diagnostic, `Error` unless marked otherwise
    pub fn level(&self) -> Severity {
        self.severity().unwrap_or(Severity::Error)
    }

    pub fn is_error(&self) -> bool {
        self.level() == Severity::Error
    }
}

/// Collector passed explicitly to [`crate::cfg::build`]
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    entries: Vec<FlowDiagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, diagnostic: FlowDiagnostic) {
        log::debug!("reported: {}", diagnostic);
        self.entries.push(diagnostic);
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlowDiagnostic> {
        self.entries.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &FlowDiagnostic> {
        self.entries.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &FlowDiagnostic> {
        self.entries.iter().filter(|d| !d.is_error())
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<FlowDiagnostic> {
        self.entries
    }
}

impl IntoIterator for Diagnostics {
    type Item = FlowDiagnostic;
    type IntoIter = std::vec::IntoIter<FlowDiagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
