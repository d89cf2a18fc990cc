#![allow(missing_docs)]

use thiserror::Error;

/// Structured errors emitted while translating or compiling predicates.
///
/// Each error is local to the subtree that produced it; callers decide
/// whether to drop the predicate or abandon pushdown.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The host predicate has no filter mapping.
    #[error("cannot push down predicate: {predicate}")]
    UnsupportedPredicate { predicate: String },
    /// Leaf or composite referenced an empty attribute name.
    #[error("{context} requires a non-empty attribute")]
    EmptyAttribute { context: &'static str },
    /// Attribute is absent from the declared schema.
    #[error("unknown attribute '{attribute}'")]
    UnknownAttribute { attribute: String },
    /// Wrong number of literal operands for the comparator.
    #[error("{function}() on '{attribute}' expects {expected} value(s) (got {found})")]
    ValueArity {
        function: &'static str,
        attribute: String,
        expected: &'static str,
        found: usize,
    },
    /// Composite node has the wrong number of children.
    #[error("{function}() expects {expected} child filter(s) (got {found})")]
    ChildArity {
        function: &'static str,
        expected: &'static str,
        found: usize,
    },
    /// Null literal in a comparison; comparing with null never matches.
    #[error("{function}() on '{attribute}' does not accept null literals")]
    NullLiteral {
        function: &'static str,
        attribute: String,
    },
    /// Float literal is NaN or infinite.
    #[error("{function}() on '{attribute}' requires a finite float literal")]
    NonFiniteFloat {
        function: &'static str,
        attribute: String,
    },
    /// Literal or column type does not fit the comparator.
    #[error("{function}() cannot compare '{attribute}' with a {found} literal")]
    TypeMismatch {
        function: &'static str,
        attribute: String,
        found: &'static str,
    },
}

impl CompileError {
    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::UnsupportedPredicate { .. } => "UnsupportedPredicate",
            CompileError::EmptyAttribute { .. } => "EmptyAttribute",
            CompileError::UnknownAttribute { .. } => "UnknownAttribute",
            CompileError::ValueArity { .. } => "ValueArity",
            CompileError::ChildArity { .. } => "ChildArity",
            CompileError::NullLiteral { .. } => "NullNotAllowed",
            CompileError::NonFiniteFloat { .. } => "NonFiniteFloat",
            CompileError::TypeMismatch { .. } => "TypeMismatch",
        }
    }

    pub(crate) fn unsupported(predicate: impl ToString) -> Self {
        CompileError::UnsupportedPredicate {
            predicate: predicate.to_string(),
        }
    }
}

/// Errors raised while parsing or editing a plan document.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Text was not valid JSON or did not have the operator-node shape.
    #[error("malformed plan document: {0}")]
    Malformed(String),
    /// Document is missing the `$optic` root.
    #[error("plan document must have a '$optic' root")]
    MissingRoot,
    /// Root is not an `op:operators` chain.
    #[error("plan root must be op:operators (found {0})")]
    NotAnOperatorChain(String),
    /// The chain does not start with a data access operator.
    #[error("plan must start with op:from-view")]
    MissingSource,
}
