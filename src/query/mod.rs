#![forbid(unsafe_code)]

//! Query definitions and predicate pushdown.
//!
//! This module owns everything that happens to a query before it is split
//! into partitions: host predicates are translated into filter trees, filter
//! trees are compiled into the remote operator format, and the result is
//! folded into an immutable [`QueryDefinition`].

/// Host predicates and filter trees.
pub mod ast;

/// Filter tree compiler producing operator documents and value binders.
pub mod compile;

/// Error types for compilation and plan parsing.
pub mod errors;

/// Operator-tree wire format.
pub mod operator;

/// Engine-native query definitions.
pub mod plan;

/// Scan builder folding pushed predicates, columns, and limits into a query.
pub mod pushdown;

/// Declared row schemas.
pub mod schema;

/// Host predicate translation.
pub mod translate;

/// Typed literal and row values.
pub mod value;

pub use ast::{Combinator, Comparator, Filter, HostPredicate, LeafFilter};
pub use compile::{Compilation, CompiledFilter, FallbackPolicy, PredicateCompiler, ValueBinder};
pub use errors::{CompileError, QueryError};
pub use operator::{OperatorArg, OperatorNode};
pub use plan::QueryDefinition;
pub use pushdown::{PushdownReport, ScanBuilder};
pub use schema::{DataType, Field, Schema};
pub use translate::{translate, try_translate};
pub use value::Value;
