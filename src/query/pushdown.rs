//! Scan builder: collects what the host offers to push down and folds it into
//! the base query definition once, before partitioning.

use serde::Serialize;
use tracing::debug;

use crate::query::ast::{Filter, HostPredicate};
use crate::query::compile::{FallbackPolicy, PredicateCompiler};
use crate::query::errors::CompileError;
use crate::query::plan::QueryDefinition;
use crate::query::schema::Schema;
use crate::query::translate::translate;

/// Summary of what was pushed into the remote plan.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PushdownReport {
    /// Host predicates compiled into the plan.
    pub pushed: Vec<String>,
    /// Host predicates the host must still evaluate after fetch.
    pub residual: Vec<String>,
    /// Subtrees dropped while compiling the combined filter.
    #[serde(skip)]
    pub dropped: Vec<CompileError>,
    /// Pruned column list, if any.
    pub columns: Option<Vec<String>>,
    /// Pushed row limit, if any.
    pub limit: Option<u64>,
}

/// Builds the final query definition for a read.
#[derive(Clone, Debug)]
pub struct ScanBuilder {
    base: QueryDefinition,
    schema: Option<Schema>,
    policy: FallbackPolicy,
    filters: Vec<Filter>,
    pushed: Vec<String>,
    residual: Vec<String>,
    columns: Option<Vec<String>>,
    limit: Option<u64>,
}

impl ScanBuilder {
    /// Starts from `base` with nothing pushed.
    pub fn new(base: QueryDefinition) -> Self {
        Self {
            base,
            schema: None,
            policy: FallbackPolicy::Strict,
            filters: Vec::new(),
            pushed: Vec::new(),
            residual: Vec::new(),
            columns: None,
            limit: None,
        }
    }

    /// Declared schema used to validate attributes and literal types.
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Policy applied to each predicate and to the combined filter.
    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Accepts the predicates that compile and returns the ones the host must
    /// still evaluate.
    ///
    /// A predicate compiled only partially (some `and` children dropped) is
    /// pushed and also returned as residual.
    pub fn push_predicates(&mut self, predicates: &[HostPredicate]) -> Vec<HostPredicate> {
        let mut residual = Vec::new();
        for predicate in predicates {
            let filter = match translate(predicate) {
                Ok(filter) => filter,
                Err(err) => {
                    debug!(%predicate, error = %err, "predicate left to host");
                    self.residual.push(predicate.to_string());
                    residual.push(predicate.clone());
                    continue;
                }
            };
            match self.compiler().compile(&filter) {
                Ok(compilation) => {
                    self.pushed.push(predicate.to_string());
                    self.filters.push(filter);
                    if !compilation.is_complete() {
                        self.residual.push(predicate.to_string());
                        residual.push(predicate.clone());
                    }
                }
                Err(err) => {
                    debug!(%predicate, code = err.code(), error = %err, "predicate left to host");
                    self.residual.push(predicate.to_string());
                    residual.push(predicate.clone());
                }
            }
        }
        residual
    }

    /// Pushes an already-built filter tree.
    pub fn push_filter(&mut self, filter: Filter) {
        self.pushed.push(format!("{filter:?}"));
        self.filters.push(filter);
    }

    /// Restricts the fetched columns.
    pub fn prune_columns(&mut self, columns: &[String]) {
        self.columns = Some(columns.to_vec());
    }

    /// Pushes a global row limit; the read then runs as a single partition.
    pub fn push_limit(&mut self, limit: u64) {
        self.limit = Some(self.limit.map_or(limit, |current| current.min(limit)));
    }

    /// Compiles everything pushed and returns the final query definition.
    pub fn build(self) -> Result<(QueryDefinition, PushdownReport), CompileError> {
        let mut query = self.base.clone();
        let mut dropped = Vec::new();
        let combined = match self.filters.len() {
            0 => None,
            1 => self.filters.first().cloned(),
            _ => Some(Filter::and(self.filters.clone())),
        };
        if let Some(filter) = combined {
            let compilation = self.compiler().compile(&filter)?;
            query = compilation.compiled.apply(&query);
            dropped = compilation.dropped;
        }
        if let Some(columns) = &self.columns {
            query = query.with_select(columns);
        }
        if let Some(limit) = self.limit {
            query = query.with_limit(limit);
        }
        let report = PushdownReport {
            pushed: self.pushed,
            residual: self.residual,
            dropped,
            columns: self.columns,
            limit: self.limit,
        };
        Ok((query, report))
    }

    fn compiler(&self) -> PredicateCompiler<'_> {
        let compiler = PredicateCompiler::new().with_policy(self.policy);
        match &self.schema {
            Some(schema) => compiler.with_schema(schema),
            None => compiler,
        }
    }
}
