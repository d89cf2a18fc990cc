//! Predicate compiler: filter trees to remote operator documents.
//!
//! Compilation produces two artifacts. The operator document carries the
//! structure of the predicate with `op:param` placeholders in place of every
//! literal, and the [`ValueBinder`] carries the typed literals to attach to a
//! plan as runtime parameters. Keeping them apart lets the same document be
//! embedded once while values are bound with their remote types.

use tracing::warn;

use crate::query::ast::{Combinator, Comparator, Filter, LeafFilter};
use crate::query::errors::CompileError;
use crate::query::operator::{OperatorArg, OperatorNode};
use crate::query::plan::QueryDefinition;
use crate::query::schema::Schema;
use crate::query::Value;

/// Prefix of generated parameter placeholders.
pub const PARAM_PREFIX: &str = "shardscan_param_";

/// What to do when a subtree cannot be compiled.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FallbackPolicy {
    /// Any failing subtree fails the whole compilation.
    #[default]
    Strict,
    /// Failing children of an `and` node are dropped and reported; the
    /// remaining children still compile. Only an `and` under an even number
    /// of `not`s may drop, since dropping under negation narrows the result.
    /// Failures under `or`/`not` propagate.
    DropUnsupported,
}

/// Typed literals waiting to be attached to a plan.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValueBinder {
    bindings: Vec<(String, Value)>,
}

impl ValueBinder {
    /// Placeholder names and their values, in allocation order.
    pub fn bindings(&self) -> &[(String, Value)] {
        &self.bindings
    }

    /// Returns `plan` with every literal bound as a runtime parameter.
    pub fn bind(&self, plan: &QueryDefinition) -> QueryDefinition {
        self.bindings
            .iter()
            .fold(plan.clone(), |plan, (name, value)| {
                plan.bind_param(name.clone(), value.clone())
            })
    }
}

/// Compiled operator document paired with its value binder.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledFilter {
    /// Boolean expression suitable for `op:where`.
    pub document: OperatorNode,
    /// Literal values referenced by the document's placeholders.
    pub binder: ValueBinder,
}

impl CompiledFilter {
    /// Embeds the document as a `where` clause and binds its values.
    pub fn apply(&self, base: &QueryDefinition) -> QueryDefinition {
        self.binder.bind(&base.with_where(self.document.clone()))
    }
}

/// Result of a successful compilation.
#[derive(Clone, Debug, PartialEq)]
pub struct Compilation {
    /// The compiled filter.
    pub compiled: CompiledFilter,
    /// Subtrees dropped under [`FallbackPolicy::DropUnsupported`].
    pub dropped: Vec<CompileError>,
}

impl Compilation {
    /// Whether every predicate of the input made it into the document.
    pub fn is_complete(&self) -> bool {
        self.dropped.is_empty()
    }
}

/// Stateless filter compiler.
#[derive(Clone, Copy, Debug, Default)]
pub struct PredicateCompiler<'s> {
    schema: Option<&'s Schema>,
    policy: FallbackPolicy,
}

#[derive(Default)]
struct CompileState {
    bindings: Vec<(String, Value)>,
    dropped: Vec<CompileError>,
}

impl CompileState {
    fn placeholder(&mut self, value: Value) -> OperatorNode {
        let name = format!("{PARAM_PREFIX}{}", self.bindings.len());
        let node = OperatorNode::param(&name);
        self.bindings.push((name, value));
        node
    }

    fn mark(&self) -> (usize, usize) {
        (self.bindings.len(), self.dropped.len())
    }

    fn rollback(&mut self, mark: (usize, usize)) {
        self.bindings.truncate(mark.0);
        self.dropped.truncate(mark.1);
    }
}

impl<'s> PredicateCompiler<'s> {
    /// Compiler with no schema and the strict policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates attributes and literal types against `schema`.
    pub fn with_schema(mut self, schema: &'s Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Selects the fallback policy.
    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Compiles `filter` into an operator document and value binder.
    pub fn compile(&self, filter: &Filter) -> Result<Compilation, CompileError> {
        let mut state = CompileState::default();
        let document = self.compile_node(filter, false, &mut state)?;
        for err in &state.dropped {
            warn!(code = err.code(), error = %err, "dropped predicate from pushdown");
        }
        Ok(Compilation {
            compiled: CompiledFilter {
                document,
                binder: ValueBinder {
                    bindings: state.bindings,
                },
            },
            dropped: state.dropped,
        })
    }

    fn compile_node(
        &self,
        filter: &Filter,
        negated: bool,
        state: &mut CompileState,
    ) -> Result<OperatorNode, CompileError> {
        match filter {
            Filter::Leaf(leaf) => self.compile_leaf(leaf, state),
            Filter::Composite { function, children } => {
                self.compile_composite(*function, children, negated, state)
            }
        }
    }

    fn compile_composite(
        &self,
        function: Combinator,
        children: &[Filter],
        negated: bool,
        state: &mut CompileState,
    ) -> Result<OperatorNode, CompileError> {
        let name = function.function_name();
        match function {
            Combinator::Not if children.len() != 1 => {
                return Err(CompileError::ChildArity {
                    function: name,
                    expected: "exactly 1",
                    found: children.len(),
                })
            }
            Combinator::And | Combinator::Or if children.is_empty() => {
                return Err(CompileError::ChildArity {
                    function: name,
                    expected: "at least 1",
                    found: 0,
                })
            }
            _ => {}
        }

        let droppable = function == Combinator::And
            && !negated
            && self.policy == FallbackPolicy::DropUnsupported;
        let child_negated = negated ^ (function == Combinator::Not);
        let entry = state.mark();
        let mut args = Vec::with_capacity(children.len());
        let mut first_error = None;
        for child in children {
            let mark = state.mark();
            match self.compile_node(child, child_negated, state) {
                Ok(node) => args.push(OperatorArg::Node(node)),
                Err(err) if droppable => {
                    state.rollback(mark);
                    state.dropped.push(err.clone());
                    first_error.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }
        if args.is_empty() {
            // Every child of the `and` was dropped; nothing is left to push.
            state.rollback(entry);
            return match first_error {
                Some(err) => Err(err),
                None => Err(CompileError::ChildArity {
                    function: name,
                    expected: "at least 1",
                    found: 0,
                }),
            };
        }
        Ok(OperatorNode::op(name, args))
    }

    fn compile_leaf(
        &self,
        leaf: &LeafFilter,
        state: &mut CompileState,
    ) -> Result<OperatorNode, CompileError> {
        let function = leaf.comparator.function_name();
        self.validate_leaf(leaf)?;

        let mut args = vec![OperatorArg::Node(OperatorNode::column(&leaf.attribute))];
        for value in &leaf.values {
            args.push(OperatorArg::Node(state.placeholder(value.clone())));
        }
        Ok(OperatorNode::new(leaf.comparator.namespace(), function, args))
    }

    fn validate_leaf(&self, leaf: &LeafFilter) -> Result<(), CompileError> {
        let function = leaf.comparator.function_name();
        if leaf.attribute.trim().is_empty() {
            return Err(CompileError::EmptyAttribute { context: function });
        }
        let arity = |expected: &'static str| CompileError::ValueArity {
            function,
            attribute: leaf.attribute.clone(),
            expected,
            found: leaf.values.len(),
        };
        match leaf.comparator {
            Comparator::IsDefined if !leaf.values.is_empty() => return Err(arity("0")),
            Comparator::In if leaf.values.is_empty() => return Err(arity("at least 1")),
            Comparator::IsDefined | Comparator::In => {}
            _ if leaf.values.len() != 1 => return Err(arity("exactly 1")),
            _ => {}
        }

        for value in &leaf.values {
            self.validate_literal(leaf, value)?;
        }

        if let Some(schema) = self.schema {
            let field = schema
                .field(&leaf.attribute)
                .ok_or_else(|| CompileError::UnknownAttribute {
                    attribute: leaf.attribute.clone(),
                })?;
            let orderable_ok = !leaf.comparator.is_range() || field.data_type.is_orderable();
            for value in &leaf.values {
                if !orderable_ok || !field.data_type.accepts(value) {
                    return Err(CompileError::TypeMismatch {
                        function,
                        attribute: leaf.attribute.clone(),
                        found: value.type_name(),
                    });
                }
            }
        }
        Ok(())
    }

    fn validate_literal(&self, leaf: &LeafFilter, value: &Value) -> Result<(), CompileError> {
        let function = leaf.comparator.function_name();
        match value {
            Value::Null => Err(CompileError::NullLiteral {
                function,
                attribute: leaf.attribute.clone(),
            }),
            Value::Float(f) if !f.is_finite() => Err(CompileError::NonFiniteFloat {
                function,
                attribute: leaf.attribute.clone(),
            }),
            Value::String(_) => Ok(()),
            _ if leaf.comparator.is_string_match() => Err(CompileError::TypeMismatch {
                function,
                attribute: leaf.attribute.clone(),
                found: value.type_name(),
            }),
            Value::Bool(_) | Value::Bytes(_) if leaf.comparator.is_range() => {
                Err(CompileError::TypeMismatch {
                    function,
                    attribute: leaf.attribute.clone(),
                    found: value.type_name(),
                })
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::schema::{DataType, Field};

    fn eq(attr: &str, value: impl Into<Value>) -> Filter {
        Filter::compare(attr, Comparator::Eq, value.into())
    }

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Long),
            Field::new("name", DataType::String),
            Field::new("active", DataType::Boolean),
        ])
    }

    #[test]
    fn leaf_compiles_to_one_call_with_placeholder() {
        let out = PredicateCompiler::new()
            .compile(&eq("id", 7i64))
            .expect("compile");
        let doc = &out.compiled.document;
        assert!(doc.is("op", "eq"));
        assert_eq!(doc.to_string(), r#"op:eq(op:col("id"), op:param("shardscan_param_0"))"#);
        assert_eq!(
            out.compiled.binder.bindings(),
            &[("shardscan_param_0".to_string(), Value::Int(7))]
        );
        assert!(out.is_complete());
    }

    #[test]
    fn and_keeps_children_in_input_order() {
        let filter = Filter::and(vec![eq("id", 1i64), eq("name", "Ada")]);
        let out = PredicateCompiler::new().compile(&filter).expect("compile");
        let doc = out.compiled.document;
        assert!(doc.is("op", "and"));
        let children: Vec<_> = doc.child_nodes().collect();
        assert_eq!(children.len(), 2);
        assert_eq!(
            children[0].to_string(),
            r#"op:eq(op:col("id"), op:param("shardscan_param_0"))"#
        );
        assert_eq!(
            children[1].to_string(),
            r#"op:eq(op:col("name"), op:param("shardscan_param_1"))"#
        );
    }

    #[test]
    fn string_matches_use_fn_namespace() {
        let filter = Filter::compare("name", Comparator::StartsWith, Value::from("A"));
        let out = PredicateCompiler::new().compile(&filter).expect("compile");
        assert!(out.compiled.document.is("fn", "starts-with"));
    }

    #[test]
    fn in_allocates_one_placeholder_per_value() {
        let filter = Filter::leaf("id", Comparator::In, vec![Value::Int(1), Value::Int(2)]);
        let out = PredicateCompiler::new().compile(&filter).expect("compile");
        assert_eq!(out.compiled.document.args.len(), 3);
        assert_eq!(out.compiled.binder.bindings().len(), 2);
    }

    #[test]
    fn strict_policy_fails_on_unknown_attribute() {
        let schema = schema();
        let filter = Filter::and(vec![eq("id", 1i64), eq("missing", 2i64)]);
        let err = PredicateCompiler::new()
            .with_schema(&schema)
            .compile(&filter)
            .expect_err("strict compile fails");
        assert_eq!(
            err,
            CompileError::UnknownAttribute {
                attribute: "missing".into()
            }
        );
    }

    #[test]
    fn drop_policy_keeps_siblings_and_reports_drop() {
        let schema = schema();
        let filter = Filter::and(vec![
            eq("id", 1i64),
            Filter::or(vec![eq("name", "Ada"), eq("missing", 1i64)]),
            eq("name", "Grace"),
        ]);
        let out = PredicateCompiler::new()
            .with_schema(&schema)
            .with_policy(FallbackPolicy::DropUnsupported)
            .compile(&filter)
            .expect("partial compile");
        assert!(!out.is_complete());
        assert_eq!(out.dropped.len(), 1);
        let doc = out.compiled.document;
        let children: Vec<_> = doc.child_nodes().collect();
        assert_eq!(children.len(), 2);
        // Placeholders allocated by the dropped `or` are rolled back.
        assert_eq!(
            children[1].to_string(),
            r#"op:eq(op:col("name"), op:param("shardscan_param_1"))"#
        );
        assert_eq!(out.compiled.binder.bindings().len(), 2);
    }

    #[test]
    fn drop_policy_does_not_weaken_or() {
        let schema = schema();
        let filter = Filter::or(vec![eq("id", 1i64), eq("missing", 1i64)]);
        let err = PredicateCompiler::new()
            .with_schema(&schema)
            .with_policy(FallbackPolicy::DropUnsupported)
            .compile(&filter)
            .expect_err("or cannot drop children");
        assert_eq!(err.code(), "UnknownAttribute");
    }

    #[test]
    fn negated_and_never_drops_children() {
        let schema = schema();
        let compiler = PredicateCompiler::new()
            .with_schema(&schema)
            .with_policy(FallbackPolicy::DropUnsupported);
        let negated = Filter::not(Filter::and(vec![eq("id", 1i64), eq("missing", 1i64)]));
        let err = compiler.compile(&negated).expect_err("not(and) cannot narrow");
        assert_eq!(err.code(), "UnknownAttribute");

        // Inside a positive `and` the whole negation is dropped instead.
        let filter = Filter::and(vec![eq("name", "Ada"), negated]);
        let out = compiler.compile(&filter).expect("partial compile");
        assert_eq!(out.dropped.len(), 1);
        assert_eq!(
            out.compiled.document.to_string(),
            r#"op:and(op:eq(op:col("name"), op:param("shardscan_param_0")))"#
        );
        assert_eq!(out.compiled.binder.bindings().len(), 1);

        // Double negation restores positive position.
        let double = Filter::not(Filter::not(Filter::and(vec![
            eq("id", 1i64),
            eq("missing", 1i64),
        ])));
        let out = compiler.compile(&double).expect("drop under not(not)");
        assert_eq!(out.dropped.len(), 1);
        assert!(out.compiled.document.is("op", "not"));
    }

    #[test]
    fn fully_dropped_and_leaves_no_stale_drops() {
        let schema = schema();
        let filter = Filter::and(vec![
            eq("id", 1i64),
            Filter::and(vec![eq("missing", 1i64), eq("other", 2i64)]),
        ]);
        let out = PredicateCompiler::new()
            .with_schema(&schema)
            .with_policy(FallbackPolicy::DropUnsupported)
            .compile(&filter)
            .expect("outer and keeps id");
        // The inner `and` is reported once, as a single dropped subtree.
        assert_eq!(
            out.dropped,
            vec![CompileError::UnknownAttribute {
                attribute: "missing".into()
            }]
        );
    }

    #[test]
    fn fully_dropped_and_fails() {
        let filter = Filter::and(vec![eq("id", Value::Null)]);
        let err = PredicateCompiler::new()
            .with_policy(FallbackPolicy::DropUnsupported)
            .compile(&filter)
            .expect_err("nothing left");
        assert_eq!(err.code(), "NullNotAllowed");
    }

    #[test]
    fn rejects_type_mismatches() {
        let schema = schema();
        let compiler = PredicateCompiler::new().with_schema(&schema);
        let range_on_bool = Filter::compare("active", Comparator::Gt, Value::Bool(true));
        assert_eq!(compiler.compile(&range_on_bool).unwrap_err().code(), "TypeMismatch");
        let contains_on_long = Filter::compare("id", Comparator::Contains, Value::Int(1));
        assert_eq!(
            compiler.compile(&contains_on_long).unwrap_err().code(),
            "TypeMismatch"
        );
        let nan = Filter::compare("score", Comparator::Lt, Value::Float(f64::NAN));
        assert_eq!(
            PredicateCompiler::new().compile(&nan).unwrap_err().code(),
            "NonFiniteFloat"
        );
    }

    #[test]
    fn arity_is_enforced() {
        let compiler = PredicateCompiler::new();
        let not_two = Filter::Composite {
            function: Combinator::Not,
            children: vec![eq("a", 1i64), eq("b", 2i64)],
        };
        assert_eq!(compiler.compile(&not_two).unwrap_err().code(), "ChildArity");
        assert_eq!(
            compiler.compile(&Filter::or(vec![])).unwrap_err().code(),
            "ChildArity"
        );
        let eq_two = Filter::leaf("a", Comparator::Eq, vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(compiler.compile(&eq_two).unwrap_err().code(), "ValueArity");
    }

    #[test]
    fn binder_is_pure() {
        let out = PredicateCompiler::new()
            .compile(&eq("id", 5i64))
            .expect("compile");
        let base = QueryDefinition::from_view(None, "t");
        let bound = out.compiled.apply(&base);
        assert!(base.params().is_empty());
        assert_eq!(bound.params().get("shardscan_param_0"), Some(&Value::Int(5)));
        assert_eq!(out.compiled.apply(&base), bound);
    }
}
