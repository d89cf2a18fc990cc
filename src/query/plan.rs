//! Engine-native query definitions and their runtime parameters.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::json;

use crate::plan::RowRange;
use crate::query::errors::QueryError;
use crate::query::operator::{from_json_str, str_arg, OperatorArg, OperatorNode};
use crate::query::Value;

/// Root key of a serialized plan document.
pub const PLAN_ROOT_KEY: &str = "$optic";
/// Reserved parameter carrying a bucket's lower row-id bound.
pub const ROW_LOWER_PARAM: &str = "shardscan_row_lower";
/// Reserved parameter carrying a bucket's upper row-id bound.
pub const ROW_UPPER_PARAM: &str = "shardscan_row_upper";

/// Plan document plus named runtime parameters.
///
/// Values are immutable: every edit returns a new definition, so a single
/// base query can be shared across partitions and rebound per bucket.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryDefinition {
    plan: OperatorNode,
    params: BTreeMap<String, Value>,
}

impl QueryDefinition {
    /// Plan reading every row of `view` (optionally within `schema`).
    pub fn from_view(schema: Option<&str>, view: &str) -> Self {
        let source = OperatorNode::op(
            "from-view",
            vec![
                schema
                    .map(str_arg)
                    .unwrap_or(OperatorArg::Scalar(serde_json::Value::Null)),
                str_arg(view),
            ],
        );
        Self {
            plan: OperatorNode::op("operators", vec![source.into()]),
            params: BTreeMap::new(),
        }
    }

    /// Parses a serialized `{"$optic": {...}}` plan.
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        let doc: serde_json::Value =
            from_json_str(text).map_err(|err| QueryError::Malformed(err.to_string()))?;
        let root = doc.get(PLAN_ROOT_KEY).ok_or(QueryError::MissingRoot)?;
        let plan: OperatorNode = serde_json::from_value(root.clone())
            .map_err(|err| QueryError::Malformed(err.to_string()))?;
        Self::from_plan(plan)
    }

    /// Wraps an already-built operator chain.
    pub fn from_plan(plan: OperatorNode) -> Result<Self, QueryError> {
        if !plan.is("op", "operators") {
            return Err(QueryError::NotAnOperatorChain(format!(
                "{}:{}",
                plan.ns, plan.function
            )));
        }
        match plan.args.first() {
            Some(OperatorArg::Node(first)) if first.is("op", "from-view") => {}
            _ => return Err(QueryError::MissingSource),
        }
        Ok(Self {
            plan,
            params: BTreeMap::new(),
        })
    }

    /// Root `op:operators` node.
    pub fn plan(&self) -> &OperatorNode {
        &self.plan
    }

    /// Operators in application order.
    pub fn operators(&self) -> impl Iterator<Item = &OperatorNode> {
        self.plan.child_nodes()
    }

    /// Bound runtime parameters.
    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    /// `(schema, view)` named by the leading `from-view`.
    pub fn source_view(&self) -> Option<(Option<&str>, &str)> {
        let source = self.operators().next()?;
        let schema = match source.args.first() {
            Some(OperatorArg::Scalar(serde_json::Value::String(s))) => Some(s.as_str()),
            _ => None,
        };
        match source.args.get(1) {
            Some(OperatorArg::Scalar(serde_json::Value::String(view))) => {
                Some((schema, view.as_str()))
            }
            _ => None,
        }
    }

    /// Whether the chain contains an `op:limit`.
    pub fn has_limit(&self) -> bool {
        self.operators().any(|op| op.is("op", "limit"))
    }

    /// Appends an operator to the chain.
    pub fn with_operator(&self, operator: OperatorNode) -> Self {
        let mut next = self.clone();
        next.plan.args.push(operator.into());
        next
    }

    /// Appends `op:where(filter)`.
    pub fn with_where(&self, filter: OperatorNode) -> Self {
        self.with_operator(OperatorNode::op("where", vec![filter.into()]))
    }

    /// Appends `op:select([cols])`.
    pub fn with_select(&self, columns: &[String]) -> Self {
        let cols = columns
            .iter()
            .map(|c| OperatorArg::Node(OperatorNode::column(c)))
            .collect();
        self.with_operator(OperatorNode::op("select", vec![OperatorArg::List(cols)]))
    }

    /// Appends `op:limit(n)`.
    pub fn with_limit(&self, limit: u64) -> Self {
        self.with_operator(OperatorNode::op(
            "limit",
            vec![OperatorArg::Scalar(serde_json::Value::from(limit))],
        ))
    }

    /// Binds a typed runtime parameter.
    pub fn bind_param(&self, name: impl Into<String>, value: Value) -> Self {
        let mut next = self.clone();
        next.params.insert(name.into(), value);
        next
    }

    /// Binds the reserved row-range parameters for one bucket fetch.
    pub fn bind_row_range(&self, range: &RowRange) -> Self {
        // Row ids span the full u64 space; they travel as decimal strings.
        self.bind_param(ROW_LOWER_PARAM, Value::String(range.lower.to_string()))
            .bind_param(ROW_UPPER_PARAM, Value::String(range.upper.to_string()))
    }

    /// Serialized plan document.
    pub fn render(&self) -> String {
        json!({ PLAN_ROOT_KEY: self.plan.to_json() }).to_string()
    }

    /// Parameters as `{name: {"type": .., "value": ..}}`.
    pub fn render_params(&self) -> serde_json::Value {
        let map = self
            .params
            .iter()
            .map(|(name, value)| {
                (
                    name.clone(),
                    json!({ "type": value.type_name(), "value": value.to_json() }),
                )
            })
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl fmt::Display for QueryDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
