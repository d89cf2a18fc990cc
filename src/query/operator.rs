//! Operator-tree wire format understood by the remote engine.
//!
//! Every node is a `{ "ns": .., "fn": .., "args": [..] }` invocation. Arguments
//! are nested invocations, literal lists, or JSON scalars.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::query::errors::QueryError;

/// Namespace for plan operators and boolean functions.
pub const OP_NS: &str = "op";

/// Single operator invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorNode {
    /// Function namespace (`op` or `fn`).
    pub ns: String,
    /// Function name.
    #[serde(rename = "fn")]
    pub function: String,
    /// Ordered arguments.
    pub args: Vec<OperatorArg>,
}

/// Argument of an operator invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperatorArg {
    /// Nested invocation.
    Node(OperatorNode),
    /// Literal list (e.g. `select` column lists).
    List(Vec<OperatorArg>),
    /// JSON scalar (names, numbers, null).
    Scalar(serde_json::Value),
}

impl OperatorNode {
    /// Builds an invocation.
    pub fn new(ns: &str, function: &str, args: Vec<OperatorArg>) -> Self {
        Self {
            ns: ns.to_string(),
            function: function.to_string(),
            args,
        }
    }

    /// Builds an `op:` invocation.
    pub fn op(function: &str, args: Vec<OperatorArg>) -> Self {
        Self::new(OP_NS, function, args)
    }

    /// Column reference; qualified names map to `view-col` / `schema-col`.
    pub fn column(attribute: &str) -> Self {
        let parts: Vec<&str> = attribute.split('.').collect();
        match parts.as_slice() {
            [view, col] => Self::op("view-col", vec![str_arg(view), str_arg(col)]),
            [schema, view, col] => Self::op(
                "schema-col",
                vec![str_arg(schema), str_arg(view), str_arg(col)],
            ),
            _ => Self::op("col", vec![str_arg(attribute)]),
        }
    }

    /// Runtime parameter placeholder.
    pub fn param(name: &str) -> Self {
        Self::op("param", vec![str_arg(name)])
    }

    /// Whether this node is `ns:function`.
    pub fn is(&self, ns: &str, function: &str) -> bool {
        self.ns == ns && self.function == function
    }

    /// Nested invocations among the arguments, in order.
    pub fn child_nodes(&self) -> impl Iterator<Item = &OperatorNode> {
        self.args.iter().filter_map(|arg| match arg {
            OperatorArg::Node(node) => Some(node),
            _ => None,
        })
    }

    /// Compact JSON rendering.
    pub fn render(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parses a rendered node. Nesting depth is not limited.
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        from_json_str(text).map_err(|err| QueryError::Malformed(err.to_string()))
    }

    /// Converts into a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Parses JSON without serde_json's nesting limit. The stack grows on demand,
/// so arbitrarily deep operator and filter trees round-trip.
pub fn from_json_str<T: DeserializeOwned>(text: &str) -> serde_json::Result<T> {
    let mut de = serde_json::Deserializer::from_str(text);
    de.disable_recursion_limit();
    let value = T::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;
    Ok(value)
}

pub(crate) fn str_arg(value: &str) -> OperatorArg {
    OperatorArg::Scalar(serde_json::Value::String(value.to_string()))
}

impl From<OperatorNode> for OperatorArg {
    fn from(node: OperatorNode) -> Self {
        OperatorArg::Node(node)
    }
}

impl fmt::Display for OperatorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}(", self.ns, self.function)?;
        for (idx, arg) in self.args.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for OperatorArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorArg::Node(node) => write!(f, "{node}"),
            OperatorArg::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            OperatorArg::Scalar(value) => write!(f, "{value}"),
        }
    }
}
