//! Operator evaluation for the in-process engine.
//!
//! Supports the subset of the operator vocabulary the compiler emits:
//! column references, parameters, comparisons, membership, `is-defined`,
//! string matching and the boolean combinators.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::Value as Json;

use crate::query::{OperatorArg, OperatorNode, Value};
use crate::remote::RemoteError;

/// JSON object row.
pub type JsonRow = serde_json::Map<String, Json>;

fn bad_plan(message: String) -> RemoteError {
    RemoteError::Status {
        status_code: 400,
        message,
    }
}

/// Evaluates boolean expressions against rows with a fixed parameter set.
pub struct Evaluator<'a> {
    params: &'a BTreeMap<String, Value>,
}

impl<'a> Evaluator<'a> {
    /// Evaluator resolving `op:param` against `params`.
    pub fn new(params: &'a BTreeMap<String, Value>) -> Self {
        Self { params }
    }

    /// Whether `row` satisfies `expr`. Rows for which `expr` is unknown
    /// (a comparison against null) do not match.
    pub fn matches(&self, expr: &OperatorNode, row: &JsonRow) -> Result<bool, RemoteError> {
        Ok(self.truth(expr, row)? == Some(true))
    }

    /// Three-valued evaluation: `None` is unknown.
    fn truth(&self, expr: &OperatorNode, row: &JsonRow) -> Result<Option<bool>, RemoteError> {
        let function = (expr.ns.as_str(), expr.function.as_str());
        match function {
            ("op", "and") => {
                let mut result = Some(true);
                for child in self.nodes(expr)? {
                    match self.truth(child, row)? {
                        Some(false) => return Ok(Some(false)),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                Ok(result)
            }
            ("op", "or") => {
                let mut result = Some(false);
                for child in self.nodes(expr)? {
                    match self.truth(child, row)? {
                        Some(true) => return Ok(Some(true)),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                Ok(result)
            }
            ("op", "not") => match self.nodes(expr)?.as_slice() {
                [child] => Ok(self.truth(child, row)?.map(|value| !value)),
                _ => Err(bad_plan("op:not expects one argument".into())),
            },
            ("op", "is-defined") => {
                let [column] = self.operands::<1>(expr, row)?;
                Ok(Some(!column.is_null()))
            }
            ("op", "in") => {
                let mut operands = self.nodes(expr)?.into_iter();
                let column = match operands.next() {
                    Some(node) => self.operand(node, row)?,
                    None => return Err(bad_plan("op:in expects arguments".into())),
                };
                if column.is_null() {
                    return Ok(None);
                }
                for candidate in operands {
                    let candidate = self.operand(candidate, row)?;
                    if compare(&column, &candidate) == Some(Ordering::Equal) {
                        return Ok(Some(true));
                    }
                }
                Ok(Some(false))
            }
            ("op", name @ ("eq" | "lt" | "le" | "gt" | "ge")) => {
                let [left, right] = self.operands::<2>(expr, row)?;
                if left.is_null() || right.is_null() {
                    return Ok(None);
                }
                let ordering = compare(&left, &right);
                Ok(Some(match (name, ordering) {
                    (_, None) => false,
                    ("eq", Some(ord)) => ord == Ordering::Equal,
                    ("lt", Some(ord)) => ord == Ordering::Less,
                    ("le", Some(ord)) => ord != Ordering::Greater,
                    ("gt", Some(ord)) => ord == Ordering::Greater,
                    (_, Some(ord)) => ord != Ordering::Less,
                }))
            }
            ("fn", name @ ("starts-with" | "ends-with" | "contains")) => {
                let [left, right] = self.operands::<2>(expr, row)?;
                if left.is_null() || right.is_null() {
                    return Ok(None);
                }
                let (Some(left), Some(right)) = (left.as_str(), right.as_str()) else {
                    return Ok(Some(false));
                };
                Ok(Some(match name {
                    "starts-with" => left.starts_with(right),
                    "ends-with" => left.ends_with(right),
                    _ => left.contains(right),
                }))
            }
            (ns, name) => Err(bad_plan(format!("unknown function {ns}:{name}"))),
        }
    }

    fn nodes<'n>(&self, expr: &'n OperatorNode) -> Result<Vec<&'n OperatorNode>, RemoteError> {
        expr.args
            .iter()
            .map(|arg| match arg {
                OperatorArg::Node(node) => Ok(node),
                other => Err(bad_plan(format!(
                    "{}:{} expects expression arguments (found {other})",
                    expr.ns, expr.function
                ))),
            })
            .collect()
    }

    fn operands<const N: usize>(
        &self,
        expr: &OperatorNode,
        row: &JsonRow,
    ) -> Result<[Json; N], RemoteError> {
        let nodes = self.nodes(expr)?;
        if nodes.len() != N {
            return Err(bad_plan(format!(
                "{}:{} expects {N} argument(s) (got {})",
                expr.ns,
                expr.function,
                nodes.len()
            )));
        }
        let values = nodes
            .into_iter()
            .map(|node| self.operand(node, row))
            .collect::<Result<Vec<_>, _>>()?;
        values
            .try_into()
            .map_err(|_| bad_plan(format!("{}:{} operand mismatch", expr.ns, expr.function)))
    }

    fn operand(&self, node: &OperatorNode, row: &JsonRow) -> Result<Json, RemoteError> {
        match (node.ns.as_str(), node.function.as_str()) {
            ("op", "col" | "view-col" | "schema-col") => {
                let name = match node.args.last() {
                    Some(OperatorArg::Scalar(Json::String(name))) => name,
                    _ => return Err(bad_plan(format!("malformed column reference {node}"))),
                };
                Ok(row.get(name).cloned().unwrap_or(Json::Null))
            }
            ("op", "param") => {
                let name = match node.args.first() {
                    Some(OperatorArg::Scalar(Json::String(name))) => name,
                    _ => return Err(bad_plan(format!("malformed parameter {node}"))),
                };
                self.params
                    .get(name)
                    .map(Value::to_json)
                    .ok_or_else(|| bad_plan(format!("unbound parameter '{name}'")))
            }
            _ => Err(bad_plan(format!("unsupported operand {node}"))),
        }
    }
}

/// Column names listed by an `op:select`.
pub fn selected_columns(select: &OperatorNode) -> Result<Vec<String>, RemoteError> {
    let Some(OperatorArg::List(items)) = select.args.first() else {
        return Err(bad_plan("op:select expects a column list".into()));
    };
    items
        .iter()
        .map(|item| match item {
            OperatorArg::Node(col) => match col.args.last() {
                Some(OperatorArg::Scalar(Json::String(name))) => Ok(name.clone()),
                _ => Err(bad_plan(format!("malformed column reference {col}"))),
            },
            other => Err(bad_plan(format!("unsupported select item {other}"))),
        })
        .collect()
}

/// Row count named by an `op:limit`.
pub fn limit_of(limit: &OperatorNode) -> Result<u64, RemoteError> {
    match limit.args.first() {
        Some(OperatorArg::Scalar(value)) => value
            .as_u64()
            .ok_or_else(|| bad_plan(format!("invalid limit {value}"))),
        _ => Err(bad_plan("op:limit expects a number".into())),
    }
}

fn compare(left: &Json, right: &Json) -> Option<Ordering> {
    match (left, right) {
        (Json::Number(l), Json::Number(r)) => match (l.as_i64(), r.as_i64()) {
            (Some(l), Some(r)) => Some(l.cmp(&r)),
            _ => l.as_f64()?.partial_cmp(&r.as_f64()?),
        },
        (Json::String(l), Json::String(r)) => Some(l.cmp(r)),
        (Json::Bool(l), Json::Bool(r)) => Some(l.cmp(r)),
        _ => None,
    }
}
