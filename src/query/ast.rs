//! Predicate trees: the host framework's native predicates and the filter
//! tree they are translated into before compilation.
//!
//! [`HostPredicate`] mirrors the shape a dataframe host hands a data source
//! (one variant per source filter kind). [`Filter`] is the compiler's input: a
//! uniform leaf/composite tree that can nest to any depth.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::query::errors::QueryError;
use crate::query::operator::from_json_str;
use crate::query::Value;

/// Predicate as produced by the host's query planner.
#[derive(Clone, Debug, PartialEq)]
pub enum HostPredicate {
    /// `attr = value`.
    EqualTo(String, Value),
    /// Null-safe equality (`attr <=> value`).
    EqualNullSafe(String, Value),
    /// `attr > value`.
    GreaterThan(String, Value),
    /// `attr >= value`.
    GreaterThanOrEqual(String, Value),
    /// `attr < value`.
    LessThan(String, Value),
    /// `attr <= value`.
    LessThanOrEqual(String, Value),
    /// `attr IN (values)`.
    In(String, Vec<Value>),
    /// `attr IS NULL`.
    IsNull(String),
    /// `attr IS NOT NULL`.
    IsNotNull(String),
    /// Conjunction.
    And(Box<HostPredicate>, Box<HostPredicate>),
    /// Disjunction.
    Or(Box<HostPredicate>, Box<HostPredicate>),
    /// Negation.
    Not(Box<HostPredicate>),
    /// `attr LIKE 'prefix%'`.
    StringStartsWith(String, String),
    /// `attr LIKE '%suffix'`.
    StringEndsWith(String, String),
    /// `attr LIKE '%infix%'`.
    StringContains(String, String),
    /// Constant true.
    AlwaysTrue,
    /// Constant false.
    AlwaysFalse,
}

impl HostPredicate {
    /// Convenience constructor for [`HostPredicate::And`].
    pub fn and(left: HostPredicate, right: HostPredicate) -> Self {
        HostPredicate::And(Box::new(left), Box::new(right))
    }

    /// Convenience constructor for [`HostPredicate::Or`].
    pub fn or(left: HostPredicate, right: HostPredicate) -> Self {
        HostPredicate::Or(Box::new(left), Box::new(right))
    }

    /// Convenience constructor for [`HostPredicate::Not`].
    pub fn not(child: HostPredicate) -> Self {
        HostPredicate::Not(Box::new(child))
    }
}

impl fmt::Display for HostPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostPredicate::EqualTo(a, v) => write!(f, "EqualTo({a},{})", v.to_json()),
            HostPredicate::EqualNullSafe(a, v) => {
                write!(f, "EqualNullSafe({a},{})", v.to_json())
            }
            HostPredicate::GreaterThan(a, v) => write!(f, "GreaterThan({a},{})", v.to_json()),
            HostPredicate::GreaterThanOrEqual(a, v) => {
                write!(f, "GreaterThanOrEqual({a},{})", v.to_json())
            }
            HostPredicate::LessThan(a, v) => write!(f, "LessThan({a},{})", v.to_json()),
            HostPredicate::LessThanOrEqual(a, v) => {
                write!(f, "LessThanOrEqual({a},{})", v.to_json())
            }
            HostPredicate::In(a, values) => {
                write!(f, "In({a}, [")?;
                for (idx, v) in values.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", v.to_json())?;
                }
                f.write_str("])")
            }
            HostPredicate::IsNull(a) => write!(f, "IsNull({a})"),
            HostPredicate::IsNotNull(a) => write!(f, "IsNotNull({a})"),
            HostPredicate::And(l, r) => write!(f, "And({l},{r})"),
            HostPredicate::Or(l, r) => write!(f, "Or({l},{r})"),
            HostPredicate::Not(c) => write!(f, "Not({c})"),
            HostPredicate::StringStartsWith(a, s) => write!(f, "StringStartsWith({a},{s})"),
            HostPredicate::StringEndsWith(a, s) => write!(f, "StringEndsWith({a},{s})"),
            HostPredicate::StringContains(a, s) => write!(f, "StringContains({a},{s})"),
            HostPredicate::AlwaysTrue => f.write_str("AlwaysTrue"),
            HostPredicate::AlwaysFalse => f.write_str("AlwaysFalse"),
        }
    }
}

/// Comparator applied by a leaf filter.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Comparator {
    /// Equality.
    Eq,
    /// Strictly less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Strictly greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Membership in a literal list.
    In,
    /// Attribute has a value.
    IsDefined,
    /// String prefix match.
    StartsWith,
    /// String suffix match.
    EndsWith,
    /// Substring match.
    Contains,
}

impl Comparator {
    /// Wire function name.
    pub fn function_name(self) -> &'static str {
        match self {
            Comparator::Eq => "eq",
            Comparator::Lt => "lt",
            Comparator::Le => "le",
            Comparator::Gt => "gt",
            Comparator::Ge => "ge",
            Comparator::In => "in",
            Comparator::IsDefined => "is-defined",
            Comparator::StartsWith => "starts-with",
            Comparator::EndsWith => "ends-with",
            Comparator::Contains => "contains",
        }
    }

    /// Wire namespace: string functions live in `fn`, everything else in `op`.
    pub fn namespace(self) -> &'static str {
        match self {
            Comparator::StartsWith | Comparator::EndsWith | Comparator::Contains => "fn",
            _ => "op",
        }
    }

    /// Whether the comparator orders its operands.
    pub fn is_range(self) -> bool {
        matches!(
            self,
            Comparator::Lt | Comparator::Le | Comparator::Gt | Comparator::Ge
        )
    }

    /// Whether the comparator operates on strings only.
    pub fn is_string_match(self) -> bool {
        matches!(
            self,
            Comparator::StartsWith | Comparator::EndsWith | Comparator::Contains
        )
    }
}

/// Boolean combinator tagging a composite filter.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    /// All children hold.
    And,
    /// At least one child holds.
    Or,
    /// The single child does not hold.
    Not,
}

impl Combinator {
    /// Wire function name.
    pub fn function_name(self) -> &'static str {
        match self {
            Combinator::And => "and",
            Combinator::Or => "or",
            Combinator::Not => "not",
        }
    }
}

/// Leaf predicate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeafFilter {
    /// Target attribute; may be qualified as `view.col` or `schema.view.col`.
    pub attribute: String,
    /// Comparator to apply.
    pub comparator: Comparator,
    /// Literal operands (empty for `is-defined`).
    #[serde(default)]
    pub values: Vec<Value>,
}

/// Filter tree handed to the predicate compiler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    /// Leaf predicate.
    Leaf(LeafFilter),
    /// Boolean combination of child filters.
    Composite {
        /// Combinator applied to the children.
        function: Combinator,
        /// Child filters, in evaluation order.
        children: Vec<Filter>,
    },
}

impl Filter {
    /// Builds a leaf filter.
    pub fn leaf(
        attribute: impl Into<String>,
        comparator: Comparator,
        values: Vec<Value>,
    ) -> Self {
        Filter::Leaf(LeafFilter {
            attribute: attribute.into(),
            comparator,
            values,
        })
    }

    /// Single-value comparison leaf.
    pub fn compare(attribute: impl Into<String>, comparator: Comparator, value: Value) -> Self {
        Filter::leaf(attribute, comparator, vec![value])
    }

    /// `is-defined` leaf.
    pub fn is_defined(attribute: impl Into<String>) -> Self {
        Filter::leaf(attribute, Comparator::IsDefined, Vec::new())
    }

    /// Conjunction of the given children.
    pub fn and(children: Vec<Filter>) -> Self {
        Filter::Composite {
            function: Combinator::And,
            children,
        }
    }

    /// Disjunction of the given children.
    pub fn or(children: Vec<Filter>) -> Self {
        Filter::Composite {
            function: Combinator::Or,
            children,
        }
    }

    /// Negation of `child`.
    pub fn not(child: Filter) -> Self {
        Filter::Composite {
            function: Combinator::Not,
            children: vec![child],
        }
    }

    /// Parses a JSON filter tree of any depth.
    pub fn parse(text: &str) -> Result<Self, QueryError> {
        from_json_str(text).map_err(|err| QueryError::Malformed(err.to_string()))
    }

    /// Number of leaves in the tree.
    pub fn leaf_count(&self) -> usize {
        match self {
            Filter::Leaf(_) => 1,
            Filter::Composite { children, .. } => children.iter().map(Filter::leaf_count).sum(),
        }
    }

    /// Nesting depth; a lone leaf has depth 1.
    pub fn depth(&self) -> usize {
        match self {
            Filter::Leaf(_) => 1,
            Filter::Composite { children, .. } => {
                1 + children.iter().map(Filter::depth).max().unwrap_or(0)
            }
        }
    }
}
