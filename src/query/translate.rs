//! Translation of host predicates into compiler filters.
//!
//! Shapes with no faithful remote equivalent are rejected here so the caller
//! can keep them as post-fetch filters instead of failing the read.

use crate::query::ast::{Comparator, Filter, HostPredicate};
use crate::query::errors::CompileError;
use crate::query::Value;

/// Translates a host predicate, rejecting unsupported shapes.
///
/// A composite whose child cannot be translated is rejected as a whole; the
/// error names the offending child.
pub fn translate(predicate: &HostPredicate) -> Result<Filter, CompileError> {
    match predicate {
        HostPredicate::EqualTo(attr, value) => single(attr, Comparator::Eq, value, predicate),
        HostPredicate::GreaterThan(attr, value) => single(attr, Comparator::Gt, value, predicate),
        HostPredicate::GreaterThanOrEqual(attr, value) => {
            single(attr, Comparator::Ge, value, predicate)
        }
        HostPredicate::LessThan(attr, value) => single(attr, Comparator::Lt, value, predicate),
        HostPredicate::LessThanOrEqual(attr, value) => {
            single(attr, Comparator::Le, value, predicate)
        }
        HostPredicate::In(attr, values) => {
            if values.is_empty() || values.iter().any(Value::is_null) {
                return Err(CompileError::unsupported(predicate));
            }
            Ok(Filter::leaf(attr.clone(), Comparator::In, values.clone()))
        }
        HostPredicate::IsNotNull(attr) => Ok(Filter::is_defined(attr.clone())),
        HostPredicate::IsNull(attr) => Ok(Filter::not(Filter::is_defined(attr.clone()))),
        HostPredicate::StringStartsWith(attr, s) => Ok(Filter::compare(
            attr.clone(),
            Comparator::StartsWith,
            Value::String(s.clone()),
        )),
        HostPredicate::StringEndsWith(attr, s) => Ok(Filter::compare(
            attr.clone(),
            Comparator::EndsWith,
            Value::String(s.clone()),
        )),
        HostPredicate::StringContains(attr, s) => Ok(Filter::compare(
            attr.clone(),
            Comparator::Contains,
            Value::String(s.clone()),
        )),
        HostPredicate::And(left, right) => Ok(Filter::and(vec![child(left)?, child(right)?])),
        HostPredicate::Or(left, right) => Ok(Filter::or(vec![child(left)?, child(right)?])),
        HostPredicate::Not(inner) => Ok(Filter::not(child(inner)?)),
        HostPredicate::EqualNullSafe(..) | HostPredicate::AlwaysTrue | HostPredicate::AlwaysFalse => {
            Err(CompileError::unsupported(predicate))
        }
    }
}

/// Like [`translate`], but reports only whether a filter is available.
pub fn try_translate(predicate: &HostPredicate) -> Option<Filter> {
    translate(predicate).ok()
}

fn single(
    attr: &str,
    comparator: Comparator,
    value: &Value,
    predicate: &HostPredicate,
) -> Result<Filter, CompileError> {
    if value.is_null() {
        return Err(CompileError::unsupported(predicate));
    }
    Ok(Filter::compare(attr.to_string(), comparator, value.clone()))
}

fn child(predicate: &HostPredicate) -> Result<Filter, CompileError> {
    translate(predicate).map_err(|err| match err {
        CompileError::UnsupportedPredicate { predicate } => CompileError::UnsupportedPredicate {
            predicate: format!("child predicate is not supported: {predicate}"),
        },
        other => other,
    })
}
