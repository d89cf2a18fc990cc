//! Classification of plan-analysis failures.
//!
//! The remote engine has no structured code for "this query matches no
//! rows"; its analysis call fails with an internal coercion error instead.
//! The substring match for that diagnostic lives here and nowhere else.

use crate::remote::RemoteError;

/// Diagnostic text the remote engine reports when the analyzed query has no
/// rows to partition.
pub const NO_ROWS_DIAGNOSTIC: &str = "$tableId as xs:string -- Invalid coercion: () as xs:string";

/// How an analysis failure should be handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnalysisFailure {
    /// Benign: the query matches no rows.
    NoRows,
    /// Any other failure; aborts the read.
    Fatal,
}

/// Classifies a failed cardinality estimate.
pub fn classify_analysis_error(err: &RemoteError) -> AnalysisFailure {
    match err {
        RemoteError::Status { message, .. } if message.contains(NO_ROWS_DIAGNOSTIC) => {
            AnalysisFailure::NoRows
        }
        _ => AnalysisFailure::Fatal,
    }
}
