//! Error taxonomy surfaced to the host
//!
//! Every failure crossing the NIF boundary is one of five kinds. Lower layers
//! (the XML builder, XPath, the stylesheet compiler) have their own error
//! types and are classified here by the operation that hit them.

use std::collections::TryReserveError;

use thiserror::Error;

use crate::xpath::XPathError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum XsltError {
    /// Wrong argument type or shape at the boundary
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Input text is not well-formed XML
    #[error("failed to parse XML: {0}")]
    ParseFailure(String),

    /// Well-formed XML that is not a valid stylesheet
    #[error("failed to compile stylesheet: {0}")]
    CompileFailure(String),

    /// The transform did not produce a result tree
    #[error("failed to apply stylesheet: {0}")]
    ApplyFailure(String),

    /// Native memory exhausted while building parameters or output buffers
    #[error("allocation failure: {0}")]
    AllocationFailure(String),
}

impl XsltError {
    /// Atom name of this error kind, as seen by the host
    pub fn kind(&self) -> &'static str {
        match self {
            XsltError::InvalidArgument(_) => "invalid_argument",
            XsltError::ParseFailure(_) => "parse_failure",
            XsltError::CompileFailure(_) => "compile_failure",
            XsltError::ApplyFailure(_) => "apply_failure",
            XsltError::AllocationFailure(_) => "allocation_failure",
        }
    }

    /// Message without the kind prefix
    pub fn message(&self) -> &str {
        match self {
            XsltError::InvalidArgument(m)
            | XsltError::ParseFailure(m)
            | XsltError::CompileFailure(m)
            | XsltError::ApplyFailure(m)
            | XsltError::AllocationFailure(m) => m,
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        XsltError::InvalidArgument(msg.into())
    }

    pub fn compile(msg: impl Into<String>) -> Self {
        XsltError::CompileFailure(msg.into())
    }

    pub fn apply(msg: impl Into<String>) -> Self {
        XsltError::ApplyFailure(msg.into())
    }
}

impl From<TryReserveError> for XsltError {
    fn from(e: TryReserveError) -> Self {
        XsltError::AllocationFailure(e.to_string())
    }
}

impl From<crate::dom::ParseError> for XsltError {
    fn from(e: crate::dom::ParseError) -> Self {
        XsltError::ParseFailure(e.to_string())
    }
}

/// XPath errors reaching this conversion happen at run time; compile-time
/// callers map explicitly to [`XsltError::CompileFailure`].
impl From<XPathError> for XsltError {
    fn from(e: XPathError) -> Self {
        XsltError::ApplyFailure(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, XsltError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_atoms() {
        assert_eq!(XsltError::invalid_argument("x").kind(), "invalid_argument");
        assert_eq!(XsltError::compile("x").kind(), "compile_failure");
        assert_eq!(XsltError::apply("x").kind(), "apply_failure");
        assert_eq!(XsltError::ParseFailure("x".into()).kind(), "parse_failure");
    }

    #[test]
    fn test_message_has_no_prefix() {
        let err = XsltError::apply("no template");
        assert_eq!(err.message(), "no template");
        assert_eq!(err.to_string(), "failed to apply stylesheet: no template");
    }

    #[test]
    fn test_try_reserve_maps_to_allocation_failure() {
        let mut v: Vec<u64> = Vec::new();
        let err = v.try_reserve(usize::MAX).unwrap_err();
        assert_eq!(XsltError::from(err).kind(), "allocation_failure");
    }
}
