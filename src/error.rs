use std::fmt;

/// Failure taxonomy for discovery, key loading and initialisation.
///
/// Loaders and parsers return these explicitly instead of throwing; the
/// filter logs them and treats anything other than success as "no data
/// available", which always fails closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// Nothing is available for the requested item.
    Absent {
        /// What was being looked up
        what: String,
    },
    /// A document was retrieved but does not have the expected shape.
    MalformedData {
        /// Which document or field
        what: String,
        /// Parser detail
        detail: String,
    },
    /// DNS, connect, read, timeout or non-success HTTP status.
    TransportError {
        /// URL being fetched
        url: String,
        /// Transport detail
        detail: String,
    },
    /// A precondition was violated; indicates a caller or configuration bug.
    Fatal {
        /// Description of the violated precondition
        detail: String,
    },
}

/// Result alias used by the discovery and configuration layers.
pub type SecurityResult<T> = Result<T, SecurityError>;

impl SecurityError {
    pub(crate) fn absent(what: impl Into<String>) -> Self {
        SecurityError::Absent { what: what.into() }
    }

    pub(crate) fn malformed(what: impl Into<String>, detail: impl fmt::Display) -> Self {
        SecurityError::MalformedData {
            what: what.into(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn transport(url: impl Into<String>, detail: impl fmt::Display) -> Self {
        SecurityError::TransportError {
            url: url.into(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn precondition(detail: impl Into<String>) -> Self {
        SecurityError::Fatal {
            detail: detail.into(),
        }
    }

    /// Whether this error indicates a programming or configuration bug rather
    /// than a transient condition.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, SecurityError::Fatal { .. })
    }

    /// Short stable label for structured logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            SecurityError::Absent { .. } => "absent",
            SecurityError::MalformedData { .. } => "malformed_data",
            SecurityError::TransportError { .. } => "transport",
            SecurityError::Fatal { .. } => "fatal",
        }
    }
}

impl fmt::Display for SecurityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityError::Absent { what } => write!(f, "{} is not available", what),
            SecurityError::MalformedData { what, detail } => {
                write!(f, "malformed {}: {}", what, detail)
            }
            SecurityError::TransportError { url, detail } => {
                write!(f, "failed to fetch {}: {}", url, detail)
            }
            SecurityError::Fatal { detail } => write!(f, "precondition failed: {}", detail),
        }
    }
}

impl std::error::Error for SecurityError {}
