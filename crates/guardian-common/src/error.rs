use thiserror::Error;

/// Errors produced by the enforcement engine.
///
/// `DataFetch` is the only recoverable cycle-level failure: the manager
/// aborts the cycle, keeps the last pushed state, and retries on the next
/// trigger. `InvalidRule` never fails a cycle; the offending row is skipped.
#[derive(Debug, Error)]
pub enum Error {
    /// A policy, override, usage, or package-list read failed.
    #[error("data fetch failed ({what}): {message}")]
    DataFetch { what: &'static str, message: String },

    /// A malformed policy row. The row is excluded from evaluation.
    #[error("invalid rule data: {0}")]
    InvalidRule(String),

    /// Configuration could not be loaded or saved.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn data_fetch(what: &'static str, err: impl std::fmt::Display) -> Self {
        Self::DataFetch { what, message: err.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_fetch_display() {
        let err = Error::data_fetch("policy", "connection refused");
        assert_eq!(err.to_string(), "data fetch failed (policy): connection refused");
    }

    #[test]
    fn test_invalid_rule_display() {
        let err = Error::InvalidRule("start_secs out of range".to_string());
        assert!(err.to_string().contains("start_secs"));
    }
}
