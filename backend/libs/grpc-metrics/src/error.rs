//! Error types for collector construction and registration

use thiserror::Error;

/// Result type for collector operations
pub type Result<T> = std::result::Result<T, MetricsError>;

/// Errors raised while building or registering a [`Metrics`](crate::Metrics) collector.
///
/// Errors produced by the wrapped RPC itself never show up here; they are
/// classified into a result code and handed back to the caller untouched.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// The metrics library rejected a metric definition (bad name, bad buckets, ...)
    #[error("Failed to construct metric {name}: {source}")]
    Construction {
        name: String,
        #[source]
        source: prometheus::Error,
    },

    /// A metric with a colliding name is already present in the target registry
    #[error("Failed to register metric: {0}")]
    Registration(#[source] prometheus::Error),
}

impl MetricsError {
    pub(crate) fn construction(name: &str, source: prometheus::Error) -> Self {
        Self::Construction {
            name: name.to_string(),
            source,
        }
    }

    /// True when registration failed because an identical collector was already registered
    pub fn is_already_registered(&self) -> bool {
        matches!(self, Self::Registration(prometheus::Error::AlreadyReg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_registered_detection() {
        assert!(MetricsError::Registration(prometheus::Error::AlreadyReg).is_already_registered());

        let err = MetricsError::Registration(prometheus::Error::Msg("different help".into()));
        assert!(!err.is_already_registered());
    }

    #[test]
    fn test_construction_error_display() {
        let err = MetricsError::construction("bad name", prometheus::Error::Msg("invalid".into()));
        assert_eq!(err.to_string(), "Failed to construct metric bad name: Error: invalid");
    }
}
