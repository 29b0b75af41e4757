//! Centralized error types for the Aircast core library.

use thiserror::Error;

/// Application-wide error type for the Aircast core.
#[derive(Debug, Error)]
pub enum AircastError {
    /// A child process could not be spawned.
    #[error("Failed to spawn {what}: {source}")]
    Spawn {
        /// What was being spawned ("capture" or "encoder").
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Requested sink ID does not exist in the configuration.
    #[error("Sink not found: {0}")]
    SinkNotFound(String),

    /// A registry ceiling would be exceeded.
    #[error("Limit reached: {0}")]
    LimitReached(String),

    /// Invalid or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shutdown completed, but parts of it failed.
    ///
    /// Carries every individual failure; shutdown itself never aborts early.
    #[error("Shutdown completed with errors: {}", .0.join("; "))]
    Shutdown(Vec<String>),

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenient Result alias for application-wide operations.
pub type AircastResult<T> = Result<T, AircastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_error_joins_messages() {
        let err = AircastError::Shutdown(vec!["sink a".into(), "sink b".into()]);
        assert_eq!(
            err.to_string(),
            "Shutdown completed with errors: sink a; sink b"
        );
    }

    #[test]
    fn spawn_error_names_the_target() {
        let err = AircastError::Spawn {
            what: "capture",
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no ffmpeg"),
        };
        assert!(err.to_string().contains("capture"));
    }
}
