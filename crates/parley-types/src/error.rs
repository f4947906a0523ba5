use std::path::PathBuf;

use thiserror::Error;

use crate::llm::UpstreamError;

/// Errors related to conversation session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("either an instruction file path or an instruction text must be provided")]
    MissingInstruction,

    #[error("failed to read instruction file '{path}': {source}")]
    InstructionRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open completion stream: {0}")]
    Upstream(#[from] UpstreamError),
}

/// Errors raised while loading process configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("either GPT_INSTRUCTION_FILE_PATH or GPT_INSTRUCTION_TEXT must be provided")]
    MissingInstruction,

    #[error("required setting '{0}' is empty")]
    Empty(&'static str),

    #[error("invalid setting '{name}': {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        let err = SessionError::InstructionRead {
            path: PathBuf::from("/missing/prompt.txt"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.to_string().contains("/missing/prompt.txt"));
        assert!(err.to_string().contains("no such file"));
    }

    #[test]
    fn test_upstream_error_converts_into_session_error() {
        let err: SessionError = UpstreamError::AuthenticationFailed.into();
        assert_eq!(
            err.to_string(),
            "failed to open completion stream: authentication failed"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Empty("GPT_API_KEY");
        assert_eq!(err.to_string(), "required setting 'GPT_API_KEY' is empty");
    }
}
