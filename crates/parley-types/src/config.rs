//! Configuration defaults and instruction sources for Parley.
//!
//! The binary reads its settings from the environment; these are the values
//! used when a setting is absent, plus the resolved form of the system
//! instruction that seeds every conversation.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Chat-completions endpoint used when `GPT_API_URL` is unset.
pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Model identifier used when `GPT_MODEL` is unset.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Overall deadline for one upstream streaming call.
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Listen port used when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 8080;

/// Where the system instruction comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionSource {
    /// Read the instruction from a file when the session is built.
    File(PathBuf),
    /// Use the instruction text as given.
    Text(String),
}

impl InstructionSource {
    /// Resolve the instruction source from the two optional settings.
    ///
    /// Literal text wins over a file path when both are present. Empty
    /// strings count as absent.
    pub fn from_parts(
        file_path: Option<PathBuf>,
        text: Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            return Ok(InstructionSource::Text(text));
        }
        match file_path.filter(|p| !p.as_os_str().is_empty()) {
            Some(path) => Ok(InstructionSource::File(path)),
            None => Err(ConfigError::MissingInstruction),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_wins_over_file() {
        let source = InstructionSource::from_parts(
            Some(PathBuf::from("instruction.txt")),
            Some("be brief".to_string()),
        )
        .unwrap();
        assert_eq!(source, InstructionSource::Text("be brief".to_string()));
    }

    #[test]
    fn test_file_used_when_text_empty() {
        let source =
            InstructionSource::from_parts(Some(PathBuf::from("a.txt")), Some(String::new()))
                .unwrap();
        assert_eq!(source, InstructionSource::File(PathBuf::from("a.txt")));
    }

    #[test]
    fn test_both_empty_is_rejected() {
        let result = InstructionSource::from_parts(Some(PathBuf::new()), None);
        assert!(matches!(result, Err(ConfigError::MissingInstruction)));
        assert!(matches!(
            InstructionSource::from_parts(None, None),
            Err(ConfigError::MissingInstruction)
        ));
    }
}
