//! Process configuration read from the command line and the environment.
//!
//! Every setting has an environment variable, so the service can run with
//! no arguments at all in a container. Flags override the environment.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use secrecy::SecretString;

use parley_core::session::SessionSettings;
use parley_observe::tracing_setup::{LogFormat, TracingOptions};
use parley_types::config::{
    DEFAULT_API_TIMEOUT, DEFAULT_API_URL, DEFAULT_MODEL, DEFAULT_PORT, InstructionSource,
};
use parley_types::error::ConfigError;

use crate::http::server::{DEFAULT_SHUTDOWN_TIMEOUT, ServerOptions};

/// Relay prompts to a streaming chat-completions API over HTTP.
#[derive(Parser)]
#[command(name = "parley", version, about, long_about = None)]
pub struct Cli {
    /// Bearer credential for the chat-completions API.
    #[arg(long, env = "GPT_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// File holding the system instruction.
    #[arg(long, env = "GPT_INSTRUCTION_FILE_PATH")]
    pub instruction_file_path: Option<PathBuf>,

    /// Literal system instruction. Takes precedence over the file.
    #[arg(long, env = "GPT_INSTRUCTION_TEXT")]
    pub instruction_text: Option<String>,

    /// Deadline for one upstream call, in seconds (0 means the default).
    #[arg(long, env = "GPT_API_TIMEOUT_SECOND", default_value_t = DEFAULT_API_TIMEOUT.as_secs())]
    pub api_timeout_second: u64,

    /// Chat-completions endpoint.
    #[arg(long, env = "GPT_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Model identifier sent with every request.
    #[arg(long, env = "GPT_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Address to listen on.
    #[arg(long, env = "PARLEY_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Grace period for in-flight requests on shutdown, in seconds.
    #[arg(long, env = "PARLEY_SHUTDOWN_TIMEOUT_SECOND", default_value_t = DEFAULT_SHUTDOWN_TIMEOUT.as_secs())]
    pub shutdown_timeout_second: u64,

    /// Log output format: text or json.
    #[arg(long, env = "PARLEY_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    /// Also export spans through OpenTelemetry (stdout exporter).
    #[arg(long, env = "PARLEY_OTEL")]
    pub otel: bool,
}

/// Validated configuration.
pub struct Config {
    pub api_key: SecretString,
    pub api_url: String,
    pub session: SessionSettings,
    pub host: IpAddr,
    pub port: u16,
    pub shutdown_timeout: Duration,
    pub tracing: TracingOptions,
}

impl Cli {
    /// Validate the raw arguments.
    ///
    /// Fails before anything is served when the credential is blank or no
    /// instruction source is configured.
    pub fn into_config(self) -> Result<Config, ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Empty("GPT_API_KEY"));
        }
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::Empty("GPT_API_URL"));
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                name: "GPT_API_URL",
                reason: format!("'{}' is not an http(s) URL", self.api_url),
            });
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Empty("GPT_MODEL"));
        }

        // Only checks presence here; the file itself is read by the session.
        let (instruction_file_path, instruction_text) = match InstructionSource::from_parts(
            self.instruction_file_path,
            self.instruction_text,
        )? {
            InstructionSource::Text(text) => (None, Some(text)),
            InstructionSource::File(path) => (Some(path), None),
        };

        let api_timeout = match self.api_timeout_second {
            0 => DEFAULT_API_TIMEOUT,
            secs => Duration::from_secs(secs),
        };

        Ok(Config {
            api_key: SecretString::from(self.api_key),
            api_url: self.api_url,
            session: SessionSettings {
                instruction_file_path,
                instruction_text,
                model: self.model,
                api_timeout,
            },
            host: self.host,
            port: self.port,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_second),
            tracing: TracingOptions {
                format: self.log_format,
                otel: self.otel,
            },
        })
    }
}

impl Config {
    /// Server options for this configuration, default responders included.
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            host: self.host,
            port: self.port,
            shutdown_timeout: self.shutdown_timeout,
            ..ServerOptions::default()
        }
    }
}
