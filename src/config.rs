//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::driver::ConnectOptions;
use crate::metadata::{DEFAULT_REMOTE_DIR_BASE, DRIVER_METADATA_FILENAME, MetadataWriter};
use crate::readiness::{DEFAULT_READINESS_COMMAND, RetryPolicy};

/// Orchestrator settings derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "HANGAR",
    discovery(
        app_name = "hangar",
        env_var = "HANGAR_CONFIG_PATH",
        config_file_name = "hangar.toml",
        dotfile_name = ".hangar.toml",
        project_file_name = "hangar.toml"
    )
)]
pub struct OrchestratorConfig {
    /// Command proving the container runtime is usable.
    #[ortho_config(default = DEFAULT_READINESS_COMMAND.to_owned())]
    pub readiness_command: String,
    /// Retries after the first readiness attempt.
    #[ortho_config(default = 5)]
    pub readiness_retries: u32,
    /// Delay before the first readiness retry, in milliseconds.
    #[ortho_config(default = 2000)]
    pub readiness_min_delay_ms: u64,
    /// Upper bound for readiness retry delays, in milliseconds.
    #[ortho_config(default = 5000)]
    pub readiness_max_delay_ms: u64,
    /// Multiplier applied to the delay after each retry.
    #[ortho_config(default = 2)]
    pub readiness_backoff_factor: u32,
    /// Remote directory receiving provisioning metadata.
    #[ortho_config(default = DEFAULT_REMOTE_DIR_BASE.to_owned())]
    pub metadata_dir: String,
    /// File name of the metadata document.
    #[ortho_config(default = DRIVER_METADATA_FILENAME.to_owned())]
    pub metadata_file_name: String,
    /// Enables verbose transport diagnostics when connecting.
    #[ortho_config(default = false)]
    pub debug: bool,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn guidance(&self) -> String {
        format!(
            "set {} or add {} to hangar.toml",
            self.env_var, self.toml_key
        )
    }
}

const READINESS_COMMAND: FieldMetadata = FieldMetadata::new(
    "readiness command",
    "HANGAR_READINESS_COMMAND",
    "readiness_command",
);
const METADATA_DIR: FieldMetadata =
    FieldMetadata::new("metadata directory", "HANGAR_METADATA_DIR", "metadata_dir");
const METADATA_FILE_NAME: FieldMetadata = FieldMetadata::new(
    "metadata file name",
    "HANGAR_METADATA_FILE_NAME",
    "metadata_file_name",
);
const MIN_DELAY: FieldMetadata = FieldMetadata::new(
    "readiness minimum delay",
    "HANGAR_READINESS_MIN_DELAY_MS",
    "readiness_min_delay_ms",
);
const MAX_DELAY: FieldMetadata = FieldMetadata::new(
    "readiness maximum delay",
    "HANGAR_READINESS_MAX_DELAY_MS",
    "readiness_max_delay_ms",
);
const BACKOFF_FACTOR: FieldMetadata = FieldMetadata::new(
    "readiness backoff factor",
    "HANGAR_READINESS_BACKOFF_FACTOR",
    "readiness_backoff_factor",
);

impl OrchestratorConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: {}",
                metadata.description,
                metadata.guidance()
            )));
        }
        Ok(())
    }

    fn invalid(metadata: &FieldMetadata, problem: &str) -> ConfigError {
        ConfigError::Invalid(format!(
            "{} {problem}: {}",
            metadata.description,
            metadata.guidance()
        ))
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("hangar")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages include guidance on how
    /// to provide values via environment variables or configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required string is empty
    /// and [`ConfigError::Invalid`] when the retry settings are inconsistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(&self.readiness_command, &READINESS_COMMAND)?;
        Self::require_field(&self.metadata_dir, &METADATA_DIR)?;
        Self::require_field(&self.metadata_file_name, &METADATA_FILE_NAME)?;
        if self.metadata_file_name.contains('/') {
            return Err(Self::invalid(&METADATA_FILE_NAME, "must not contain '/'"));
        }
        if self.readiness_min_delay_ms == 0 {
            return Err(Self::invalid(&MIN_DELAY, "must be greater than zero"));
        }
        if self.readiness_max_delay_ms < self.readiness_min_delay_ms {
            return Err(Self::invalid(
                &MAX_DELAY,
                "must not be smaller than the minimum delay",
            ));
        }
        if self.readiness_backoff_factor == 0 {
            return Err(Self::invalid(&BACKOFF_FACTOR, "must be at least 1"));
        }
        Ok(())
    }

    /// Validates the configuration and converts it into runtime settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn settings(&self) -> Result<OrchestratorSettings, ConfigError> {
        self.validate()?;
        Ok(OrchestratorSettings {
            readiness_command: self.readiness_command.trim().to_owned(),
            retry_policy: RetryPolicy {
                retries: self.readiness_retries,
                min_delay: Duration::from_millis(self.readiness_min_delay_ms),
                max_delay: Duration::from_millis(self.readiness_max_delay_ms),
                factor: self.readiness_backoff_factor,
            },
            metadata: MetadataWriter::new(
                self.metadata_dir.trim(),
                self.metadata_file_name.trim(),
            ),
            connect: ConnectOptions { debug: self.debug },
        })
    }
}

/// Validated settings consumed by the orchestrator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OrchestratorSettings {
    /// Command proving the container runtime is usable.
    pub readiness_command: String,
    /// Backoff policy for the readiness probe.
    pub retry_policy: RetryPolicy,
    /// Where provisioning metadata is written.
    pub metadata: MetadataWriter,
    /// Options passed whenever a connection is opened.
    pub connect: ConnectOptions,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            readiness_command: DEFAULT_READINESS_COMMAND.to_owned(),
            retry_policy: RetryPolicy::default(),
            metadata: MetadataWriter::default(),
            connect: ConnectOptions::default(),
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}
