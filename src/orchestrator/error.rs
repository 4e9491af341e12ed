//! Error types for the machine lifecycle workflow.

use thiserror::Error;

use crate::connection::EmptySlot;
use crate::metadata::MetadataError;
use crate::readiness::ReadinessError;
use crate::remote::{CommandError, UserAndGroupError};

/// Errors raised while ensuring or customizing a machine.
#[derive(Debug, Error)]
pub enum OrchestratorError<DriverError>
where
    DriverError: std::error::Error + 'static,
{
    /// Raised when the existing machine cannot be looked up.
    #[error("failed to look up machine for environment {env_id}: {source}")]
    Lookup {
        /// Environment being looked up.
        env_id: String,
        /// Provider-specific error.
        #[source]
        source: DriverError,
    },
    /// Raised when a stale machine cannot be deleted before recreation.
    #[error("failed to delete machine {provider_id}: {source}")]
    Delete {
        /// Machine that could not be deleted.
        provider_id: String,
        /// Provider-specific error.
        #[source]
        source: DriverError,
    },
    /// Raised when machine creation fails.
    #[error("failed to create machine for environment {env_id}: {source}")]
    Create {
        /// Environment the machine was created for.
        env_id: String,
        /// Provider-specific error.
        #[source]
        source: DriverError,
    },
    /// Raised when no connection can be opened to the machine.
    #[error("failed to connect to machine {provider_id}: {source}")]
    Connect {
        /// Machine being connected to.
        provider_id: String,
        /// Provider-specific error.
        #[source]
        source: DriverError,
    },
    /// Raised when a customization script fails.
    #[error("customization script {name} failed: {source}")]
    Script {
        /// Name of the failing script.
        name: String,
        /// Underlying command failure.
        #[source]
        source: CommandError<DriverError>,
    },
    /// Raised when the container runtime never becomes usable.
    #[error(transparent)]
    Readiness(#[from] ReadinessError<DriverError>),
    /// Raised when the remote user and group cannot be discovered.
    #[error("failed to discover remote user and group: {0}")]
    UserAndGroup(#[from] UserAndGroupError<DriverError>),
    /// Raised when provisioning metadata cannot be written.
    #[error(transparent)]
    Metadata(#[from] MetadataError<DriverError>),
    /// Raised when the snapshot request fails.
    #[error("failed to snapshot machine {provider_id}: {source}")]
    Snapshot {
        /// Machine being snapshotted.
        provider_id: String,
        /// Provider-specific error.
        #[source]
        source: DriverError,
    },
    /// Raised when a step needs the current connection but none is held.
    #[error(transparent)]
    NoConnection(#[from] EmptySlot),
}
