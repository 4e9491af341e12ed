//! Provisioning metadata persisted onto the machine after it is finalized.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::debug;

use crate::driver::{ExecOptions, MachineConnection, MachineDriver, MachineRecord};
use crate::remote::{CommandError, UserAndGroup, run_checked};

mod timestamp;

/// Base directory for files written onto provisioned machines.
pub const DEFAULT_REMOTE_DIR_BASE: &str = "/var/lib/hangar";

/// File name of the driver metadata document.
pub const DRIVER_METADATA_FILENAME: &str = "driver-metadata.json";

/// What was provisioned, where, and by which driver.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningMetadata {
    /// When the metadata was produced.
    #[serde(with = "timestamp")]
    pub creation_time: DateTime<Utc>,
    /// Provider-assigned machine identifier.
    pub provider_id: String,
    /// Human-readable machine location.
    pub machine_location_description: String,
    /// Driver name.
    pub driver: String,
    /// Driver-specific options.
    pub opts: Map<String, Value>,
}

impl ProvisioningMetadata {
    /// Describes `machine` as provisioned by `driver` at `creation_time`.
    #[must_use]
    pub fn new(
        machine: &MachineRecord,
        driver: impl Into<String>,
        opts: Map<String, Value>,
        creation_time: DateTime<Utc>,
    ) -> Self {
        Self {
            creation_time,
            provider_id: machine.provider_id.clone(),
            machine_location_description: machine.location_description.clone(),
            driver: driver.into(),
            opts,
        }
    }
}

/// Document stored in the metadata file.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MetadataDocument {
    /// Driver section of the environment metadata.
    pub driver: ProvisioningMetadata,
}

/// Errors raised while writing metadata.
#[derive(Debug, Error)]
pub enum MetadataError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the document cannot be serialized.
    #[error("failed to serialize metadata: {0}")]
    Serialize(#[source] serde_json::Error),
    /// Raised when the metadata directory cannot be created or chowned.
    #[error("failed to prepare {dir}: {source}")]
    PrepareDirectory {
        /// Directory being prepared.
        dir: Utf8PathBuf,
        /// Underlying command failure.
        #[source]
        source: CommandError<E>,
    },
    /// Raised when the metadata file cannot be written.
    #[error("failed to write {path}: {source}")]
    Write {
        /// File being written.
        path: Utf8PathBuf,
        /// Underlying command failure.
        #[source]
        source: CommandError<E>,
    },
}

/// Writes [`MetadataDocument`]s to a well-known location on the machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MetadataWriter {
    base_dir: Utf8PathBuf,
    file_name: String,
}

impl Default for MetadataWriter {
    fn default() -> Self {
        Self::new(DEFAULT_REMOTE_DIR_BASE, DRIVER_METADATA_FILENAME)
    }
}

impl MetadataWriter {
    /// Writes `file_name` under `base_dir`.
    #[must_use]
    pub fn new(base_dir: impl Into<Utf8PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            file_name: file_name.into(),
        }
    }

    /// Remote directory holding the metadata file.
    #[must_use]
    pub fn base_dir(&self) -> &Utf8Path {
        &self.base_dir
    }

    /// Full remote path of the metadata file.
    #[must_use]
    pub fn metadata_path(&self) -> Utf8PathBuf {
        self.base_dir.join(&self.file_name)
    }

    /// Records `machine` as provisioned by `driver`, stamped with the current
    /// time.
    ///
    /// # Errors
    ///
    /// See [`MetadataWriter::write`].
    pub async fn write_for_driver<D: MachineDriver>(
        &self,
        driver: &D,
        connection: &D::Connection,
        machine: &MachineRecord,
        user_and_group: &UserAndGroup,
    ) -> Result<(), MetadataError<D::Error>> {
        let metadata = ProvisioningMetadata::new(
            machine,
            driver.name(),
            driver.metadata().clone(),
            Utc::now(),
        );
        self.write(connection, &metadata, user_and_group).await
    }

    /// Creates the base directory as root, hands it to `user_and_group`, and
    /// streams the serialized document into the metadata file.
    ///
    /// Each call replaces the previous file contents.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError`] when serialization or either remote command
    /// fails.
    pub async fn write<C: MachineConnection>(
        &self,
        connection: &C,
        metadata: &ProvisioningMetadata,
        user_and_group: &UserAndGroup,
    ) -> Result<(), MetadataError<C::Error>> {
        let document = MetadataDocument {
            driver: metadata.clone(),
        };
        let payload = serde_json::to_vec(&document).map_err(MetadataError::Serialize)?;

        run_checked(
            connection,
            &self.prepare_command(user_and_group),
            ExecOptions::new().as_root(),
        )
        .await
        .map_err(|source| MetadataError::PrepareDirectory {
            dir: self.base_dir.clone(),
            source,
        })?;

        let path = self.metadata_path();
        run_checked(
            connection,
            &write_command(&path),
            ExecOptions::new().stdin(payload),
        )
        .await
        .map_err(|source| MetadataError::Write {
            path: path.clone(),
            source,
        })?;

        debug!(%path, provider_id = %metadata.provider_id, "wrote provisioning metadata");
        Ok(())
    }

    fn prepare_command(&self, user_and_group: &UserAndGroup) -> String {
        let dir = escape(self.base_dir.as_str().into());
        let owner = escape(user_and_group.to_string().into());
        format!("mkdir -p {dir} && chown {owner} {dir}")
    }
}

fn write_command(path: &Utf8Path) -> String {
    format!("cat > {}", escape(path.as_str().into()))
}

#[cfg(test)]
mod tests;
