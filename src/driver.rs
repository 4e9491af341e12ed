//! Driver abstraction for machine backends and their remote connections.
//!
//! A driver owns the provider-specific knowledge of how machines are looked
//! up, created, snapshotted and deleted. The orchestrator only decides when
//! to call these operations and how to react to their outcomes.

use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};

use crate::spec_diff::SpecDiffItem;

/// Future returned by driver and connection operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Resource type used when selecting a machine for deletion.
pub const MACHINE_RESOURCE_TYPE: &str = "machine";

/// Identifies a provisioned instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MachineRecord {
    /// Provider-assigned identifier.
    pub provider_id: String,
    /// Human-readable description of where the machine lives.
    pub location_description: String,
}

impl MachineRecord {
    /// Creates a record from its identifier and location description.
    #[must_use]
    pub fn new(provider_id: impl Into<String>, location_description: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            location_description: location_description.into(),
        }
    }
}

/// Machine found by the driver for an environment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExistingMachine {
    /// Creation failed or was interrupted; the machine must be recreated.
    Partial {
        /// The half-built machine.
        machine: MachineRecord,
        /// Error reported by the provider.
        error: String,
    },
    /// The machine is fully formed.
    Ready {
        /// The existing machine.
        machine: MachineRecord,
        /// Fields that drifted from the desired specification.
        spec_diff: Vec<SpecDiffItem>,
    },
}

/// Machine and live connection yielded once creation finishes.
#[derive(Debug)]
pub struct CreatedMachine<C> {
    /// The freshly created machine.
    pub machine: MachineRecord,
    /// A ready connection to the machine.
    pub connection: C,
}

/// Result of asking the driver to create a machine.
///
/// `from_snapshot` is known as soon as the driver has picked a creation
/// strategy; the machine itself arrives through `result`.
pub struct MachineCreation<'a, C, E> {
    /// Whether the machine is being restored from a snapshot.
    pub from_snapshot: bool,
    /// Resolves to the created machine and its connection.
    pub result: BackendFuture<'a, CreatedMachine<C>, E>,
}

impl<C, E> std::fmt::Debug for MachineCreation<'_, C, E> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("MachineCreation")
            .field("from_snapshot", &self.from_snapshot)
            .finish_non_exhaustive()
    }
}

/// Selects provider resources for deletion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceSelector {
    /// Kind of resource, for example [`MACHINE_RESOURCE_TYPE`].
    pub resource_type: String,
    /// Provider identifier of the resource.
    pub provider_id: String,
}

impl ResourceSelector {
    /// Selects the machine with the given provider identifier.
    #[must_use]
    pub fn machine(provider_id: impl Into<String>) -> Self {
        Self {
            resource_type: MACHINE_RESOURCE_TYPE.to_owned(),
            provider_id: provider_id.into(),
        }
    }
}

/// Options passed to [`MachineDriver::connect`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConnectOptions {
    /// Enables verbose transport diagnostics.
    pub debug: bool,
}

/// Parameters for [`MachineDriver::ensure_machine_snapshot`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotRequest {
    /// Machine to snapshot.
    pub provider_id: String,
    /// Environment the machine belongs to.
    pub env_id: String,
    /// Whether the driver should wait for the snapshot to finish.
    pub wait: bool,
}

/// A setup script supplied by the driver for machines built from scratch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CustomizationScript {
    /// Name used in logs and errors.
    pub name: String,
    /// Script body, piped to the remote shell.
    pub body: String,
    /// Environment exported to the script, in order.
    pub env: Vec<(String, String)>,
    /// Whether the script runs in the privileged context.
    pub as_root: bool,
}

impl CustomizationScript {
    /// Creates an unprivileged script with no extra environment.
    #[must_use]
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            env: Vec::new(),
            as_root: false,
        }
    }

    /// Adds an environment variable exported to the script.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Runs the script in the privileged context.
    #[must_use]
    pub const fn as_root(mut self) -> Self {
        self.as_root = true;
        self
    }
}

/// Options for a single remote command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecOptions {
    /// Run the command in the privileged context.
    pub as_root: bool,
    /// Bytes written to the command's standard input.
    pub stdin: Option<Vec<u8>>,
}

impl ExecOptions {
    /// Unprivileged command without stdin.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the command in the privileged context.
    #[must_use]
    pub const fn as_root(mut self) -> Self {
        self.as_root = true;
        self
    }

    /// Streams `bytes` to the command's standard input.
    #[must_use]
    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }
}

/// Captured result of a remote command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit code reported by the remote process, if any.
    pub exit_code: Option<i32>,
}

impl ExecOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Live remote-execution channel bound to one machine.
pub trait MachineConnection: Send + Sync + 'static {
    /// Transport error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Runs `command` on the remote machine.
    fn exec<'a>(
        &'a self,
        command: &'a str,
        options: ExecOptions,
    ) -> BackendFuture<'a, ExecOutput, Self::Error>;

    /// Releases the connection. The handle is consumed so it cannot be used
    /// afterwards.
    fn close(self) -> BackendFuture<'static, (), Self::Error>
    where
        Self: Sized;
}

/// Capability set implemented by each machine backend.
pub trait MachineDriver: Send + Sync {
    /// Provider-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;
    /// Connection type produced by this driver.
    type Connection: MachineConnection<Error = Self::Error>;

    /// Driver name persisted in provisioning metadata.
    fn name(&self) -> &str;

    /// Name shown in progress labels.
    fn friendly_name(&self) -> &str;

    /// Ordered setup scripts for machines built from scratch.
    fn customization_scripts(&self) -> &[CustomizationScript];

    /// Driver-specific options persisted in provisioning metadata.
    fn metadata(&self) -> &Map<String, Value>;

    /// Looks up the machine for `env_id` and its drift from the desired spec.
    fn get_machine_and_spec_diff<'a>(
        &'a self,
        env_id: &'a str,
    ) -> BackendFuture<'a, Option<ExistingMachine>, Self::Error>;

    /// Starts creating a machine for `env_id`.
    fn create_machine<'a>(
        &'a self,
        env_id: &'a str,
    ) -> BackendFuture<'a, MachineCreation<'a, Self::Connection, Self::Error>, Self::Error>;

    /// Deletes the resources matched by `selector`.
    fn delete_resources<'a>(
        &'a self,
        force: bool,
        selector: &'a ResourceSelector,
    ) -> BackendFuture<'a, (), Self::Error>;

    /// Opens a new connection to `machine`.
    fn connect<'a>(
        &'a self,
        machine: &'a MachineRecord,
        options: ConnectOptions,
    ) -> BackendFuture<'a, Self::Connection, Self::Error>;

    /// Requests a snapshot of the machine for faster future creation.
    fn ensure_machine_snapshot<'a>(
        &'a self,
        request: &'a SnapshotRequest,
    ) -> BackendFuture<'a, (), Self::Error>;
}
