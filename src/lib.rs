//! Core library for the Hangar machine lifecycle orchestrator.
//!
//! Given an environment identifier, the orchestrator reuses, recreates, or
//! creates the remote machine backing it through a [`MachineDriver`], then
//! brings new machines to the ready state: customization scripts, a
//! container-runtime readiness probe with reconnects, and provisioning
//! metadata written onto the machine.

pub mod config;
pub mod connection;
pub mod customize;
pub mod driver;
pub mod metadata;
pub mod orchestrator;
pub mod progress;
pub mod readiness;
pub mod remote;
pub mod spec_diff;
pub mod telemetry;
pub mod test_support;

pub use config::{ConfigError, OrchestratorConfig, OrchestratorSettings};
pub use connection::{ConnectionSlot, EmptySlot};
pub use driver::{
    BackendFuture, ConnectOptions, CreatedMachine, CustomizationScript, ExecOptions, ExecOutput,
    ExistingMachine, MachineConnection, MachineCreation, MachineDriver, MachineRecord,
    ResourceSelector, SnapshotRequest,
};
pub use metadata::{MetadataError, MetadataWriter, ProvisioningMetadata};
pub use orchestrator::{
    CustomizedMachine, EnsuredMachine, MachineOrchestrator, OrchestratorError, Origin,
    PendingConnection,
};
pub use progress::{Progress, TracingProgress};
pub use readiness::{ReadinessError, ReadinessProbe, RetryPolicy};
pub use remote::{CommandError, UserAndGroup};
pub use spec_diff::{MachineSpec, SpecDiffItem, describe_diff, diff_specs};
pub use telemetry::{Telemetry, TracingTelemetry};
