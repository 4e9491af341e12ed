//! Machine lifecycle orchestration.
//!
//! [`MachineOrchestrator::ensure_machine`] decides whether the machine for an
//! environment is reused, recreated, or created, and
//! [`MachineOrchestrator::ensure_customized_machine`] brings the result to the
//! ready state.

use std::fmt::Display;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::OrchestratorSettings;
use crate::connection::ConnectionSlot;
use crate::customize::{CustomizationRunner, FINALIZING_TEXT};
use crate::driver::{
    CreatedMachine, ExistingMachine, MachineConnection, MachineDriver, MachineRecord,
    ResourceSelector,
};
use crate::progress::{Progress, TracingProgress, with_progress};
use crate::remote::{UserAndGroup, discover_user_and_group};
use crate::spec_diff::describe_diff;
use crate::telemetry::{CREATE_MACHINE_EVENT, Telemetry, TracingTelemetry};

mod error;

pub use error::OrchestratorError;

const CONFIGURING_LABEL: &str = "Configuring machine";
const CONFIGURED_TEXT: &str = "Machine configured";
const CHECKING_SNAPSHOT_TEXT: &str = "Checking for existing snapshot";
const FROM_SNAPSHOT_TEXT: &str = "Creating from existing snapshot";
const FROM_SCRATCH_TEXT: &str = "No suitable snapshot yet, creating from scratch";

/// How the machine used by a run came to exist.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Origin {
    /// An up-to-date machine was reused.
    Existing,
    /// A new machine was restored from a snapshot.
    NewFromSnapshot,
    /// A new machine was built from scratch and must be customized.
    NewFromScratch,
}

/// Connection handed out by [`MachineOrchestrator::ensure_machine`].
#[derive(Debug)]
pub enum PendingConnection<C> {
    /// The connection opened while creating the machine.
    Ready(C),
    /// No connection yet; one is opened when the machine is finalized.
    Deferred,
}

/// Machine selected for an environment.
#[derive(Debug)]
pub struct EnsuredMachine<C> {
    /// The machine to use.
    pub machine: MachineRecord,
    /// How the machine came to exist.
    pub origin: Origin,
    /// Connection to the machine, if one is already open.
    pub connection: PendingConnection<C>,
}

/// Machine ready for use, with its live connection.
#[derive(Debug)]
pub struct CustomizedMachine<C> {
    /// The machine in use.
    pub machine: MachineRecord,
    /// How the machine came to exist.
    pub origin: Origin,
    /// The current connection to the machine.
    pub connection: C,
    /// Remote user and container-runtime group.
    pub user_and_group: UserAndGroup,
}

/// Drives the machine lifecycle through a [`MachineDriver`].
#[derive(Debug)]
pub struct MachineOrchestrator<D, P = TracingProgress, T = TracingTelemetry> {
    driver: D,
    settings: OrchestratorSettings,
    progress: P,
    telemetry: T,
}

impl<D: MachineDriver> MachineOrchestrator<D> {
    /// Creates an orchestrator reporting through `tracing`.
    #[must_use]
    pub const fn new(driver: D, settings: OrchestratorSettings) -> Self {
        Self {
            driver,
            settings,
            progress: TracingProgress,
            telemetry: TracingTelemetry,
        }
    }
}

impl<D, P, T> MachineOrchestrator<D, P, T>
where
    D: MachineDriver,
    P: Progress,
    T: Telemetry,
{
    /// Replaces the progress reporter.
    #[must_use]
    pub fn with_progress<Q: Progress>(self, progress: Q) -> MachineOrchestrator<D, Q, T> {
        MachineOrchestrator {
            driver: self.driver,
            settings: self.settings,
            progress,
            telemetry: self.telemetry,
        }
    }

    /// Replaces the telemetry sink.
    #[must_use]
    pub fn with_telemetry<U: Telemetry>(self, telemetry: U) -> MachineOrchestrator<D, P, U> {
        MachineOrchestrator {
            driver: self.driver,
            settings: self.settings,
            progress: self.progress,
            telemetry,
        }
    }

    /// Settings in effect for this orchestrator.
    #[must_use]
    pub const fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Returns a machine for `env_id`, creating or recreating it as needed.
    ///
    /// A fully formed machine whose specification has not drifted is reused
    /// untouched. A partial machine, or one whose specification drifted, is
    /// deleted and replaced.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when the lookup, deletion, or creation
    /// fails.
    pub async fn ensure_machine(
        &self,
        env_id: &str,
    ) -> Result<EnsuredMachine<D::Connection>, OrchestratorError<D::Error>> {
        let existing = self
            .driver
            .get_machine_and_spec_diff(env_id)
            .await
            .map_err(|source| OrchestratorError::Lookup {
                env_id: env_id.to_owned(),
                source,
            })?;

        let stale = match existing {
            None => None,
            Some(ExistingMachine::Partial { machine, error }) => {
                info!(
                    env_id,
                    provider_id = %machine.provider_id,
                    %error,
                    "existing machine is in an error state; recreating"
                );
                Some(machine)
            }
            Some(ExistingMachine::Ready { machine, spec_diff }) if !spec_diff.is_empty() => {
                info!(
                    env_id,
                    provider_id = %machine.provider_id,
                    diff = %describe_diff(&spec_diff),
                    "machine specification changed; recreating"
                );
                Some(machine)
            }
            Some(ExistingMachine::Ready { machine, .. }) => {
                debug!(env_id, provider_id = %machine.provider_id, "reusing existing machine");
                return Ok(EnsuredMachine {
                    machine,
                    origin: Origin::Existing,
                    connection: PendingConnection::Deferred,
                });
            }
        };

        let recreating = stale.is_some();
        let friendly_name = self.driver.friendly_name();
        let verb = if recreating { "Recreating" } else { "Creating" };
        let (origin, created) = with_progress(
            &self.progress,
            &format!("{verb} {friendly_name} machine"),
            |(origin, _): &(Origin, CreatedMachine<D::Connection>)| {
                creation_success_text(friendly_name, recreating, *origin)
            },
            self.create(env_id, stale.as_ref()),
        )
        .await?;

        Ok(EnsuredMachine {
            machine: created.machine,
            origin,
            connection: PendingConnection::Ready(created.connection),
        })
    }

    /// Ensures the machine for `env_id` exists and brings it to the ready
    /// state.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when ensuring or finalizing the machine
    /// fails.
    pub async fn ensure_customized_machine(
        &self,
        env_id: &str,
    ) -> Result<CustomizedMachine<D::Connection>, OrchestratorError<D::Error>> {
        let ensured = self.ensure_machine(env_id).await?;
        self.finalize(env_id, ensured).await
    }

    /// Brings an ensured machine to the ready state.
    ///
    /// Machines built from scratch are customized. Reused machines and
    /// machines restored from a snapshot only have their remote user and
    /// group discovered; snapshot restores additionally get fresh metadata.
    /// On failure the current connection is closed before the error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when connecting or any finalize step
    /// fails.
    pub async fn finalize(
        &self,
        env_id: &str,
        ensured: EnsuredMachine<D::Connection>,
    ) -> Result<CustomizedMachine<D::Connection>, OrchestratorError<D::Error>> {
        with_progress(
            &self.progress,
            CONFIGURING_LABEL,
            |_| String::from(CONFIGURED_TEXT),
            self.configure(env_id, ensured),
        )
        .await
    }

    async fn create(
        &self,
        env_id: &str,
        stale: Option<&MachineRecord>,
    ) -> Result<(Origin, CreatedMachine<D::Connection>), OrchestratorError<D::Error>> {
        if let Some(machine) = stale {
            self.driver
                .delete_resources(false, &ResourceSelector::machine(&machine.provider_id))
                .await
                .map_err(|source| OrchestratorError::Delete {
                    provider_id: machine.provider_id.clone(),
                    source,
                })?;
        }

        self.progress.set_text(CHECKING_SNAPSHOT_TEXT);
        let create_error = |source| OrchestratorError::Create {
            env_id: env_id.to_owned(),
            source,
        };
        let creation = self
            .driver
            .create_machine(env_id)
            .await
            .map_err(create_error)?;
        let from_snapshot = creation.from_snapshot;
        let (origin, text) = if from_snapshot {
            (Origin::NewFromSnapshot, FROM_SNAPSHOT_TEXT)
        } else {
            (Origin::NewFromScratch, FROM_SCRATCH_TEXT)
        };
        self.progress.set_text(text);
        self.telemetry
            .capture(CREATE_MACHINE_EVENT, &json!({ "from_snapshot": from_snapshot }));

        let created = creation.result.await.map_err(create_error)?;
        info!(
            env_id,
            provider_id = %created.machine.provider_id,
            from_snapshot,
            "machine created"
        );
        Ok((origin, created))
    }

    async fn configure(
        &self,
        env_id: &str,
        ensured: EnsuredMachine<D::Connection>,
    ) -> Result<CustomizedMachine<D::Connection>, OrchestratorError<D::Error>> {
        let EnsuredMachine {
            machine,
            origin,
            connection,
        } = ensured;
        self.progress.set_text(&format!(
            "Connecting to machine at {}",
            machine.location_description
        ));
        let connection = match connection {
            PendingConnection::Ready(connection) => connection,
            PendingConnection::Deferred => self
                .driver
                .connect(&machine, self.settings.connect)
                .await
                .map_err(|source| OrchestratorError::Connect {
                    provider_id: machine.provider_id.clone(),
                    source,
                })?,
        };

        let mut slot = ConnectionSlot::new(connection);
        let outcome = match origin {
            Origin::NewFromScratch => {
                CustomizationRunner::new(&self.driver, &self.progress, &self.settings)
                    .run(env_id, &machine, &mut slot)
                    .await
            }
            Origin::Existing | Origin::NewFromSnapshot => {
                self.finalize_restored(&machine, origin, &slot).await
            }
        };

        match outcome {
            Ok(user_and_group) => Ok(CustomizedMachine {
                connection: slot.into_connection()?,
                machine,
                origin,
                user_and_group,
            }),
            Err(err) => {
                release_after_failure(&mut slot, &err).await;
                Err(err)
            }
        }
    }

    async fn finalize_restored(
        &self,
        machine: &MachineRecord,
        origin: Origin,
        slot: &ConnectionSlot<D::Connection>,
    ) -> Result<UserAndGroup, OrchestratorError<D::Error>> {
        let connection = slot.get()?;
        let user_and_group = discover_user_and_group(connection).await?;
        if origin == Origin::NewFromSnapshot {
            self.progress.set_text(FINALIZING_TEXT);
            self.settings
                .metadata
                .write_for_driver(&self.driver, connection, machine, &user_and_group)
                .await?;
        }
        Ok(user_and_group)
    }
}

fn creation_success_text(friendly_name: &str, recreating: bool, origin: Origin) -> String {
    if recreating {
        return format!("{friendly_name} machine recreated");
    }
    let source = if origin == Origin::NewFromSnapshot {
        "snapshot"
    } else {
        "scratch"
    };
    format!("{friendly_name} machine created from {source}")
}

async fn release_after_failure<C, E>(slot: &mut ConnectionSlot<C>, err: &E)
where
    C: MachineConnection,
    E: Display,
{
    if let Err(close_err) = slot.release().await {
        warn!(
            error = %close_err,
            original_error = %err,
            "failed to close connection after failure"
        );
    }
}
