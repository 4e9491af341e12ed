//! Customization of machines built from scratch.
//!
//! Scripts run strictly in order, then the container runtime is probed. Once
//! it answers, the metadata write and the snapshot request run together.

use shell_escape::unix::escape;
use tracing::{debug, info};

use crate::config::OrchestratorSettings;
use crate::connection::ConnectionSlot;
use crate::driver::{
    CustomizationScript, ExecOptions, MachineDriver, MachineRecord, SnapshotRequest,
};
use crate::orchestrator::OrchestratorError;
use crate::progress::Progress;
use crate::readiness::ReadinessProbe;
use crate::remote::{UserAndGroup, discover_user_and_group, run_checked};

/// Status text shown while the container runtime is probed.
pub const ENSURING_DOCKER_TEXT: &str = "Ensuring docker is accessible...";

/// Status text shown while the machine is finalized.
pub const FINALIZING_TEXT: &str = "Finalizing...";

/// Renders the remote command that executes `script` from stdin.
#[must_use]
pub fn script_command(script: &CustomizationScript) -> String {
    if script.env.is_empty() {
        return String::from("bash -s");
    }
    let assignments = script
        .env
        .iter()
        .map(|(key, value)| escape(format!("{key}={value}").into()).into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    format!("env {assignments} bash -s")
}

/// Brings a freshly built machine to the ready state.
#[derive(Debug)]
pub struct CustomizationRunner<'a, D, P: ?Sized> {
    driver: &'a D,
    progress: &'a P,
    settings: &'a OrchestratorSettings,
}

impl<'a, D, P> CustomizationRunner<'a, D, P>
where
    D: MachineDriver,
    P: Progress + ?Sized,
{
    /// Creates a runner reporting status through `progress`.
    #[must_use]
    pub const fn new(driver: &'a D, progress: &'a P, settings: &'a OrchestratorSettings) -> Self {
        Self {
            driver,
            progress,
            settings,
        }
    }

    /// Runs the scripts, waits for the container runtime, and finalizes.
    ///
    /// The readiness probe may replace the connection held in `slot`; the
    /// connection in `slot` when this returns is the one to keep using.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when a script, the readiness probe,
    /// user/group discovery, the metadata write, or the snapshot request
    /// fails. The connection is left in `slot` for the caller to release.
    pub async fn run(
        &self,
        env_id: &str,
        machine: &MachineRecord,
        slot: &mut ConnectionSlot<D::Connection>,
    ) -> Result<UserAndGroup, OrchestratorError<D::Error>> {
        self.run_scripts(slot).await?;

        self.progress.set_text(ENSURING_DOCKER_TEXT);
        let report =
            ReadinessProbe::new(&self.settings.readiness_command, self.settings.retry_policy)
                .with_connect_options(self.settings.connect)
                .run(self.driver, machine, slot)
                .await?;
        debug!(
            provider_id = %machine.provider_id,
            attempts = report.attempts,
            reconnects = report.reconnects,
            "container runtime ready"
        );

        self.progress.set_text(FINALIZING_TEXT);
        let connection = slot.get()?;
        let user_and_group = discover_user_and_group(connection).await?;

        let request = SnapshotRequest {
            provider_id: machine.provider_id.clone(),
            env_id: env_id.to_owned(),
            wait: false,
        };
        tokio::try_join!(
            async {
                self.settings
                    .metadata
                    .write_for_driver(self.driver, connection, machine, &user_and_group)
                    .await
                    .map_err(OrchestratorError::Metadata)
            },
            async {
                self.driver
                    .ensure_machine_snapshot(&request)
                    .await
                    .map_err(|source| OrchestratorError::Snapshot {
                        provider_id: request.provider_id.clone(),
                        source,
                    })
            },
        )?;

        Ok(user_and_group)
    }

    async fn run_scripts(
        &self,
        slot: &ConnectionSlot<D::Connection>,
    ) -> Result<(), OrchestratorError<D::Error>> {
        let scripts = self.driver.customization_scripts();
        let total = scripts.len();
        for (index, script) in scripts.iter().enumerate() {
            self.progress.set_text(&format!(
                "Executing customization scripts ({}/{total})",
                index + 1
            ));
            let mut options = ExecOptions::new().stdin(script.body.as_bytes());
            if script.as_root {
                options = options.as_root();
            }
            run_checked(slot.get()?, &script_command(script), options)
                .await
                .map_err(|source| OrchestratorError::Script {
                    name: script.name.clone(),
                    source,
                })?;
            info!(script = %script.name, "customization script finished");
        }
        Ok(())
    }
}
