//! Shared fixtures for orchestrator BDD scenarios.

use std::time::Duration;

use hangar::driver::{CustomizationScript, ExistingMachine, MachineRecord};
use hangar::orchestrator::{Origin, OrchestratorError};
use hangar::readiness::RetryPolicy;
use hangar::test_support::{
    Call, RecordingProgress, RecordingTelemetry, ScriptedDriver, ScriptedError,
};
use hangar::{MachineOrchestrator, OrchestratorSettings};
use rstest::fixture;

use crate::test_constants::{STALE_LOCATION, STALE_PROVIDER_ID};

/// Environment variable exported to each standard script so failures can be
/// targeted by name.
pub const STEP_ENV: &str = "HANGAR_STEP";

pub type TestOrchestrator =
    MachineOrchestrator<ScriptedDriver, RecordingProgress, RecordingTelemetry>;

#[derive(Clone, Debug)]
pub struct OrchestratorContext {
    pub driver: ScriptedDriver,
    pub progress: RecordingProgress,
    pub telemetry: RecordingTelemetry,
}

impl OrchestratorContext {
    pub fn orchestrator(&self) -> TestOrchestrator {
        MachineOrchestrator::new(self.driver.clone(), fast_settings())
            .with_progress(self.progress.clone())
            .with_telemetry(self.telemetry.clone())
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.driver.log().count(predicate)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureKind {
    Lookup,
    Delete,
    Create,
    Connect,
    Script,
    Readiness,
    UserAndGroup,
    Metadata,
    Snapshot,
    NoConnection,
}

impl FailureKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "lookup" => Some(Self::Lookup),
            "delete" => Some(Self::Delete),
            "create" => Some(Self::Create),
            "connect" => Some(Self::Connect),
            "script" => Some(Self::Script),
            "readiness" => Some(Self::Readiness),
            "user-and-group" => Some(Self::UserAndGroup),
            "metadata" => Some(Self::Metadata),
            "snapshot" => Some(Self::Snapshot),
            "no-connection" => Some(Self::NoConnection),
            _ => None,
        }
    }

    pub const fn of(err: &OrchestratorError<ScriptedError>) -> Self {
        match err {
            OrchestratorError::Lookup { .. } => Self::Lookup,
            OrchestratorError::Delete { .. } => Self::Delete,
            OrchestratorError::Create { .. } => Self::Create,
            OrchestratorError::Connect { .. } => Self::Connect,
            OrchestratorError::Script { .. } => Self::Script,
            OrchestratorError::Readiness(_) => Self::Readiness,
            OrchestratorError::UserAndGroup(_) => Self::UserAndGroup,
            OrchestratorError::Metadata(_) => Self::Metadata,
            OrchestratorError::Snapshot { .. } => Self::Snapshot,
            OrchestratorError::NoConnection(_) => Self::NoConnection,
        }
    }
}

#[derive(Clone, Debug)]
pub enum RunOutcome {
    Pending,
    Succeeded {
        origin: Origin,
        connection: u32,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
}

pub fn parse_origin(origin: &str) -> Option<Origin> {
    match origin {
        "existing" => Some(Origin::Existing),
        "new-from-snapshot" => Some(Origin::NewFromSnapshot),
        "new-from-scratch" => Some(Origin::NewFromScratch),
        _ => None,
    }
}

pub fn standard_scripts() -> Vec<CustomizationScript> {
    vec![
        CustomizationScript::new("install-docker", "curl -fsSL https://get.docker.com | sh")
            .env(STEP_ENV, "install-docker")
            .as_root(),
        CustomizationScript::new("add-user-to-docker-group", "usermod -aG docker \"$SUDO_USER\"")
            .env(STEP_ENV, "add-user-to-docker-group")
            .as_root(),
    ]
}

pub fn stale_machine() -> MachineRecord {
    MachineRecord::new(STALE_PROVIDER_ID, STALE_LOCATION)
}

pub fn up_to_date_machine() -> ExistingMachine {
    ExistingMachine::Ready {
        machine: stale_machine(),
        spec_diff: Vec::new(),
    }
}

fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        retry_policy: RetryPolicy {
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryPolicy::default()
        },
        ..OrchestratorSettings::default()
    }
}

#[fixture]
pub fn orchestrator_context() -> OrchestratorContext {
    OrchestratorContext {
        driver: ScriptedDriver::new(),
        progress: RecordingProgress::new(),
        telemetry: RecordingTelemetry::new(),
    }
}

#[fixture]
pub fn run_outcome() -> RunOutcome {
    RunOutcome::Pending
}
