//! BDD scenarios for the machine lifecycle orchestrator.

use rstest_bdd_macros::scenario;

use super::test_helpers::{OrchestratorContext, RunOutcome, orchestrator_context, run_outcome};

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Build a machine from scratch when none exists"
)]
fn scenario_build_from_scratch(orchestrator_context: OrchestratorContext, run_outcome: RunOutcome) {
    drop((orchestrator_context, run_outcome));
}

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Recreate a machine whose specification drifted"
)]
fn scenario_recreate_drifted(orchestrator_context: OrchestratorContext, run_outcome: RunOutcome) {
    drop((orchestrator_context, run_outcome));
}

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Recreate a machine left in an error state"
)]
fn scenario_recreate_partial(orchestrator_context: OrchestratorContext, run_outcome: RunOutcome) {
    drop((orchestrator_context, run_outcome));
}

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Reuse an up-to-date machine"
)]
fn scenario_reuse(orchestrator_context: OrchestratorContext, run_outcome: RunOutcome) {
    drop((orchestrator_context, run_outcome));
}

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Restore a machine from a snapshot"
)]
fn scenario_restore_snapshot(orchestrator_context: OrchestratorContext, run_outcome: RunOutcome) {
    drop((orchestrator_context, run_outcome));
}

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Recover when the container runtime starts slowly"
)]
fn scenario_slow_runtime(orchestrator_context: OrchestratorContext, run_outcome: RunOutcome) {
    drop((orchestrator_context, run_outcome));
}

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Give up when the container runtime never starts"
)]
fn scenario_runtime_never_starts(
    orchestrator_context: OrchestratorContext,
    run_outcome: RunOutcome,
) {
    drop((orchestrator_context, run_outcome));
}

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Stop when the stale machine cannot be deleted"
)]
fn scenario_delete_failure(orchestrator_context: OrchestratorContext, run_outcome: RunOutcome) {
    drop((orchestrator_context, run_outcome));
}

#[scenario(
    path = "tests/features/orchestrator.feature",
    name = "Close the connection when a customization script fails"
)]
fn scenario_script_failure(orchestrator_context: OrchestratorContext, run_outcome: RunOutcome) {
    drop((orchestrator_context, run_outcome));
}
