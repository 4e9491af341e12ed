//! BDD step definitions for the machine lifecycle orchestrator.

use hangar::customize::script_command;
use hangar::driver::ExistingMachine;
use hangar::spec_diff::SpecDiffItem;
use hangar::test_support::{Call, DriverFailure, ScriptedDriver};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{
    FailureKind, OrchestratorContext, RunOutcome, STEP_ENV, parse_origin, stale_machine,
    standard_scripts, up_to_date_machine,
};
use crate::test_constants::READINESS_COMMAND;

fn is_probe(call: &Call) -> bool {
    matches!(call, Call::Exec { command, .. } if command == READINESS_COMMAND)
}

fn is_metadata_write(call: &Call) -> bool {
    matches!(call, Call::Exec { command, .. } if command.starts_with("cat > "))
}

#[given("a provider with the standard customization scripts")]
fn provider_with_scripts(orchestrator_context: &OrchestratorContext) -> OrchestratorContext {
    OrchestratorContext {
        driver: ScriptedDriver::new().with_scripts(standard_scripts()),
        ..orchestrator_context.clone()
    }
}

#[given("an existing machine \"{provider_id}\" whose \"{field}\" changed from \"{old}\" to \"{new}\"")]
fn drifted_machine(
    orchestrator_context: &OrchestratorContext,
    provider_id: String,
    field: String,
    old: String,
    new: String,
) {
    assert_eq!(provider_id, stale_machine().provider_id);
    orchestrator_context.driver.set_existing(ExistingMachine::Ready {
        machine: stale_machine(),
        spec_diff: vec![SpecDiffItem {
            name: field,
            old: Some(old),
            new: Some(new),
        }],
    });
}

#[given("a partial machine \"{provider_id}\" that failed with \"{error}\"")]
fn partial_machine(orchestrator_context: &OrchestratorContext, provider_id: String, error: String) {
    assert_eq!(provider_id, stale_machine().provider_id);
    orchestrator_context
        .driver
        .set_existing(ExistingMachine::Partial {
            machine: stale_machine(),
            error,
        });
}

#[given("an up-to-date machine \"{provider_id}\"")]
fn healthy_machine(orchestrator_context: &OrchestratorContext, provider_id: String) {
    assert_eq!(provider_id, stale_machine().provider_id);
    orchestrator_context.driver.set_existing(up_to_date_machine());
}

#[given("a snapshot is available")]
fn snapshot_available(orchestrator_context: &OrchestratorContext) {
    orchestrator_context.driver.restore_from_snapshot();
}

#[given("the readiness probe fails \"{times}\" times")]
fn probe_fails(orchestrator_context: &OrchestratorContext, times: u32) {
    orchestrator_context.driver.host().fail_probe_times(times);
}

#[given("the readiness probe never succeeds")]
fn probe_never_succeeds(orchestrator_context: &OrchestratorContext) {
    orchestrator_context.driver.host().fail_probe_times(u32::MAX);
}

#[given("deleting machines fails")]
fn delete_fails(orchestrator_context: &OrchestratorContext) {
    orchestrator_context.driver.fail(DriverFailure::Delete);
}

#[given("the customization script \"{name}\" fails")]
fn script_fails(orchestrator_context: &OrchestratorContext, name: String) {
    orchestrator_context
        .driver
        .host()
        .fail_command(format!("{STEP_ENV}={name}"), 1);
}

#[when("I ensure a customized machine for \"{env_id}\"")]
fn ensure_customized(orchestrator_context: &OrchestratorContext, env_id: String) -> RunOutcome {
    let runtime = Runtime::new().unwrap_or_else(|err| panic!("create runtime: {err}"));
    let orchestrator = orchestrator_context.orchestrator();
    let result = runtime.block_on(async { orchestrator.ensure_customized_machine(&env_id).await });
    match result {
        Ok(customized) => RunOutcome::Succeeded {
            origin: customized.origin,
            connection: customized.connection.id(),
        },
        Err(err) => RunOutcome::Failed {
            kind: FailureKind::of(&err),
            message: err.to_string(),
        },
    }
}

#[then("the machine origin is \"{origin}\"")]
fn origin_is(run_outcome: &RunOutcome, origin: String) {
    let expected = parse_origin(&origin).unwrap_or_else(|| panic!("unknown origin: {origin}"));
    match run_outcome {
        RunOutcome::Succeeded { origin: actual, .. } => assert_eq!(*actual, expected),
        other => panic!("expected success, got {other:?}"),
    }
}

#[then("the orchestration fails with \"{kind}\"")]
fn fails_with(run_outcome: &RunOutcome, kind: String) {
    let expected = FailureKind::parse(&kind).unwrap_or_else(|| panic!("unknown kind: {kind}"));
    match run_outcome {
        RunOutcome::Failed { kind: actual, message } => {
            assert_eq!(*actual, expected, "unexpected failure: {message}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[then("the customization scripts ran in order")]
fn scripts_in_order(orchestrator_context: &OrchestratorContext) {
    let expected: Vec<String> = standard_scripts().iter().map(script_command).collect();
    let commands = orchestrator_context.driver.log().exec_commands();
    assert_eq!(commands.get(..expected.len()), Some(expected.as_slice()));
}

#[then("the readiness probe ran \"{times}\" times")]
fn probe_ran(orchestrator_context: &OrchestratorContext, times: usize) {
    assert_eq!(orchestrator_context.count(is_probe), times);
}

#[then("provisioning metadata was written \"{times}\" times")]
fn metadata_written(orchestrator_context: &OrchestratorContext, times: usize) {
    assert_eq!(orchestrator_context.count(is_metadata_write), times);
}

#[then("a snapshot was requested without waiting")]
fn snapshot_requested(orchestrator_context: &OrchestratorContext) {
    let requested = orchestrator_context
        .count(|call| matches!(call, Call::SnapshotStarted { wait: false, .. }));
    assert_eq!(requested, 1);
}

#[then("no snapshot was requested")]
fn no_snapshot(orchestrator_context: &OrchestratorContext) {
    assert_eq!(
        orchestrator_context.count(|call| matches!(call, Call::SnapshotStarted { .. })),
        0
    );
}

#[then("the machine \"{provider_id}\" was deleted before creation")]
fn deleted_before_creation(orchestrator_context: &OrchestratorContext, provider_id: String) {
    let log = orchestrator_context.driver.log();
    let delete = log
        .position(|call| {
            matches!(
                call,
                Call::Delete { provider_id: deleted, force: false } if *deleted == provider_id
            )
        })
        .unwrap_or_else(|| panic!("machine {provider_id} should be deleted"));
    let create = log
        .position(|call| matches!(call, Call::Create { .. }))
        .unwrap_or_else(|| panic!("a machine should be created"));
    assert!(delete < create, "delete must complete before create");
    assert_eq!(log.count(|call| matches!(call, Call::Delete { .. })), 1);
}

#[then("no machine was deleted or created")]
fn nothing_deleted_or_created(orchestrator_context: &OrchestratorContext) {
    assert_eq!(
        orchestrator_context
            .count(|call| matches!(call, Call::Delete { .. } | Call::Create { .. })),
        0
    );
}

#[then("no machine was created")]
fn nothing_created(orchestrator_context: &OrchestratorContext) {
    assert_eq!(
        orchestrator_context.count(|call| matches!(call, Call::Create { .. })),
        0
    );
}

#[then("\"{count}\" connections were replaced")]
fn connections_replaced(orchestrator_context: &OrchestratorContext, count: usize) {
    assert_eq!(
        orchestrator_context.count(|call| matches!(call, Call::Close { .. })),
        count
    );
    assert_eq!(
        orchestrator_context.count(|call| matches!(call, Call::Connect { .. })),
        count + 1
    );
}

#[then("every opened connection was closed")]
fn all_connections_closed(orchestrator_context: &OrchestratorContext) {
    let opened = orchestrator_context.count(|call| matches!(call, Call::Connect { .. }));
    let closed = orchestrator_context.count(|call| matches!(call, Call::Close { .. }));
    assert!(opened > 0, "a connection should have been opened");
    assert_eq!(opened, closed);
}
