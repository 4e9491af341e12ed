//! Test support utilities shared across unit and integration tests.
//!
//! [`ScriptedDriver`] and [`ScriptedConnection`] simulate a provider and a
//! remote host entirely in memory. Every interaction is appended to a shared
//! [`CallLog`] so tests can assert on ordering.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::driver::{
    BackendFuture, ConnectOptions, CreatedMachine, CustomizationScript, ExecOptions, ExecOutput,
    ExistingMachine, MachineConnection, MachineCreation, MachineDriver, MachineRecord,
    ResourceSelector, SnapshotRequest,
};
use crate::progress::Progress;
use crate::readiness::DEFAULT_READINESS_COMMAND;
use crate::remote::USER_AND_GROUP_COMMAND;
use crate::telemetry::Telemetry;

const DEFAULT_USER_AND_GROUP: &str = "1000:999";
const WRITE_PREFIX: &str = "cat > ";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One interaction with the scripted provider or host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    /// Machine lookup for an environment.
    Lookup {
        /// Environment looked up.
        env_id: String,
    },
    /// Resource deletion.
    Delete {
        /// Machine being deleted.
        provider_id: String,
        /// Whether deletion was forced.
        force: bool,
    },
    /// Machine creation request.
    Create {
        /// Environment the machine is created for.
        env_id: String,
    },
    /// A connection was opened.
    Connect {
        /// Identifier of the new connection.
        connection: u32,
    },
    /// A command was executed.
    Exec {
        /// Connection the command ran on.
        connection: u32,
        /// Command text.
        command: String,
        /// Whether the command ran in the privileged context.
        as_root: bool,
    },
    /// A connection was closed.
    Close {
        /// Identifier of the closed connection.
        connection: u32,
    },
    /// Snapshot request accepted by the provider.
    SnapshotStarted {
        /// Machine being snapshotted.
        provider_id: String,
        /// Environment the machine belongs to.
        env_id: String,
        /// Whether the caller asked to wait for completion.
        wait: bool,
    },
    /// Snapshot request completed.
    SnapshotFinished {
        /// Machine that was snapshotted.
        provider_id: String,
    },
}

/// Shared, ordered record of [`Call`]s.
#[derive(Clone, Debug, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `call`.
    pub fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }

    /// Returns a snapshot of all calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    /// Returns the text of every executed command, in order.
    #[must_use]
    pub fn exec_commands(&self) -> Vec<String> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                Call::Exec { command, .. } => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Index of the first call matching `predicate`.
    #[must_use]
    pub fn position(&self, predicate: impl Fn(&Call) -> bool) -> Option<usize> {
        lock(&self.calls).iter().position(predicate)
    }

    /// Number of calls matching `predicate`.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        lock(&self.calls).iter().filter(|call| predicate(call)).count()
    }
}

/// Errors produced by the scripted provider and host.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScriptedError {
    /// Raised when a command hits a broken transport.
    #[error("transport lost while running `{command}`")]
    Transport {
        /// Command that was attempted.
        command: String,
    },
    /// Raised when a provider operation was told to fail.
    #[error("scripted {operation} failure")]
    Injected {
        /// Operation that failed.
        operation: &'static str,
    },
    /// Raised when closing a connection was told to fail.
    #[error("failed to close connection {connection}")]
    Close {
        /// Connection that failed to close.
        connection: u32,
    },
}

#[derive(Debug)]
struct HostState {
    files: BTreeMap<String, Vec<u8>>,
    probe_command: String,
    probe_failures: u32,
    failing: Vec<(String, i32)>,
    broken: Vec<String>,
    user_and_group: String,
    fail_close: bool,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            files: BTreeMap::new(),
            probe_command: DEFAULT_READINESS_COMMAND.to_owned(),
            probe_failures: 0,
            failing: Vec::new(),
            broken: Vec::new(),
            user_and_group: DEFAULT_USER_AND_GROUP.to_owned(),
            fail_close: false,
        }
    }
}

/// In-memory remote machine answering commands run over
/// [`ScriptedConnection`]s.
///
/// Commands are answered in this order: broken transport, scripted exit
/// codes, the readiness probe, user/group discovery, `cat > <path>` file
/// writes, and finally a plain successful exit.
#[derive(Clone, Debug, Default)]
pub struct RemoteHost {
    state: Arc<Mutex<HostState>>,
}

impl RemoteHost {
    /// Creates a host where every command succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` readiness probes fail.
    pub fn fail_probe_times(&self, times: u32) {
        lock(&self.state).probe_failures = times;
    }

    /// Replaces the command treated as the readiness probe.
    pub fn set_probe_command(&self, command: impl Into<String>) {
        lock(&self.state).probe_command = command.into();
    }

    /// Makes commands containing `fragment` exit with `code`.
    pub fn fail_command(&self, fragment: impl Into<String>, code: i32) {
        lock(&self.state).failing.push((fragment.into(), code));
    }

    /// Makes commands containing `fragment` fail at the transport level.
    pub fn break_transport_on(&self, fragment: impl Into<String>) {
        lock(&self.state).broken.push(fragment.into());
    }

    /// Sets the identity reported by user/group discovery.
    pub fn set_user_and_group(&self, uid: &str, gid: &str) {
        lock(&self.state).user_and_group = format!("{uid}:{gid}");
    }

    /// Makes every subsequent connection close fail.
    pub fn fail_close(&self) {
        lock(&self.state).fail_close = true;
    }

    /// Contents written to `path`, if any.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<String> {
        lock(&self.state)
            .files
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    fn close_fails(&self) -> bool {
        lock(&self.state).fail_close
    }

    fn respond(&self, command: &str, stdin: Option<&[u8]>) -> Result<ExecOutput, ScriptedError> {
        let mut state = lock(&self.state);
        if state.broken.iter().any(|fragment| command.contains(fragment.as_str())) {
            return Err(ScriptedError::Transport {
                command: command.to_owned(),
            });
        }
        if let Some((_, code)) = state
            .failing
            .iter()
            .find(|(fragment, _)| command.contains(fragment.as_str()))
        {
            return Ok(exit_with(*code, "scripted failure"));
        }
        if command == state.probe_command {
            if state.probe_failures > 0 {
                state.probe_failures -= 1;
                return Ok(exit_with(
                    125,
                    "Cannot connect to the Docker daemon. Is the docker daemon running?",
                ));
            }
            return Ok(success("Hello from Docker!\n"));
        }
        if command == USER_AND_GROUP_COMMAND {
            return Ok(success(&format!("{}\n", state.user_and_group)));
        }
        if let Some(target) = command.strip_prefix(WRITE_PREFIX) {
            let path = target.trim_matches('\'').to_owned();
            state
                .files
                .insert(path, stdin.map(<[u8]>::to_vec).unwrap_or_default());
        }
        Ok(success(""))
    }
}

fn success(stdout: &str) -> ExecOutput {
    ExecOutput {
        stdout: stdout.to_owned(),
        stderr: String::new(),
        exit_code: Some(0),
    }
}

fn exit_with(code: i32, stderr: &str) -> ExecOutput {
    ExecOutput {
        stdout: String::new(),
        stderr: stderr.to_owned(),
        exit_code: Some(code),
    }
}

/// Connection to a [`RemoteHost`] that logs every exec and close.
#[derive(Debug)]
pub struct ScriptedConnection {
    id: u32,
    host: RemoteHost,
    log: CallLog,
}

impl ScriptedConnection {
    /// Creates connection `id` to `host`, logging into `log`.
    #[must_use]
    pub const fn new(id: u32, host: RemoteHost, log: CallLog) -> Self {
        Self { id, host, log }
    }

    /// Identifier assigned when the connection was opened.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }
}

impl MachineConnection for ScriptedConnection {
    type Error = ScriptedError;

    fn exec<'a>(
        &'a self,
        command: &'a str,
        options: ExecOptions,
    ) -> BackendFuture<'a, ExecOutput, Self::Error> {
        Box::pin(async move {
            self.log.record(Call::Exec {
                connection: self.id,
                command: command.to_owned(),
                as_root: options.as_root,
            });
            tokio::task::yield_now().await;
            self.host.respond(command, options.stdin.as_deref())
        })
    }

    fn close(self) -> BackendFuture<'static, (), Self::Error> {
        Box::pin(async move {
            self.log.record(Call::Close {
                connection: self.id,
            });
            if self.host.close_fails() {
                return Err(ScriptedError::Close {
                    connection: self.id,
                });
            }
            Ok(())
        })
    }
}

/// Provider operations that can be told to fail.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum DriverFailure {
    /// Machine lookup.
    Lookup,
    /// Resource deletion.
    Delete,
    /// Machine creation, after the creation strategy is known.
    Create,
    /// Snapshot request.
    Snapshot,
}

impl DriverFailure {
    const fn operation(self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::Delete => "delete",
            Self::Create => "create",
            Self::Snapshot => "snapshot",
        }
    }
}

#[derive(Debug, Default)]
struct DriverState {
    existing: Option<ExistingMachine>,
    from_snapshot: bool,
    failures: BTreeSet<DriverFailure>,
    connect_budget: Option<u32>,
    next_connection: u32,
}

/// In-memory [`MachineDriver`] backed by a [`RemoteHost`].
///
/// Created machines are named `<env_id>-created`. Connection identifiers
/// start at 1 and increase with each connection opened.
#[derive(Clone, Debug, Default)]
pub struct ScriptedDriver {
    state: Arc<Mutex<DriverState>>,
    log: CallLog,
    host: RemoteHost,
    scripts: Vec<CustomizationScript>,
    options: Map<String, Value>,
}

impl ScriptedDriver {
    /// Driver name persisted in metadata.
    pub const NAME: &'static str = "scripted";

    /// Creates a driver with no machines, scripts, or options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the customization scripts returned by the driver.
    #[must_use]
    pub fn with_scripts(mut self, scripts: Vec<CustomizationScript>) -> Self {
        self.scripts = scripts;
        self
    }

    /// Sets the options persisted in metadata.
    #[must_use]
    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = options;
        self
    }

    /// Host shared by every connection this driver opens.
    #[must_use]
    pub fn host(&self) -> RemoteHost {
        self.host.clone()
    }

    /// Log shared by the driver and its connections.
    #[must_use]
    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// Snapshot of the calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.log.calls()
    }

    /// Makes lookups return `machine`.
    pub fn set_existing(&self, machine: ExistingMachine) {
        lock(&self.state).existing = Some(machine);
    }

    /// Makes creation restore from a snapshot.
    pub fn restore_from_snapshot(&self) {
        lock(&self.state).from_snapshot = true;
    }

    /// Makes `operation` fail from now on.
    pub fn fail(&self, operation: DriverFailure) {
        lock(&self.state).failures.insert(operation);
    }

    /// Lets `successes` more connects through, then fails every connect.
    pub fn fail_connect_after(&self, successes: u32) {
        lock(&self.state).connect_budget = Some(successes);
    }

    fn check(&self, operation: DriverFailure) -> Result<(), ScriptedError> {
        if lock(&self.state).failures.contains(&operation) {
            return Err(ScriptedError::Injected {
                operation: operation.operation(),
            });
        }
        Ok(())
    }

    fn open_connection(&self) -> ScriptedConnection {
        let id = {
            let mut state = lock(&self.state);
            state.next_connection += 1;
            state.next_connection
        };
        self.log.record(Call::Connect { connection: id });
        ScriptedConnection::new(id, self.host.clone(), self.log.clone())
    }

    fn take_connect_budget(&self) -> Result<(), ScriptedError> {
        let mut state = lock(&self.state);
        match state.connect_budget {
            Some(0) => Err(ScriptedError::Injected {
                operation: "connect",
            }),
            Some(remaining) => {
                state.connect_budget = Some(remaining - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl MachineDriver for ScriptedDriver {
    type Error = ScriptedError;
    type Connection = ScriptedConnection;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn friendly_name(&self) -> &str {
        "Scripted"
    }

    fn customization_scripts(&self) -> &[CustomizationScript] {
        &self.scripts
    }

    fn metadata(&self) -> &Map<String, Value> {
        &self.options
    }

    fn get_machine_and_spec_diff<'a>(
        &'a self,
        env_id: &'a str,
    ) -> BackendFuture<'a, Option<ExistingMachine>, Self::Error> {
        Box::pin(async move {
            self.log.record(Call::Lookup {
                env_id: env_id.to_owned(),
            });
            self.check(DriverFailure::Lookup)?;
            Ok(lock(&self.state).existing.clone())
        })
    }

    fn create_machine<'a>(
        &'a self,
        env_id: &'a str,
    ) -> BackendFuture<'a, MachineCreation<'a, Self::Connection, Self::Error>, Self::Error> {
        Box::pin(async move {
            self.log.record(Call::Create {
                env_id: env_id.to_owned(),
            });
            let from_snapshot = lock(&self.state).from_snapshot;
            let result: BackendFuture<'a, CreatedMachine<ScriptedConnection>, ScriptedError> =
                Box::pin(async move {
                    tokio::task::yield_now().await;
                    self.check(DriverFailure::Create)?;
                    let provider_id = format!("{env_id}-created");
                    let machine = MachineRecord::new(
                        provider_id.clone(),
                        format!("scripted / {provider_id}"),
                    );
                    lock(&self.state).existing = Some(ExistingMachine::Ready {
                        machine: machine.clone(),
                        spec_diff: Vec::new(),
                    });
                    Ok(CreatedMachine {
                        machine,
                        connection: self.open_connection(),
                    })
                });
            Ok(MachineCreation {
                from_snapshot,
                result,
            })
        })
    }

    fn delete_resources<'a>(
        &'a self,
        force: bool,
        selector: &'a ResourceSelector,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.log.record(Call::Delete {
                provider_id: selector.provider_id.clone(),
                force,
            });
            self.check(DriverFailure::Delete)?;
            lock(&self.state).existing = None;
            Ok(())
        })
    }

    fn connect<'a>(
        &'a self,
        _machine: &'a MachineRecord,
        _options: ConnectOptions,
    ) -> BackendFuture<'a, Self::Connection, Self::Error> {
        Box::pin(async move {
            self.take_connect_budget()?;
            Ok(self.open_connection())
        })
    }

    fn ensure_machine_snapshot<'a>(
        &'a self,
        request: &'a SnapshotRequest,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.log.record(Call::SnapshotStarted {
                provider_id: request.provider_id.clone(),
                env_id: request.env_id.clone(),
                wait: request.wait,
            });
            tokio::task::yield_now().await;
            self.check(DriverFailure::Snapshot)?;
            self.log.record(Call::SnapshotFinished {
                provider_id: request.provider_id.clone(),
            });
            Ok(())
        })
    }
}

/// Progress update captured by [`RecordingProgress`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProgressEvent {
    /// An operation started.
    Started(String),
    /// The status text changed.
    Text(String),
    /// The operation succeeded.
    Succeeded(String),
    /// The operation failed.
    Failed(String),
}

/// [`Progress`] implementation that records every update.
#[derive(Clone, Debug, Default)]
pub struct RecordingProgress {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl RecordingProgress {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the updates recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        lock(&self.events).clone()
    }

    /// Returns only the status text updates.
    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::Text(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ProgressEvent) {
        lock(&self.events).push(event);
    }
}

impl Progress for RecordingProgress {
    fn start(&self, label: &str) {
        self.push(ProgressEvent::Started(label.to_owned()));
    }

    fn set_text(&self, text: &str) {
        self.push(ProgressEvent::Text(text.to_owned()));
    }

    fn succeed(&self, message: &str) {
        self.push(ProgressEvent::Succeeded(message.to_owned()));
    }

    fn fail(&self, message: &str) {
        self.push(ProgressEvent::Failed(message.to_owned()));
    }
}

/// [`Telemetry`] implementation that records every event.
#[derive(Clone, Debug, Default)]
pub struct RecordingTelemetry {
    events: Arc<Mutex<Vec<(String, Value)>>>,
}

impl RecordingTelemetry {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Value)> {
        lock(&self.events).clone()
    }
}

impl Telemetry for RecordingTelemetry {
    fn capture(&self, event: &str, properties: &Value) {
        lock(&self.events).push((event.to_owned(), properties.clone()));
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
