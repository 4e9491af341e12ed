//! Checked remote command execution and remote identity discovery.

use std::fmt;

use thiserror::Error;

use crate::driver::{ExecOptions, ExecOutput, MachineConnection};

/// Command printing `<uid>:<docker socket gid>` on the remote machine.
pub const USER_AND_GROUP_COMMAND: &str = r#"echo "$(id -u):$(stat -c %g /var/run/docker.sock)""#;

/// Errors raised by a remote command.
#[derive(Debug, Error)]
pub enum CommandError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the transport could not run the command.
    #[error("failed to run `{command}`: {source}")]
    Transport {
        /// Command that was attempted.
        command: String,
        /// Transport error.
        #[source]
        source: E,
    },
    /// Raised when the command ran but did not exit successfully.
    #[error("`{command}` exited with status {status_text}: {stderr}")]
    Failed {
        /// Command that failed.
        command: String,
        /// Exit code reported by the remote process.
        exit_code: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Captured standard error.
        stderr: String,
    },
}

/// Runs `command` and treats a non-zero or missing exit code as failure.
///
/// # Errors
///
/// Returns [`CommandError::Transport`] when the connection fails and
/// [`CommandError::Failed`] when the command exits unsuccessfully.
pub async fn run_checked<C: MachineConnection>(
    connection: &C,
    command: &str,
    options: ExecOptions,
) -> Result<ExecOutput, CommandError<C::Error>> {
    let output = connection
        .exec(command, options)
        .await
        .map_err(|source| CommandError::Transport {
            command: command.to_owned(),
            source,
        })?;
    if output.is_success() {
        return Ok(output);
    }

    let status_text = output
        .exit_code
        .map_or_else(|| String::from("unknown"), |code| code.to_string());
    Err(CommandError::Failed {
        command: command.to_owned(),
        exit_code: output.exit_code,
        status_text,
        stderr: output.stderr.trim().to_owned(),
    })
}

/// Remote user id and container-runtime socket group id.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UserAndGroup {
    /// Numeric user id of the remote execution user.
    pub uid: String,
    /// Numeric group id owning the container-runtime socket.
    pub gid: String,
}

impl UserAndGroup {
    /// Parses `<uid>:<gid>` output, ignoring surrounding whitespace.
    #[must_use]
    pub fn parse(output: &str) -> Option<Self> {
        let (uid, gid) = output.trim().split_once(':')?;
        if !is_numeric_id(uid) || !is_numeric_id(gid) {
            return None;
        }
        Some(Self {
            uid: uid.to_owned(),
            gid: gid.to_owned(),
        })
    }
}

impl fmt::Display for UserAndGroup {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.uid, self.gid)
    }
}

fn is_numeric_id(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|ch| ch.is_ascii_digit())
}

/// Errors raised while discovering the remote user and group.
#[derive(Debug, Error)]
pub enum UserAndGroupError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the discovery command fails.
    #[error(transparent)]
    Command(#[from] CommandError<E>),
    /// Raised when the command output is not `<uid>:<gid>`.
    #[error("unexpected user and group output: {output:?}")]
    Malformed {
        /// Raw standard output.
        output: String,
    },
}

/// Discovers the remote user id and docker socket group id.
///
/// # Errors
///
/// Returns [`UserAndGroupError`] when the command fails or its output cannot
/// be parsed.
pub async fn discover_user_and_group<C: MachineConnection>(
    connection: &C,
) -> Result<UserAndGroup, UserAndGroupError<C::Error>> {
    let output = run_checked(connection, USER_AND_GROUP_COMMAND, ExecOptions::new()).await?;
    UserAndGroup::parse(&output.stdout).ok_or(UserAndGroupError::Malformed {
        output: output.stdout,
    })
}
