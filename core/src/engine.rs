use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use socker_utils_pty::TerminalMode;
use socker_utils_pty::TerminalSize;
use socker_utils_pty::relay_interactive;

use crate::error::Result;
use crate::error::SockerErr;
use crate::exec::LineStream;
use crate::exec::PrivilegedExecutor;
use crate::identity::ContainerIdentity;

/// The container engine client, always run as the engine account.
#[derive(Clone)]
pub struct DockerEngine {
    executor: PrivilegedExecutor,
    program: String,
}

impl DockerEngine {
    pub fn new(executor: PrivilegedExecutor, program: impl Into<String>) -> Self {
        Self {
            executor,
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Subscribe to start events for `identity` from `since` (unix seconds)
    /// onwards. Each line of the stream is a container id.
    pub async fn subscribe_start(
        &self,
        identity: &ContainerIdentity,
        since: u64,
    ) -> Result<LineStream> {
        self.executor
            .stream_lines(&self.program, start_events_args(identity, since))
            .await
    }

    /// Host pid of the container's init process.
    pub async fn root_pid(&self, identity: &ContainerIdentity) -> Result<u32> {
        let stdout = self
            .executor
            .output(&self.program, inspect_pid_args(identity))
            .await?;
        parse_root_pid(&self.program, &stdout)
    }

    /// Run to completion with combined output captured.
    pub async fn run_batch(&self, args: Vec<String>) -> Result<String> {
        self.executor.combined_output(&self.program, args).await
    }

    /// Run attached to a fresh pty and return the container's exit status.
    pub async fn run_interactive(
        &self,
        args: Vec<String>,
        size: TerminalSize,
        terminal: &dyn TerminalMode,
    ) -> Result<i32> {
        let command = self.executor.command(&self.program, args);
        Ok(relay_interactive(command, size, terminal).await?)
    }
}

pub fn start_events_args(identity: &ContainerIdentity, since: u64) -> Vec<String> {
    vec![
        "events".to_string(),
        "--since".to_string(),
        since.to_string(),
        "--filter".to_string(),
        "event=start".to_string(),
        "--filter".to_string(),
        format!("container={identity}"),
        "--format".to_string(),
        "{{.ID}}".to_string(),
    ]
}

pub fn inspect_pid_args(identity: &ContainerIdentity) -> Vec<String> {
    vec![
        "inspect".to_string(),
        "--format".to_string(),
        "{{.State.Pid}}".to_string(),
        identity.to_string(),
    ]
}

/// A container that is not running reports pid 0; that is rejected too.
fn parse_root_pid(program: &str, stdout: &str) -> Result<u32> {
    let trimmed = stdout.trim();
    match trimmed.parse::<u32>() {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(SockerErr::MalformedOutput {
            program: program.to_string(),
            output: trimmed.to_string(),
        }),
    }
}

/// Current time in unix seconds, for `events --since`.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
