//! Test-only helpers exposed for cross-crate integration tests.
//!
//! Production code should not depend on this module.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::watch;

use crate::config::SockerConfig;
use crate::credentials::CallerIdentity;
use crate::credentials::Credential;
use crate::error::Result;
use crate::exec::CommandOutput;
use crate::exec::CommandRunner;
use crate::exec::CommandSpec;
use crate::exec::LineStream;
use crate::mounts::AccessProbe;
use crate::session::Session;

/// How the fake event subscription behaves.
#[derive(Debug, Clone)]
pub enum StartEvents {
    /// Emit `line` after `after` has elapsed, then stay open.
    Emit { after: Duration, line: String },
    /// Never emit anything.
    Silent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Output,
    Combined,
    Stream,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub kind: CallKind,
    pub program: String,
    /// Program and arguments joined by spaces.
    pub command: String,
    /// Uid the call would have switched to, if any.
    pub uid: Option<u32>,
}

/// A [`CommandRunner`] that records every call and answers from a table of
/// canned outputs. Unmatched commands succeed with empty output.
pub struct RecordingRunner {
    calls: Mutex<Vec<RecordedCall>>,
    responses: Vec<(String, CommandOutput)>,
    start_events: StartEvents,
    subscription_closed: Arc<watch::Sender<bool>>,
}

impl Default for RecordingRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingRunner {
    pub fn new() -> Self {
        let (subscription_closed, _) = watch::channel(false);
        Self {
            calls: Mutex::new(Vec::new()),
            responses: Vec::new(),
            start_events: StartEvents::Silent,
            subscription_closed: Arc::new(subscription_closed),
        }
    }

    /// Answer commands equal to `command`, or starting with `command` followed
    /// by a space. Earlier entries win.
    pub fn respond(mut self, command: &str, output: CommandOutput) -> Self {
        self.responses.push((command.to_string(), output));
        self
    }

    pub fn with_start_events(mut self, plan: StartEvents) -> Self {
        self.start_events = plan;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Commands run with `program`, in order.
    pub fn calls_to(&self, program: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.program == program)
            .map(|call| call.command)
            .collect()
    }

    /// Wait until the event subscription has been dropped by its consumer.
    pub async fn subscription_closed(&self) -> bool {
        let mut closed = self.subscription_closed.subscribe();
        tokio::time::timeout(Duration::from_secs(5), closed.wait_for(|closed| *closed))
            .await
            .is_ok()
    }

    fn record(&self, kind: CallKind, spec: &CommandSpec) -> CommandOutput {
        let command = spec.display();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                kind,
                program: spec.program.clone(),
                command: command.clone(),
                uid: spec.credential.as_ref().map(|credential| credential.uid),
            });
        self.responses
            .iter()
            .find(|(key, _)| {
                command == *key
                    || command
                        .strip_prefix(key.as_str())
                        .is_some_and(|rest| rest.starts_with(' '))
            })
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput {
                status: Some(0),
                ..CommandOutput::default()
            })
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        Ok(self.record(CallKind::Output, spec))
    }

    async fn combined_output(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        Ok(self.record(CallKind::Combined, spec))
    }

    async fn stream_lines(&self, spec: &CommandSpec) -> Result<LineStream> {
        self.record(CallKind::Stream, spec);
        let (line_tx, line_rx) = mpsc::channel(4);
        let plan = self.start_events.clone();
        let closed = Arc::clone(&self.subscription_closed);
        tokio::spawn(async move {
            if let StartEvents::Emit { after, line } = plan {
                tokio::time::sleep(after).await;
                let _ = line_tx.send(line).await;
            }
            line_tx.closed().await;
            closed.send_replace(true);
        });
        Ok(LineStream::from_receiver(line_rx))
    }
}

/// Access probe that only allows the listed paths.
#[derive(Debug, Clone, Default)]
pub struct AllowListProbe(pub Vec<PathBuf>);

impl AccessProbe for AllowListProbe {
    fn is_writable(&self, path: &Path) -> bool {
        self.0.iter().any(|allowed| allowed == path)
    }

    /// Anything at or below a listed path.
    fn is_readable(&self, path: &Path) -> bool {
        self.0.iter().any(|allowed| path.starts_with(allowed))
    }
}

pub const TEST_ENGINE_UID: u32 = 990;
pub const TEST_ENGINE_GID: u32 = 990;

/// A session for the current process's uid/gid with `home` as the caller's
/// home directory, without touching the passwd database.
pub fn test_session(home: &Path, job_id: Option<&str>, config: SockerConfig) -> Session {
    Session {
        caller: CallerIdentity {
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
            username: "alice".to_string(),
            group_name: "users".to_string(),
            home: home.to_path_buf(),
        },
        job_id: job_id.map(str::to_string),
        engine_credential: Credential {
            uid: TEST_ENGINE_UID,
            gid: TEST_ENGINE_GID,
            groups: vec![TEST_ENGINE_GID],
            account: "dockerroot".to_string(),
        },
        engine_path: PathBuf::from("docker"),
        config,
    }
}
