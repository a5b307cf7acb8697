//! Subprocess execution, optionally under another account's credential.
//!
//! [`CommandRunner`] is the seam every external program goes through
//! (engine client, `cgclassify`, `pgrep`). [`SystemCommandRunner`] spawns
//! real processes; tests substitute a recording fake. [`PrivilegedExecutor`]
//! binds a runner to the engine account's credential.

use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use socker_utils_pty::PtyCommand;
use socker_utils_pty::pre_exec;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::credentials::Credential;
use crate::error::Result;
use crate::error::SockerErr;

/// `PATH` handed to every child. The caller's own `PATH` is never used.
pub const SAFE_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Caller variables children may see.
const PASSTHROUGH_ENV: &[&str] = &["TERM", "LANG"];

/// Environment for a child process: fixed `PATH` plus the passthrough set.
pub fn sanitized_env() -> Vec<(String, String)> {
    let mut env = vec![("PATH".to_string(), SAFE_PATH.to_string())];
    for key in PASSTHROUGH_ENV {
        if let Ok(value) = std::env::var(key) {
            env.push(((*key).to_string(), value));
        }
    }
    env
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// `None` runs with the launcher's own credential.
    pub credential: Option<Credential>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            credential: None,
            env: sanitized_env(),
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Command line for logs and error messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Turn a non-zero exit into [`SockerErr::Subprocess`] carrying stderr.
    pub fn into_checked(self, program: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(SockerErr::Subprocess {
                program: program.to_string(),
                status: self.status,
                stderr: self.stderr,
            })
        }
    }
}

/// Lines of a long-running subprocess's stdout.
///
/// Dropping the stream aborts the reader task, which owns the child, so the
/// subprocess is killed with it.
#[derive(Debug)]
pub struct LineStream {
    lines: mpsc::Receiver<String>,
    reader: Option<JoinHandle<()>>,
}

impl LineStream {
    /// A stream fed by `lines`; closing the receiver is the only cleanup.
    pub fn from_receiver(lines: mpsc::Receiver<String>) -> Self {
        Self {
            lines,
            reader: None,
        }
    }

    fn with_reader(lines: mpsc::Receiver<String>, reader: JoinHandle<()>) -> Self {
        Self {
            lines,
            reader: Some(reader),
        }
    }

    /// Next non-empty line, or `None` once the producer has gone away.
    pub async fn next_line(&mut self) -> Option<String> {
        while let Some(line) = self.lines.recv().await {
            let line = line.trim();
            if !line.is_empty() {
                return Some(line.to_string());
            }
        }
        None
    }
}

impl Drop for LineStream {
    fn drop(&mut self) {
        self.lines.close();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion with stdout and stderr captured separately.
    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Run to completion with stdout and stderr interleaved, in arrival
    /// order, into `CommandOutput::stdout`.
    async fn combined_output(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Start a long-running process and stream its stdout line by line.
    async fn stream_lines(&self, spec: &CommandSpec) -> Result<LineStream>;
}

/// Spawns real processes with tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    fn command(spec: &CommandSpec) -> Result<Command> {
        if spec.program.is_empty() {
            return Err(SockerErr::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                "missing program for spawn",
            )));
        }
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .env_clear()
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null());

        let credential = spec.credential.as_ref().map(Credential::to_child);
        let parent_pid = unsafe { libc::getpid() };
        unsafe {
            command.pre_exec(move || {
                pre_exec::set_parent_death_signal(parent_pid)?;
                if let Some(credential) = credential.as_ref() {
                    pre_exec::assume_credential(credential)?;
                }
                Ok(())
            });
        }
        Ok(command)
    }
}

fn spawn_error(program: &str, err: std::io::Error) -> SockerErr {
    SockerErr::Io(std::io::Error::new(
        err.kind(),
        format!("failed to start {program}: {err}"),
    ))
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let mut command = Self::command(spec)?;
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        let output = command
            .output()
            .await
            .map_err(|err| spawn_error(&spec.program, err))?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn combined_output(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let mut command = Self::command(spec)?;
        command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|err| spawn_error(&spec.program, err))?;

        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let stdout_reader = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(read_chunks(stdout, chunk_tx.clone())));
        let stderr_reader = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(read_chunks(stderr, chunk_tx.clone())));
        drop(chunk_tx);

        let mut combined = Vec::new();
        while let Some(chunk) = chunk_rx.recv().await {
            combined.extend_from_slice(&chunk);
        }
        for reader in [stdout_reader, stderr_reader].into_iter().flatten() {
            let _ = reader.await;
        }
        let status = child.wait().await?;
        Ok(CommandOutput {
            status: status.code(),
            stdout: String::from_utf8_lossy(&combined).into_owned(),
            stderr: String::new(),
        })
    }

    async fn stream_lines(&self, spec: &CommandSpec) -> Result<LineStream> {
        let mut command = Self::command(spec)?;
        command
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|err| spawn_error(&spec.program, err))?;
        let Some(stdout) = child.stdout.take() else {
            return Err(SockerErr::Io(std::io::Error::other(format!(
                "{} has no stdout pipe",
                spec.program
            ))));
        };

        let (line_tx, line_rx) = mpsc::channel::<String>(16);
        let program = spec.program.clone();
        let reader = tokio::spawn(async move {
            // Owning the child here ties its lifetime to the stream.
            let _child = child;
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line_tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        tracing::debug!("{program} output stream stopped: {err}");
                        break;
                    }
                }
            }
        });
        Ok(LineStream::with_reader(line_rx, reader))
    }
}

async fn read_chunks<R>(mut reader: R, chunk_tx: mpsc::UnboundedSender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8_192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let _ = chunk_tx.send(buf[..n].to_vec());
            }
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

/// Runs engine commands as the engine account without changing the
/// launcher's own credentials.
#[derive(Clone)]
pub struct PrivilegedExecutor {
    runner: Arc<dyn CommandRunner>,
    credential: Credential,
    verbose: bool,
}

impl PrivilegedExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>, credential: Credential, verbose: bool) -> Self {
        Self {
            runner,
            credential,
            verbose,
        }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    fn spec(&self, program: &str, args: Vec<String>) -> CommandSpec {
        let spec = CommandSpec::new(program, args).with_credential(self.credential.clone());
        if self.verbose {
            tracing::debug!(
                account = %self.credential.account,
                uid = self.credential.uid,
                gid = self.credential.gid,
                "exec: {}",
                spec.display()
            );
        }
        spec
    }

    /// Run to completion, discarding output.
    pub async fn run(&self, program: &str, args: Vec<String>) -> Result<()> {
        self.runner
            .output(&self.spec(program, args))
            .await?
            .into_checked(program)
            .map(|_| ())
    }

    /// Captured stdout of a successful run.
    pub async fn output(&self, program: &str, args: Vec<String>) -> Result<String> {
        self.runner
            .output(&self.spec(program, args))
            .await?
            .into_checked(program)
            .map(|output| output.stdout)
    }

    /// Interleaved stdout and stderr. On a non-zero exit the combined text
    /// becomes the error's message.
    pub async fn combined_output(&self, program: &str, args: Vec<String>) -> Result<String> {
        let output = self
            .runner
            .combined_output(&self.spec(program, args))
            .await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(SockerErr::Subprocess {
                program: program.to_string(),
                status: output.status,
                stderr: output.stdout,
            })
        }
    }

    pub async fn stream_lines(&self, program: &str, args: Vec<String>) -> Result<LineStream> {
        self.runner.stream_lines(&self.spec(program, args)).await
    }

    /// An unstarted command for the pty relay, carrying the same credential.
    pub fn command(&self, program: &str, args: Vec<String>) -> PtyCommand {
        let spec = self.spec(program, args);
        PtyCommand {
            program: spec.program,
            args: spec.args,
            credential: spec.credential.as_ref().map(Credential::to_child),
            env: spec.env,
        }
    }
}
