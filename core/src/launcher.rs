use std::sync::Arc;
use std::time::Duration;

use socker_utils_pty::CrosstermTerminal;
use socker_utils_pty::TerminalMode;

use crate::engine::DockerEngine;
use crate::error::SockerErr;
use crate::exec::CommandRunner;
use crate::exec::PrivilegedExecutor;
use crate::exec::SystemCommandRunner;
use crate::identity::ContainerIdentity;
use crate::monitor::LifecycleMonitor;
use crate::monitor::MonitorHandle;
use crate::monitor::START_TIMEOUT;
use crate::mounts::AccessProbe;
use crate::mounts::RealUidProbe;
use crate::mounts::authorize_mounts;
use crate::run_request::RunRequest;
use crate::run_request::parse_run_request;
use crate::session::Session;
use crate::swap::prepare_swap;
use crate::swap::seal_home;

/// Result of a launched run.
#[derive(Debug)]
pub struct RunOutcome {
    pub identity: ContainerIdentity,
    /// The container's status for interactive runs, 0 for successful batch
    /// runs.
    pub exit_code: i32,
    /// Combined output of a batch run.
    pub output: Option<String>,
    /// Confinement running in the background.
    pub monitor: MonitorHandle,
}

/// A run that failed. Once the engine client has been started the monitor
/// keeps running and is handed back so the caller can wait for it.
#[derive(Debug)]
pub struct RunFailure {
    pub error: SockerErr,
    pub identity: Option<ContainerIdentity>,
    pub monitor: Option<MonitorHandle>,
}

impl From<SockerErr> for RunFailure {
    fn from(error: SockerErr) -> Self {
        Self {
            error,
            identity: None,
            monitor: None,
        }
    }
}

/// Launches containers on behalf of the invoking user.
pub struct Socker {
    session: Arc<Session>,
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn AccessProbe>,
    terminal: Arc<dyn TerminalMode>,
    start_timeout: Duration,
}

impl Socker {
    pub fn new(session: Session) -> Self {
        Self::with_collaborators(
            session,
            Arc::new(SystemCommandRunner),
            Arc::new(RealUidProbe),
            Arc::new(CrosstermTerminal),
        )
    }

    pub fn with_collaborators(
        session: Session,
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn AccessProbe>,
        terminal: Arc<dyn TerminalMode>,
    ) -> Self {
        Self {
            session: Arc::new(session),
            runner,
            probe,
            terminal,
            start_timeout: START_TIMEOUT,
        }
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Parse `argv` (everything after `run`), validate it, and launch the
    /// container under the engine account.
    ///
    /// Parsing, mount checks and swap preparation all happen before any
    /// subprocess is started. The monitor handle is never joined here; it is
    /// returned on success and, once the engine client was started, on
    /// failure too.
    pub async fn run_image(&self, argv: &[String]) -> Result<RunOutcome, RunFailure> {
        let request = parse_run_request(argv)?;
        let identity = ContainerIdentity::assign(request.name.as_deref());
        authorize_mounts(&request.volumes, self.probe.as_ref())?;

        let config = &self.session.config;
        let caller = &self.session.caller;
        let swap = if config.insecure {
            tracing::debug!("insecure mode: skipping swap directory");
            None
        } else {
            Some(prepare_swap(&caller.home, caller.uid, caller.gid)?)
        };
        let swap_prepared = swap.is_some();

        let mut args = vec![
            "run".to_string(),
            "--name".to_string(),
            identity.to_string(),
            "--user".to_string(),
            caller.user_spec(),
        ];
        if let Some(swap) = swap {
            let swap = swap.to_string_lossy();
            args.push("--volume".to_string());
            args.push(format!("{swap}:{swap}"));
        }
        args.extend(engine_args(&request));
        if config.verbose {
            tracing::debug!("container {identity} argv: {}", args.join(" "));
        }

        let monitor = LifecycleMonitor::new(
            Arc::clone(&self.session),
            Arc::clone(&self.runner),
            identity.clone(),
        )
        .with_start_timeout(self.start_timeout)
        .start()
        .await;

        let engine = DockerEngine::new(
            PrivilegedExecutor::new(
                Arc::clone(&self.runner),
                self.session.engine_credential.clone(),
                config.verbose,
            ),
            self.session.engine_program(),
        );
        let result = if request.is_interactive() {
            engine
                .run_interactive(args, config.pty_size(), self.terminal.as_ref())
                .await
                .map(|code| (code, None))
        } else {
            engine.run_batch(args).await.map(|output| (0, Some(output)))
        };

        let (exit_code, output) = match result {
            Ok(done) => done,
            Err(error) => {
                // The container may never start, so the monitor cannot be
                // relied on to make the home private.
                if swap_prepared && let Err(err) = seal_home(&caller.home) {
                    tracing::error!("failed to restore home permissions: {err}");
                }
                return Err(RunFailure {
                    error,
                    identity: Some(identity),
                    monitor: Some(monitor),
                });
            }
        };

        // Inside a job the monitor makes the home private once the container
        // is up; outside one nothing else will.
        if swap_prepared
            && !self.session.is_inside_job()
            && let Err(error) = seal_home(&caller.home)
        {
            return Err(RunFailure {
                error,
                identity: Some(identity),
                monitor: Some(monitor),
            });
        }

        Ok(RunOutcome {
            identity,
            exit_code,
            output,
            monitor,
        })
    }
}

/// Volumes, forwarded options, image and command, in that order.
fn engine_args(request: &RunRequest) -> Vec<String> {
    let mut args = Vec::new();
    for volume in &request.volumes {
        args.push("--volume".to_string());
        args.push(volume.clone());
    }
    args.extend(request.forwarded.iter().cloned());
    args.push(request.image.clone());
    args.extend(request.command.iter().cloned());
    args
}
