//! Background confinement of a freshly launched container.
//!
//! The monitor subscribes to the engine's start events before the container
//! is launched, then runs as a detached task:
//!
//! ```text
//! WaitingForStart -> Started -> Reclassified -> (EpilogRecorded) -> Done
//!        |
//!        +-> TimedOut
//! ```
//!
//! Nothing here stops or kills the container; every failure is collected in
//! the [`MonitorReport`] and logged.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::cgroup::CgroupTarget;
use crate::cgroup::Reclassifier;
use crate::engine::DockerEngine;
use crate::engine::unix_now;
use crate::epilog;
use crate::error::SockerErr;
use crate::exec::CommandRunner;
use crate::exec::LineStream;
use crate::exec::PrivilegedExecutor;
use crate::identity::ContainerIdentity;
use crate::process_tree::ProcessTree;
use crate::session::Session;
use crate::swap::seal_home;

/// How long the container has to show up in the engine's event stream.
pub const START_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    WaitingForStart,
    Started,
    Reclassified,
    EpilogRecorded,
    Done,
    TimedOut,
}

/// What one monitor run did, in order.
#[derive(Debug, Default)]
pub struct MonitorReport {
    pub states: Vec<MonitorState>,
    /// Time from subscription to the start event.
    pub started_after: Option<Duration>,
    pub root_pid: Option<u32>,
    /// Root pid followed by its descendants.
    pub pids: Vec<u32>,
    pub errors: Vec<SockerErr>,
    pub epilog_record: Option<PathBuf>,
}

impl MonitorReport {
    pub fn final_state(&self) -> Option<MonitorState> {
        self.states.last().copied()
    }

    /// The error the run is judged by; later ones are only logged.
    pub fn first_error(&self) -> Option<&SockerErr> {
        self.errors.first()
    }

    fn enter(&mut self, state: MonitorState) {
        tracing::info!("monitor: {state:?}");
        self.states.push(state);
    }

    fn fail(&mut self, err: SockerErr) {
        tracing::warn!("monitor: {err}");
        self.errors.push(err);
    }

    fn log_summary(&self, identity: &ContainerIdentity) {
        match self.first_error() {
            None => tracing::info!(
                "container {identity} confined: {} process(es)",
                self.pids.len()
            ),
            Some(first) => tracing::error!(
                "container {identity} monitor finished with {} error(s), first: {first}",
                self.errors.len()
            ),
        }
    }
}

pub struct LifecycleMonitor {
    session: Arc<Session>,
    runner: Arc<dyn CommandRunner>,
    identity: ContainerIdentity,
    start_timeout: Duration,
}

impl LifecycleMonitor {
    pub fn new(
        session: Arc<Session>,
        runner: Arc<dyn CommandRunner>,
        identity: ContainerIdentity,
    ) -> Self {
        Self {
            session,
            runner,
            identity,
            start_timeout: START_TIMEOUT,
        }
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Subscribe to start events and spawn the watch task.
    ///
    /// Returns once the subscription exists, so the caller may launch the
    /// container right after. Outside a scheduler job nothing is run and the
    /// handle is already complete.
    pub async fn start(self) -> MonitorHandle {
        if !self.session.is_inside_job() {
            tracing::debug!("not inside a scheduler job; skipping confinement");
            let report = MonitorReport {
                states: vec![MonitorState::Done],
                ..MonitorReport::default()
            };
            return MonitorHandle {
                task: tokio::spawn(async move { report }),
            };
        }

        let engine = DockerEngine::new(
            PrivilegedExecutor::new(
                Arc::clone(&self.runner),
                self.session.engine_credential.clone(),
                self.session.config.verbose,
            ),
            self.session.engine_program(),
        );
        let subscribed_at = Instant::now();
        let subscription = engine.subscribe_start(&self.identity, unix_now()).await;
        let task = tokio::spawn(async move {
            let mut report = MonitorReport::default();
            report.enter(MonitorState::WaitingForStart);
            match subscription {
                Ok(events) => self.watch(engine, events, subscribed_at, &mut report).await,
                Err(err) => {
                    report.fail(err);
                    report.enter(MonitorState::Done);
                }
            }
            report.log_summary(&self.identity);
            report
        });
        MonitorHandle { task }
    }

    async fn watch(
        &self,
        engine: DockerEngine,
        mut events: LineStream,
        subscribed_at: Instant,
        report: &mut MonitorReport,
    ) {
        let first_event = tokio::time::timeout(self.start_timeout, events.next_line()).await;
        // Closing the stream kills the subscription process, on both paths.
        drop(events);

        match first_event {
            Ok(Some(container_id)) => {
                report.started_after = Some(subscribed_at.elapsed());
                tracing::debug!("container {} started as {container_id}", self.identity);
            }
            Ok(None) => {
                tracing::warn!("start event stream for {} closed early", self.identity);
                self.time_out(report);
                return;
            }
            Err(_) => {
                self.time_out(report);
                return;
            }
        }
        report.enter(MonitorState::Started);

        let config = &self.session.config;
        if !config.insecure
            && let Err(err) = seal_home(&self.session.caller.home)
        {
            report.fail(err);
        }

        let root = match engine.root_pid(&self.identity).await {
            Ok(pid) => pid,
            Err(err) => {
                report.fail(err);
                report.enter(MonitorState::Done);
                return;
            }
        };
        report.root_pid = Some(root);
        report.pids.push(root);

        let tree = ProcessTree::new(Arc::clone(&self.runner), &config.pgrep_program);
        match tree.descendants(root).await {
            Ok(descendants) => report.pids.extend(descendants),
            Err(err) => report.fail(err),
        }

        // Checked by `is_inside_job` before the task was spawned.
        let job_id = self.session.job_id.as_deref().unwrap_or_default();
        let target = CgroupTarget::for_job(self.session.caller.uid, job_id);
        if config.verbose {
            tracing::debug!("moving pids {:?} to {target}", report.pids);
        }
        let reclassifier = Reclassifier::new(
            Arc::clone(&self.runner),
            &config.cgclassify_program,
            config.verbose,
        );
        for err in reclassifier.reclassify(&report.pids, &target).await {
            report.errors.push(err);
        }
        report.enter(MonitorState::Reclassified);

        if config.epilog_enabled {
            match epilog::record(&config.epilog_dir, job_id, &self.identity) {
                Ok(path) => {
                    report.epilog_record = Some(path);
                    report.enter(MonitorState::EpilogRecorded);
                }
                Err(err) => report.fail(err.into()),
            }
        }
        report.enter(MonitorState::Done);
    }

    fn time_out(&self, report: &mut MonitorReport) {
        report.fail(SockerErr::Timeout {
            identity: self.identity.to_string(),
            timeout: self.start_timeout,
        });
        report.enter(MonitorState::TimedOut);
    }
}

/// The detached monitor task. Never joined by the launcher.
#[derive(Debug)]
pub struct MonitorHandle {
    task: JoinHandle<MonitorReport>,
}

impl MonitorHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait up to `limit` for the report. `None` if the monitor is still
    /// running; the task itself keeps going.
    pub async fn settle(self, limit: Duration) -> Option<MonitorReport> {
        match tokio::time::timeout(limit, self.task).await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(err)) => {
                tracing::error!("monitor task failed: {err}");
                None
            }
            Err(_) => None,
        }
    }
}
