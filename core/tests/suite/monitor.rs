#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use socker_core::ContainerIdentity;
use socker_core::MonitorReport;
use socker_core::MonitorState;
use socker_core::START_TIMEOUT;
use socker_core::SockerConfig;
use socker_core::SockerErr;
use socker_core::error::ReclassifyStep;
use socker_core::exec::CommandOutput;
use socker_core::monitor::LifecycleMonitor;
use socker_core::test_support::RecordingRunner;
use socker_core::test_support::StartEvents;
use socker_core::test_support::test_session;
use tempfile::TempDir;

const JOB_ID: &str = "4242";

fn stdout(text: &str) -> CommandOutput {
    CommandOutput {
        status: Some(0),
        stdout: text.to_string(),
        stderr: String::new(),
    }
}

fn started_after(secs: u64) -> StartEvents {
    StartEvents::Emit {
        after: Duration::from_secs(secs),
        line: "c0ffee".to_string(),
    }
}

struct Fixture {
    home: TempDir,
    epilog_dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            home: TempDir::new().expect("home"),
            epilog_dir: TempDir::new().expect("epilog dir"),
        }
    }

    fn config(&self, epilog_enabled: bool) -> SockerConfig {
        SockerConfig {
            epilog_enabled,
            epilog_dir: self.epilog_dir.path().to_path_buf(),
            ..SockerConfig::default()
        }
    }

    async fn run(
        &self,
        runner: &Arc<RecordingRunner>,
        config: SockerConfig,
        identity: &ContainerIdentity,
    ) -> MonitorReport {
        let session = Arc::new(test_session(self.home.path(), Some(JOB_ID), config));
        let runner: Arc<RecordingRunner> = Arc::clone(runner);
        LifecycleMonitor::new(session, runner, identity.clone())
            .start()
            .await
            .settle(START_TIMEOUT * 2)
            .await
            .expect("monitor finished")
    }
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn epilog_record_holds_the_container_identity() {
    let fixture = Fixture::new();
    let identity = ContainerIdentity::assign(None);
    let runner = Arc::new(
        RecordingRunner::new()
            .respond("docker inspect", stdout("500\n"))
            .respond("pgrep -P 500", stdout("501\n"))
            .with_start_events(started_after(2)),
    );

    let report = fixture.run(&runner, fixture.config(true), &identity).await;

    assert_eq!(
        report.states,
        vec![
            MonitorState::WaitingForStart,
            MonitorState::Started,
            MonitorState::Reclassified,
            MonitorState::EpilogRecorded,
            MonitorState::Done,
        ]
    );
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.pids, vec![500, 501]);
    assert!(
        report
            .started_after
            .is_some_and(|elapsed| elapsed >= Duration::from_secs(2) && elapsed < START_TIMEOUT)
    );

    let record = fixture.epilog_dir.path().join(JOB_ID);
    assert_eq!(report.epilog_record.as_deref(), Some(record.as_path()));
    assert_eq!(
        std::fs::read(&record).expect("epilog record"),
        identity.as_str().as_bytes().to_vec()
    );

    let uid = nix::unistd::getuid().as_raw();
    assert_eq!(
        runner.calls_to("cgclassify"),
        vec![
            "cgclassify -g blkio,net_cls,devices,cpu:/ 500".to_string(),
            format!("cgclassify -g memory,cpu,freezer,devices:/slurm/uid_{uid}/job_{JOB_ID} 500"),
            "cgclassify -g blkio,net_cls,devices,cpu:/ 501".to_string(),
            format!("cgclassify -g memory,cpu,freezer,devices:/slurm/uid_{uid}/job_{JOB_ID} 501"),
        ]
    );
    assert!(runner.subscription_closed().await);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn no_start_event_times_out_without_confinement() {
    let fixture = Fixture::new();
    let identity = ContainerIdentity::assign(Some("slow"));
    let runner = Arc::new(RecordingRunner::new().with_start_events(StartEvents::Silent));

    let report = fixture.run(&runner, fixture.config(true), &identity).await;

    assert_eq!(
        report.states,
        vec![MonitorState::WaitingForStart, MonitorState::TimedOut]
    );
    assert_eq!(report.errors.len(), 1);
    match report.first_error() {
        Some(SockerErr::Timeout { identity, timeout }) => {
            assert_eq!(identity, "slow");
            assert_eq!(*timeout, START_TIMEOUT);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!report.states.contains(&MonitorState::Started));
    assert!(runner.calls_to("cgclassify").is_empty());
    assert!(!fixture.epilog_dir.path().join(JOB_ID).exists());
    assert!(runner.subscription_closed().await, "subscription must be closed on timeout");
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn start_just_before_the_deadline_wins() {
    let fixture = Fixture::new();
    let identity = ContainerIdentity::assign(None);
    let runner = Arc::new(
        RecordingRunner::new()
            .respond("docker inspect", stdout("900\n"))
            .with_start_events(started_after(29)),
    );

    let report = fixture.run(&runner, fixture.config(false), &identity).await;

    assert_eq!(report.final_state(), Some(MonitorState::Done));
    assert!(report.states.contains(&MonitorState::Started));
    assert!(!report.states.contains(&MonitorState::TimedOut));
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert!(report.epilog_record.is_none());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn start_after_the_deadline_is_ignored() {
    let fixture = Fixture::new();
    let identity = ContainerIdentity::assign(None);
    let runner = Arc::new(RecordingRunner::new().with_start_events(started_after(31)));

    let report = fixture.run(&runner, fixture.config(false), &identity).await;

    assert_eq!(report.final_state(), Some(MonitorState::TimedOut));
    assert!(!report.states.contains(&MonitorState::Started));
    assert!(
        runner
            .calls_to("docker")
            .iter()
            .all(|call| !call.starts_with("docker inspect"))
    );
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn partial_reclassification_still_records_the_epilog() {
    let fixture = Fixture::new();
    let identity = ContainerIdentity::assign(Some("partial"));
    let uid = nix::unistd::getuid().as_raw();
    let runner = Arc::new(
        RecordingRunner::new()
            .respond("docker inspect", stdout("700\n"))
            .respond("pgrep -P 700", stdout("701\n702\n"))
            .respond(
                &format!(
                    "cgclassify -g memory,cpu,freezer,devices:/slurm/uid_{uid}/job_{JOB_ID} 701"
                ),
                CommandOutput {
                    status: Some(1),
                    stdout: String::new(),
                    stderr: "cgroup change of group failed".to_string(),
                },
            )
            .with_start_events(started_after(1)),
    );

    let report = fixture.run(&runner, fixture.config(true), &identity).await;

    assert_eq!(report.final_state(), Some(MonitorState::Done));
    assert!(report.states.contains(&MonitorState::EpilogRecorded));
    assert_eq!(report.pids, vec![700, 701, 702]);
    assert_eq!(report.errors.len(), 1);
    assert!(matches!(
        report.first_error(),
        Some(SockerErr::Reclassification {
            pid: 701,
            step: ReclassifyStep::AttachToJob,
            ..
        })
    ));
    // Every pid was attempted; the failing step was retried once.
    assert_eq!(runner.calls_to("cgclassify").len(), 7);
    assert!(fixture.epilog_dir.path().join(JOB_ID).exists());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn unreadable_root_pid_stops_before_reclassification() {
    let fixture = Fixture::new();
    let identity = ContainerIdentity::assign(None);
    let runner = Arc::new(
        RecordingRunner::new()
            .respond("docker inspect", stdout("0\n"))
            .with_start_events(started_after(1)),
    );

    let report = fixture.run(&runner, fixture.config(true), &identity).await;

    assert_eq!(
        report.states,
        vec![
            MonitorState::WaitingForStart,
            MonitorState::Started,
            MonitorState::Done,
        ]
    );
    assert!(matches!(
        report.first_error(),
        Some(SockerErr::MalformedOutput { .. })
    ));
    assert!(runner.calls_to("cgclassify").is_empty());
    assert!(!fixture.epilog_dir.path().join(JOB_ID).exists());
}
