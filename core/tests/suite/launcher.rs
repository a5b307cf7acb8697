#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use socker_core::MonitorState;
use socker_core::START_TIMEOUT;
use socker_core::Socker;
use socker_core::SockerConfig;
use socker_core::SockerErr;
use socker_core::exec::CommandOutput;
use socker_core::test_support::AllowListProbe;
use socker_core::test_support::RecordingRunner;
use socker_core::test_support::StartEvents;
use socker_core::test_support::TEST_ENGINE_UID;
use socker_core::test_support::test_session;
use socker_utils_pty::CrosstermTerminal;
use tempfile::TempDir;

fn argv(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

fn mode(path: &Path) -> u32 {
    std::fs::metadata(path).expect("metadata").mode() & 0o7777
}

fn socker(
    home: &TempDir,
    job_id: Option<&str>,
    config: SockerConfig,
    runner: Arc<RecordingRunner>,
    writable: Vec<std::path::PathBuf>,
) -> Socker {
    Socker::with_collaborators(
        test_session(home.path(), job_id, config),
        runner,
        Arc::new(AllowListProbe(writable)),
        Arc::new(CrosstermTerminal),
    )
}

fn batch_output(text: &str) -> CommandOutput {
    CommandOutput {
        status: Some(0),
        stdout: text.to_string(),
        stderr: String::new(),
    }
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn batch_run_with_writable_volume() {
    let home = TempDir::new().expect("home");
    let data = TempDir::new().expect("data");
    let runner = Arc::new(
        RecordingRunner::new()
            .respond("docker run", batch_output("hello from the container\n"))
            .respond("docker inspect", batch_output("4242\n"))
            .with_start_events(StartEvents::Emit {
                after: Duration::from_secs(1),
                line: "0123456789ab".to_string(),
            }),
    );
    let socker = socker(
        &home,
        Some("77"),
        SockerConfig::default(),
        Arc::clone(&runner),
        vec![data.path().to_path_buf()],
    );
    let volume = format!("{}:/data", data.path().display());

    let outcome = socker
        .run_image(&argv(&["--name", "job-a", "-v", &volume, "alpine", "cat", "/data/in"]))
        .await
        .expect("run");

    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.output.as_deref(), Some("hello from the container\n"));
    assert_eq!(outcome.identity.as_str(), "job-a");

    let swap = home.path().join("swap");
    assert_eq!(mode(&swap), 0o777);
    assert_eq!(mode(home.path()), 0o711);

    let report = outcome
        .monitor
        .settle(START_TIMEOUT + Duration::from_secs(5))
        .await
        .expect("monitor finished");
    assert_eq!(report.final_state(), Some(MonitorState::Done));
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.root_pid, Some(4242));
    assert_eq!(mode(home.path()), 0o700);

    let caller = &socker.session().caller;
    let run_call = runner
        .calls_to("docker")
        .into_iter()
        .find(|call| call.starts_with("docker run"))
        .expect("engine run invoked");
    assert_eq!(
        run_call,
        format!(
            "docker run --name job-a --user {}:{} --volume {swap}:{swap} --volume {volume} alpine cat /data/in",
            caller.uid,
            caller.gid,
            swap = swap.display(),
        )
    );
    assert!(
        runner
            .calls()
            .iter()
            .filter(|call| call.program == "docker")
            .all(|call| call.uid == Some(TEST_ENGINE_UID)),
        "engine calls must run as the engine account"
    );
    assert_eq!(runner.calls_to("cgclassify").len(), 2);
}

#[tokio::test]
async fn unwritable_volume_is_rejected_before_any_subprocess() {
    let home = TempDir::new().expect("home");
    let runner = Arc::new(RecordingRunner::new());
    let socker = socker(
        &home,
        Some("77"),
        SockerConfig::default(),
        Arc::clone(&runner),
        Vec::new(),
    );

    let err = socker
        .run_image(&argv(&["-v", "/etc:/host-etc", "alpine"]))
        .await
        .expect_err("must be rejected");

    assert!(err.monitor.is_none());
    match err.error {
        SockerErr::Permission { path } => assert_eq!(path, Path::new("/etc")),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(runner.calls().is_empty());
    assert!(!home.path().join("swap").exists());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn outside_a_job_the_monitor_is_done_immediately() {
    let home = TempDir::new().expect("home");
    let runner = Arc::new(RecordingRunner::new());
    let socker = socker(
        &home,
        None,
        SockerConfig::default(),
        Arc::clone(&runner),
        Vec::new(),
    );

    let outcome = socker
        .run_image(&argv(&["alpine", "true"]))
        .await
        .expect("run");
    let report = outcome
        .monitor
        .settle(Duration::from_secs(1))
        .await
        .expect("monitor finished");

    assert_eq!(report.states, vec![MonitorState::Done]);
    assert!(runner.calls_to("cgclassify").is_empty());
    assert!(runner.calls_to("pgrep").is_empty());
    assert_eq!(runner.calls_to("docker").len(), 1);
    assert_eq!(mode(home.path()), 0o700);
}

#[tokio::test]
async fn denied_options_never_reach_the_engine() {
    let home = TempDir::new().expect("home");
    let runner = Arc::new(RecordingRunner::new());
    let socker = socker(
        &home,
        None,
        SockerConfig::default(),
        Arc::clone(&runner),
        Vec::new(),
    );

    for raw in [
        &["--privileged", "alpine"][..],
        &["--mount", "type=bind,src=/,dst=/host", "alpine"][..],
        &["--user=0", "alpine"][..],
    ] {
        let err = socker.run_image(&argv(raw)).await.expect_err("denied");
        assert!(matches!(err.error, SockerErr::Parse(_)), "{raw:?}: {err:?}");
    }
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn failed_batch_run_surfaces_engine_output() {
    let home = TempDir::new().expect("home");
    let runner = Arc::new(RecordingRunner::new().respond(
        "docker run",
        CommandOutput {
            status: Some(125),
            stdout: "Unable to find image 'nope:latest' locally\n".to_string(),
            stderr: String::new(),
        },
    ));
    let socker = socker(
        &home,
        None,
        SockerConfig::default(),
        Arc::clone(&runner),
        Vec::new(),
    );

    let failure = socker
        .run_image(&argv(&["nope"]))
        .await
        .expect_err("engine failure");
    let err = &failure.error;
    assert!(matches!(
        err,
        SockerErr::Subprocess {
            status: Some(125),
            ..
        }
    ));
    assert!(err.to_string().contains("Unable to find image"));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(mode(home.path()), 0o700, "home must be private again");
    assert!(failure.monitor.is_some());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn failed_run_inside_a_job_still_confines_the_container() {
    let home = TempDir::new().expect("home");
    let epilog_dir = TempDir::new().expect("epilog dir");
    let runner = Arc::new(
        RecordingRunner::new()
            .respond(
                "docker run",
                CommandOutput {
                    status: Some(3),
                    stdout: "job step failed\n".to_string(),
                    stderr: String::new(),
                },
            )
            .respond("docker inspect", batch_output("4242\n"))
            .with_start_events(StartEvents::Emit {
                after: Duration::from_secs(1),
                line: "0123456789ab".to_string(),
            }),
    );
    let config = SockerConfig {
        epilog_enabled: true,
        epilog_dir: epilog_dir.path().to_path_buf(),
        ..SockerConfig::default()
    };
    let socker = socker(&home, Some("77"), config, Arc::clone(&runner), Vec::new());

    let failure = socker
        .run_image(&argv(&["--name", "failing", "alpine", "false"]))
        .await
        .expect_err("container command failed");
    assert!(matches!(
        failure.error,
        SockerErr::Subprocess {
            status: Some(3),
            ..
        }
    ));
    assert_eq!(mode(home.path()), 0o700);
    assert_eq!(
        failure.identity.as_ref().map(|identity| identity.as_str()),
        Some("failing")
    );

    let report = failure
        .monitor
        .expect("monitor handed back")
        .settle(START_TIMEOUT + Duration::from_secs(5))
        .await
        .expect("monitor finished");
    assert_eq!(report.final_state(), Some(MonitorState::Done));
    assert!(report.states.contains(&MonitorState::Reclassified));
    assert_eq!(runner.calls_to("cgclassify").len(), 2);
    assert_eq!(
        std::fs::read(epilog_dir.path().join("77")).expect("epilog record"),
        b"failing".to_vec()
    );
}

#[tokio::test]
async fn insecure_mode_skips_the_swap_directory() {
    let home = TempDir::new().expect("home");
    let before = mode(home.path());
    let runner = Arc::new(RecordingRunner::new());
    let config = SockerConfig {
        insecure: true,
        ..SockerConfig::default()
    };
    let socker = socker(&home, None, config, Arc::clone(&runner), Vec::new());

    socker
        .run_image(&argv(&["alpine"]))
        .await
        .expect("run");

    assert!(!home.path().join("swap").exists());
    assert_eq!(mode(home.path()), before);
    let run_call = runner.calls_to("docker").pop().expect("engine run");
    assert!(!run_call.contains("/swap"), "{run_call}");
}
