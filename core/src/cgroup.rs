//! Moving container processes from the engine's cgroups into the job's.

use std::fmt;
use std::sync::Arc;

use crate::error::ReclassifyStep;
use crate::error::SockerErr;
use crate::exec::CommandRunner;
use crate::exec::CommandSpec;

/// Controllers the engine places containers under; the pid is moved back to
/// their root first.
pub const ENGINE_CONTROLLERS: &[&str] = &["blkio", "net_cls", "devices", "cpu"];
/// Controllers the scheduler confines a job with.
pub const JOB_CONTROLLERS: &[&str] = &["memory", "cpu", "freezer", "devices"];

const ROOT_CGROUP: &str = "/";

/// `/slurm/uid_<uid>/job_<job>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupTarget(String);

impl CgroupTarget {
    pub fn for_job(uid: u32, job_id: &str) -> Self {
        Self(format!("/slurm/uid_{uid}/job_{job_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CgroupTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `cgclassify` arguments placing `pid` in `path` for `controllers`.
pub fn classify_args(controllers: &[&str], path: &str, pid: u32) -> Vec<String> {
    vec![
        "-g".to_string(),
        format!("{}:{path}", controllers.join(",")),
        pid.to_string(),
    ]
}

pub struct Reclassifier {
    runner: Arc<dyn CommandRunner>,
    cgclassify: String,
    verbose: bool,
}

impl Reclassifier {
    pub fn new(runner: Arc<dyn CommandRunner>, cgclassify: impl Into<String>, verbose: bool) -> Self {
        Self {
            runner,
            cgclassify: cgclassify.into(),
            verbose,
        }
    }

    /// Detach every pid from the engine cgroups and attach it to `target`.
    ///
    /// Keeps going past failures: each failed step is retried once, and every
    /// step that still fails is returned, in pid order.
    pub async fn reclassify(&self, pids: &[u32], target: &CgroupTarget) -> Vec<SockerErr> {
        let mut failures = Vec::new();
        for &pid in pids {
            let steps = [
                (ReclassifyStep::DetachFromEngine, ENGINE_CONTROLLERS, ROOT_CGROUP),
                (ReclassifyStep::AttachToJob, JOB_CONTROLLERS, target.as_str()),
            ];
            for (step, controllers, path) in steps {
                if let Err(err) = self.classify_with_retry(pid, step, controllers, path).await {
                    tracing::warn!("{err}");
                    failures.push(err);
                }
            }
        }
        failures
    }

    async fn classify_with_retry(
        &self,
        pid: u32,
        step: ReclassifyStep,
        controllers: &[&str],
        path: &str,
    ) -> Result<(), SockerErr> {
        let spec = CommandSpec::new(&self.cgclassify, classify_args(controllers, path, pid));
        if self.verbose {
            tracing::debug!("exec: {}", spec.display());
        }
        let mut last_message = String::new();
        for attempt in 1..=2 {
            match self.runner.output(&spec).await {
                Ok(output) if output.success() => return Ok(()),
                Ok(output) => {
                    last_message = match output.status {
                        Some(code) => format!("exit status {code}: {}", output.stderr.trim()),
                        None => format!("terminated by a signal: {}", output.stderr.trim()),
                    };
                }
                Err(err) => last_message = err.to_string(),
            }
            tracing::debug!("{step} for pid {pid} failed (attempt {attempt}): {last_message}");
        }
        Err(SockerErr::Reclassification {
            pid,
            step,
            message: last_message,
        })
    }
}
