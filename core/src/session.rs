use std::path::PathBuf;

use crate::config::SockerConfig;
use crate::credentials::CallerIdentity;
use crate::credentials::Credential;
use crate::credentials::resolve_account;
use crate::credentials::resolve_caller;
use crate::error::PrerequisiteKind;
use crate::error::Result;
use crate::error::SockerErr;

/// Set by the scheduler inside a job allocation.
pub const JOB_ID_ENV_VAR: &str = "SLURM_JOBID";

/// Everything established by the startup checks. Read-only afterwards.
#[derive(Debug, Clone)]
pub struct Session {
    pub caller: CallerIdentity,
    /// Scheduler job id; `None` outside a job.
    pub job_id: Option<String>,
    /// Account the engine client runs as.
    pub engine_credential: Credential,
    pub engine_path: PathBuf,
    pub config: SockerConfig,
}

impl Session {
    /// Run the prerequisite checks in order: engine binary, engine account
    /// and group, caller identity, job id.
    pub fn establish(config: SockerConfig) -> Result<Self> {
        let engine_path = locate_engine(&config.engine_program)?;
        let engine_credential = resolve_account(&config.engine_account, &config.engine_group)?;
        let caller = resolve_caller()?;
        let job_id = job_id_from(std::env::var(JOB_ID_ENV_VAR).ok())?;

        if config.verbose {
            tracing::debug!(
                caller = %caller.username,
                uid = caller.uid,
                gid = caller.gid,
                home = %caller.home.display(),
                engine = %engine_path.display(),
                engine_account = %engine_credential.account,
                engine_uid = engine_credential.uid,
                engine_gid = engine_credential.gid,
                engine_groups = ?engine_credential.groups,
                job_id = ?job_id,
                "session established"
            );
        }

        Ok(Self {
            caller,
            job_id,
            engine_credential,
            engine_path,
            config,
        })
    }

    pub fn is_inside_job(&self) -> bool {
        self.job_id.is_some()
    }

    pub fn engine_program(&self) -> String {
        self.engine_path.to_string_lossy().into_owned()
    }
}

fn locate_engine(program: &str) -> Result<PathBuf> {
    which::which(program).map_err(|err| {
        SockerErr::prerequisite(
            PrerequisiteKind::MissingEngine,
            format!("{program} was not found on this system: {err}"),
        )
    })
}

/// An unset or blank value means "not inside a job". Anything else must be a
/// plain number, since it ends up in a cgroup path and a file name.
pub(crate) fn job_id_from(raw: Option<String>) -> Result<Option<String>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SockerErr::Config(format!(
            "{JOB_ID_ENV_VAR} must be numeric, got {raw:?}"
        )));
    }
    Ok(Some(trimmed.to_string()))
}
