use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use socker_utils_pty::RelayError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SockerErr>;

/// Exit code when the container engine binary cannot be found.
pub const EXIT_ENGINE_MISSING: i32 = 127;
/// Exit code for a missing account or group, and for every run failure.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code when the engine account is not in the engine group.
pub const EXIT_NOT_GROUP_MEMBER: i32 = 2;

/// Which startup precondition failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrerequisiteKind {
    MissingEngine,
    MissingAccount,
    MissingGroup,
    NotGroupMember,
    /// The invoking user's own passwd/group entries could not be read.
    CallerLookup,
}

/// The two halves of moving a pid into the job cgroup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclassifyStep {
    DetachFromEngine,
    AttachToJob,
}

impl fmt::Display for ReclassifyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReclassifyStep::DetachFromEngine => f.write_str("detach from engine cgroups"),
            ReclassifyStep::AttachToJob => f.write_str("attach to job cgroup"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SockerErr {
    #[error("{message}")]
    Prerequisite {
        kind: PrerequisiteKind,
        message: String,
    },

    #[error("permission denied: {} is not available to the calling user", .path.display())]
    Permission { path: PathBuf },

    #[error("invalid run request: {0}")]
    Parse(String),

    #[error("container {identity} was not seen starting within {}s", .timeout.as_secs())]
    Timeout { identity: String, timeout: Duration },

    #[error("failed to {step} for pid {pid}: {message}")]
    Reclassification {
        pid: u32,
        step: ReclassifyStep,
        message: String,
    },

    #[error("terminal error: {0}")]
    Terminal(String),

    #[error("{program} {}: {}", describe_status(.status), .stderr.trim_end())]
    Subprocess {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("unexpected output from {program}: {output:?}")]
    MalformedOutput { program: String, output: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SockerErr {
    pub(crate) fn prerequisite(kind: PrerequisiteKind, message: impl Into<String>) -> Self {
        Self::Prerequisite {
            kind,
            message: message.into(),
        }
    }

    /// Process exit code the command line reports for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            SockerErr::Prerequisite {
                kind: PrerequisiteKind::MissingEngine,
                ..
            } => EXIT_ENGINE_MISSING,
            SockerErr::Prerequisite {
                kind: PrerequisiteKind::NotGroupMember,
                ..
            } => EXIT_NOT_GROUP_MEMBER,
            _ => EXIT_FAILURE,
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exited with status {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

impl From<RelayError> for SockerErr {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::OpenPty(_) | RelayError::RawMode(_) => SockerErr::Terminal(err.to_string()),
            RelayError::Spawn { program, source } => SockerErr::Subprocess {
                program,
                status: None,
                stderr: source.to_string(),
            },
            RelayError::Wait { program, message } => SockerErr::Subprocess {
                program,
                status: None,
                stderr: message,
            },
        }
    }
}
