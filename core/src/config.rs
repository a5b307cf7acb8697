//! Immutable run configuration.
//!
//! Values are layered, lowest precedence first: built-in defaults, the
//! root-owned `/etc/socker/config.toml`, `SOCKER_*` environment variables and
//! finally command-line overrides. The environment only reaches the user
//! facing toggles; program paths and the epilog directory can only come from
//! the root-owned file, since socker runs with elevated privileges.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use socker_utils_pty::TerminalSize;

use crate::error::Result;
use crate::error::SockerErr;

pub const CONFIG_FILE_PATH: &str = "/etc/socker/config.toml";
pub const DEFAULT_EPILOG_DIR: &str = "/var/lib/socker/epilog";
pub const DEFAULT_ENGINE_ACCOUNT: &str = "dockerroot";
pub const DEFAULT_ENGINE_GROUP: &str = "docker";
pub const DEFAULT_ENGINE_PROGRAM: &str = "docker";
pub const DEFAULT_CGCLASSIFY_PROGRAM: &str = "cgclassify";
pub const DEFAULT_PGREP_PROGRAM: &str = "pgrep";

pub const VERBOSE_ENV_VAR: &str = "SOCKER_VERBOSE";
pub const EPILOG_ENV_VAR: &str = "SOCKER_EPILOG";
pub const INSECURE_ENV_VAR: &str = "SOCKER_INSECURE";
pub const PTY_ROWS_ENV_VAR: &str = "SOCKER_PTY_ROWS";
pub const PTY_COLS_ENV_VAR: &str = "SOCKER_PTY_COLS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SockerConfig {
    /// Surface credentials, argv and cgroup paths in the log.
    pub verbose: bool,
    /// Record container identities for the scheduler epilog.
    pub epilog_enabled: bool,
    /// Skip the swap directory and home-directory tightening.
    pub insecure: bool,
    pub pty_rows: Option<u16>,
    pub pty_cols: Option<u16>,
    pub epilog_dir: PathBuf,
    /// Unprivileged account allowed to talk to the engine.
    pub engine_account: String,
    pub engine_group: String,
    pub engine_program: String,
    pub cgclassify_program: String,
    pub pgrep_program: String,
}

impl Default for SockerConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            epilog_enabled: false,
            insecure: false,
            pty_rows: None,
            pty_cols: None,
            epilog_dir: PathBuf::from(DEFAULT_EPILOG_DIR),
            engine_account: DEFAULT_ENGINE_ACCOUNT.to_string(),
            engine_group: DEFAULT_ENGINE_GROUP.to_string(),
            engine_program: DEFAULT_ENGINE_PROGRAM.to_string(),
            cgclassify_program: DEFAULT_CGCLASSIFY_PROGRAM.to_string(),
            pgrep_program: DEFAULT_PGREP_PROGRAM.to_string(),
        }
    }
}

/// On-disk shape of `/etc/socker/config.toml`. Every key is optional.
#[derive(Debug, Default, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ConfigToml {
    pub verbose: Option<bool>,
    pub epilog: Option<bool>,
    pub insecure: Option<bool>,
    pub pty_rows: Option<u16>,
    pub pty_cols: Option<u16>,
    pub epilog_dir: Option<PathBuf>,
    pub engine_account: Option<String>,
    pub engine_group: Option<String>,
    pub engine_program: Option<String>,
    pub cgclassify_program: Option<String>,
    pub pgrep_program: Option<String>,
}

/// Command-line overrides; `None` leaves the lower layers alone.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub verbose: Option<bool>,
    pub epilog: Option<bool>,
    pub insecure: Option<bool>,
}

impl ConfigToml {
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|err| SockerErr::Config(err.to_string()))
    }

    /// Reads `path`, treating a missing file as an empty configuration.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).map_err(|err| match err {
                SockerErr::Config(message) => {
                    SockerErr::Config(format!("{}: {message}", path.display()))
                }
                other => other,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }
}

impl SockerConfig {
    /// Build the configuration from the system file, the process environment
    /// and `overrides`.
    pub fn load(overrides: ConfigOverrides) -> Result<Self> {
        let file = ConfigToml::load(Path::new(CONFIG_FILE_PATH))?;
        Self::from_layers(file, |key| std::env::var(key).ok(), overrides)
    }

    pub fn from_layers<F>(file: ConfigToml, env: F, overrides: ConfigOverrides) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let ConfigToml {
            verbose,
            epilog,
            insecure,
            pty_rows,
            pty_cols,
            epilog_dir,
            engine_account,
            engine_group,
            engine_program,
            cgclassify_program,
            pgrep_program,
        } = file;

        config.verbose = verbose.unwrap_or(config.verbose);
        config.epilog_enabled = epilog.unwrap_or(config.epilog_enabled);
        config.insecure = insecure.unwrap_or(config.insecure);
        config.pty_rows = pty_rows;
        config.pty_cols = pty_cols;
        if let Some(dir) = epilog_dir {
            config.epilog_dir = dir;
        }
        if let Some(account) = engine_account {
            config.engine_account = account;
        }
        if let Some(group) = engine_group {
            config.engine_group = group;
        }
        if let Some(program) = engine_program {
            config.engine_program = program;
        }
        if let Some(program) = cgclassify_program {
            config.cgclassify_program = program;
        }
        if let Some(program) = pgrep_program {
            config.pgrep_program = program;
        }

        if let Some(value) = env_bool(&env, VERBOSE_ENV_VAR)? {
            config.verbose = value;
        }
        if let Some(value) = env_bool(&env, EPILOG_ENV_VAR)? {
            config.epilog_enabled = value;
        }
        if let Some(value) = env_bool(&env, INSECURE_ENV_VAR)? {
            config.insecure = value;
        }
        if let Some(rows) = env_u16(&env, PTY_ROWS_ENV_VAR)? {
            config.pty_rows = Some(rows);
        }
        if let Some(cols) = env_u16(&env, PTY_COLS_ENV_VAR)? {
            config.pty_cols = Some(cols);
        }

        let ConfigOverrides {
            verbose,
            epilog,
            insecure,
        } = overrides;
        config.verbose = verbose.unwrap_or(config.verbose);
        config.epilog_enabled = epilog.unwrap_or(config.epilog_enabled);
        config.insecure = insecure.unwrap_or(config.insecure);

        Ok(config)
    }

    /// Geometry for a new pty: configured values win, then the caller's
    /// terminal, then 24x80.
    pub fn pty_size(&self) -> TerminalSize {
        let fallback = TerminalSize::of_caller().unwrap_or_default();
        TerminalSize {
            rows: self.pty_rows.filter(|rows| *rows > 0).unwrap_or(fallback.rows),
            cols: self.pty_cols.filter(|cols| *cols > 0).unwrap_or(fallback.cols),
        }
    }
}

fn env_bool<F>(env: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = env(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "" | "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(SockerErr::Config(format!(
            "{key} must be a boolean, got {raw:?}"
        ))),
    }
}

fn env_u16<F>(env: &F, key: &str) -> Result<Option<u16>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = env(key).filter(|raw| !raw.trim().is_empty()) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u16>()
        .map(Some)
        .map_err(|_| SockerErr::Config(format!("{key} must be a number, got {raw:?}")))
}
