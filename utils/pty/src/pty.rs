use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Write;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Child;
use std::process::Command;
use std::process::Stdio;

use portable_pty::MasterPty;
use portable_pty::PtySize;
use portable_pty::native_pty_system;

use crate::error::RelayError;
use crate::pre_exec;
use crate::pre_exec::ChildCredential;

const DEFAULT_ROWS: u16 = 24;
const DEFAULT_COLS: u16 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub rows: u16,
    pub cols: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
        }
    }
}

impl TerminalSize {
    /// Size of the caller's terminal, if stdout is one.
    pub fn of_caller() -> Option<Self> {
        crossterm::terminal::size()
            .ok()
            .filter(|(cols, rows)| *cols > 0 && *rows > 0)
            .map(|(cols, rows)| Self { rows, cols })
    }
}

/// What to run on the slave side of the pty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyCommand {
    pub program: String,
    pub args: Vec<String>,
    /// `None` keeps the launcher's own credential.
    pub credential: Option<ChildCredential>,
    /// Complete environment of the child; nothing is inherited.
    pub env: Vec<(String, String)>,
}

/// A running child plus the master-side handles used to talk to it.
///
/// The master must stay alive until the child exits: dropping it hangs up
/// the terminal.
pub struct PtyProcess {
    pub child: Child,
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    pub master: Box<dyn MasterPty + Send>,
}

/// Allocate a pty of `size` and start `command` with the slave as its stdio
/// and controlling terminal.
pub fn spawn_process(command: &PtyCommand, size: TerminalSize) -> Result<PtyProcess, RelayError> {
    if command.program.is_empty() {
        return Err(RelayError::Spawn {
            program: String::new(),
            source: std::io::Error::other("missing program for PTY spawn"),
        });
    }

    let pair = native_pty_system()
        .openpty(PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|err| RelayError::OpenPty(format!("{err:#}")))?;
    let slave_path = pair
        .master
        .tty_name()
        .ok_or_else(|| RelayError::OpenPty("pty master has no slave device name".to_string()))?;
    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|err| RelayError::OpenPty(format!("{err:#}")))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|err| RelayError::OpenPty(format!("{err:#}")))?;

    let spawn_err = |source| RelayError::Spawn {
        program: command.program.clone(),
        source,
    };
    let stdin = open_slave(&slave_path).map_err(spawn_err)?;
    let stdout = open_slave(&slave_path).map_err(spawn_err)?;
    let stderr = open_slave(&slave_path).map_err(spawn_err)?;

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .env_clear()
        .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::from(stdin))
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));

    let credential = command.credential.clone();
    let parent_pid = unsafe { libc::getpid() };
    unsafe {
        cmd.pre_exec(move || {
            pre_exec::attach_controlling_terminal()?;
            pre_exec::set_parent_death_signal(parent_pid)?;
            if let Some(credential) = credential.as_ref() {
                pre_exec::assume_credential(credential)?;
            }
            Ok(())
        });
    }

    let child = cmd.spawn().map_err(spawn_err)?;
    // Close the parent's copies of the slave so reads on the master see EOF
    // once the child and its descendants are gone.
    drop(cmd);
    drop(pair.slave);

    Ok(PtyProcess {
        child,
        reader,
        writer,
        master: pair.master,
    })
}

fn open_slave(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}
