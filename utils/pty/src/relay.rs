use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::RelayError;
use crate::pty::PtyCommand;
use crate::pty::PtyProcess;
use crate::pty::TerminalSize;
use crate::pty::spawn_process;
use crate::raw_mode::RawModeGuard;
use crate::raw_mode::TerminalMode;

/// How long to keep draining pty output after the child has exited.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Run `command` on a fresh pty, relaying the caller's stdin/stdout, and
/// return the child's exit code.
///
/// The caller's terminal is in raw mode for the whole call and restored on
/// every return path. Completion is gated on the child exiting, not on the
/// copy loops: the stdin loop runs on a detached thread and may stay blocked
/// in `read` until the process exits.
pub async fn relay_interactive(
    command: PtyCommand,
    size: TerminalSize,
    terminal: &dyn TerminalMode,
) -> Result<i32, RelayError> {
    let _raw_mode = RawModeGuard::enter(terminal).map_err(RelayError::RawMode)?;

    let PtyProcess {
        mut child,
        reader,
        writer,
        master: _master,
    } = spawn_process(&command, size)?;

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        if let Err(err) = pump(stdin.lock(), writer) {
            tracing::debug!("stdin relay stopped: {err}");
        }
    });

    let (output_done_tx, output_done_rx) = oneshot::channel::<()>();
    std::thread::spawn(move || {
        let stdout = std::io::stdout();
        if let Err(err) = pump(reader, stdout.lock()) {
            tracing::debug!("pty output relay stopped: {err}");
        }
        let _ = output_done_tx.send(());
    });

    let status = tokio::task::spawn_blocking(move || child.wait())
        .await
        .map_err(|err| RelayError::Wait {
            program: command.program.clone(),
            message: err.to_string(),
        })?
        .map_err(|err| RelayError::Wait {
            program: command.program.clone(),
            message: err.to_string(),
        })?;

    let _ = tokio::time::timeout(OUTPUT_DRAIN_GRACE, output_done_rx).await;
    Ok(exit_code(status))
}

/// Copy until EOF, flushing after every chunk so raw-mode output is not held
/// back by line buffering.
pub(crate) fn pump<R: Read, W: Write>(mut from: R, mut to: W) -> std::io::Result<u64> {
    let mut buf = [0u8; 8_192];
    let mut copied = 0u64;
    loop {
        match from.read(&mut buf) {
            Ok(0) => return Ok(copied),
            Ok(n) => {
                to.write_all(&buf[..n])?;
                to.flush()?;
                copied += n as u64;
            }
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            // The master reports EIO once the slave side is fully closed.
            Err(ref e) if e.raw_os_error() == Some(libc::EIO) => return Ok(copied),
            Err(e) => return Err(e),
        }
    }
}

pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => 128 + status.signal().unwrap_or(0),
    }
}
