mod error;
pub mod pre_exec;
pub mod pty;
pub mod raw_mode;
mod relay;

/// Failure modes of an interactive relay.
pub use error::RelayError;
/// Credential a pty child assumes before exec.
pub use pre_exec::ChildCredential;
/// Program, arguments and credential for a pty child.
pub use pty::PtyCommand;
/// Rows/columns of a freshly allocated pty.
pub use pty::TerminalSize;
/// Spawn a process attached to the slave side of a new PTY.
pub use pty::spawn_process as spawn_pty_process;
/// Crossterm-backed implementation of [`raw_mode::TerminalMode`].
pub use raw_mode::CrosstermTerminal;
/// Scoped raw mode; restores the caller's terminal on drop.
pub use raw_mode::RawModeGuard;
pub use raw_mode::TerminalMode;
/// Run a PTY child while copying bytes to and from the caller's stdio.
pub use relay::relay_interactive;
