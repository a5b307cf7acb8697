use std::io;

/// Terminal mode switching for the caller's controlling terminal.
pub trait TerminalMode: Send + Sync {
    fn enable_raw(&self) -> io::Result<()>;
    fn restore(&self) -> io::Result<()>;
}

/// The real terminal, driven through crossterm. crossterm remembers the
/// termios it replaced, so `restore` returns to exactly the prior mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrosstermTerminal;

impl TerminalMode for CrosstermTerminal {
    fn enable_raw(&self) -> io::Result<()> {
        crossterm::terminal::enable_raw_mode()
    }

    fn restore(&self) -> io::Result<()> {
        crossterm::terminal::disable_raw_mode()
    }
}

/// Raw mode for as long as the guard lives.
pub struct RawModeGuard<'a> {
    terminal: &'a dyn TerminalMode,
}

impl<'a> RawModeGuard<'a> {
    pub fn enter(terminal: &'a dyn TerminalMode) -> io::Result<Self> {
        terminal.enable_raw()?;
        Ok(Self { terminal })
    }
}

impl Drop for RawModeGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.terminal.restore() {
            tracing::warn!("failed to restore terminal mode: {err}");
        }
    }
}
