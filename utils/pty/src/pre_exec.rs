//! Child-side setup helpers shared by the pty relay and the pipe-based
//! command runner.
//!
//! Everything here is meant to run inside `pre_exec`, between `fork` and
//! `exec`, so it only touches raw syscalls and borrowed data:
//! - `assume_credential` switches the child to another account. Supplementary
//!   groups go first, then the gid, then the uid, because once the uid is
//!   dropped the child can no longer change its groups.
//! - `attach_controlling_terminal` makes the child a session leader whose
//!   controlling terminal is its stdin (the pty slave).
//! - `set_parent_death_signal` (Linux only) arranges for the child to receive
//!   `SIGTERM` when the launcher exits, and re-checks the parent PID to avoid
//!   races during fork/exec.

use std::io;

/// Numeric identity a child process switches to before exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildCredential {
    pub uid: libc::uid_t,
    pub gid: libc::gid_t,
    pub groups: Vec<libc::gid_t>,
}

/// Switch the calling (child) process to `credential`.
///
/// Requires the process to be privileged; an unprivileged caller gets
/// `EPERM` from `setgroups`.
pub fn assume_credential(credential: &ChildCredential) -> io::Result<()> {
    let groups = credential.groups.as_slice();
    if unsafe { libc::setgroups(groups.len() as _, groups.as_ptr()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::setgid(credential.gid) } == -1 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::setuid(credential.uid) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Start a new session and adopt stdin as the controlling terminal.
pub fn attach_controlling_terminal() -> io::Result<()> {
    if unsafe { libc::setsid() } == -1 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::ioctl(libc::STDIN_FILENO, libc::TIOCSCTTY as _, 0) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(target_os = "linux")]
/// Ensure the child receives SIGTERM when the original parent dies.
///
/// `parent_pid` must be captured before spawn to avoid a race where the
/// parent exits between fork and exec.
pub fn set_parent_death_signal(parent_pid: libc::pid_t) -> io::Result<()> {
    if unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) } == -1 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { libc::getppid() } != parent_pid {
        unsafe {
            libc::raise(libc::SIGTERM);
        }
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
/// No-op on non-Linux platforms.
pub fn set_parent_death_signal(_parent_pid: libc::pid_t) -> io::Result<()> {
    Ok(())
}
