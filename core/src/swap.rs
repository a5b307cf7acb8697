//! Per-user swap directory and home-directory modes.
//!
//! The container runs as the caller, but the engine client runs as the
//! engine account, so the caller's home is opened up to traverse-only while
//! the swap directory is bind mounted. Once the container has started the
//! home is made private again.

use std::fs::OpenOptions;
use std::fs::Permissions;
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;

use crate::error::Result;

pub const SWAP_DIR_NAME: &str = "swap";
pub const SWAP_DIR_MODE: u32 = 0o777;
pub const HOME_TRAVERSE_MODE: u32 = 0o711;
pub const HOME_PRIVATE_MODE: u32 = 0o700;

pub fn swap_dir(home: &Path) -> PathBuf {
    home.join(SWAP_DIR_NAME)
}

/// Create `<home>/swap` if needed, hand it to `uid:gid` with mode 0777, and
/// set the home directory to 0711. Returns the swap directory.
///
/// Ownership and mode are applied through a descriptor opened with
/// `O_NOFOLLOW`, so a symlink planted at the swap path is refused.
pub fn prepare_swap(home: &Path, uid: u32, gid: u32) -> Result<PathBuf> {
    let swap = swap_dir(home);
    match std::fs::create_dir(&swap) {
        Ok(()) => tracing::debug!("created {}", swap.display()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
        Err(err) => return Err(err.into()),
    }

    let dir = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW | libc::O_DIRECTORY)
        .open(&swap)?;
    std::os::unix::fs::fchown(&dir, Some(uid), Some(gid))?;
    dir.set_permissions(Permissions::from_mode(SWAP_DIR_MODE))?;

    std::fs::set_permissions(home, Permissions::from_mode(HOME_TRAVERSE_MODE))?;
    tracing::debug!(
        "swap directory {} ready; home set to {HOME_TRAVERSE_MODE:o}",
        swap.display()
    );
    Ok(swap)
}

/// Make the home directory private again.
pub fn seal_home(home: &Path) -> Result<()> {
    std::fs::set_permissions(home, Permissions::from_mode(HOME_PRIVATE_MODE))?;
    tracing::debug!("home {} set to {HOME_PRIVATE_MODE:o}", home.display());
    Ok(())
}
