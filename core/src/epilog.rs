use std::path::Path;
use std::path::PathBuf;

use crate::identity::ContainerIdentity;

/// Write `<dir>/<job_id>` holding exactly the container identity, for the
/// scheduler epilog to clean up at job end. An existing record is replaced.
pub fn record(dir: &Path, job_id: &str, identity: &ContainerIdentity) -> std::io::Result<PathBuf> {
    let path = dir.join(job_id);
    std::fs::write(&path, identity.as_str().as_bytes())?;
    tracing::info!("recorded container {identity} for job {job_id} in {}", path.display());
    Ok(path)
}
