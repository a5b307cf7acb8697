use std::path::Path;

use nix::unistd::AccessFlags;

use crate::error::Result;
use crate::error::SockerErr;

/// Answers what the invoking user, not the launcher, may do with a path.
pub trait AccessProbe: Send + Sync {
    fn is_writable(&self, path: &Path) -> bool;
    fn is_readable(&self, path: &Path) -> bool;
}

/// `access(2)`, which checks against the real uid and gid, so a privileged
/// launcher still answers for the user who invoked it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealUidProbe;

impl AccessProbe for RealUidProbe {
    fn is_writable(&self, path: &Path) -> bool {
        nix::unistd::access(path, AccessFlags::W_OK).is_ok()
    }

    fn is_readable(&self, path: &Path) -> bool {
        nix::unistd::access(path, AccessFlags::R_OK).is_ok()
    }
}

/// Host side of a `host[:container[:mode]]` bind spec.
pub fn host_path(spec: &str) -> &str {
    spec.split_once(':').map_or(spec, |(host, _)| host)
}

/// Reject the run unless every requested host path is an absolute path the
/// caller can write. Stops at the first offending path.
///
/// A host part that is not absolute names an engine volume, which has no
/// owner to check against, so it is refused as well.
pub fn authorize_mounts(volumes: &[String], probe: &dyn AccessProbe) -> Result<()> {
    for spec in volumes {
        let host = host_path(spec);
        let path = Path::new(host);
        if !path.is_absolute() {
            tracing::warn!("refusing volume {spec}: {host:?} is not an absolute host path");
            return Err(SockerErr::Permission {
                path: host.into(),
            });
        }
        if !probe.is_writable(path) {
            tracing::warn!("refusing bind mount {spec}: {host:?} is not writable by the caller");
            return Err(SockerErr::Permission {
                path: host.into(),
            });
        }
        tracing::debug!("authorized bind mount {spec}");
    }
    Ok(())
}
