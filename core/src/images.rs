//! The image hub: a YAML listing of images users may run.
//!
//! ```yaml
//! images:
//!   - name: ubuntu:22.04
//!     description: Ubuntu base image
//!   - name: nvidia/cuda:12.2.0-base-ubuntu22.04
//! ```

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::Result;
use crate::error::SockerErr;
use crate::mounts::AccessProbe;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ImageHub {
    #[serde(default)]
    pub images: Vec<ImageEntry>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ImageEntry {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl ImageHub {
    pub fn parse(contents: &str, origin: &Path) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|err| SockerErr::Config(format!("{}: {err}", origin.display())))
    }
}

/// Load a hub file, or every `*.yaml`/`*.yml` file of a directory in name
/// order.
///
/// The launcher may run with more privileges than its caller, so every path
/// is checked against `probe` before it is opened.
pub fn load_image_hub(path: &Path, probe: &dyn AccessProbe) -> Result<ImageHub> {
    ensure_readable(path, probe)?;
    if !path.is_dir() {
        let contents = std::fs::read_to_string(path)?;
        return ImageHub::parse(&contents, path);
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|file| {
            file.is_file()
                && file
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == "yaml" || ext == "yml")
        })
        .collect();
    files.sort();

    let mut hub = ImageHub::default();
    for file in files {
        ensure_readable(&file, probe)?;
        let contents = std::fs::read_to_string(&file)?;
        hub.images.extend(ImageHub::parse(&contents, &file)?.images);
    }
    Ok(hub)
}

fn ensure_readable(path: &Path, probe: &dyn AccessProbe) -> Result<()> {
    if probe.is_readable(path) {
        return Ok(());
    }
    tracing::warn!("refusing to read {}: not readable by the caller", path.display());
    Err(SockerErr::Permission {
        path: path.to_path_buf(),
    })
}

/// One row per image, names padded to a common width.
pub fn render_table(hub: &ImageHub) -> String {
    let width = hub
        .images
        .iter()
        .map(|image| image.name.len())
        .chain(std::iter::once("IMAGE".len()))
        .max()
        .unwrap_or_default();
    let mut out = format!("{:<width$}  DESCRIPTION\n", "IMAGE");
    for image in &hub.images {
        let line = format!(
            "{:<width$}  {}",
            image.name,
            image.description.as_deref().unwrap_or("")
        );
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}
