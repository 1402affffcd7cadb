//! Landmark and manifest files.

use anyhow::{Context, Result};
use facewarp_core::PointSet;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Deserialize)]
#[serde(untagged)]
enum LandmarkFile {
    Bare(PointSet),
    Wrapped { landmarks: PointSet },
}

/// Parse `[[x, y], ...]` or `{ "landmarks": [[x, y], ...] }`.
pub fn parse_landmarks(text: &str) -> Result<PointSet> {
    let file: LandmarkFile = serde_json::from_str(text).context("parsing landmark JSON")?;
    Ok(match file {
        LandmarkFile::Bare(points) | LandmarkFile::Wrapped { landmarks: points } => points,
    })
}

pub fn read_landmarks(path: &Path) -> Result<PointSet> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading landmarks {}", path.display()))?;
    parse_landmarks(&text).with_context(|| format!("in {}", path.display()))
}

/// One image to align in a batch.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    pub image: PathBuf,
    pub landmarks: PointSet,
}

/// Parse a manifest, resolving relative image paths against `base`.
pub fn parse_manifest(text: &str, base: &Path) -> Result<Vec<ManifestEntry>> {
    let mut entries: Vec<ManifestEntry> =
        serde_json::from_str(text).context("parsing manifest JSON")?;
    for entry in &mut entries {
        if entry.image.is_relative() {
            entry.image = base.join(&entry.image);
        }
    }
    Ok(entries)
}

pub fn read_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading manifest {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    parse_manifest(&text, base).with_context(|| format!("in {}", path.display()))
}
