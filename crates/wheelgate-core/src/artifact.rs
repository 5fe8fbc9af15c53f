//! Built distributables and their file-name conventions.
//!
//! Wheels are named `{name}-{version}(-{build})?-{python}-{abi}-{platform}.whl`
//! and source distributions `{name}-{version}.tar.gz` (or `.zip`). Whatever
//! follows the version is the *format suffix*; two files of the same package
//! with the same suffix are counterparts of each other across versions.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};
use crate::version::PackageVersion;

const SDIST_EXTENSIONS: [&str; 2] = [".tar.gz", ".zip"];

/// Normalize a project name the way package indexes compare them
/// (lowercase, runs of `-`, `_`, `.` collapsed to a single `-`).
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_sep = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_sep {
                out.push('-');
            }
            in_sep = true;
        } else {
            out.extend(c.to_lowercase());
            in_sep = false;
        }
    }
    out
}

/// Name, version, and format suffix decoded from a distribution file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionName {
    pub name: String,
    pub version: String,
    pub suffix: String,
}

impl DistributionName {
    /// Decode a wheel or sdist file name. Returns `None` for anything else.
    pub fn parse(file_name: &str) -> Option<Self> {
        if let Some(stem) = file_name.strip_suffix(".whl") {
            let parts: Vec<&str> = stem.split('-').collect();
            if parts.len() != 5 && parts.len() != 6 {
                return None;
            }
            if parts.iter().any(|p| p.is_empty()) {
                return None;
            }
            return Some(Self {
                name: parts[0].to_string(),
                version: parts[1].to_string(),
                suffix: format!("-{}.whl", parts[2..].join("-")),
            });
        }

        for ext in SDIST_EXTENSIONS {
            if let Some(stem) = file_name.strip_suffix(ext) {
                let (name, version) = stem.rsplit_once('-')?;
                if name.is_empty() || version.is_empty() {
                    return None;
                }
                return Some(Self {
                    name: name.to_string(),
                    version: version.to_string(),
                    suffix: ext.to_string(),
                });
            }
        }

        None
    }

    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

/// A built distributable ready for upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageArtifact {
    pub name: String,
    pub version: PackageVersion,
    pub path: PathBuf,
}

impl PackageArtifact {
    pub fn new(name: impl Into<String>, version: PackageVersion, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            version,
            path: path.into(),
        }
    }

    /// Build an artifact from its file name alone.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let dist = distribution_name(&path)?;
        let version = PackageVersion::parse(&dist.version)?;
        Ok(Self {
            name: dist.name,
            version,
            path,
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Part of the file name after the version, e.g. `-py3-none-any.whl`.
    pub fn format_suffix(&self) -> Option<String> {
        DistributionName::parse(&self.file_name()).map(|d| d.suffix)
    }
}

fn distribution_name(path: &Path) -> Result<DistributionName> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    DistributionName::parse(&file_name).ok_or_else(|| GateError::ArtifactMismatch {
        path: path.to_path_buf(),
        expected: "a wheel or sdist file name".to_string(),
        reason: "unrecognised distribution file name".to_string(),
    })
}

/// Check that every file in a publish set belongs to `name` at `version`.
pub fn verify_artifact_set(name: &str, version: &PackageVersion, paths: &[PathBuf]) -> Result<()> {
    let expected = format!("{name}=={version}");
    let wanted_name = normalize_name(name);

    for path in paths {
        let dist = distribution_name(path)?;
        if dist.normalized_name() != wanted_name {
            return Err(GateError::ArtifactMismatch {
                path: path.clone(),
                expected,
                reason: format!("file is for package '{}'", dist.name),
            });
        }
        let file_version =
            PackageVersion::parse(&dist.version).map_err(|_| GateError::ArtifactMismatch {
                path: path.clone(),
                expected: expected.clone(),
                reason: format!("file version '{}' is not a valid version", dist.version),
            })?;
        if &file_version != version {
            return Err(GateError::ArtifactMismatch {
                path: path.clone(),
                expected,
                reason: format!("file carries version {}", dist.version),
            });
        }
    }
    Ok(())
}
