//! Package name/version discovery from a Python version module.
//!
//! Projects keep their metadata in a small module such as `src/version.py`:
//!
//! ```text
//! __packagename__ = "csvnpm-utils"
//! __version__ = "0.2.1.dev4"
//! ```

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GateError, Result};
use crate::version::PackageVersion;

fn assignment() -> &'static Regex {
    static ASSIGNMENT: OnceLock<Regex> = OnceLock::new();
    ASSIGNMENT.get_or_init(|| {
        Regex::new(r#"(?m)^\s*(__packagename__|__version__)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("static regex")
    })
}

/// Name and version declared by a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub name: String,
    pub version: PackageVersion,
}

/// Errors reading a version module.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} does not define {field}")]
    MissingField { path: String, field: &'static str },

    #[error(transparent)]
    Version(#[from] GateError),
}

impl PackageMetadata {
    /// Parse the text of a version module. `origin` is used in error messages.
    pub fn parse(source: &str, origin: &str) -> std::result::Result<Self, MetadataError> {
        let mut name = None;
        let mut version = None;

        for caps in assignment().captures_iter(source) {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            match &caps[1] {
                "__packagename__" => name = Some(value),
                _ => version = Some(value),
            }
        }

        let name = name.ok_or_else(|| MetadataError::MissingField {
            path: origin.to_string(),
            field: "__packagename__",
        })?;
        let version = version.ok_or_else(|| MetadataError::MissingField {
            path: origin.to_string(),
            field: "__version__",
        })?;

        Ok(Self {
            name,
            version: PackageVersion::parse(&version)?,
        })
    }

    /// Read a version module from disk.
    pub fn from_file(path: &Path) -> std::result::Result<Self, MetadataError> {
        let origin = path.display().to_string();
        let source = std::fs::read_to_string(path).map_err(|source| MetadataError::Read {
            path: origin.clone(),
            source,
        })?;
        let meta = Self::parse(&source, &origin)?;
        debug!("Read {}=={} from {}", meta.name, meta.version, origin);
        Ok(meta)
    }
}

/// Parse a version string supplied directly (e.g. from a CLI flag).
pub fn parse_declared(name: &str, version: &str) -> Result<PackageMetadata> {
    Ok(PackageMetadata {
        name: name.to_string(),
        version: PackageVersion::parse(version)?,
    })
}
