//! Package version model.
//!
//! Versions follow `MAJOR.MINOR.PATCH[.devN[suffix]]`. The `.devN` segment is
//! the only thing separating a development snapshot from a release.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::GateError;

fn dev_marker() -> &'static Regex {
    static DEV_MARKER: OnceLock<Regex> = OnceLock::new();
    DEV_MARKER.get_or_init(|| Regex::new(r"\.dev\d").expect("static regex"))
}

fn version_pattern() -> &'static Regex {
    static VERSION: OnceLock<Regex> = OnceLock::new();
    VERSION.get_or_init(|| {
        Regex::new(r"^(\d+(?:\.\d+)*)(?:\.dev(\d+)(.*))?$").expect("static regex")
    })
}

/// Whether a version is a finalized release or a development snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionClassification {
    Release,
    Development,
}

impl VersionClassification {
    pub fn is_development(self) -> bool {
        self == VersionClassification::Development
    }
}

impl fmt::Display for VersionClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionClassification::Release => write!(f, "release"),
            VersionClassification::Development => write!(f, "development"),
        }
    }
}

/// Classify a version string by the presence of a `.dev<digits>` marker.
///
/// Anything after the digits (e.g. a `+g1a2b3c` local label) is ignored.
pub fn classify_version(version: &str) -> VersionClassification {
    if dev_marker().is_match(version) {
        VersionClassification::Development
    } else {
        VersionClassification::Release
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DevMarker {
    number: u64,
    qualifier: String,
}

/// A parsed, totally ordered package version.
///
/// Ordering compares the numeric release segment (missing trailing
/// components count as zero), then places a development build before the
/// release it leads up to, then compares the dev number and qualifier text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageVersion {
    raw: String,
    release: Vec<u64>,
    dev: Option<DevMarker>,
}

impl PackageVersion {
    pub fn parse(input: &str) -> Result<Self, GateError> {
        let trimmed = input.trim();
        let invalid = || GateError::InvalidVersion {
            version: input.to_string(),
        };

        let caps = version_pattern().captures(trimmed).ok_or_else(invalid)?;

        let release = caps[1]
            .split('.')
            .map(|part| part.parse::<u64>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        let dev = match caps.get(2) {
            Some(number) => Some(DevMarker {
                number: number.as_str().parse().map_err(|_| invalid())?,
                qualifier: caps.get(3).map(|m| m.as_str()).unwrap_or("").to_string(),
            }),
            None => None,
        };

        Ok(Self {
            raw: trimmed.to_string(),
            release,
            dev,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn classification(&self) -> VersionClassification {
        if self.dev.is_some() {
            VersionClassification::Development
        } else {
            VersionClassification::Release
        }
    }

    pub fn is_development(&self) -> bool {
        self.dev.is_some()
    }

    /// Numeric release segment, e.g. `[1, 2, 0]` for `1.2.0.dev3`.
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    fn cmp_release(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        for i in 0..len {
            let a = self.release.get(i).copied().unwrap_or(0);
            let b = other.release.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_release(other).then_with(|| match (&self.dev, &other.dev) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => a
                .number
                .cmp(&b.number)
                .then_with(|| a.qualifier.cmp(&b.qualifier)),
        })
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

impl FromStr for PackageVersion {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PackageVersion {
    type Error = GateError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<PackageVersion> for String {
    fn from(v: PackageVersion) -> Self {
        v.raw
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}
