//! Error taxonomy for the release gate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a [`PackageIndex`](crate::index::PackageIndex) backend.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Network-level failure, including timeouts
    #[error("transport error: {0}")]
    Transport(String),

    /// The index refused the supplied credentials
    #[error("authentication rejected by index (HTTP {status})")]
    Unauthorized { status: u16 },

    /// Any other non-success response
    #[error("index returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The index does not implement the requested capability
    #[error("index does not support {0}")]
    Unsupported(&'static str),

    /// The probe command could not be run or exited abnormally
    #[error("probe failed: {0}")]
    Probe(String),

    /// Response body could not be decoded
    #[error("malformed index response: {0}")]
    Decode(String),

    /// IO error while reading an artifact
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::Decode(err.to_string())
    }
}

/// Reasons a gate evaluation stops or reports trouble.
#[derive(Error, Debug)]
pub enum GateError {
    /// A development build is being published under a release ref
    #[error("refusing to publish development version {version} from release ref '{ref_name}'")]
    DevVersionOnReleaseRef { ref_name: String, version: String },

    /// A finalized version is being published from the development branch
    #[error(
        "refusing to publish release version {version} from development branch '{branch}'; \
         only .devN versions may be published there"
    )]
    ReleaseVersionOnDevBranch { branch: String, version: String },

    /// The index already holds an equal or newer version
    #[error("version regression for {name}: candidate {candidate} is not newer than published {existing}")]
    VersionRegression {
        name: String,
        candidate: String,
        existing: String,
    },

    /// Upload of one artifact failed
    #[error("upload of {} failed: {source}", .path.display())]
    UploadFailed {
        path: PathBuf,
        #[source]
        source: IndexError,
    },

    /// Deleting a superseded remote artifact failed
    #[error("failed to prune superseded artifact {remote} (counterpart of {}): {source}", .path.display())]
    PruneFailed {
        path: PathBuf,
        remote: String,
        #[source]
        source: IndexError,
    },

    /// Version string does not match `MAJOR.MINOR.PATCH[.devN[suffix]]`
    #[error("invalid version string: '{version}'")]
    InvalidVersion { version: String },

    /// An artifact file disagrees with the declared package name or version
    #[error("artifact {} does not match {expected}: {reason}", .path.display())]
    ArtifactMismatch {
        path: PathBuf,
        expected: String,
        reason: String,
    },

    /// Nothing to publish
    #[error("no artifacts given for {name}")]
    NoArtifacts { name: String },

    /// A read-only index query failed
    #[error("index query failed: {0}")]
    IndexQuery(#[source] IndexError),
}

impl GateError {
    /// True for precondition violations detected before any side effect.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            GateError::DevVersionOnReleaseRef { .. }
                | GateError::ReleaseVersionOnDevBranch { .. }
                | GateError::VersionRegression { .. }
                | GateError::InvalidVersion { .. }
                | GateError::ArtifactMismatch { .. }
                | GateError::NoArtifacts { .. }
        )
    }

    /// Short machine-readable tag for reports.
    pub fn kind(&self) -> &'static str {
        match self {
            GateError::DevVersionOnReleaseRef { .. } => "dev_version_on_release_ref",
            GateError::ReleaseVersionOnDevBranch { .. } => "release_version_on_dev_branch",
            GateError::VersionRegression { .. } => "version_regression",
            GateError::UploadFailed { .. } => "upload_failed",
            GateError::PruneFailed { .. } => "prune_failed",
            GateError::InvalidVersion { .. } => "invalid_version",
            GateError::ArtifactMismatch { .. } => "artifact_mismatch",
            GateError::NoArtifacts { .. } => "no_artifacts",
            GateError::IndexQuery(_) => "index_query",
        }
    }
}

/// Result type for gate operations.
pub type Result<T> = std::result::Result<T, GateError>;
