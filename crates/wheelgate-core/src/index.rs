//! Package index abstraction.
//!
//! The gate talks to a remote index only through [`PackageIndex`]. Backends:
//! - `wheelgate_index::GitlabRegistry` (GitLab package registry over HTTP)
//! - [`MemoryIndex`](crate::fakes::MemoryIndex) (tests)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::artifact::{DistributionName, PackageArtifact};
use crate::error::IndexError;
use crate::version::PackageVersion;

/// Result type for index operations
pub type IndexResult<T> = std::result::Result<T, IndexError>;

/// A file stored in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Index-side id of the package version owning the file
    pub package_id: String,
    /// Index-side id of the file itself
    pub file_id: String,
    pub file_name: String,
}

impl RemoteFile {
    pub fn distribution(&self) -> Option<DistributionName> {
        DistributionName::parse(&self.file_name)
    }
}

/// Operations the release gate needs from a package index.
///
/// Guarantees expected from implementations:
/// - Read operations have no side effects.
/// - Every call is bounded by the backend's own timeout; expiry surfaces as
///   `IndexError::Transport`.
/// - No call retries on its own.
#[async_trait]
pub trait PackageIndex: Send + Sync {
    /// All published versions of `name`.
    ///
    /// `Ok(None)` means the index cannot list versions for these credentials;
    /// callers should fall back to [`probe_at_least`](Self::probe_at_least).
    async fn published_versions(&self, name: &str) -> IndexResult<Option<Vec<PackageVersion>>>;

    /// Whether some version of `name` that is `>= version` can be resolved,
    /// determined by attempting to fetch it.
    async fn probe_at_least(&self, name: &str, version: &PackageVersion) -> IndexResult<bool> {
        let _ = (name, version);
        Err(IndexError::Unsupported("version probing"))
    }

    /// All files stored for `name`, across versions.
    async fn list_files(&self, name: &str) -> IndexResult<Vec<RemoteFile>>;

    /// Upload one artifact.
    async fn upload(&self, artifact: &PackageArtifact) -> IndexResult<()>;

    /// Delete one stored file.
    async fn delete_file(&self, file: &RemoteFile) -> IndexResult<()>;
}
