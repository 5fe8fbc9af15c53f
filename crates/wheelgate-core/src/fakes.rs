//! In-memory fake package index (testing only)
//!
//! `MemoryIndex` satisfies the [`PackageIndex`] contract without any network
//! access, records every call, and can be told to fail specific operations.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::artifact::{normalize_name, DistributionName, PackageArtifact};
use crate::error::IndexError;
use crate::index::{IndexResult, PackageIndex, RemoteFile};
use crate::version::PackageVersion;

/// One call made against a [`MemoryIndex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexCall {
    ListVersions(String),
    Probe(String, String),
    ListFiles(String),
    Upload(String),
    Delete(String),
}

#[derive(Debug, Default)]
struct State {
    files: Vec<RemoteFile>,
    calls: Vec<IndexCall>,
    next_id: u64,
}

/// In-memory index keyed by file name.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    state: Mutex<State>,
    listing_supported: bool,
    fail_uploads: HashSet<String>,
    fail_deletes: HashSet<String>,
    fail_list_files: bool,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            listing_supported: true,
            ..Self::default()
        }
    }

    /// An index that only answers probes, never listings.
    pub fn without_listing() -> Self {
        Self::default()
    }

    /// Seed a stored file, e.g. `pkg-1.2.0-py3-none-any.whl`.
    pub fn with_file(self, file_name: &str) -> Self {
        self.insert(file_name);
        self
    }

    pub fn failing_upload(mut self, file_name: &str) -> Self {
        self.fail_uploads.insert(file_name.to_string());
        self
    }

    pub fn failing_delete(mut self, file_name: &str) -> Self {
        self.fail_deletes.insert(file_name.to_string());
        self
    }

    /// Refuse file listings with HTTP 403, as a registry does for a token
    /// that may upload but not read.
    pub fn failing_list_files(mut self) -> Self {
        self.fail_list_files = true;
        self
    }

    pub fn file_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state.files.iter().map(|f| f.file_name.clone()).collect();
        names.sort();
        names
    }

    pub fn calls(&self) -> Vec<IndexCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of calls that touched the index at all.
    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    fn insert(&self, file_name: &str) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id.to_string();
        state.files.push(RemoteFile {
            package_id: id.clone(),
            file_id: id,
            file_name: file_name.to_string(),
        });
    }

    fn record(&self, call: IndexCall) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn versions_of(&self, name: &str) -> Vec<PackageVersion> {
        let wanted = normalize_name(name);
        let state = self.state.lock().unwrap();
        state
            .files
            .iter()
            .filter_map(|f| DistributionName::parse(&f.file_name))
            .filter(|d| d.normalized_name() == wanted)
            .filter_map(|d| PackageVersion::parse(&d.version).ok())
            .collect()
    }
}

#[async_trait]
impl PackageIndex for MemoryIndex {
    async fn published_versions(&self, name: &str) -> IndexResult<Option<Vec<PackageVersion>>> {
        self.record(IndexCall::ListVersions(name.to_string()));
        if !self.listing_supported {
            return Ok(None);
        }
        Ok(Some(self.versions_of(name)))
    }

    async fn probe_at_least(&self, name: &str, version: &PackageVersion) -> IndexResult<bool> {
        self.record(IndexCall::Probe(name.to_string(), version.to_string()));
        Ok(self.versions_of(name).iter().any(|v| v >= version))
    }

    async fn list_files(&self, name: &str) -> IndexResult<Vec<RemoteFile>> {
        self.record(IndexCall::ListFiles(name.to_string()));
        if self.fail_list_files {
            return Err(IndexError::Unauthorized { status: 403 });
        }
        let wanted = normalize_name(name);
        let state = self.state.lock().unwrap();
        Ok(state
            .files
            .iter()
            .filter(|f| {
                f.distribution()
                    .map(|d| d.normalized_name() == wanted)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn upload(&self, artifact: &PackageArtifact) -> IndexResult<()> {
        let file_name = artifact.file_name();
        self.record(IndexCall::Upload(file_name.clone()));
        if self.fail_uploads.contains(&file_name) {
            return Err(IndexError::Unauthorized { status: 403 });
        }
        self.insert(&file_name);
        Ok(())
    }

    async fn delete_file(&self, file: &RemoteFile) -> IndexResult<()> {
        self.record(IndexCall::Delete(file.file_name.clone()));
        if self.fail_deletes.contains(&file.file_name) {
            return Err(IndexError::Status {
                status: 500,
                body: "delete failed".to_string(),
            });
        }
        let mut state = self.state.lock().unwrap();
        state.files.retain(|f| f.file_id != file.file_id);
        Ok(())
    }
}
