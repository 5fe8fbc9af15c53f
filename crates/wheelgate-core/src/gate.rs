//! Release gate and publisher.
//!
//! Runs the fixed publish protocol for one package version:
//!
//! 1. classify the version (`release` / `development`)
//! 2. check the artifact set matches the declared name and version
//! 3. reject development builds on release refs
//! 4. reject release builds on the development branch
//! 5. on the development branch, reject anything not newer than the index
//! 6. upload every artifact (first failure is terminal)
//! 7. on the development branch, prune superseded development artifacts
//!
//! Steps 2-5 abort before any side effect. Prune failures never undo a
//! successful upload; they are reported as warnings.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifact::{normalize_name, verify_artifact_set, PackageArtifact};
use crate::context::{GateConfig, ReleaseContext};
use crate::error::{GateError, Result};
use crate::index::PackageIndex;
use crate::version::{PackageVersion, VersionClassification};

// ---------------------------------------------------------------------------
// Request / report
// ---------------------------------------------------------------------------

/// One package version and the files to publish for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub name: String,
    pub version: PackageVersion,
    pub artifacts: Vec<PathBuf>,
    pub context: ReleaseContext,
}

/// Terminal state of a gate run that did not get rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateOutcome {
    /// Every artifact uploaded, nothing left to report
    Published,
    /// Every artifact uploaded, but some superseded artifacts could not be deleted
    PublishedWithPruneWarnings,
    /// All checks passed; nothing uploaded (dry run or merge train)
    Verified,
}

/// A superseded artifact that could not be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneWarning {
    /// Local artifact whose counterpart was being pruned
    pub path: PathBuf,
    /// Remote file name that survived, if known
    pub remote: Option<String>,
    pub message: String,
}

impl PruneWarning {
    fn from_error(err: &GateError, fallback_path: PathBuf) -> Self {
        match err {
            GateError::PruneFailed { path, remote, .. } => PruneWarning {
                path: path.clone(),
                remote: Some(remote.clone()),
                message: err.to_string(),
            },
            other => PruneWarning {
                path: fallback_path,
                remote: None,
                message: other.to_string(),
            },
        }
    }
}

/// Summary of a completed gate run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReport {
    pub outcome: GateOutcome,
    pub package: String,
    pub version: String,
    pub classification: VersionClassification,
    pub effective_branch: String,
    pub uploaded: Vec<String>,
    pub pruned: Vec<String>,
    pub warnings: Vec<PruneWarning>,
    pub finished_at: DateTime<Utc>,
}

/// Result of a prune pass.
#[derive(Debug, Default)]
pub struct PruneSummary {
    /// Remote file names that were deleted
    pub deleted: Vec<String>,
    /// One `GateError::PruneFailed` per file that could not be deleted
    pub failures: Vec<GateError>,
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// Stateless release gate. Every run is a function of its request, its
/// configuration, and the index contents.
#[derive(Debug, Clone, Default)]
pub struct ReleaseGate {
    config: GateConfig,
}

impl ReleaseGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// A development version must never ship under a release ref.
    pub fn check_release_ref_invariant(&self, ref_name: &str, version: &PackageVersion) -> Result<()> {
        if self.config.is_release_ref(ref_name) && version.is_development() {
            return Err(GateError::DevVersionOnReleaseRef {
                ref_name: ref_name.to_string(),
                version: version.to_string(),
            });
        }
        Ok(())
    }

    /// The development branch only ever publishes `.devN` snapshots.
    pub fn check_development_branch_invariant(
        &self,
        branch_name: &str,
        version: &PackageVersion,
    ) -> Result<()> {
        if self.config.is_dev_branch(branch_name) && !version.is_development() {
            return Err(GateError::ReleaseVersionOnDevBranch {
                branch: branch_name.to_string(),
                version: version.to_string(),
            });
        }
        Ok(())
    }

    /// On the development branch, the candidate must be strictly newer than
    /// everything the index already holds for `name`.
    ///
    /// Uses the index's version listing when available and otherwise probes
    /// for a resolvable version `>=` the candidate.
    pub async fn check_no_regression(
        &self,
        index: &dyn PackageIndex,
        name: &str,
        version: &PackageVersion,
        branch_name: &str,
    ) -> Result<()> {
        if !self.config.is_dev_branch(branch_name) {
            return Ok(());
        }

        let listed = index
            .published_versions(name)
            .await
            .map_err(GateError::IndexQuery)?;

        match listed {
            Some(versions) => {
                debug!("Index lists {} version(s) of {}", versions.len(), name);
                if let Some(newest) = versions.into_iter().filter(|v| v >= version).max() {
                    return Err(GateError::VersionRegression {
                        name: name.to_string(),
                        candidate: version.to_string(),
                        existing: newest.to_string(),
                    });
                }
            }
            None => {
                debug!("Index cannot list versions of {}, probing instead", name);
                let resolvable = index
                    .probe_at_least(name, version)
                    .await
                    .map_err(GateError::IndexQuery)?;
                if resolvable {
                    return Err(GateError::VersionRegression {
                        name: name.to_string(),
                        candidate: version.to_string(),
                        existing: format!("a version >= {version}"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Upload one artifact.
    pub async fn publish(&self, index: &dyn PackageIndex, artifact: &PackageArtifact) -> Result<()> {
        info!("Uploading {}", artifact.file_name());
        index
            .upload(artifact)
            .await
            .map_err(|source| GateError::UploadFailed {
                path: artifact.path.clone(),
                source,
            })
    }

    /// Delete development artifacts superseded by `published`.
    ///
    /// For each local artifact, its remote counterparts are the files of the
    /// same package with the same format suffix whose version is a
    /// development version older than `published`. Deletion failures are
    /// collected, not retried, and never rolled back. Only listing the index
    /// can fail the whole pass.
    pub async fn prune_superseded_development_artifacts(
        &self,
        index: &dyn PackageIndex,
        name: &str,
        published: &PackageVersion,
        artifact_paths: &[PathBuf],
        branch_name: &str,
    ) -> Result<PruneSummary> {
        let mut summary = PruneSummary::default();
        if !self.config.is_dev_branch(branch_name) {
            return Ok(summary);
        }

        let remote = index.list_files(name).await.map_err(GateError::IndexQuery)?;
        let wanted = normalize_name(name);

        for path in artifact_paths {
            let local = PackageArtifact::new(name, published.clone(), path.clone());
            let Some(suffix) = local.format_suffix() else {
                continue;
            };

            for file in &remote {
                let Some(dist) = file.distribution() else {
                    continue;
                };
                if dist.normalized_name() != wanted || dist.suffix != suffix {
                    continue;
                }
                let Ok(remote_version) = PackageVersion::parse(&dist.version) else {
                    continue;
                };
                if !remote_version.is_development() || &remote_version >= published {
                    continue;
                }
                if summary.deleted.contains(&file.file_name) {
                    continue;
                }

                match index.delete_file(file).await {
                    Ok(()) => {
                        info!("Pruned superseded {}", file.file_name);
                        summary.deleted.push(file.file_name.clone());
                    }
                    Err(source) => {
                        let err = GateError::PruneFailed {
                            path: path.clone(),
                            remote: file.file_name.clone(),
                            source,
                        };
                        warn!("{}", err);
                        summary.failures.push(err);
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Run the full protocol for one request.
    ///
    /// `Err` means the run was rejected or the upload failed; `Ok` carries
    /// one of the non-failing terminal states.
    pub async fn run(&self, index: &dyn PackageIndex, request: &PublishRequest) -> Result<GateReport> {
        let ctx = &request.context;
        let branch = ctx.effective_branch().to_string();
        let version = &request.version;
        let classification = version.classification();

        info!(
            "Evaluating {}=={} ({}) on branch '{}' ref '{}'{}",
            request.name,
            version,
            classification,
            branch,
            ctx.commit_ref_name,
            if ctx.is_merge_train { " [merge train]" } else { "" }
        );

        if request.artifacts.is_empty() {
            return Err(GateError::NoArtifacts {
                name: request.name.clone(),
            });
        }
        verify_artifact_set(&request.name, version, &request.artifacts)?;
        self.check_release_ref_invariant(&ctx.commit_ref_name, version)?;
        self.check_development_branch_invariant(&branch, version)?;
        self.check_no_regression(index, &request.name, version, &branch)
            .await?;

        let mut report = GateReport {
            outcome: GateOutcome::Verified,
            package: request.name.clone(),
            version: version.to_string(),
            classification,
            effective_branch: branch.clone(),
            uploaded: Vec::new(),
            pruned: Vec::new(),
            warnings: Vec::new(),
            finished_at: Utc::now(),
        };

        if self.config.dry_run || ctx.is_merge_train {
            info!("All checks passed; not uploading (dry run or merge train)");
            return Ok(report);
        }

        for path in &request.artifacts {
            let artifact = PackageArtifact::new(&request.name, version.clone(), path.clone());
            self.publish(index, &artifact).await?;
            report.uploaded.push(artifact.file_name());
        }
        report.outcome = GateOutcome::Published;

        if self.config.is_dev_branch(&branch) && !self.config.skip_prune {
            let fallback = request.artifacts[0].clone();
            match self
                .prune_superseded_development_artifacts(
                    index,
                    &request.name,
                    version,
                    &request.artifacts,
                    &branch,
                )
                .await
            {
                Ok(summary) => {
                    report.pruned = summary.deleted;
                    report.warnings = summary
                        .failures
                        .iter()
                        .map(|e| PruneWarning::from_error(e, fallback.clone()))
                        .collect();
                }
                Err(err) => {
                    warn!("Prune skipped: {}", err);
                    report.warnings.push(PruneWarning::from_error(&err, fallback));
                }
            }
        }

        if !report.warnings.is_empty() {
            report.outcome = GateOutcome::PublishedWithPruneWarnings;
        }
        report.finished_at = Utc::now();
        info!(
            "{}=={}: {:?} ({} uploaded, {} pruned)",
            report.package,
            report.version,
            report.outcome,
            report.uploaded.len(),
            report.pruned.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryIndex;

    fn v(s: &str) -> PackageVersion {
        PackageVersion::parse(s).unwrap()
    }

    fn gate() -> ReleaseGate {
        ReleaseGate::new(GateConfig::default())
    }

    #[test]
    fn release_ref_rejects_dev_version() {
        let err = gate()
            .check_release_ref_invariant("release-1.2", &v("1.2.0.dev1"))
            .unwrap_err();
        assert!(matches!(err, GateError::DevVersionOnReleaseRef { .. }));
    }

    #[test]
    fn release_ref_accepts_release_version() {
        gate()
            .check_release_ref_invariant("release-1.2", &v("1.2.0"))
            .unwrap();
    }

    #[test]
    fn other_refs_accept_dev_version() {
        gate()
            .check_release_ref_invariant("feature-x", &v("1.2.0.dev1"))
            .unwrap();
    }

    #[test]
    fn dev_branch_rejects_release_version() {
        let err = gate()
            .check_development_branch_invariant("master", &v("2.0.0"))
            .unwrap_err();
        assert!(matches!(err, GateError::ReleaseVersionOnDevBranch { .. }));
    }

    #[test]
    fn dev_branch_accepts_dev_version() {
        gate()
            .check_development_branch_invariant("master", &v("2.0.0.dev5"))
            .unwrap();
    }

    #[test]
    fn other_branches_accept_anything() {
        let g = gate();
        g.check_development_branch_invariant("feature-x", &v("2.0.0"))
            .unwrap();
        g.check_development_branch_invariant("feature-x", &v("2.0.0.dev1"))
            .unwrap();
    }

    #[test]
    fn custom_dev_branch_is_honoured() {
        let g = ReleaseGate::new(GateConfig::default().with_dev_branch("main"));
        g.check_development_branch_invariant("master", &v("2.0.0"))
            .unwrap();
        assert!(g
            .check_development_branch_invariant("main", &v("2.0.0"))
            .is_err());
    }

    #[tokio::test]
    async fn regression_against_newer_release() {
        let index = MemoryIndex::new().with_file("pkg-1.2.0-py3-none-any.whl");
        let err = gate()
            .check_no_regression(&index, "pkg", &v("1.1.0.dev3"), "master")
            .await
            .unwrap_err();
        match err {
            GateError::VersionRegression { existing, .. } => assert_eq!(existing, "1.2.0"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn newer_dev_build_is_not_a_regression() {
        let index = MemoryIndex::new().with_file("pkg-1.0.0.dev1-py3-none-any.whl");
        gate()
            .check_no_regression(&index, "pkg", &v("1.0.0.dev2"), "master")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn equal_version_is_a_regression() {
        let index = MemoryIndex::new().with_file("pkg-1.0.0.dev2.tar.gz");
        assert!(matches!(
            gate()
                .check_no_regression(&index, "pkg", &v("1.0.0.dev2"), "master")
                .await,
            Err(GateError::VersionRegression { .. })
        ));
    }

    #[tokio::test]
    async fn regression_check_skipped_off_dev_branch() {
        let index = MemoryIndex::new().with_file("pkg-9.0.0-py3-none-any.whl");
        gate()
            .check_no_regression(&index, "pkg", &v("1.0.0"), "feature-x")
            .await
            .unwrap();
        assert_eq!(index.call_count(), 0);
    }

    #[tokio::test]
    async fn probe_used_when_listing_unavailable() {
        let index = MemoryIndex::without_listing().with_file("pkg-1.2.0-py3-none-any.whl");
        let err = gate()
            .check_no_regression(&index, "pkg", &v("1.1.0.dev3"), "master")
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::VersionRegression { .. }));
        assert!(index
            .calls()
            .iter()
            .any(|c| matches!(c, crate::fakes::IndexCall::Probe(..))));
    }

    #[tokio::test]
    async fn prune_targets_only_older_dev_counterparts() {
        let index = MemoryIndex::new()
            .with_file("pkg-1.0.0-py3-none-any.whl")
            .with_file("pkg-2.0.0.dev3-py3-none-any.whl")
            .with_file("pkg-2.0.0.dev3.tar.gz")
            .with_file("pkg-2.0.0.dev4-py3-none-any.whl")
            .with_file("pkg-2.0.0.dev5-py3-none-any.whl")
            .with_file("other-2.0.0.dev1-py3-none-any.whl");

        let summary = gate()
            .prune_superseded_development_artifacts(
                &index,
                "pkg",
                &v("2.0.0.dev5"),
                &[PathBuf::from("dist/pkg-2.0.0.dev5-py3-none-any.whl")],
                "master",
            )
            .await
            .unwrap();

        assert!(summary.failures.is_empty());
        assert_eq!(
            summary.deleted,
            vec![
                "pkg-2.0.0.dev3-py3-none-any.whl".to_string(),
                "pkg-2.0.0.dev4-py3-none-any.whl".to_string(),
            ]
        );
        assert_eq!(
            index.file_names(),
            vec![
                "other-2.0.0.dev1-py3-none-any.whl",
                "pkg-1.0.0-py3-none-any.whl",
                "pkg-2.0.0.dev3.tar.gz",
                "pkg-2.0.0.dev5-py3-none-any.whl",
            ]
        );
    }

    #[tokio::test]
    async fn prune_collects_failures_and_keeps_going() {
        let index = MemoryIndex::new()
            .with_file("pkg-2.0.0.dev3-py3-none-any.whl")
            .with_file("pkg-2.0.0.dev4-py3-none-any.whl")
            .failing_delete("pkg-2.0.0.dev3-py3-none-any.whl");

        let summary = gate()
            .prune_superseded_development_artifacts(
                &index,
                "pkg",
                &v("2.0.0.dev5"),
                &[PathBuf::from("dist/pkg-2.0.0.dev5-py3-none-any.whl")],
                "master",
            )
            .await
            .unwrap();

        assert_eq!(summary.deleted, vec!["pkg-2.0.0.dev4-py3-none-any.whl".to_string()]);
        assert_eq!(summary.failures.len(), 1);
        assert!(matches!(
            &summary.failures[0],
            GateError::PruneFailed { remote, .. } if remote == "pkg-2.0.0.dev3-py3-none-any.whl"
        ));
    }
}
