//! wheelgate-index: package registry backends for the release gate
//!
//! Provides [`GitlabRegistry`], a [`PackageIndex`](wheelgate_core::PackageIndex)
//! over the GitLab package registry, and [`PipProbe`], the download-based
//! fallback used when the registry refuses to list versions.

pub mod probe;
pub mod registry;

pub use probe::PipProbe;
pub use registry::{GitlabRegistry, RegistryConfig, UploadMetadata, JOB_TOKEN_USER};
