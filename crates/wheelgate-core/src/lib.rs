//! wheelgate core library
//!
//! Decides whether a built Python package may be published to an index from
//! the current branch or ref, and drives the publish/prune protocol through
//! the [`PackageIndex`] trait.

pub mod artifact;
pub mod context;
pub mod error;
pub mod fakes;
pub mod gate;
pub mod index;
pub mod metadata;
pub mod telemetry;
pub mod version;

pub use artifact::{normalize_name, verify_artifact_set, DistributionName, PackageArtifact};
pub use context::{Credentials, GateConfig, ReleaseContext, DEFAULT_DEV_BRANCH, DEFAULT_RELEASE_PREFIX};
pub use error::{GateError, IndexError, Result};
pub use gate::{GateOutcome, GateReport, PruneSummary, PruneWarning, PublishRequest, ReleaseGate};
pub use index::{IndexResult, PackageIndex, RemoteFile};
pub use metadata::{MetadataError, PackageMetadata};
pub use telemetry::init_tracing;
pub use version::{classify_version, PackageVersion, VersionClassification};
