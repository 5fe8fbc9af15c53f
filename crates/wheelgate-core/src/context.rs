//! Invocation context and gate configuration.
//!
//! Everything the gate needs from its environment is passed in through these
//! structs; nothing in this crate reads process environment variables.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default primary development branch.
pub const DEFAULT_DEV_BRANCH: &str = "master";

/// Default prefix marking release-prepared refs.
pub const DEFAULT_RELEASE_PREFIX: &str = "release-";

/// Branch/ref facts for one gate evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseContext {
    /// Branch the pipeline runs for (empty for tag pipelines)
    pub branch_name: String,
    /// Branch or tag name the pipeline was started for
    pub commit_ref_name: String,
    /// Whether this run is part of a merge train
    pub is_merge_train: bool,
    /// Merge request target branch (merge trains only)
    pub target_branch: Option<String>,
}

impl ReleaseContext {
    pub fn for_branch(branch: &str) -> Self {
        Self {
            branch_name: branch.to_string(),
            commit_ref_name: branch.to_string(),
            ..Default::default()
        }
    }

    pub fn for_ref(ref_name: &str) -> Self {
        Self {
            commit_ref_name: ref_name.to_string(),
            ..Default::default()
        }
    }

    /// Mark this context as a merge train into `target`.
    pub fn merge_train_into(mut self, target: &str) -> Self {
        self.is_merge_train = true;
        self.target_branch = Some(target.to_string());
        self
    }

    /// Branch the commit will end up on.
    ///
    /// Merge train runs are judged against their target branch.
    pub fn effective_branch(&self) -> &str {
        match (&self.target_branch, self.is_merge_train) {
            (Some(target), true) if !target.is_empty() => target,
            _ => &self.branch_name,
        }
    }
}

/// Policy knobs for the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Primary development branch
    pub dev_branch: String,
    /// Ref prefix for release-prepared refs
    pub release_prefix: String,
    /// Run every check but never upload or prune
    pub dry_run: bool,
    /// Skip deletion of superseded development artifacts
    pub skip_prune: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            dev_branch: DEFAULT_DEV_BRANCH.to_string(),
            release_prefix: DEFAULT_RELEASE_PREFIX.to_string(),
            dry_run: false,
            skip_prune: false,
        }
    }
}

impl GateConfig {
    pub fn with_dev_branch(mut self, branch: &str) -> Self {
        self.dev_branch = branch.to_string();
        self
    }

    pub fn with_release_prefix(mut self, prefix: &str) -> Self {
        self.release_prefix = prefix.to_string();
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn skip_prune(mut self, skip: bool) -> Self {
        self.skip_prune = skip;
        self
    }

    pub fn is_dev_branch(&self, branch: &str) -> bool {
        !branch.is_empty() && branch == self.dev_branch
    }

    pub fn is_release_ref(&self, ref_name: &str) -> bool {
        !self.release_prefix.is_empty() && ref_name.starts_with(&self.release_prefix)
    }
}

/// Index credentials. The token never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub token: String,
}

impl Credentials {
    pub fn new(username: &str, token: &str) -> Self {
        Credentials {
            username: username.to_string(),
            token: token.to_string(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}
