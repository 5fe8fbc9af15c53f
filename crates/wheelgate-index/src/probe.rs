//! Version probing by attempted download
//!
//! Used when the registry will not list package versions for the supplied
//! credentials: ask pip to fetch `name>=version` from the project's simple
//! index. If pip finds something, an equal or newer version is published.

use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use tokio::process::Command;
use tracing::debug;
use wheelgate_core::{Credentials, IndexError, IndexResult, PackageVersion};

use crate::registry::RegistryConfig;

const NOT_FOUND_MARKERS: [&str; 2] = [
    "No matching distribution found",
    "Could not find a version that satisfies",
];

/// `pip download` based probe
#[derive(Debug, Clone)]
pub struct PipProbe {
    program: String,
    index_url: Url,
    timeout: Duration,
}

impl PipProbe {
    /// Probe against `index_url`, embedding `credentials` as URL userinfo.
    pub fn new(index_url: &str, credentials: Option<&Credentials>) -> IndexResult<Self> {
        let mut url = Url::parse(index_url)
            .map_err(|e| IndexError::Probe(format!("invalid index URL {index_url}: {e}")))?;
        if let Some(creds) = credentials {
            url.set_username(&creds.username)
                .and_then(|_| url.set_password(Some(&creds.token)))
                .map_err(|_| IndexError::Probe(format!("cannot add credentials to {index_url}")))?;
        }
        Ok(PipProbe {
            program: "pip".to_string(),
            index_url: url,
            timeout: Duration::from_secs(120),
        })
    }

    /// Probe the simple index of the registry described by `config`.
    pub fn for_registry(config: &RegistryConfig) -> IndexResult<Self> {
        Self::new(&config.simple_index_url(), Some(&config.credentials))
            .map(|p| p.with_timeout(config.timeout.max(Duration::from_secs(120))))
    }

    /// Use a different pip executable (e.g. `pip3` or a venv path).
    pub fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Index URL with any password masked, for logs.
    pub fn display_url(&self) -> String {
        let mut url = self.index_url.clone();
        if url.password().is_some() {
            let _ = url.set_password(Some("****"));
        }
        url.to_string()
    }

    fn command(&self, requirement: &str, dest: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args([
            "download",
            "--no-deps",
            "--pre",
            "--disable-pip-version-check",
            "--progress-bar",
            "off",
            "--dest",
        ])
        .arg(dest)
        .args(["--index-url", self.index_url.as_str(), requirement])
        .kill_on_drop(true);
        cmd
    }

    /// Whether some version `>= version` of `name` can be downloaded.
    pub async fn resolves_at_least(&self, name: &str, version: &PackageVersion) -> IndexResult<bool> {
        let requirement = format!("{name}>={version}");
        let dest = tempfile::tempdir()?;
        debug!("Probing {} for {}", self.display_url(), requirement);

        let output = tokio::time::timeout(
            self.timeout,
            self.command(&requirement, dest.path()).output(),
        )
        .await
        .map_err(|_| {
            IndexError::Transport(format!(
                "probe for {requirement} timed out after {:?}",
                self.timeout
            ))
        })?
        .map_err(|e| IndexError::Probe(format!("failed to run {}: {e}", self.program)))?;

        if output.status.success() {
            debug!("Probe resolved {}", requirement);
            return Ok(true);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if NOT_FOUND_MARKERS.iter().any(|m| stderr.contains(m)) {
            debug!("Probe found nothing for {}", requirement);
            return Ok(false);
        }

        Err(IndexError::Probe(format!(
            "{} exited with {}: {}",
            self.program,
            output.status,
            stderr.trim()
        )))
    }
}
