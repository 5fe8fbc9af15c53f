//! GitLab package registry client
//!
//! Implements [`PackageIndex`] against the GitLab packages REST API
//! (`/projects/:id/packages`) and the PyPI upload endpoint
//! (`/projects/:id/packages/pypi`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use wheelgate_core::{
    normalize_name, Credentials, DistributionName, IndexError, IndexResult, PackageArtifact,
    PackageIndex, PackageVersion, RemoteFile,
};

use crate::probe::PipProbe;

/// Username GitLab expects alongside a CI job token.
pub const JOB_TOKEN_USER: &str = "gitlab-ci-token";

const PAGE_SIZE: u32 = 100;

/// Registry connection settings
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// GitLab API root, e.g. `https://gitlab.example.com/api/v4`
    pub api_url: String,
    /// Numeric project id or `group/project` path
    pub project_id: String,
    pub credentials: Credentials,
    /// Per-request timeout
    pub timeout: Duration,
}

impl RegistryConfig {
    pub fn new(api_url: &str, project_id: &str, credentials: Credentials) -> Self {
        RegistryConfig {
            api_url: api_url.trim_end_matches('/').to_string(),
            project_id: project_id.to_string(),
            credentials,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn project_url(&self) -> String {
        format!(
            "{}/projects/{}",
            self.api_url,
            self.project_id.replace('/', "%2F")
        )
    }

    /// PEP 503 simple index for this project, used by the pip probe.
    pub fn simple_index_url(&self) -> String {
        format!("{}/packages/pypi/simple", self.project_url())
    }
}

#[derive(Debug, Deserialize)]
struct ApiPackage {
    id: u64,
    name: String,
    version: String,
}

#[derive(Debug, Deserialize)]
struct ApiPackageFile {
    id: u64,
    file_name: String,
}

/// Upload form metadata, kept separate from the multipart plumbing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadMetadata {
    pub name: String,
    pub version: String,
    pub filetype: &'static str,
    pub pyversion: String,
    pub sha256_digest: String,
}

impl UploadMetadata {
    pub fn for_artifact(artifact: &PackageArtifact, content: &[u8]) -> Self {
        let file_name = artifact.file_name();
        let (filetype, pyversion) = match DistributionName::parse(&file_name) {
            Some(dist) if dist.suffix.ends_with(".whl") => {
                let python_tag = dist
                    .suffix
                    .trim_start_matches('-')
                    .split('-')
                    .rev()
                    .nth(2)
                    .unwrap_or("py3")
                    .to_string();
                ("bdist_wheel", python_tag)
            }
            _ => ("sdist", "source".to_string()),
        };

        let mut hasher = Sha256::new();
        hasher.update(content);

        UploadMetadata {
            name: artifact.name.clone(),
            version: artifact.version.to_string(),
            filetype,
            pyversion,
            sha256_digest: hex::encode(hasher.finalize()),
        }
    }
}

fn transport(err: reqwest::Error) -> IndexError {
    if err.is_timeout() {
        IndexError::Transport(format!("request timed out: {err}"))
    } else if err.is_decode() {
        IndexError::Decode(err.to_string())
    } else {
        IndexError::Transport(err.to_string())
    }
}

async fn check_status(response: Response) -> IndexResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(IndexError::Unauthorized {
            status: status.as_u16(),
        });
    }
    let body = response.text().await.unwrap_or_default();
    Err(IndexError::Status {
        status: status.as_u16(),
        body,
    })
}

/// GitLab package registry client
pub struct GitlabRegistry {
    config: RegistryConfig,
    http_client: reqwest::Client,
    probe: Option<PipProbe>,
}

impl GitlabRegistry {
    pub fn new(config: RegistryConfig) -> IndexResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("wheelgate/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(transport)?;

        Ok(GitlabRegistry {
            config,
            http_client,
            probe: None,
        })
    }

    /// Fall back to `pip download` probing when listing is refused.
    pub fn with_probe(mut self, probe: PipProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        let creds = &self.config.credentials;
        let header = if creds.username == JOB_TOKEN_USER {
            "JOB-TOKEN"
        } else {
            "PRIVATE-TOKEN"
        };
        request.header(header, &creds.token)
    }

    /// GET every page of a paginated collection, following `x-next-page`.
    async fn get_paged<T: DeserializeOwned>(
        &self,
        url: &str,
        filters: &[(&str, &str)],
    ) -> IndexResult<Vec<T>> {
        let per_page = PAGE_SIZE.to_string();
        let mut page = 1u32;
        let mut items = Vec::new();

        loop {
            debug!("GET {} (page {})", url, page);
            let page_param = page.to_string();
            let response = self
                .authed(self.http_client.get(url))
                .query(filters)
                .query(&[
                    ("per_page", per_page.as_str()),
                    ("page", page_param.as_str()),
                ])
                .send()
                .await
                .map_err(transport)?;
            let response = check_status(response).await?;

            let next_page = response
                .headers()
                .get("x-next-page")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u32>().ok());

            let batch: Vec<T> = response.json().await.map_err(transport)?;
            items.extend(batch);

            match next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        Ok(items)
    }

    /// All registry packages (one per version) whose name matches `name`.
    async fn packages(&self, name: &str) -> IndexResult<Vec<ApiPackage>> {
        let url = format!("{}/packages", self.config.project_url());
        let wanted = normalize_name(name);
        let packages: Vec<ApiPackage> = self
            .get_paged(&url, &[("package_type", "pypi"), ("package_name", name)])
            .await?;
        // package_name is a fuzzy filter on the GitLab side
        Ok(packages
            .into_iter()
            .filter(|p| normalize_name(&p.name) == wanted)
            .collect())
    }

    async fn package_files(&self, package_id: u64) -> IndexResult<Vec<ApiPackageFile>> {
        let url = format!(
            "{}/packages/{}/package_files",
            self.config.project_url(),
            package_id
        );
        self.get_paged(&url, &[]).await
    }
}

#[async_trait]
impl PackageIndex for GitlabRegistry {
    async fn published_versions(&self, name: &str) -> IndexResult<Option<Vec<PackageVersion>>> {
        let packages = match self.packages(name).await {
            Ok(packages) => packages,
            Err(IndexError::Unauthorized { status }) => {
                warn!("Registry refused package listing (HTTP {})", status);
                return Ok(None);
            }
            Err(IndexError::Status { status: 404, .. }) => return Ok(None),
            Err(err) => return Err(err),
        };

        let mut versions = Vec::with_capacity(packages.len());
        for package in packages {
            match PackageVersion::parse(&package.version) {
                Ok(v) => versions.push(v),
                Err(_) => warn!(
                    "Ignoring unparseable registry version {} of {}",
                    package.version, package.name
                ),
            }
        }
        Ok(Some(versions))
    }

    async fn probe_at_least(&self, name: &str, version: &PackageVersion) -> IndexResult<bool> {
        match &self.probe {
            Some(probe) => probe.resolves_at_least(name, version).await,
            None => Err(IndexError::Unsupported("version probing")),
        }
    }

    async fn list_files(&self, name: &str) -> IndexResult<Vec<RemoteFile>> {
        let mut files = Vec::new();
        for package in self.packages(name).await? {
            for file in self.package_files(package.id).await? {
                files.push(RemoteFile {
                    package_id: package.id.to_string(),
                    file_id: file.id.to_string(),
                    file_name: file.file_name,
                });
            }
        }
        Ok(files)
    }

    async fn upload(&self, artifact: &PackageArtifact) -> IndexResult<()> {
        let content = tokio::fs::read(&artifact.path).await?;
        let meta = UploadMetadata::for_artifact(artifact, &content);
        let file_name = artifact.file_name();

        let part = Part::bytes(content)
            .file_name(file_name.clone())
            .mime_str("application/octet-stream")
            .map_err(transport)?;
        let form = Form::new()
            .text(":action", "file_upload")
            .text("protocol_version", "1")
            .text("name", meta.name)
            .text("version", meta.version)
            .text("filetype", meta.filetype)
            .text("pyversion", meta.pyversion)
            .text("sha256_digest", meta.sha256_digest)
            .part("content", part);

        let url = format!("{}/packages/pypi", self.config.project_url());
        info!("POST {} ({})", url, file_name);
        let creds = &self.config.credentials;
        let response = self
            .http_client
            .post(&url)
            .basic_auth(&creds.username, Some(&creds.token))
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        check_status(response).await?;
        Ok(())
    }

    async fn delete_file(&self, file: &RemoteFile) -> IndexResult<()> {
        let url = format!(
            "{}/packages/{}/package_files/{}",
            self.config.project_url(),
            file.package_id,
            file.file_id
        );
        debug!("DELETE {}", url);
        let response = self
            .authed(self.http_client.delete(&url))
            .send()
            .await
            .map_err(transport)?;
        check_status(response).await?;
        Ok(())
    }
}
