//! wheelgate - release gate for Python package publishing
//!
//! Decides whether the artifacts built by a CI job may be uploaded to the
//! project's package registry, uploads them, and prunes superseded
//! development snapshots on the development branch.
//!
//! ## Commands
//!
//! - `publish`: run every check, upload, prune
//! - `check`: run every check, upload nothing
//! - `classify`: print whether a version is a release or a development build
//!
//! Exit status is 0 when the artifacts were published (even with prune
//! warnings) or verified, 1 when the gate rejected them or the upload
//! failed, 2 for usage errors.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::Level;
use wheelgate_core::{
    classify_version, Credentials, GateConfig, GateError, GateOutcome, GateReport, PackageIndex,
    PackageMetadata, PublishRequest, ReleaseContext, ReleaseGate, DEFAULT_DEV_BRANCH,
    DEFAULT_RELEASE_PREFIX,
};
use wheelgate_index::{GitlabRegistry, PipProbe, RegistryConfig, JOB_TOKEN_USER};

const MERGE_TRAIN_EVENT: &str = "merge_train";

#[derive(Parser)]
#[command(name = "wheelgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Release gate and publisher for Python package artifacts", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and a JSON report
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the artifacts against branch/ref rules and the registry, then upload them
    Publish(GateArgs),

    /// Run every check without uploading or pruning
    Check(GateArgs),

    /// Print the classification (release/development) of a version string
    Classify {
        /// Version string, e.g. 1.2.0.dev3
        version: String,
    },
}

#[derive(Args, Debug, Clone)]
struct GateArgs {
    /// Built wheel/sdist files to publish
    #[arg(required = true, value_name = "ARTIFACT")]
    artifacts: Vec<PathBuf>,

    /// Package name (alternative to --version-file)
    #[arg(long, env = "WHEELGATE_PACKAGE", conflicts_with = "version_file")]
    package_name: Option<String>,

    /// Package version (alternative to --version-file)
    #[arg(long, env = "WHEELGATE_VERSION", conflicts_with = "version_file")]
    package_version: Option<String>,

    /// Python module defining __packagename__ and __version__
    #[arg(long, env = "WHEELGATE_VERSION_FILE")]
    version_file: Option<PathBuf>,

    /// Branch the pipeline runs for
    #[arg(long, env = "CI_COMMIT_BRANCH", default_value = "")]
    branch: String,

    /// Branch or tag name the pipeline runs for
    #[arg(long = "ref", env = "CI_COMMIT_REF_NAME", default_value = "")]
    ref_name: String,

    /// Merge request event type; "merge_train" marks a merge train run
    #[arg(long, env = "CI_MERGE_REQUEST_EVENT_TYPE")]
    merge_request_event_type: Option<String>,

    /// Merge request target branch
    #[arg(long, env = "CI_MERGE_REQUEST_TARGET_BRANCH_NAME")]
    target_branch: Option<String>,

    /// Primary development branch
    #[arg(long, env = "WHEELGATE_DEV_BRANCH", default_value = DEFAULT_DEV_BRANCH)]
    dev_branch: String,

    /// Ref prefix marking release-prepared refs
    #[arg(long, env = "WHEELGATE_RELEASE_PREFIX", default_value = DEFAULT_RELEASE_PREFIX)]
    release_prefix: String,

    /// GitLab API root
    #[arg(long, env = "CI_API_V4_URL")]
    api_url: String,

    /// GitLab project id or path
    #[arg(long, env = "CI_PROJECT_ID")]
    project_id: String,

    /// Registry username
    #[arg(long, env = "WHEELGATE_USERNAME", default_value = JOB_TOKEN_USER)]
    username: String,

    /// Registry token (job token, deploy token, or personal access token)
    #[arg(long, env = "CI_JOB_TOKEN", hide_env_values = true)]
    token: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// pip executable used to probe for newer versions when listing is refused
    #[arg(long, default_value = "pip")]
    pip: String,

    /// Never fall back to probing with pip
    #[arg(long)]
    no_probe: bool,

    /// Do not delete superseded development artifacts
    #[arg(long)]
    skip_prune: bool,

    /// Run every check but do not upload or prune
    #[arg(long)]
    dry_run: bool,
}

impl GateArgs {
    fn context(&self) -> ReleaseContext {
        let is_merge_train = self.merge_request_event_type.as_deref() == Some(MERGE_TRAIN_EVENT);
        let commit_ref_name = if self.ref_name.is_empty() {
            self.branch.clone()
        } else {
            self.ref_name.clone()
        };
        ReleaseContext {
            branch_name: self.branch.clone(),
            commit_ref_name,
            is_merge_train,
            target_branch: self.target_branch.clone().filter(|t| !t.is_empty()),
        }
    }

    fn gate_config(&self, force_dry_run: bool) -> GateConfig {
        GateConfig::default()
            .with_dev_branch(&self.dev_branch)
            .with_release_prefix(&self.release_prefix)
            .dry_run(self.dry_run || force_dry_run)
            .skip_prune(self.skip_prune)
    }

    fn metadata(&self) -> Result<PackageMetadata> {
        if let Some(path) = &self.version_file {
            return PackageMetadata::from_file(path)
                .with_context(|| format!("Failed to read package metadata from {:?}", path));
        }
        match (&self.package_name, &self.package_version) {
            (Some(name), Some(version)) => wheelgate_core::metadata::parse_declared(name, version)
                .context("Invalid --package-version"),
            _ => bail!("Either --version-file or both --package-name and --package-version are required"),
        }
    }

    fn request(&self) -> Result<PublishRequest> {
        let meta = self.metadata()?;
        Ok(PublishRequest {
            name: meta.name,
            version: meta.version,
            artifacts: self.artifacts.clone(),
            context: self.context(),
        })
    }

    fn registry(&self) -> Result<GitlabRegistry> {
        let config = RegistryConfig::new(
            &self.api_url,
            &self.project_id,
            Credentials::new(&self.username, &self.token),
        )
        .with_timeout(Duration::from_secs(self.timeout_secs));

        let registry = GitlabRegistry::new(config).context("Failed to create registry client")?;
        if self.no_probe {
            return Ok(registry);
        }
        // pip only runs if the registry refuses to list versions
        let probe = PipProbe::for_registry(registry.config())
            .context("Failed to configure version probe")?
            .with_program(&self.pip);
        Ok(registry.with_probe(probe))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    wheelgate_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Classify { version } => {
            println!("{}", classify_version(&version));
            ExitCode::SUCCESS
        }
        Commands::Publish(args) => cmd_gate(&args, false, cli.json).await,
        Commands::Check(args) => cmd_gate(&args, true, cli.json).await,
    }
}

/// Run the gate for `publish` or `check`
async fn cmd_gate(args: &GateArgs, force_dry_run: bool, json: bool) -> ExitCode {
    let prepared = args.request().and_then(|req| Ok((req, args.registry()?)));
    let (request, registry) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::from(2);
        }
    };

    let gate = ReleaseGate::new(args.gate_config(force_dry_run));
    let result = evaluate(&gate, &registry, &request).await;
    print_result(&result, json);
    ExitCode::from(exit_code(&result))
}

async fn evaluate(
    gate: &ReleaseGate,
    index: &dyn PackageIndex,
    request: &PublishRequest,
) -> std::result::Result<GateReport, GateError> {
    gate.run(index, request).await
}

fn exit_code(result: &std::result::Result<GateReport, GateError>) -> u8 {
    match result {
        Ok(_) => 0,
        Err(_) => 1,
    }
}

fn render_result(result: &std::result::Result<GateReport, GateError>, json: bool) -> String {
    match (result, json) {
        (Ok(report), true) => serde_json::to_string_pretty(report).unwrap_or_default(),
        (Err(err), true) => serde_json::json!({
            "outcome": if err.is_rejection() { "rejected" } else { "failed" },
            "reason": err.kind(),
            "message": err.to_string(),
        })
        .to_string(),
        (Ok(report), false) => {
            let mut out = match report.outcome {
                GateOutcome::Published => format!(
                    "published {}=={} ({})",
                    report.package,
                    report.version,
                    report.uploaded.join(", ")
                ),
                GateOutcome::PublishedWithPruneWarnings => format!(
                    "published {}=={} with prune warnings ({})",
                    report.package,
                    report.version,
                    report.uploaded.join(", ")
                ),
                GateOutcome::Verified => format!(
                    "verified {}=={} ({}); nothing uploaded",
                    report.package, report.version, report.classification
                ),
            };
            for pruned in &report.pruned {
                out.push_str(&format!("\npruned {pruned}"));
            }
            for warning in &report.warnings {
                out.push_str(&format!("\nwarning: {}", warning.message));
            }
            out
        }
        (Err(err), false) => {
            let label = if err.is_rejection() { "rejected" } else { "failed" };
            format!("{label} ({}): {err}", err.kind())
        }
    }
}

fn print_result(result: &std::result::Result<GateReport, GateError>, json: bool) {
    let text = render_result(result, json);
    match result {
        Ok(_) => println!("{text}"),
        Err(_) => eprintln!("{text}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wheelgate_core::fakes::MemoryIndex;

    const BASE: [&str; 7] = [
        "wheelgate",
        "publish",
        "--api-url",
        "https://gitlab.example.com/api/v4",
        "--project-id",
        "7",
        "--token=t",
    ];

    /// Flags that clap would otherwise fill from GitLab CI variables.
    const CI_DEFAULTS: [(&str, &str); 8] = [
        ("--branch", ""),
        ("--ref", ""),
        ("--merge-request-event-type", ""),
        ("--target-branch", ""),
        ("--dev-branch", "master"),
        ("--release-prefix", "release-"),
        ("--username", "gitlab-ci-token"),
        ("--pip", "pip"),
    ];

    fn argv(extra: &[&str]) -> Vec<String> {
        let mut argv: Vec<String> = BASE.iter().map(|a| a.to_string()).collect();
        for (flag, value) in CI_DEFAULTS {
            let given = extra
                .iter()
                .any(|a| *a == flag || a.starts_with(&format!("{flag}=")));
            if !given {
                argv.push(format!("{flag}={value}"));
            }
        }
        argv.extend(extra.iter().map(|a| a.to_string()));
        argv
    }

    /// Parse `publish` args independently of the CI variables of the
    /// process running the tests.
    fn parse(extra: &[&str]) -> GateArgs {
        match Cli::try_parse_from(argv(extra)).unwrap().command {
            Commands::Publish(args) => args,
            _ => panic!("expected publish"),
        }
    }

    #[test]
    fn merge_train_detected_from_event_type() {
        let args = parse(&[
            "--branch",
            "feature-x",
            "--merge-request-event-type",
            "merge_train",
            "--target-branch",
            "master",
            "dist/pkg-1.0.0.dev1.tar.gz",
        ]);
        let ctx = args.context();
        assert!(ctx.is_merge_train);
        assert_eq!(ctx.effective_branch(), "master");
    }

    #[test]
    fn ref_defaults_to_branch() {
        let args = parse(&["--branch", "master", "dist/pkg-1.0.0.dev1.tar.gz"]);
        assert_eq!(args.context().commit_ref_name, "master");

        let tagged = parse(&["--ref", "release-1.0", "dist/pkg-1.0.0.tar.gz"]);
        let ctx = tagged.context();
        assert_eq!(ctx.commit_ref_name, "release-1.0");
        assert_eq!(ctx.branch_name, "");
    }

    #[test]
    fn flags_win_over_ci_variables() {
        std::env::set_var("CI_COMMIT_BRANCH", "feature-x");
        std::env::set_var("CI_COMMIT_REF_NAME", "release-1.0");
        std::env::set_var("CI_MERGE_REQUEST_EVENT_TYPE", "merge_train");
        std::env::set_var("WHEELGATE_DEV_BRANCH", "main");

        let from_env = match Cli::try_parse_from(
            BASE.iter().copied().chain(["dist/pkg-1.0.0.tar.gz"]),
        )
        .unwrap()
        .command
        {
            Commands::Publish(args) => args,
            _ => panic!("expected publish"),
        };
        assert_eq!(from_env.context().branch_name, "feature-x");
        assert_eq!(from_env.context().commit_ref_name, "release-1.0");
        assert!(from_env.context().is_merge_train);
        assert_eq!(from_env.dev_branch, "main");

        let args = parse(&["--branch", "master", "dist/pkg-1.0.0.dev1.tar.gz"]);
        let ctx = args.context();
        assert_eq!(ctx.branch_name, "master");
        assert_eq!(ctx.commit_ref_name, "master");
        assert!(!ctx.is_merge_train);
        assert_eq!(args.dev_branch, "master");

        std::env::remove_var("CI_COMMIT_BRANCH");
        std::env::remove_var("CI_COMMIT_REF_NAME");
        std::env::remove_var("CI_MERGE_REQUEST_EVENT_TYPE");
        std::env::remove_var("WHEELGATE_DEV_BRANCH");
    }

    #[test]
    fn registry_setup_does_not_run_pip() {
        let args = parse(&["--pip", "/nonexistent/pip", "dist/pkg-1.0.0.tar.gz"]);
        let registry = args.registry().unwrap();
        assert_eq!(registry.config().project_id, "7");
    }

    #[test]
    fn check_command_forces_dry_run() {
        let args = parse(&["dist/pkg-1.0.0.tar.gz"]);
        assert!(!args.gate_config(false).dry_run);
        assert!(args.gate_config(true).dry_run);
    }

    #[test]
    fn metadata_from_flags() {
        let args = parse(&[
            "--package-name",
            "pkg",
            "--package-version",
            "2.0.0.dev5",
            "dist/pkg-2.0.0.dev5-py3-none-any.whl",
        ]);
        let req = args.request().unwrap();
        assert_eq!(req.name, "pkg");
        assert_eq!(req.version.as_str(), "2.0.0.dev5");
    }

    #[test]
    fn metadata_from_version_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("version.py");
        std::fs::write(&path, "__packagename__ = 'pkg'\n__version__ = '2.0.0.dev5'\n").unwrap();

        let args = parse(&[
            "--version-file",
            path.to_str().unwrap(),
            "dist/pkg-2.0.0.dev5-py3-none-any.whl",
        ]);
        assert_eq!(args.request().unwrap().version.as_str(), "2.0.0.dev5");
    }

    #[test]
    fn metadata_missing_is_an_error() {
        let args = parse(&["--package-name", "pkg", "dist/pkg-1.0.0.tar.gz"]);
        let err = args.request().unwrap_err();
        assert!(format!("{err:#}").contains("--version-file"));
    }

    #[test]
    fn artifacts_are_required() {
        assert!(Cli::try_parse_from(argv(&[])).is_err());
    }

    #[tokio::test]
    async fn release_on_master_rejected_with_exit_one() {
        let args = parse(&[
            "--branch",
            "master",
            "--package-name",
            "pkg",
            "--package-version",
            "2.0.0",
            "dist/pkg-2.0.0-py3-none-any.whl",
        ]);
        let index = MemoryIndex::new();
        let gate = ReleaseGate::new(args.gate_config(false));

        let result = evaluate(&gate, &index, &args.request().unwrap()).await;

        assert_eq!(exit_code(&result), 1);
        let text = render_result(&result, false);
        assert!(text.starts_with("rejected (release_version_on_dev_branch)"));
        assert_eq!(index.call_count(), 0);
    }

    #[tokio::test]
    async fn prune_warning_still_exits_zero() {
        let args = parse(&[
            "--branch",
            "master",
            "--package-name",
            "pkg",
            "--package-version",
            "2.0.0.dev5",
            "dist/pkg-2.0.0.dev5-py3-none-any.whl",
            "dist/pkg-2.0.0.dev5.tar.gz",
        ]);
        let index = MemoryIndex::new()
            .with_file("pkg-2.0.0.dev4-py3-none-any.whl")
            .with_file("pkg-2.0.0.dev4.tar.gz")
            .failing_delete("pkg-2.0.0.dev4.tar.gz");
        let gate = ReleaseGate::new(args.gate_config(false));

        let result = evaluate(&gate, &index, &args.request().unwrap()).await;

        assert_eq!(exit_code(&result), 0);
        let text = render_result(&result, false);
        assert!(text.contains("with prune warnings"));
        assert!(text.contains("pkg-2.0.0.dev4.tar.gz"));
    }

    #[tokio::test]
    async fn json_report_names_outcome() {
        let args = parse(&[
            "--branch",
            "master",
            "--package-name",
            "pkg",
            "--package-version",
            "2.0.0.dev5",
            "dist/pkg-2.0.0.dev5-py3-none-any.whl",
        ]);
        let index = MemoryIndex::new();
        let gate = ReleaseGate::new(args.gate_config(false));

        let result = evaluate(&gate, &index, &args.request().unwrap()).await;
        let value: serde_json::Value = serde_json::from_str(&render_result(&result, true)).unwrap();

        assert_eq!(value["outcome"], "published");
        assert_eq!(value["classification"], "development");
    }

    #[test]
    fn json_error_names_reason() {
        let result: std::result::Result<GateReport, GateError> =
            Err(GateError::DevVersionOnReleaseRef {
                ref_name: "release-1.2".into(),
                version: "1.2.0.dev1".into(),
            });
        let value: serde_json::Value = serde_json::from_str(&render_result(&result, true)).unwrap();
        assert_eq!(value["outcome"], "rejected");
        assert_eq!(value["reason"], "dev_version_on_release_ref");
    }
}
