//! PipProbe driven by stand-in `pip` scripts.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use wheelgate_core::{IndexError, PackageVersion};
use wheelgate_index::PipProbe;

fn fake_pip(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("pip");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn probe(program: &Path) -> PipProbe {
    PipProbe::new("https://registry.example.com/simple", None)
        .unwrap()
        .with_program(program.to_str().unwrap())
}

fn v(s: &str) -> PackageVersion {
    PackageVersion::parse(s).unwrap()
}

#[tokio::test]
async fn successful_download_means_newer_exists() {
    let dir = tempfile::tempdir().unwrap();
    let pip = fake_pip(dir.path(), "exit 0");

    assert!(probe(&pip).resolves_at_least("pkg", &v("1.1.0.dev3")).await.unwrap());
}

#[tokio::test]
async fn no_matching_distribution_means_clear() {
    let dir = tempfile::tempdir().unwrap();
    let pip = fake_pip(
        dir.path(),
        "echo 'ERROR: No matching distribution found for pkg>=2.0.0.dev5' >&2\nexit 1",
    );

    assert!(!probe(&pip).resolves_at_least("pkg", &v("2.0.0.dev5")).await.unwrap());
}

#[tokio::test]
async fn requirement_uses_at_least_specifier() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("args.txt");
    let pip = fake_pip(dir.path(), &format!("echo \"$@\" > {}\nexit 0", log.display()));

    probe(&pip).resolves_at_least("pkg", &v("1.0.0.dev2")).await.unwrap();

    let args = std::fs::read_to_string(log).unwrap();
    assert!(args.contains("download"));
    assert!(args.contains("--pre"));
    assert!(args.contains("pkg>=1.0.0.dev2"));
    assert!(args.contains("--index-url https://registry.example.com/simple"));
}

#[tokio::test]
async fn other_failures_are_errors() {
    let dir = tempfile::tempdir().unwrap();
    let pip = fake_pip(dir.path(), "echo 'ERROR: 503 Service Unavailable' >&2\nexit 2");

    let err = probe(&pip).resolves_at_least("pkg", &v("1.0.0")).await.unwrap_err();
    match err {
        IndexError::Probe(msg) => assert!(msg.contains("503 Service Unavailable")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn missing_program_is_error() {
    let p = PipProbe::new("https://registry.example.com/simple", None)
        .unwrap()
        .with_program("/nonexistent/pip");
    assert!(matches!(
        p.resolves_at_least("pkg", &v("1.0.0")).await,
        Err(IndexError::Probe(_))
    ));
}

#[tokio::test]
async fn slow_probe_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let pip = fake_pip(dir.path(), "sleep 5\nexit 0");

    let err = probe(&pip)
        .with_timeout(Duration::from_millis(200))
        .resolves_at_least("pkg", &v("1.0.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::Transport(_)));
}
