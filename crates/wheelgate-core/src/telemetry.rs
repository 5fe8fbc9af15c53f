//! Logging for wheelgate runs.
//!
//! Log lines always go to stderr. stdout is reserved for the gate report,
//! so `wheelgate publish --json > report.json` stays machine-readable while
//! the job log still shows every protocol step.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the process-wide subscriber for a gate run.
///
/// `json` selects one JSON object per line, for pipelines that ship job logs
/// to an aggregator. `RUST_LOG` (e.g. `wheelgate_index=debug`) overrides
/// `level`. A second call is ignored, so tests may call this freely.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let text = (!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));
    let lines = json.then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(lines)
        .try_init()
        .ok();
}
