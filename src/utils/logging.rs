use std::fs::{self, File};
use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the logging system.
///
/// An explicit `RUST_LOG` wins; otherwise this crate logs at info (debug
/// with `verbose`) and dependencies at warn. When a log file is given, a
/// plain-text sink is layered on top of the stderr output.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let fallback = if verbose {
        "warn,trawler=debug"
    } else {
        "warn,trawler=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let mut file_layer = None;
    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create log directory: {}", parent.display()))?;
        }
        let file = File::create(path)
            .context(format!("Failed to create log file: {}", path.display()))?;
        file_layer = Some(fmt::layer().with_ansi(false).with_writer(file));
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .init();

    Ok(())
}
