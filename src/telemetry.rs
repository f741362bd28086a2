use std::io::{self, IsTerminal};
use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::TelemetryError;

static TRACING_INITIALISED: OnceLock<Result<(), TelemetryError>> = OnceLock::new();

/// Initialises structured logging for the plug-in.
///
/// Pretty output on an interactive stderr, JSON lines otherwise — a daemon
/// plug-in has no progress bar to paint, just a log sink.
pub fn initialise_tracing() -> Result<(), &'static TelemetryError> {
    TRACING_INITIALISED
        .get_or_init(initialise_tracing_once)
        .as_ref()
}

fn initialise_tracing_once() -> Result<(), TelemetryError> {
    let log_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let is_interactive = io::stderr().is_terminal();

    if is_interactive {
        tracing_subscriber::registry()
            .with(fmt::layer().pretty().with_target(false).with_filter(log_filter))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_filter(log_filter),
            )
            .try_init()?;
    }

    Ok(())
}
