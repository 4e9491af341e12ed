//! Progress reporting surface used to narrate a provisioning run.

use std::fmt::Display;
use std::future::Future;

use tracing::{info, warn};

/// Receives status updates for one operation at a time.
pub trait Progress: Send + Sync {
    /// Begins an operation labelled `label`.
    fn start(&self, label: &str);

    /// Replaces the status text of the current operation.
    fn set_text(&self, text: &str);

    /// Marks the current operation as successful.
    fn succeed(&self, message: &str);

    /// Marks the current operation as failed.
    fn fail(&self, message: &str);
}

/// Runs `operation` inside a progress scope labelled `label`.
///
/// On success the scope shows the message produced by `success_text`; on
/// failure it shows the label followed by the error.
///
/// # Errors
///
/// Returns the error produced by `operation` unchanged.
pub async fn with_progress<P, T, E, Fut, S>(
    progress: &P,
    label: &str,
    success_text: S,
    operation: Fut,
) -> Result<T, E>
where
    P: Progress + ?Sized,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    S: FnOnce(&T) -> String,
{
    progress.start(label);
    match operation.await {
        Ok(value) => {
            progress.succeed(&success_text(&value));
            Ok(value)
        }
        Err(err) => {
            progress.fail(&format!("{label}: {err}"));
            Err(err)
        }
    }
}

/// Progress reporter that emits `tracing` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingProgress;

impl Progress for TracingProgress {
    fn start(&self, label: &str) {
        info!(operation = label, "started");
    }

    fn set_text(&self, text: &str) {
        info!(status = text, "progress");
    }

    fn succeed(&self, message: &str) {
        info!(summary = message, "succeeded");
    }

    fn fail(&self, message: &str) {
        warn!(summary = message, "failed");
    }
}
