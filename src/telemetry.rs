//! Telemetry surface for provisioning events.

use serde_json::Value;
use tracing::info;

/// Event emitted when a machine is created.
pub const CREATE_MACHINE_EVENT: &str = "create machine";

/// Receives named telemetry events with JSON properties.
pub trait Telemetry: Send + Sync {
    /// Records `event` with `properties`.
    fn capture(&self, event: &str, properties: &Value);
}

/// Telemetry sink that emits `tracing` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn capture(&self, event: &str, properties: &Value) {
        info!(event, %properties, "telemetry");
    }
}
