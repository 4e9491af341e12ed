//! Shared constants for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`). Placing shared constants under `tests/common/` avoids creating an
//! additional integration test binary while still allowing reuse via:
//!
//! ```rust
//! #[path = "common/test_constants.rs"]
//! mod test_constants;
//! ```

/// Provider identifier of the machine that exists before a scenario runs.
pub const STALE_PROVIDER_ID: &str = "i-old";

/// Location description reported for the pre-existing machine.
pub const STALE_LOCATION: &str = "eu-west-1 / i-old";

/// Default readiness probe command.
pub const READINESS_COMMAND: &str = "docker run hello-world";
