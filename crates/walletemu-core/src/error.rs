//! Crate-level error type.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::discovery::DiscoveryError;
use crate::emulator::EmulatorError;
use crate::session::SessionError;
use crate::transport::TransportError;

/// Errors surfaced by [`Harness`](crate::harness::Harness) operations.
///
/// Each variant wraps the error of the component that failed, so callers can
/// match on the precise cause while still handling everything uniformly.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("emulator error: {0}")]
    Emulator(#[from] EmulatorError),

    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The emulator started but no debuggable transport appeared in time.
    #[error("Emulator failed to become ready within {0:?}")]
    StartupTimeout(Duration),
}

impl HarnessError {
    /// Returns `true` if no debuggable transport was found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, HarnessError::Discovery(DiscoveryError::NotFound))
    }
}
