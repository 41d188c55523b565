//! Device transports and their enumeration backends.
//!
//! A transport is the channel used to reach an emulator (or a physical
//! device): either the local bridge daemon that multiplexes device sessions
//! over HTTP, or a direct UDP socket to the emulator. Each kind has a
//! [`TransportBackend`] that reports the endpoints currently reachable as
//! immutable [`TransportHandle`]s.
//!
//! # Backend Selection
//!
//! Use [`TransportConfig`] to pick a backend at runtime:
//!
//! ```no_run
//! use walletemu_core::transport::TransportConfig;
//!
//! let bridge = TransportConfig::Bridge {
//!     url: "http://127.0.0.1:21325".to_string(),
//! };
//!
//! let udp = TransportConfig::Udp {
//!     addresses: vec!["127.0.0.1:21324".parse().unwrap()],
//! };
//! # let _ = (bridge, udp);
//! ```

pub mod bridge;
pub mod udp;

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use bridge::BridgeBackend;
pub use udp::UdpBackend;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while enumerating transports.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The transport layer itself (e.g. the bridge daemon) is not reachable.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// The transport answered with something that could not be understood.
    #[error("invalid transport response: {0}")]
    InvalidResponse(String),

    /// An HTTP request to the bridge daemon failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A socket operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// TransportKind / TransportHandle
// ---------------------------------------------------------------------------

/// The kind of channel used to reach a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// The local bridge daemon.
    Bridge,
    /// A direct UDP socket to the emulator.
    Udp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Bridge => write!(f, "bridge"),
            TransportKind::Udp => write!(f, "udp"),
        }
    }
}

/// One discovered device endpoint.
///
/// Handles are immutable snapshots of what enumeration saw; callers that need
/// a fresh view enumerate again.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportHandle {
    kind: TransportKind,
    path: String,
    debug: bool,
}

impl TransportHandle {
    pub fn new(kind: TransportKind, path: impl Into<String>, debug: bool) -> Self {
        Self {
            kind,
            path: path.into(),
            debug,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// The bridge device path, or the `ip:port` of a UDP emulator.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the endpoint exposes a debug link.
    pub fn has_debug(&self) -> bool {
        self.debug
    }
}

impl fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.path)
    }
}

// ---------------------------------------------------------------------------
// TransportBackend
// ---------------------------------------------------------------------------

/// A finite, single-pass stream of handles produced by one enumeration.
///
/// Backends may do I/O per item; nothing past the last item pulled is probed.
pub type Enumeration = BoxStream<'static, TransportHandle>;

/// Enumerates the endpoints reachable through one transport kind.
#[async_trait]
pub trait TransportBackend: Send + Sync {
    /// The transport kind this backend enumerates.
    fn kind(&self) -> TransportKind;

    /// Start one enumeration pass.
    ///
    /// An empty stream means the transport is up but no device answered.
    async fn enumerate(&self) -> Result<Enumeration, TransportError>;
}

// ---------------------------------------------------------------------------
// TransportConfig
// ---------------------------------------------------------------------------

/// Runtime selection of the transport backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Enumerate through the bridge daemon at `url`.
    Bridge {
        #[serde(default = "bridge::default_url")]
        url: String,
    },
    /// Probe emulators directly at each of `addresses`.
    Udp {
        #[serde(default = "udp::default_addresses")]
        addresses: Vec<SocketAddr>,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Bridge {
            url: bridge::default_url(),
        }
    }
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Bridge { .. } => TransportKind::Bridge,
            TransportConfig::Udp { .. } => TransportKind::Udp,
        }
    }

    /// Build the backend described by this config.
    pub fn build(&self) -> Result<Box<dyn TransportBackend>, TransportError> {
        Ok(match self {
            TransportConfig::Bridge { url } => Box::new(BridgeBackend::new(url.clone())?),
            TransportConfig::Udp { addresses } => Box::new(UdpBackend::new(addresses.clone())),
        })
    }
}
