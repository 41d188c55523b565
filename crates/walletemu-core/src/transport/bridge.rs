//! Bridge daemon transport.
//!
//! The bridge is a local HTTP daemon that multiplexes device sessions for
//! every client on the host. Enumeration is a `POST /enumerate` returning a
//! JSON array with one entry per device; each entry says whether the device
//! exposes a debug interface and which sessions currently hold it.
//!
//! # Example
//!
//! ```no_run
//! use walletemu_core::transport::BridgeBackend;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bridge = BridgeBackend::new("http://127.0.0.1:21325")?;
//! for device in bridge.list_devices().await? {
//!     println!("{} debug={}", device.path, device.debug);
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::header::ORIGIN;
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{Enumeration, TransportBackend, TransportError, TransportHandle, TransportKind};

/// Default bridge daemon URL.
pub const DEFAULT_URL: &str = "http://127.0.0.1:21325";

/// The bridge only answers requests carrying a whitelisted origin.
const BRIDGE_ORIGIN: &str = "https://python.trezor.io";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) fn default_url() -> String {
    DEFAULT_URL.to_string()
}

/// One entry of the bridge's `/enumerate` answer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BridgeDevice {
    /// Bridge-assigned device path.
    pub path: String,
    /// Session currently holding the main interface, if any.
    #[serde(default)]
    pub session: Option<String>,
    /// Whether the device exposes a debug interface.
    #[serde(default)]
    pub debug: bool,
    /// Session currently holding the debug interface, if any.
    #[serde(default, rename = "debugSession")]
    pub debug_session: Option<String>,
    #[serde(default)]
    pub vendor: Option<u32>,
    #[serde(default)]
    pub product: Option<u32>,
}

impl From<BridgeDevice> for TransportHandle {
    fn from(device: BridgeDevice) -> Self {
        TransportHandle::new(TransportKind::Bridge, device.path, device.debug)
    }
}

/// Enumerates devices through the bridge daemon.
#[derive(Debug, Clone)]
pub struct BridgeBackend {
    url: String,
    client: reqwest::Client,
}

impl BridgeBackend {
    /// Create a backend for the bridge at `url`.
    ///
    /// No request is made until [`list_devices`](Self::list_devices) is called.
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            url: url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ask the bridge for every device it currently sees.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Unavailable`] if the daemon cannot be reached
    /// - [`TransportError::InvalidResponse`] on a non-success status or malformed JSON
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn list_devices(&self) -> Result<Vec<BridgeDevice>, TransportError> {
        let url = format!("{}/enumerate", self.url);

        let response = self
            .client
            .post(&url)
            .header(ORIGIN, BRIDGE_ORIGIN)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    TransportError::Unavailable(e.to_string())
                } else {
                    TransportError::Http(e)
                }
            })?;

        if !response.status().is_success() {
            return Err(TransportError::InvalidResponse(format!(
                "unexpected status {}",
                response.status()
            )));
        }

        let devices: Vec<BridgeDevice> = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        debug!(count = devices.len(), "bridge enumerated devices");
        Ok(devices)
    }
}

#[async_trait]
impl TransportBackend for BridgeBackend {
    fn kind(&self) -> TransportKind {
        TransportKind::Bridge
    }

    async fn enumerate(&self) -> Result<Enumeration, TransportError> {
        let devices = self.list_devices().await?;
        Ok(stream::iter(devices.into_iter().map(TransportHandle::from)).boxed())
    }
}
