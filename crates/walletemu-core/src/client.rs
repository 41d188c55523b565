//! Traits for the external wallet client library.
//!
//! The wallet wire protocol lives outside this crate. The harness only needs
//! a handful of remote calls, grouped into two connection types that are
//! opened on a discovered [`TransportHandle`]:
//!
//! - [`DeviceClient`] on the main interface: wipe and load-by-mnemonic
//! - [`DebugLink`] on the debug sub-interface: simulated button input
//!
//! A [`ClientFactory`] creates both. The two are independent sessions: each
//! is opened and closed on its own, even when they share a transport.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::transport::TransportHandle;

/// Errors reported by a client implementation.
///
/// Implementations map their own failures into these; the harness passes
/// them through unchanged.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The transport underneath the client failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The device answered with a failure message.
    #[error("device failure: {0}")]
    Failure(String),

    /// The client does not support this call.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// Settings written by [`DeviceClient::load_device_by_mnemonic`].
#[derive(Clone, PartialEq, Eq)]
pub struct LoadDevice {
    /// Space-separated mnemonic words.
    pub mnemonic: String,
    /// PIN to set; empty for none.
    pub pin: String,
    pub passphrase_protection: bool,
    pub label: String,
}

impl LoadDevice {
    pub fn new(
        mnemonic: impl Into<String>,
        pin: impl Into<String>,
        passphrase_protection: bool,
        label: impl Into<String>,
    ) -> Self {
        Self {
            mnemonic: mnemonic.into(),
            pin: pin.into(),
            passphrase_protection,
            label: label.into(),
        }
    }

    /// The mnemonic split into words.
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.mnemonic.split_whitespace()
    }
}

// Key material stays out of logs.
impl fmt::Debug for LoadDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadDevice")
            .field("mnemonic", &format_args!("<{} words>", self.words().count()))
            .field("pin", &if self.pin.is_empty() { "<none>" } else { "<set>" })
            .field("passphrase_protection", &self.passphrase_protection)
            .field("label", &self.label)
            .finish()
    }
}

/// A connection that must be opened before use and closed afterwards.
#[async_trait]
pub trait Connection: Send {
    async fn open(&mut self) -> Result<(), ClientError>;

    async fn close(&mut self) -> Result<(), ClientError>;
}

/// Debug-capable client on the device's main interface.
#[async_trait]
pub trait DeviceClient: Connection {
    /// Erase all device state.
    async fn wipe(&mut self) -> Result<(), ClientError>;

    /// Seed the device with known key material and settings.
    async fn load_device_by_mnemonic(&mut self, settings: &LoadDevice) -> Result<(), ClientError>;
}

/// Link to the device's debug sub-interface.
#[async_trait]
pub trait DebugLink: Connection {
    /// Simulate pressing the confirm button.
    async fn press_yes(&mut self) -> Result<(), ClientError>;

    /// Simulate a swipe-down gesture.
    ///
    /// The default implementation reports [`ClientError::Unsupported`].
    async fn swipe_down(&mut self) -> Result<(), ClientError> {
        Err(ClientError::Unsupported("swipe_down".into()))
    }
}

/// Creates unopened clients for a discovered transport.
pub trait ClientFactory: Send + Sync {
    fn client(&self, handle: &TransportHandle) -> Result<Box<dyn DeviceClient>, ClientError>;

    fn debug_link(&self, handle: &TransportHandle) -> Result<Box<dyn DebugLink>, ClientError>;
}
