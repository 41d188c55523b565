//! The device-session lifecycle manager.
//!
//! [`Harness`] owns one [`Emulator`], the [`Discovery`] policy used to find
//! it, and the [`ClientFactory`] that talks to it. Operations run strictly
//! one after another: `start`/`stop` need `&mut self`, the debug operations
//! borrow the harness shared but each opens and closes its own session.
//!
//! Several harnesses can coexist, each with its own emulator, as long as
//! their configs point at different ports or bridge paths.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use walletemu_core::config::HarnessConfig;
//! use walletemu_core::harness::Harness;
//! # use walletemu_core::client::ClientFactory;
//!
//! # async fn example(clients: Arc<dyn ClientFactory>) -> Result<(), Box<dyn std::error::Error>> {
//! let mut harness = Harness::from_config(HarnessConfig::default(), clients)?;
//! harness.start().await?;
//!
//! // Another task has triggered a confirmation on the device.
//! harness.confirm_yes().await?;
//!
//! harness.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::client::{ClientFactory, LoadDevice};
use crate::config::HarnessConfig;
use crate::discovery::Discovery;
use crate::emulator::{Emulator, StartOutcome};
use crate::error::HarnessError;
use crate::session;
use crate::transport::TransportHandle;

pub struct Harness {
    config: HarnessConfig,
    emulator: Emulator,
    discovery: Discovery,
    clients: Arc<dyn ClientFactory>,
}

impl Harness {
    /// Create a harness with an explicit discovery backend.
    ///
    /// The transport and path filter in `config` are ignored in favour of
    /// `discovery`; everything else is used as configured.
    pub fn new(config: HarnessConfig, discovery: Discovery, clients: Arc<dyn ClientFactory>) -> Self {
        let emulator = Emulator::new(config.emulator.clone());
        Self {
            config,
            emulator,
            discovery,
            clients,
        }
    }

    /// Create a harness whose discovery is built from `config`.
    pub fn from_config(config: HarnessConfig, clients: Arc<dyn ClientFactory>) -> Result<Self, HarnessError> {
        let discovery = Discovery::from_config(&config)?;
        Ok(Self::new(config, discovery, clients))
    }

    /// Create a harness from the JSON config file at `path`.
    ///
    /// Unlike [`HarnessConfig::load`], a missing or malformed file is an error.
    pub fn from_config_file(path: &Path, clients: Arc<dyn ClientFactory>) -> Result<Self, HarnessError> {
        let config = HarnessConfig::load_from(path)?;
        Self::from_config(config, clients)
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    /// Process id of the emulator this harness is tracking.
    pub fn current_pid(&self) -> Option<u32> {
        self.emulator.pid()
    }

    pub fn is_running(&self) -> bool {
        self.emulator.is_running()
    }

    /// Start the emulator and wait until it is discoverable.
    ///
    /// A no-op if the emulator is already running. If the emulator exits or
    /// does not become discoverable in time, it is stopped again before the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// - [`HarnessError::Emulator`] if spawning fails or the process exits during startup
    /// - [`HarnessError::StartupTimeout`] if no debuggable transport appears in time
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<(), HarnessError> {
        match self.emulator.start()? {
            StartOutcome::AlreadyRunning(pid) => {
                debug!(pid, "start requested while running");
                Ok(())
            }
            StartOutcome::Spawned(pid) => match self.wait_until_ready().await {
                Ok(handle) => {
                    info!(pid, transport = %handle, "emulator ready");
                    Ok(())
                }
                Err(e) => {
                    warn!(pid, error = %e, "emulator failed to come up");
                    if let Err(stop_err) = self.emulator.stop().await {
                        warn!(error = %stop_err, "failed to stop emulator after startup failure");
                    }
                    Err(e)
                }
            },
        }
    }

    /// Poll discovery until the emulator exposes a debuggable transport.
    ///
    /// Fails fast when the emulator process exits while waiting.
    pub async fn wait_until_ready(&mut self) -> Result<TransportHandle, HarnessError> {
        let timeout = self.config.startup_timeout();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            self.emulator.check_alive()?;

            match self.discovery.find_debuggable().await {
                Ok(handle) => return Ok(handle),
                Err(e) => debug!(error = %e, "emulator not discoverable yet"),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(HarnessError::StartupTimeout(timeout));
            }

            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Terminate the emulator process group. A no-op when nothing is running.
    pub async fn stop(&mut self) -> Result<(), HarnessError> {
        Ok(self.emulator.stop().await?)
    }

    /// Wipe the device and load it with the given key material and settings.
    pub async fn provision(
        &self,
        mnemonic: &str,
        pin: &str,
        passphrase_protection: bool,
        label: &str,
    ) -> Result<(), HarnessError> {
        self.provision_with(&LoadDevice::new(mnemonic, pin, passphrase_protection, label))
            .await
    }

    pub async fn provision_with(&self, settings: &LoadDevice) -> Result<(), HarnessError> {
        session::provision(&self.discovery, self.clients.as_ref(), settings).await
    }

    /// Press the confirm button over the debug link.
    ///
    /// Assumes something on the device is waiting for confirmation; what the
    /// device does otherwise is up to its firmware.
    pub async fn confirm_yes(&self) -> Result<(), HarnessError> {
        session::confirm_yes(&self.discovery, self.clients.as_ref(), self.config.debug_settle_delay()).await
    }

    /// Swipe down over the debug link.
    pub async fn swipe_down(&self) -> Result<(), HarnessError> {
        session::swipe_down(&self.discovery, self.clients.as_ref(), self.config.debug_settle_delay()).await
    }
}
