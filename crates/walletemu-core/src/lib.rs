//! # walletemu-core
//!
//! Test-harness library for hardware-wallet emulators on Unix hosts.
//!
//! This crate launches an emulator process, discovers it over one of the
//! supported transports, and drives debug-only operations against it: wiping
//! and provisioning the device with deterministic key material, and
//! injecting simulated button presses over the debug link.
//!
//! ## Modules
//!
//! - [`config`] - Persistent harness configuration (`~/.walletemu/config.json`)
//! - [`emulator`] - Spawns and terminates the emulator process group
//! - [`transport`] - Transport kinds, handles and per-kind enumeration backends
//! - [`discovery`] - Debuggable-transport selection and the readiness probe
//! - [`client`] - Traits for the external wallet client library
//! - [`session`] - Open/use-once/close debug sessions and the scripted operations
//! - [`harness`] - The manager object tying the pieces together
//! - [`error`] - The crate-level [`HarnessError`](error::HarnessError)
//!
//! ## External Dependencies
//!
//! The wallet wire protocol is not implemented here. Callers supply a
//! [`ClientFactory`](client::ClientFactory) that opens device clients and
//! debug links on a discovered [`TransportHandle`](transport::TransportHandle).
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use walletemu_core::config::HarnessConfig;
//! use walletemu_core::harness::Harness;
//! # use walletemu_core::client::ClientFactory;
//!
//! # async fn example(clients: Arc<dyn ClientFactory>) -> Result<(), Box<dyn std::error::Error>> {
//! let mut harness = Harness::from_config(HarnessConfig::load(), clients)?;
//!
//! harness.start().await?;
//! harness
//!     .provision("all all all all all all all all all all all all", "1234", false, "test")
//!     .await?;
//! harness.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod discovery;
pub mod emulator;
pub mod error;
pub mod harness;
pub mod session;
pub mod transport;
