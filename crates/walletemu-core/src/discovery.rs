//! Selection of a debuggable transport.
//!
//! Discovery performs a single enumeration pass over one backend and takes
//! the first handle that exposes a debug link. It never retries on its own;
//! [`Discovery::wait_for_debuggable`] is the bounded polling variant used
//! while an emulator is still coming up.
//!
//! Enumeration order is owned by the transport layer. Rigs with more than one
//! emulator should set a path filter instead of relying on it.

use std::pin::pin;
use std::time::Duration;

use futures::{future, Stream, StreamExt};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::HarnessConfig;
use crate::transport::{Enumeration, TransportBackend, TransportError, TransportHandle, TransportKind};

/// Errors that can occur while looking for a debuggable transport.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The enumeration was empty or nothing in it exposes a debug link.
    #[error("No debuggable device found")]
    NotFound,

    /// No debuggable device appeared before the probe deadline.
    #[error("No debuggable device appeared within {0:?}")]
    Timeout(Duration),

    /// The transport layer failed while enumerating.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

fn selectable(handle: &TransportHandle, path_filter: Option<&str>) -> bool {
    handle.has_debug() && path_filter.map_or(true, |path| handle.path() == path)
}

/// Return the first debuggable handle, pulling no further items once found.
///
/// With a `path_filter`, only a handle with exactly that path qualifies.
pub async fn find_debuggable<S>(handles: S, path_filter: Option<&str>) -> Result<TransportHandle, DiscoveryError>
where
    S: Stream<Item = TransportHandle>,
{
    let mut handles = pin!(handles);
    while let Some(handle) = handles.next().await {
        if selectable(&handle, path_filter) {
            return Ok(handle);
        }
    }
    Err(DiscoveryError::NotFound)
}

/// One transport backend plus the selection policy applied to it.
pub struct Discovery {
    backend: Box<dyn TransportBackend>,
    path_filter: Option<String>,
}

impl Discovery {
    pub fn new(backend: Box<dyn TransportBackend>) -> Self {
        Self {
            backend,
            path_filter: None,
        }
    }

    /// Build the backend and filter described by `config`.
    pub fn from_config(config: &HarnessConfig) -> Result<Self, TransportError> {
        let discovery = Self::new(config.transport.build()?);
        Ok(match &config.path_filter {
            Some(path) => discovery.with_path_filter(path.clone()),
            None => discovery,
        })
    }

    pub fn with_path_filter(mut self, path: impl Into<String>) -> Self {
        self.path_filter = Some(path.into());
        self
    }

    pub fn kind(&self) -> TransportKind {
        self.backend.kind()
    }

    pub fn path_filter(&self) -> Option<&str> {
        self.path_filter.as_deref()
    }

    /// One raw enumeration pass, without any filtering.
    pub async fn enumerate(&self) -> Result<Enumeration, DiscoveryError> {
        Ok(self.backend.enumerate().await?)
    }

    /// One enumeration pass; the first debuggable handle wins.
    ///
    /// # Errors
    ///
    /// - [`DiscoveryError::NotFound`] if nothing debuggable (and matching the filter) is present
    /// - [`DiscoveryError::Transport`] if the backend fails
    #[instrument(skip(self), fields(kind = %self.kind()))]
    pub async fn find_debuggable(&self) -> Result<TransportHandle, DiscoveryError> {
        let handles = self.enumerate().await?;
        let handle = find_debuggable(handles, self.path_filter()).await?;
        debug!(transport = %handle, "found debuggable transport");
        Ok(handle)
    }

    /// Number of debuggable handles (matching the filter) in one pass.
    pub async fn count_debuggable(&self) -> Result<usize, DiscoveryError> {
        let filter = self.path_filter();
        Ok(self
            .enumerate()
            .await?
            .filter(|handle| future::ready(selectable(handle, filter)))
            .count()
            .await)
    }

    /// Poll [`find_debuggable`](Self::find_debuggable) until it succeeds.
    ///
    /// Transport errors while polling are treated like an empty enumeration.
    ///
    /// # Errors
    ///
    /// - [`DiscoveryError::Timeout`] if nothing debuggable appears within `timeout`
    pub async fn wait_for_debuggable(
        &self,
        timeout: Duration,
        interval: Duration,
    ) -> Result<TransportHandle, DiscoveryError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match self.find_debuggable().await {
                Ok(handle) => return Ok(handle),
                Err(e) => debug!(error = %e, "transport not ready"),
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(DiscoveryError::Timeout(timeout));
            }

            tokio::time::sleep(interval).await;
        }
    }
}
