//! Debug sessions and the scripted operations run through them.
//!
//! A [`DebugSession`] wraps one unopened [`Connection`] created for a
//! discovered transport. It goes `Idle -> Open -> Closed` exactly once:
//! a closed session refuses to reopen, and [`DebugSession::finish`] closes
//! it whatever the operation's outcome was.
//!
//! The operations each re-discover their transport, open one session, do one
//! thing and close it:
//!
//! - [`provision`] wipes the device and loads deterministic key material
//! - [`confirm_yes`] / [`swipe_down`] inject input over the debug link

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::client::{ClientError, ClientFactory, Connection, LoadDevice};
use crate::discovery::Discovery;
use crate::error::HarnessError;
use crate::transport::TransportHandle;

/// Errors raised by the session state machine.
#[derive(Error, Debug)]
pub enum SessionError {
    /// `open` was called on a session that is already open.
    #[error("session is already open")]
    AlreadyOpen,

    /// The session has not been opened yet.
    #[error("session is not open")]
    NotOpen,

    /// The session was closed and cannot be reused.
    #[error("session has been closed and cannot be reused")]
    Closed,

    /// The underlying client call failed.
    #[error("client error: {0}")]
    Client(#[from] ClientError),
}

/// Lifecycle state of a [`DebugSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Open,
    Closed,
}

/// A single-use session over one client connection.
pub struct DebugSession<C: Connection + ?Sized> {
    handle: TransportHandle,
    link: Box<C>,
    state: SessionState,
}

impl<C: Connection + ?Sized> DebugSession<C> {
    pub fn new(handle: TransportHandle, link: Box<C>) -> Self {
        Self {
            handle,
            link,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The transport this session was created for.
    pub fn handle(&self) -> &TransportHandle {
        &self.handle
    }

    /// Open the connection.
    ///
    /// A failed open leaves the session `Idle`: nothing was acquired, so
    /// there is nothing to close.
    pub async fn open(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Open => return Err(SessionError::AlreadyOpen),
            SessionState::Closed => return Err(SessionError::Closed),
            SessionState::Idle => {}
        }

        self.link.open().await?;
        self.state = SessionState::Open;
        debug!(transport = %self.handle, "session opened");
        Ok(())
    }

    /// The open connection.
    pub fn link(&mut self) -> Result<&mut C, SessionError> {
        match self.state {
            SessionState::Open => Ok(&mut *self.link),
            SessionState::Idle => Err(SessionError::NotOpen),
            SessionState::Closed => Err(SessionError::Closed),
        }
    }

    /// Close the connection.
    ///
    /// The session counts as closed afterwards even if the client's close
    /// call fails.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Idle => return Err(SessionError::NotOpen),
            SessionState::Closed => return Err(SessionError::Closed),
            SessionState::Open => {}
        }

        self.state = SessionState::Closed;
        self.link.close().await?;
        debug!(transport = %self.handle, "session closed");
        Ok(())
    }

    /// Close the session and combine the close result with `outcome`.
    ///
    /// The operation's own error takes precedence; a close error is only
    /// returned when the operation succeeded.
    pub async fn finish<T>(mut self, outcome: Result<T, SessionError>) -> Result<T, SessionError> {
        let closed = match self.state {
            SessionState::Open => self.close().await,
            _ => Ok(()),
        };

        match (outcome, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(close_err)) => Err(close_err),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "failed to close session after error");
                Err(e)
            }
        }
    }
}

/// Simulated input sent over the debug link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugInput {
    PressYes,
    SwipeDown,
}

/// Wipe the first debuggable device and load it with `settings`.
///
/// The client session is closed on every exit path.
///
/// # Errors
///
/// - [`HarnessError::Discovery`] if no debuggable transport is present
/// - [`HarnessError::Session`] if opening, wiping, loading or closing fails
#[instrument(skip_all, fields(label = %settings.label))]
pub async fn provision(
    discovery: &Discovery,
    clients: &dyn ClientFactory,
    settings: &LoadDevice,
) -> Result<(), HarnessError> {
    let handle = discovery.find_debuggable().await?;
    info!(transport = %handle, "provisioning device");

    let client = clients.client(&handle).map_err(SessionError::from)?;
    let mut session = DebugSession::new(handle, client);
    session.open().await?;

    let outcome = async {
        let client = session.link()?;
        client.wipe().await?;
        client.load_device_by_mnemonic(settings).await?;
        Ok::<(), SessionError>(())
    }
    .await;

    session.finish(outcome).await?;
    Ok(())
}

/// Send one simulated input over the debug link of the first debuggable device.
///
/// Waits `settle` after opening the link before sending. The link is closed
/// on every exit path. Whether anything was pending on the device is not
/// checked.
#[instrument(skip(discovery, clients))]
pub async fn send_input(
    discovery: &Discovery,
    clients: &dyn ClientFactory,
    input: DebugInput,
    settle: Duration,
) -> Result<(), HarnessError> {
    let handle = discovery.find_debuggable().await?;
    let link = clients.debug_link(&handle).map_err(SessionError::from)?;
    let mut session = DebugSession::new(handle, link);
    session.open().await?;

    let outcome = async {
        tokio::time::sleep(settle).await;
        let link = session.link()?;
        match input {
            DebugInput::PressYes => link.press_yes().await?,
            DebugInput::SwipeDown => link.swipe_down().await?,
        }
        Ok::<(), SessionError>(())
    }
    .await;

    session.finish(outcome).await?;
    Ok(())
}

/// Press the confirm button over the debug link.
pub async fn confirm_yes(
    discovery: &Discovery,
    clients: &dyn ClientFactory,
    settle: Duration,
) -> Result<(), HarnessError> {
    send_input(discovery, clients, DebugInput::PressYes, settle).await
}

/// Swipe down over the debug link.
pub async fn swipe_down(
    discovery: &Discovery,
    clients: &dyn ClientFactory,
    settle: Duration,
) -> Result<(), HarnessError> {
    send_input(discovery, clients, DebugInput::SwipeDown, settle).await
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::transport::TransportKind;

    #[derive(Default)]
    struct Counts {
        opened: usize,
        closed: usize,
    }

    struct StubLink {
        counts: Arc<Mutex<Counts>>,
        fail_open: bool,
        fail_close: bool,
    }

    #[async_trait]
    impl Connection for StubLink {
        async fn open(&mut self) -> Result<(), ClientError> {
            if self.fail_open {
                return Err(ClientError::Transport("wrong previous session".into()));
            }
            self.counts.lock().unwrap().opened += 1;
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ClientError> {
            self.counts.lock().unwrap().closed += 1;
            if self.fail_close {
                return Err(ClientError::Transport("release failed".into()));
            }
            Ok(())
        }
    }

    fn session(fail_open: bool, fail_close: bool) -> (DebugSession<StubLink>, Arc<Mutex<Counts>>) {
        let counts = Arc::new(Mutex::new(Counts::default()));
        let link = StubLink {
            counts: counts.clone(),
            fail_open,
            fail_close,
        };
        let handle = TransportHandle::new(TransportKind::Bridge, "1", true);
        (DebugSession::new(handle, Box::new(link)), counts)
    }

    #[tokio::test]
    async fn open_close_lifecycle() {
        let (mut session, counts) = session(false, false);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(matches!(session.link(), Err(SessionError::NotOpen)));

        session.open().await.unwrap();
        assert_eq!(session.state(), SessionState::Open);
        assert!(session.link().is_ok());

        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);

        let counts = counts.lock().unwrap();
        assert_eq!((counts.opened, counts.closed), (1, 1));
    }

    #[tokio::test]
    async fn closed_session_cannot_be_reused() {
        let (mut session, _) = session(false, false);
        session.open().await.unwrap();
        session.close().await.unwrap();

        assert!(matches!(session.open().await, Err(SessionError::Closed)));
        assert!(matches!(session.link(), Err(SessionError::Closed)));
        assert!(matches!(session.close().await, Err(SessionError::Closed)));
    }

    #[tokio::test]
    async fn double_open_is_rejected() {
        let (mut session, _) = session(false, false);
        session.open().await.unwrap();
        assert!(matches!(session.open().await, Err(SessionError::AlreadyOpen)));
    }

    #[tokio::test]
    async fn close_before_open_is_rejected() {
        let (mut session, _) = session(false, false);
        assert!(matches!(session.close().await, Err(SessionError::NotOpen)));
    }

    #[tokio::test]
    async fn failed_open_stays_idle() {
        let (mut session, counts) = session(true, false);
        assert!(matches!(session.open().await, Err(SessionError::Client(_))));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(counts.lock().unwrap().closed, 0);
    }

    #[tokio::test]
    async fn finish_closes_on_error() {
        let (mut session, counts) = session(false, false);
        session.open().await.unwrap();

        let outcome: Result<(), SessionError> = Err(ClientError::Failure("wipe refused".into()).into());
        let result = session.finish(outcome).await;

        match result {
            Err(SessionError::Client(ClientError::Failure(msg))) => assert_eq!(msg, "wipe refused"),
            other => panic!("expected wipe failure, got: {other:?}"),
        }
        assert_eq!(counts.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn finish_reports_close_error_after_success() {
        let (mut session, _) = session(false, true);
        session.open().await.unwrap();

        let result = session.finish(Ok(7)).await;
        assert!(matches!(
            result,
            Err(SessionError::Client(ClientError::Transport(_)))
        ));
    }

    #[tokio::test]
    async fn finish_prefers_operation_error_over_close_error() {
        let (mut session, counts) = session(false, true);
        session.open().await.unwrap();

        let outcome: Result<(), SessionError> = Err(ClientError::Failure("load refused".into()).into());
        match session.finish(outcome).await {
            Err(SessionError::Client(ClientError::Failure(msg))) => assert_eq!(msg, "load refused"),
            other => panic!("expected load failure, got: {other:?}"),
        }
        assert_eq!(counts.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn finish_passes_value_through() {
        let (mut session, _) = session(false, false);
        session.open().await.unwrap();
        assert_eq!(session.finish(Ok("done")).await.unwrap(), "done");
    }
}
