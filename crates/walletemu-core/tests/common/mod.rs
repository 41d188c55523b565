//! Shared test helpers for walletemu-core integration tests.
//!
//! Provides a recording [`ClientFactory`] double, transport backends that do
//! not need a real emulator, and a UDP mock that answers discovery probes.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use walletemu_core::client::{
    ClientError, ClientFactory, Connection, DebugLink, DeviceClient, LoadDevice,
};
use walletemu_core::config::HarnessConfig;
use walletemu_core::emulator::EmulatorConfig;
use walletemu_core::transport::{
    Enumeration, TransportBackend, TransportError, TransportHandle, TransportKind,
};

pub const ALL_ALL: &str = "all all all all all all all all all all all all";

/// Install a test-writer subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A temp path unique to this test process and `name`.
pub fn unique_path(name: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    std::env::temp_dir().join(format!(
        "walletemu_{}_{}_{}",
        name,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    ))
}

// ---------------------------------------------------------------------------
// Recording client factory
// ---------------------------------------------------------------------------

/// One call observed by the recording doubles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ClientCreated(String),
    ClientOpen,
    Wipe,
    Load { words: usize, pin: String, passphrase_protection: bool, label: String },
    ClientClose,
    DebugCreated(String),
    DebugOpen,
    PressYes,
    SwipeDown,
    DebugClose,
}

/// Which call should fail, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailOn {
    #[default]
    Nothing,
    Open,
    Wipe,
    Load,
    PressYes,
    Close,
}

/// A [`ClientFactory`] whose clients record every call in order.
#[derive(Clone, Default)]
pub struct RecordingFactory {
    calls: Arc<Mutex<Vec<Call>>>,
    fail_on: FailOn,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(fail_on: FailOn) -> Self {
        Self {
            fail_on,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }
}

struct RecordingClient {
    calls: Arc<Mutex<Vec<Call>>>,
    fail_on: FailOn,
    debug: bool,
}

impl RecordingClient {
    fn record(&self, call: Call, fail: FailOn) -> Result<(), ClientError> {
        self.calls.lock().unwrap().push(call);
        if self.fail_on == fail {
            return Err(ClientError::Failure(format!("{fail:?} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for RecordingClient {
    async fn open(&mut self) -> Result<(), ClientError> {
        let call = if self.debug { Call::DebugOpen } else { Call::ClientOpen };
        self.record(call, FailOn::Open)
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        let call = if self.debug { Call::DebugClose } else { Call::ClientClose };
        self.record(call, FailOn::Close)
    }
}

#[async_trait]
impl DeviceClient for RecordingClient {
    async fn wipe(&mut self) -> Result<(), ClientError> {
        self.record(Call::Wipe, FailOn::Wipe)
    }

    async fn load_device_by_mnemonic(&mut self, settings: &LoadDevice) -> Result<(), ClientError> {
        let call = Call::Load {
            words: settings.words().count(),
            pin: settings.pin.clone(),
            passphrase_protection: settings.passphrase_protection,
            label: settings.label.clone(),
        };
        self.record(call, FailOn::Load)
    }
}

#[async_trait]
impl DebugLink for RecordingClient {
    async fn press_yes(&mut self) -> Result<(), ClientError> {
        self.record(Call::PressYes, FailOn::PressYes)
    }

    async fn swipe_down(&mut self) -> Result<(), ClientError> {
        self.record(Call::SwipeDown, FailOn::Nothing)
    }
}

impl ClientFactory for RecordingFactory {
    fn client(&self, handle: &TransportHandle) -> Result<Box<dyn DeviceClient>, ClientError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::ClientCreated(handle.path().to_string()));
        Ok(Box::new(RecordingClient {
            calls: self.calls.clone(),
            fail_on: self.fail_on,
            debug: false,
        }))
    }

    fn debug_link(&self, handle: &TransportHandle) -> Result<Box<dyn DebugLink>, ClientError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::DebugCreated(handle.path().to_string()));
        Ok(Box::new(RecordingClient {
            calls: self.calls.clone(),
            fail_on: self.fail_on,
            debug: true,
        }))
    }
}

// ---------------------------------------------------------------------------
// Transport backends
// ---------------------------------------------------------------------------

/// Backend that returns the same handles on every pass.
pub struct StaticBackend {
    pub handles: Vec<TransportHandle>,
}

impl StaticBackend {
    pub fn debuggable(path: &str) -> Self {
        Self {
            handles: vec![TransportHandle::new(TransportKind::Bridge, path, true)],
        }
    }

    pub fn empty() -> Self {
        Self { handles: Vec::new() }
    }
}

#[async_trait]
impl TransportBackend for StaticBackend {
    fn kind(&self) -> TransportKind {
        TransportKind::Bridge
    }

    async fn enumerate(&self) -> Result<Enumeration, TransportError> {
        Ok(stream::iter(self.handles.clone()).boxed())
    }
}

/// Backend that sees one debuggable device while the process whose pid is
/// written to `pidfile` is running.
///
/// Pair it with [`pidfile_emulator`] so the "device" lives and dies with the
/// emulator process the harness manages.
pub struct PidFileBackend {
    pidfile: PathBuf,
}

impl PidFileBackend {
    pub fn new(pidfile: &Path) -> Self {
        Self {
            pidfile: pidfile.to_path_buf(),
        }
    }

    fn running_pid(&self) -> Option<u32> {
        let pid: u32 = std::fs::read_to_string(&self.pidfile).ok()?.trim().parse().ok()?;
        process_running(pid).then_some(pid)
    }
}

#[async_trait]
impl TransportBackend for PidFileBackend {
    fn kind(&self) -> TransportKind {
        TransportKind::Bridge
    }

    async fn enumerate(&self) -> Result<Enumeration, TransportError> {
        let handle = self
            .running_pid()
            .map(|pid| TransportHandle::new(TransportKind::Bridge, format!("emulator{pid}"), true));
        Ok(stream::iter(handle).boxed())
    }
}

/// Whether `pid` exists and is not a zombie.
///
/// `kill(pid, 0)` alone also succeeds for zombies, so the state in
/// `/proc/<pid>/stat` decides where it is available.
pub fn process_running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z" && state != "X"),
        Err(_) if cfg!(target_os = "linux") => false,
        Err(_) => unsafe { libc::kill(pid as libc::pid_t, 0) == 0 },
    }
}

/// Emulator config for a stand-in process that records its pid, then sleeps.
pub fn pidfile_emulator(pidfile: &Path) -> EmulatorConfig {
    EmulatorConfig::shell(format!("echo $$ > {}; exec sleep 30", pidfile.display()))
}

/// Harness config with short timings, suitable for tests.
pub fn fast_config(emulator: EmulatorConfig) -> HarnessConfig {
    HarnessConfig {
        emulator,
        startup_timeout_ms: 3_000,
        poll_interval_ms: 20,
        debug_settle_ms: 10,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// UDP mock emulator
// ---------------------------------------------------------------------------

/// A mock emulator answering probes on a main port and on the debug port above it.
pub struct MockUdpEmulator {
    pub addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for MockUdpEmulator {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn answer_probes(socket: UdpSocket) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; 64];
        while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
            if &buf[..n] == b"PINGPING" {
                let _ = socket.send_to(b"PONGPONG", peer).await;
            }
        }
    })
}

/// Bind two consecutive loopback ports and answer probes on both.
///
/// With `debug` unset only the main port answers.
pub async fn mock_udp_emulator(debug: bool) -> MockUdpEmulator {
    for _ in 0..50 {
        let main = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = main.local_addr().unwrap();
        let Some(debug_port) = addr.port().checked_add(1) else {
            continue;
        };
        // Reserve the debug port even when it stays silent, so nothing else answers there.
        let Ok(debug_socket) = UdpSocket::bind(("127.0.0.1", debug_port)).await else {
            continue;
        };

        let mut tasks = vec![answer_probes(main)];
        if debug {
            tasks.push(answer_probes(debug_socket));
        } else {
            tasks.push(tokio::spawn(async move {
                let _hold = debug_socket;
                std::future::pending::<()>().await;
            }));
        }
        return MockUdpEmulator { addr, tasks };
    }
    panic!("could not bind two consecutive UDP ports");
}
