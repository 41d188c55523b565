//! Lifecycle management for the emulator process.
//!
//! [`Emulator`] starts the emulator binary through `sh -c` in a fresh process
//! group and stops it by signalling the whole group, so helpers forked by the
//! emulator go down with it.
//!
//! # Overview
//!
//! 1. **Start** spawns the configured command line unless a live process is
//!    already tracked (idempotent)
//! 2. **Check** reports a tracked process that has already exited, which is
//!    how a missing binary or a port conflict surfaces
//! 3. **Stop** sends `SIGTERM` to the process group, reaps the child and
//!    waits for the rest of the group to exit; whatever is still alive after
//!    the grace period gets `SIGKILL`
//!
//! [`Emulator::stop`] waits on the tokio timer; [`Emulator::stop_blocking`]
//! is for synchronous callers. Dropping an [`Emulator`] stops a
//! still-tracked process, off the async workers when a runtime is present.
//!
//! # Example
//!
//! ```no_run
//! use walletemu_core::emulator::{Emulator, EmulatorConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut emulator = Emulator::new(EmulatorConfig {
//!     program: "./tests/emulator".into(),
//!     ..Default::default()
//! });
//!
//! let pid = emulator.start()?.pid();
//! println!("emulator running as {pid}");
//! emulator.stop_blocking()?;
//! # Ok(())
//! # }
//! ```

use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

const REAP_POLL: Duration = Duration::from_millis(20);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How to launch the emulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Path to the emulator binary.
    pub program: String,
    /// Optimization level passed as `-O<n>`.
    pub optimization: u8,
    /// Heap size passed as `-X heapsize=<size>`.
    pub heap_size: String,
    /// Entry module passed as `-m <module>`.
    pub main_module: String,
    /// Appended verbatim after the generated flags.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
    /// Full shell command line; replaces everything above when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Working directory for the emulator process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// How long the process group gets to exit after `SIGTERM` before it is killed.
    pub stop_grace_ms: u64,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            program: "./emulator".to_string(),
            optimization: 0,
            heap_size: "20M".to_string(),
            main_module: "main".to_string(),
            extra_args: Vec::new(),
            command: None,
            working_dir: None,
            stop_grace_ms: 5_000,
        }
    }
}

impl EmulatorConfig {
    /// Config that runs `command` verbatim through the shell.
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Default::default()
        }
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// The shell command line used to launch the emulator.
    pub fn command_line(&self) -> String {
        if let Some(command) = &self.command {
            return command.clone();
        }

        let mut parts = vec![
            self.program.clone(),
            format!("-O{}", self.optimization),
            "-X".to_string(),
            format!("heapsize={}", self.heap_size),
            "-m".to_string(),
            self.main_module.clone(),
        ];
        parts.extend(self.extra_args.iter().cloned());
        parts.join(" ")
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors specific to emulator process management.
#[derive(Error, Debug)]
pub enum EmulatorError {
    /// The shell could not be spawned at all.
    #[error("Failed to spawn emulator: {0}")]
    Spawn(#[source] std::io::Error),

    /// The emulator process exited while it was expected to be running.
    #[error("Emulator exited early: {0}")]
    ExitedEarly(String),

    /// An operation was attempted that requires a tracked process.
    #[error("Emulator is not running")]
    NotRunning,

    /// The process group could not be signalled.
    #[error("Failed to signal emulator process group: {0}")]
    Signal(#[source] std::io::Error),

    /// An I/O error occurred while waiting on the process.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Emulator
// ---------------------------------------------------------------------------

/// Result of [`Emulator::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new process was spawned.
    Spawned(u32),
    /// A live process was already tracked; nothing was spawned.
    AlreadyRunning(u32),
}

impl StartOutcome {
    pub fn pid(&self) -> u32 {
        match *self {
            StartOutcome::Spawned(pid) | StartOutcome::AlreadyRunning(pid) => pid,
        }
    }
}

struct TrackedProcess {
    child: Child,
    pgid: u32,
    status: Option<ExitStatus>,
}

impl TrackedProcess {
    /// Reap the shell if it has exited, then report whether the whole group is gone.
    fn poll_exit(&mut self) -> Result<bool, EmulatorError> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status.is_some() && !group_alive(self.pgid))
    }

    fn kill(&mut self) -> Result<(), EmulatorError> {
        warn!(pgid = self.pgid, "emulator group ignored SIGTERM, killing it");
        signal_group(self.pgid, libc::SIGKILL).map_err(EmulatorError::Signal)?;
        if self.status.is_none() {
            self.status = Some(self.child.wait()?);
        }
        Ok(())
    }

    fn finish(self) {
        if let Some(status) = self.status {
            info!(pgid = self.pgid, %status, "emulator stopped");
        }
    }
}

/// Wait for a signalled group to exit, sleeping on the current thread.
fn terminate_blocking(mut process: TrackedProcess, grace: Duration) -> Result<(), EmulatorError> {
    let deadline = Instant::now() + grace;
    while !process.poll_exit()? {
        if Instant::now() >= deadline {
            process.kill()?;
            break;
        }
        std::thread::sleep(REAP_POLL);
    }
    process.finish();
    Ok(())
}

/// Wait for a signalled group to exit on the tokio timer.
async fn terminate(mut process: TrackedProcess, grace: Duration) -> Result<(), EmulatorError> {
    let deadline = tokio::time::Instant::now() + grace;
    while !process.poll_exit()? {
        if tokio::time::Instant::now() >= deadline {
            process.kill()?;
            break;
        }
        tokio::time::sleep(REAP_POLL).await;
    }
    process.finish();
    Ok(())
}

/// Owns at most one emulator process.
pub struct Emulator {
    config: EmulatorConfig,
    process: Option<TrackedProcess>,
}

impl Emulator {
    pub fn new(config: EmulatorConfig) -> Self {
        Self {
            config,
            process: None,
        }
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// Process id of the tracked emulator.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.child.id())
    }

    /// Process-group id of the tracked emulator.
    pub fn pgid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.pgid)
    }

    /// Returns `true` while a process is tracked.
    ///
    /// A tracked process may have exited since; see [`check_alive`](Self::check_alive).
    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    /// Spawn the emulator unless a live one is already tracked.
    ///
    /// A tracked process that has exited in the meantime is reaped and
    /// replaced. The emulator is not reachable yet when this returns; callers
    /// wait for it through discovery.
    ///
    /// # Errors
    ///
    /// - [`EmulatorError::Spawn`] if the shell cannot be started
    /// - [`EmulatorError::Io`] if querying the tracked child fails
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<StartOutcome, EmulatorError> {
        if let Some(process) = self.process.as_mut() {
            let pid = process.child.id();
            match process.child.try_wait()? {
                None => {
                    debug!(pid, "emulator already running");
                    return Ok(StartOutcome::AlreadyRunning(pid));
                }
                Some(status) => {
                    warn!(pid, %status, "tracked emulator had exited, respawning");
                    self.process = None;
                }
            }
        }

        let command_line = self.config.command_line();
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&command_line).stdin(Stdio::null());
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        // New process group with pgid == pid, so stop() can signal the whole tree.
        cmd.process_group(0);

        let child = cmd.spawn().map_err(EmulatorError::Spawn)?;
        let pid = child.id();
        info!(pid, command = %command_line, "emulator started");

        self.process = Some(TrackedProcess {
            child,
            pgid: pid,
            status: None,
        });
        Ok(StartOutcome::Spawned(pid))
    }

    /// Verify the tracked process has not exited.
    ///
    /// An exited process is reaped and forgotten.
    ///
    /// # Errors
    ///
    /// - [`EmulatorError::NotRunning`] if nothing is tracked
    /// - [`EmulatorError::ExitedEarly`] if the tracked process has exited
    pub fn check_alive(&mut self) -> Result<(), EmulatorError> {
        let process = self.process.as_mut().ok_or(EmulatorError::NotRunning)?;
        match process.child.try_wait()? {
            None => Ok(()),
            Some(status) => {
                self.process = None;
                Err(EmulatorError::ExitedEarly(status.to_string()))
            }
        }
    }

    /// Terminate the tracked process group and forget it.
    ///
    /// Sends `SIGTERM` to the group, reaps the shell and waits until no
    /// member of the group is left. Members still alive after
    /// [`stop_grace`](EmulatorConfig::stop_grace) are killed with `SIGKILL`.
    /// A no-op when nothing is tracked; a group that has already gone away is
    /// not an error.
    ///
    /// # Errors
    ///
    /// - [`EmulatorError::Signal`] if the group cannot be signalled (the process stays tracked
    ///   when this happens on the initial `SIGTERM`)
    /// - [`EmulatorError::Io`] if reaping the child fails
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> Result<(), EmulatorError> {
        match self.signal_stop()? {
            Some(process) => terminate(process, self.config.stop_grace()).await,
            None => Ok(()),
        }
    }

    /// [`stop`](Self::stop) for synchronous callers; sleeps on the current thread.
    #[instrument(skip(self))]
    pub fn stop_blocking(&mut self) -> Result<(), EmulatorError> {
        match self.signal_stop()? {
            Some(process) => terminate_blocking(process, self.config.stop_grace()),
            None => Ok(()),
        }
    }

    /// Send `SIGTERM` to the tracked group and hand it over for reaping.
    fn signal_stop(&mut self) -> Result<Option<TrackedProcess>, EmulatorError> {
        let Some(process) = self.process.take() else {
            return Ok(None);
        };

        if let Err(e) = signal_group(process.pgid, libc::SIGTERM) {
            self.process = Some(process);
            return Err(EmulatorError::Signal(e));
        }
        debug!(pgid = process.pgid, "sent SIGTERM to emulator group");
        Ok(Some(process))
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        let process = match self.signal_stop() {
            Ok(Some(process)) => process,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "failed to stop emulator on drop");
                return;
            }
        };

        let grace = self.config.stop_grace();
        let reap = move || {
            if let Err(e) = terminate_blocking(process, grace) {
                warn!(error = %e, "failed to stop emulator on drop");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(reap);
            }
            Err(_) => reap(),
        }
    }
}

/// Whether any process is left in group `pgid`.
fn group_alive(pgid: u32) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return false;
    };
    // SAFETY: kill(2) with signal 0 only checks for existence.
    let rc = unsafe { libc::kill(-pgid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Send `signal` to every process in group `pgid`; a vanished group is fine.
fn signal_group(pgid: u32, signal: libc::c_int) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pgid)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc == 0 {
        return Ok(());
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
