//! Globe/Fn key bridge.
//!
//! The Globe key only shows up as a modifier-flag change on macOS, so it is
//! watched by a small helper process (`globe-key-listener`) that prints one
//! token per line on stdout:
//!
//! ```text
//! READY     event tap installed
//! FN_DOWN   Globe pressed
//! FN_UP     Globe released
//! ```
//!
//! The bridge parses those lines into [`GlobeSignal`]s tagged with the
//! generation the engine assigned when starting it, so signals from a bridge
//! that has since been replaced can be dropped.

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// File name of the helper binary
pub const HELPER_NAME: &str = "globe-key-listener";

/// Time the helper gets to exit after SIGTERM before it is killed
pub const STOP_GRACE: Duration = Duration::from_millis(500);

/// Event reported by the helper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobeEvent {
    /// Event tap installed, Globe presses will be reported
    Ready,
    /// Globe pressed
    Down,
    /// Globe released
    Up,
    /// Helper stdout closed (process exited or crashed)
    Exited,
}

impl GlobeEvent {
    /// Parse one stdout line; unknown lines yield `None`
    #[must_use]
    pub fn from_line(line: &[u8]) -> Option<Self> {
        match line.trim_ascii() {
            b"READY" => Some(Self::Ready),
            b"FN_DOWN" => Some(Self::Down),
            b"FN_UP" => Some(Self::Up),
            _ => None,
        }
    }
}

/// Helper event tagged with the bridge generation that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobeSignal {
    /// Generation passed to [`GlobeListener::start`]
    pub generation: u64,
    /// What happened
    pub event: GlobeEvent,
}

/// Reasons the bridge could not start
#[derive(Debug, Error)]
pub enum GlobeError {
    /// Globe key is a macOS concept
    #[error("globe key listener is only supported on macOS")]
    UnsupportedPlatform,
    /// No helper binary at any candidate location
    #[error("globe key helper not found (searched {0:?})")]
    HelperMissing(Vec<PathBuf>),
    /// Helper found but failed to launch
    #[error("failed to spawn globe key helper {path}: {source}")]
    Spawn {
        /// Helper path
        path: PathBuf,
        /// Spawn error
        #[source]
        source: io::Error,
    },
    /// Called outside a tokio runtime
    #[error("globe key bridge needs a tokio runtime")]
    NoRuntime,
}

/// Growable byte buffer that splits a stream into newline-terminated lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    /// Append freshly read bytes
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete line (without its newline), if any
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let newline = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=newline).collect();
        line.pop();
        Some(line)
    }

    /// Bytes of an unfinished line still waiting for its newline
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Globe/Fn hold detector driven by the engine
#[cfg_attr(test, mockall::automock)]
pub trait GlobeListener: Send {
    /// Start watching, stopping any previous run first
    ///
    /// Returns false when the bridge cannot run here (wrong platform, helper
    /// missing, spawn failure). Never panics.
    fn start(&mut self, generation: u64, sink: UnboundedSender<GlobeSignal>) -> bool;

    /// Stop watching; idempotent
    fn stop(&mut self);

    /// Whether a helper is currently attached
    fn is_running(&self) -> bool;

    /// Whether `start` could succeed on this machine
    fn is_available(&self) -> bool;
}

struct RunningHelper {
    generation: u64,
    child: Child,
    tasks: [JoinHandle<()>; 2],
}

/// [`GlobeListener`] backed by the `globe-key-listener` helper process
pub struct GlobeBridge {
    helper_path: Option<PathBuf>,
    platform_supported: bool,
    running: Option<RunningHelper>,
}

impl GlobeBridge {
    /// Bridge that looks for the helper at `helper_path` first, then in the
    /// default locations
    #[must_use]
    pub const fn new(helper_path: Option<PathBuf>) -> Self {
        Self {
            helper_path,
            platform_supported: cfg!(target_os = "macos"),
            running: None,
        }
    }

    /// Override platform detection (lets the process plumbing run on any unix)
    #[must_use]
    pub const fn with_platform_supported(mut self, supported: bool) -> Self {
        self.platform_supported = supported;
        self
    }

    /// Candidate helper locations, in lookup order
    #[must_use]
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(path) = &self.helper_path {
            paths.push(path.clone());
        }
        if let Some(dir) = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            paths.push(dir.join(HELPER_NAME));
            // Foo.app/Contents/MacOS/<exe> -> Foo.app/Contents/Resources
            paths.push(dir.join("..").join("Resources").join(HELPER_NAME));
        }
        paths
    }

    /// First candidate that exists on disk
    ///
    /// # Errors
    /// Returns [`GlobeError::HelperMissing`] listing every path searched.
    pub fn find_helper(&self) -> Result<PathBuf, GlobeError> {
        let candidates = self.candidates();
        candidates
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or(GlobeError::HelperMissing(candidates))
    }

    fn try_start(
        &mut self,
        generation: u64,
        sink: UnboundedSender<GlobeSignal>,
    ) -> Result<(), GlobeError> {
        if !self.platform_supported {
            return Err(GlobeError::UnsupportedPlatform);
        }
        let runtime = Handle::try_current().map_err(|_| GlobeError::NoRuntime)?;
        let path = self.find_helper()?;
        make_executable(&path);

        let mut child = Command::new(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| GlobeError::Spawn {
                path: path.clone(),
                source,
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            if let Err(e) = child.start_kill() {
                debug!(generation, error = %e, "failed to kill globe key helper");
            }
            return Err(GlobeError::Spawn {
                path,
                source: io::Error::other("helper pipes unavailable"),
            });
        };

        let reader = runtime.spawn(read_tokens(stdout, generation, sink));
        let logger = runtime.spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(generation, stderr = %line.trim(), "globe key helper");
            }
        });

        info!(path = %path.display(), generation, pid = ?child.id(), "spawned globe key helper");
        self.running = Some(RunningHelper {
            generation,
            child,
            tasks: [reader, logger],
        });
        Ok(())
    }
}

impl GlobeListener for GlobeBridge {
    fn start(&mut self, generation: u64, sink: UnboundedSender<GlobeSignal>) -> bool {
        self.stop();
        match self.try_start(generation, sink) {
            Ok(()) => true,
            Err(GlobeError::UnsupportedPlatform) => {
                debug!("globe key listener not supported on this platform");
                false
            }
            Err(e) => {
                error!(error = %e, "globe key listener unavailable");
                false
            }
        }
    }

    fn stop(&mut self) {
        let Some(RunningHelper {
            generation,
            mut child,
            tasks,
        }) = self.running.take()
        else {
            return;
        };
        for task in tasks {
            task.abort();
        }

        terminate(&child);
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    match tokio::time::timeout(STOP_GRACE, child.wait()).await {
                        Ok(Ok(status)) => debug!(generation, %status, "globe key helper exited"),
                        Ok(Err(e)) => warn!(generation, error = %e, "failed to reap globe key helper"),
                        Err(_) => {
                            warn!(generation, "globe key helper ignored SIGTERM, killing");
                            if let Err(e) = child.kill().await {
                                warn!(generation, error = %e, "failed to kill globe key helper");
                            }
                        }
                    }
                });
            }
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    debug!(generation, error = %e, "failed to kill globe key helper");
                }
            }
        }
        info!(generation, "globe key listener stopped");
    }

    fn is_running(&self) -> bool {
        self.running.is_some()
    }

    fn is_available(&self) -> bool {
        self.platform_supported && self.find_helper().is_ok()
    }
}

impl Drop for GlobeBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn read_tokens(mut stdout: ChildStdout, generation: u64, sink: UnboundedSender<GlobeSignal>) {
    let mut lines = LineBuffer::default();
    let mut chunk = [0_u8; 256];

    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                lines.extend(&chunk[..n]);
                while let Some(line) = lines.next_line() {
                    match GlobeEvent::from_line(&line) {
                        Some(event) => {
                            if sink.send(GlobeSignal { generation, event }).is_err() {
                                return;
                            }
                        }
                        None => debug!(
                            generation,
                            line = %String::from_utf8_lossy(&line),
                            "ignoring globe helper output"
                        ),
                    }
                }
            }
            Err(e) => {
                warn!(generation, error = %e, "failed to read globe key helper output");
                break;
            }
        }
    }

    info!(generation, "globe key helper output closed");
    let _ = sink.send(GlobeSignal {
        generation,
        event: GlobeEvent::Exited,
    });
}

#[cfg(unix)]
fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)) {
        debug!(path = %path.display(), error = %e, "could not chmod globe key helper");
    }
}

#[cfg(not(unix))]
const fn make_executable(_path: &Path) {}

#[cfg(unix)]
#[allow(unsafe_code)]
fn terminate(child: &Child) {
    let Some(pid) = child.id().and_then(|id| libc::pid_t::try_from(id).ok()) else {
        return;
    };
    // SAFETY: kill(2) only signals the process; pid is our own unreaped child.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        debug!(pid, error = %io::Error::last_os_error(), "SIGTERM to globe key helper failed");
    }
}

// No graceful signal off unix; the reaper kills the helper after the grace period
#[cfg(not(unix))]
const fn terminate(_child: &Child) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[test]
    fn test_token_parsing() {
        assert_eq!(GlobeEvent::from_line(b"READY"), Some(GlobeEvent::Ready));
        assert_eq!(GlobeEvent::from_line(b"FN_DOWN\r"), Some(GlobeEvent::Down));
        assert_eq!(GlobeEvent::from_line(b"  FN_UP "), Some(GlobeEvent::Up));
        assert_eq!(GlobeEvent::from_line(b"ERROR: nope"), None);
        assert_eq!(GlobeEvent::from_line(b""), None);
    }

    #[test]
    fn test_line_buffer_keeps_partial_line() {
        let mut buf = LineBuffer::default();
        buf.extend(b"READY\nFN_D");
        assert_eq!(buf.next_line().as_deref(), Some(&b"READY"[..]));
        assert_eq!(buf.next_line(), None);
        assert_eq!(buf.pending(), 4);

        buf.extend(b"OWN\nFN_UP\n");
        assert_eq!(buf.next_line().as_deref(), Some(&b"FN_DOWN"[..]));
        assert_eq!(buf.next_line().as_deref(), Some(&b"FN_UP"[..]));
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn test_unsupported_platform_refuses_to_start() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut bridge = GlobeBridge::new(None).with_platform_supported(false);
        assert!(!bridge.is_available());
        assert!(!bridge.start(1, tx));
        assert!(!bridge.is_running());
        bridge.stop();
    }

    #[test]
    fn test_configured_path_searched_first() {
        let bridge = GlobeBridge::new(Some(PathBuf::from("/opt/helper/globe")));
        let candidates = bridge.candidates();
        assert_eq!(candidates[0], PathBuf::from("/opt/helper/globe"));
        assert!(candidates.iter().skip(1).all(|p| p.ends_with(HELPER_NAME)));
    }

    #[tokio::test]
    async fn test_missing_helper_refuses_to_start() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut bridge = GlobeBridge::new(Some(PathBuf::from("/nonexistent/globe-helper")))
            .with_platform_supported(true);
        assert!(matches!(
            bridge.find_helper(),
            Err(GlobeError::HelperMissing(paths)) if paths[0].ends_with("globe-helper")
        ));
        // Next-to-exe candidates may not exist either in a test build
        if bridge.find_helper().is_err() {
            assert!(!bridge.start(1, tx));
        }
    }

    #[cfg(unix)]
    fn write_script(name: &str, body: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("globe-bridge-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helper_tokens_reach_sink() {
        let script = write_script(
            "tokens.sh",
            "printf 'READY\\nnoise\\nFN_'; sleep 0.1; printf 'DOWN\\nFN_UP\\n'; echo oops >&2",
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut bridge = GlobeBridge::new(Some(script)).with_platform_supported(true);
        assert!(bridge.start(7, tx));
        assert!(bridge.is_running());

        let mut events = Vec::new();
        while let Ok(Some(signal)) = timeout(Duration::from_secs(5), rx.recv()).await {
            assert_eq!(signal.generation, 7);
            events.push(signal.event);
            if signal.event == GlobeEvent::Exited {
                break;
            }
        }
        assert_eq!(
            events,
            vec![
                GlobeEvent::Ready,
                GlobeEvent::Down,
                GlobeEvent::Up,
                GlobeEvent::Exited
            ]
        );

        bridge.stop();
        assert!(!bridge.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_terminates_long_running_helper() {
        let script = write_script("idle.sh", "echo READY; exec sleep 30");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut bridge = GlobeBridge::new(Some(script)).with_platform_supported(true);
        assert!(bridge.start(3, tx));

        let ready = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(ready.map(|s| s.event), Some(GlobeEvent::Ready));

        bridge.stop();
        bridge.stop();
        assert!(!bridge.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restart_replaces_previous_helper() {
        let script = write_script("restart.sh", "echo READY; exec sleep 30");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut bridge = GlobeBridge::new(Some(script)).with_platform_supported(true);

        assert!(bridge.start(1, tx.clone()));
        assert!(bridge.start(2, tx));

        let mut generations = Vec::new();
        while let Ok(Some(signal)) = timeout(Duration::from_millis(500), rx.recv()).await {
            generations.push(signal.generation);
        }
        assert!(generations.contains(&2));
        bridge.stop();
    }
}
