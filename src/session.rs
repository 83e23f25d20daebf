//! Pseudo-terminal session driving for interactive targets.
//!
//! Spawns the target with a pseudo-terminal as its controlling terminal, so
//! the child behaves as it would for a human operator, then feeds it input
//! lines and collects sanitized output. Reads follow an idle-quiescence
//! discipline: with no end-of-reply framing on the wire, a reply is complete
//! once the terminal stays silent for the configured window.

use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use portable_pty::{Child, CommandBuilder, MasterPty, NativePtySystem, PtySize, PtySystem};
use thiserror::Error;
use tracing::{debug, warn};

use crate::sanitize::sanitize_bytes;

pub use portable_pty::ExitStatus;

/// Bytes requested per read from the terminal.
const READ_CHUNK: usize = 1024;

/// Poll interval while waiting for the child to exit.
const EXIT_POLL: Duration = Duration::from_millis(20);

/// Errors that can occur while driving a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to open pseudo-terminal: {0}")]
    Pty(anyhow::Error),

    #[error("Failed to spawn '{command}': {cause}")]
    Spawn { command: String, cause: anyhow::Error },

    #[error("Failed to write to terminal: {0}")]
    Write(#[source] std::io::Error),

    #[error("Failed to reap child process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Configuration for an interactive session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Path to the target executable.
    pub program: PathBuf,

    /// Arguments passed to the target.
    pub args: Vec<String>,

    /// Working directory for the target.
    pub cwd: Option<PathBuf>,

    /// Environment variables set on top of the inherited environment.
    pub env: HashMap<String, String>,

    /// Terminal rows.
    pub rows: u16,

    /// Terminal columns.
    pub cols: u16,

    /// Bound on the wait for the child to exit during close. A child still
    /// running past this is killed and reaped.
    pub exit_timeout: Duration,
}

impl SessionConfig {
    /// Create a configuration for `program` with an 80x24 terminal.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            rows: 24,
            cols: 80,
            exit_timeout: Duration::from_secs(10),
        }
    }
}

/// One event from the reader thread.
#[derive(Debug)]
enum ReadEvent {
    /// A chunk of raw output bytes.
    Data(Vec<u8>),

    /// The stream reached end of file.
    Eof,

    /// The stream failed, normally because the child exited and the slave
    /// side of the terminal is gone.
    Error(std::io::Error),
}

/// A child process attached to a pseudo-terminal.
///
/// The session exclusively owns the terminal descriptors, the reader thread,
/// and the child handle. Dropping a session kills and reaps a still-running
/// child, so a failed assertion mid-scenario leaks nothing.
pub struct Session {
    child: Box<dyn Child + Send + Sync>,
    // Keeps the terminal allocated for the life of the session.
    _master: Box<dyn MasterPty + Send>,
    writer: Option<Box<dyn Write + Send>>,
    events: Receiver<ReadEvent>,
    reader: Option<JoinHandle<()>>,
    /// Chunks buffered by a readiness wait, consumed by the next read.
    pending: VecDeque<Vec<u8>>,
    /// Set once the output stream has ended; reads return promptly after.
    closed: bool,
    /// Set once the child has been reaped.
    reaped: bool,
    exit_timeout: Duration,
}

impl Session {
    /// Spawn the target under a new pseudo-terminal.
    pub fn spawn(config: &SessionConfig) -> Result<Self, SessionError> {
        let pty_system = NativePtySystem::default();
        let pair = pty_system
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(SessionError::Pty)?;

        let mut cmd = CommandBuilder::new(&config.program);
        for arg in &config.args {
            cmd.arg(arg);
        }
        if let Some(cwd) = &config.cwd {
            cmd.cwd(cwd);
        }
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|cause| SessionError::Spawn {
                command: config.program.display().to_string(),
                cause,
            })?;
        // The child holds its own slave handle; keeping ours would hold the
        // stream open past child exit.
        drop(pair.slave);

        let reader = pair.master.try_clone_reader().map_err(SessionError::Pty)?;
        let writer = pair.master.take_writer().map_err(SessionError::Pty)?;

        debug!(
            program = %config.program.display(),
            pid = ?child.process_id(),
            "spawned target under pseudo-terminal"
        );

        let (tx, rx) = mpsc::channel();
        let handle = std::thread::spawn(move || pump_output(reader, tx));

        Ok(Self {
            child,
            _master: pair.master,
            writer: Some(writer),
            events: rx,
            reader: Some(handle),
            pending: VecDeque::new(),
            closed: false,
            reaped: false,
            exit_timeout: config.exit_timeout,
        })
    }

    /// Send one input line, with a carriage return appended as the terminal
    /// Enter key. No delay is added; callers own any startup grace via
    /// [`Session::wait_for_output`].
    pub fn send(&mut self, text: &str) -> Result<(), SessionError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(SessionError::Write(std::io::Error::from(
                std::io::ErrorKind::BrokenPipe,
            )));
        };
        let mut line = Vec::with_capacity(text.len() + 1);
        line.extend_from_slice(text.as_bytes());
        line.push(b'\r');
        writer.write_all(&line).map_err(SessionError::Write)?;
        writer.flush().map_err(SessionError::Write)?;
        debug!(len = text.len(), "sent input line");
        Ok(())
    }

    /// Collect output until the terminal goes quiet for `idle_timeout` or the
    /// stream ends, whichever comes first. Returns everything read by this
    /// call, decoded lossily and stripped of CSI sequences. Each call starts
    /// a fresh accumulation; the stream position carries over between calls.
    pub fn read_available(&mut self, idle_timeout: Duration) -> String {
        self.collect(idle_timeout, None)
    }

    /// Like [`Session::read_available`], but returns as soon as the sanitized
    /// output contains `needle`. Quiescence and end-of-stream still terminate
    /// the read when the needle never shows up, so a target without a
    /// recognizable prompt degrades to the plain read.
    pub fn read_until(&mut self, needle: &str, idle_timeout: Duration) -> String {
        self.collect(idle_timeout, Some(needle))
    }

    fn collect(&mut self, idle_timeout: Duration, until: Option<&str>) -> String {
        let mut raw: Vec<u8> = Vec::new();
        while let Some(chunk) = self.pending.pop_front() {
            raw.extend_from_slice(&chunk);
        }

        let mut done = match until {
            Some(needle) => !raw.is_empty() && sanitize_bytes(&raw).contains(needle),
            None => false,
        };

        while !done && !self.closed {
            match self.events.recv_timeout(idle_timeout) {
                Ok(ReadEvent::Data(chunk)) => {
                    raw.extend_from_slice(&chunk);
                    if let Some(needle) = until {
                        done = sanitize_bytes(&raw).contains(needle);
                    }
                }
                Ok(ReadEvent::Eof) => self.closed = true,
                Ok(ReadEvent::Error(e)) => {
                    debug!(error = %e, "terminal stream ended");
                    self.closed = true;
                }
                Err(RecvTimeoutError::Timeout) => done = true,
                Err(RecvTimeoutError::Disconnected) => self.closed = true,
            }
        }

        sanitize_bytes(&raw)
    }

    /// Wait up to `timeout` for the first burst of output after spawn.
    ///
    /// Anything received is buffered for the next read call. Returns false
    /// when the window closes with the terminal still silent. A stream that
    /// has already ended counts as ready, since reads return promptly then.
    pub fn wait_for_output(&mut self, timeout: Duration) -> bool {
        if !self.pending.is_empty() || self.closed {
            return true;
        }
        match self.events.recv_timeout(timeout) {
            Ok(ReadEvent::Data(chunk)) => {
                self.pending.push_back(chunk);
                true
            }
            Ok(ReadEvent::Eof) | Err(RecvTimeoutError::Disconnected) => {
                self.closed = true;
                true
            }
            Ok(ReadEvent::Error(e)) => {
                debug!(error = %e, "terminal stream ended");
                self.closed = true;
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    /// Wait for the child to exit and reap it, returning its exit status.
    ///
    /// A child that already exited is a clean close; the exit race between
    /// a quit command taking effect and this call is expected. A child still
    /// running after the configured bound is killed, and the resulting
    /// status returned.
    pub fn close(mut self) -> Result<ExitStatus, SessionError> {
        let status = self.wait_for_exit()?;
        self.shutdown();
        Ok(status)
    }

    fn wait_for_exit(&mut self) -> Result<ExitStatus, SessionError> {
        let deadline = Instant::now() + self.exit_timeout;
        loop {
            match self.child.try_wait().map_err(SessionError::Wait)? {
                Some(status) => {
                    self.reaped = true;
                    return Ok(status);
                }
                None if Instant::now() >= deadline => {
                    warn!(timeout = ?self.exit_timeout, "child still running at close, killing");
                    let _ = self.child.kill();
                    let status = self.child.wait().map_err(SessionError::Wait)?;
                    self.reaped = true;
                    return Ok(status);
                }
                None => std::thread::sleep(EXIT_POLL),
            }
        }
    }

    /// Kill a still-running child, reap it, and join the reader thread.
    /// Safe to call more than once.
    fn shutdown(&mut self) {
        if !self.reaped {
            match self.child.try_wait() {
                Ok(Some(_)) => self.reaped = true,
                Ok(None) => {
                    let _ = self.child.kill();
                    if self.child.wait().is_ok() {
                        self.reaped = true;
                    }
                }
                Err(_) => {}
            }
        }
        drop(self.writer.take());
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Forward raw output chunks from the terminal until the stream ends or the
/// session side hangs up.
fn pump_output(mut reader: Box<dyn Read + Send>, events: Sender<ReadEvent>) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                let _ = events.send(ReadEvent::Eof);
                break;
            }
            Ok(n) => {
                if events.send(ReadEvent::Data(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = events.send(ReadEvent::Error(e));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    struct ScriptedReader {
        script: std::vec::IntoIter<io::Result<Vec<u8>>>,
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.script.next() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    fn scripted(script: Vec<io::Result<Vec<u8>>>) -> Box<dyn Read + Send> {
        Box::new(ScriptedReader {
            script: script.into_iter(),
        })
    }

    fn data(event: ReadEvent) -> Vec<u8> {
        match event {
            ReadEvent::Data(chunk) => chunk,
            other => panic!("expected data, got {other:?}"),
        }
    }

    #[test]
    fn pump_forwards_chunks_then_eof() {
        let (tx, rx) = mpsc::channel();
        pump_output(scripted(vec![Ok(b"one".to_vec()), Ok(b"two".to_vec())]), tx);

        assert_eq!(data(rx.recv().unwrap()), b"one");
        assert_eq!(data(rx.recv().unwrap()), b"two");
        assert!(matches!(rx.recv().unwrap(), ReadEvent::Eof));
        assert!(rx.recv().is_err());
    }

    #[test]
    fn pump_reports_stream_errors() {
        let (tx, rx) = mpsc::channel();
        pump_output(
            scripted(vec![
                Ok(b"tail".to_vec()),
                Err(io::Error::new(io::ErrorKind::Other, "slave side gone")),
            ]),
            tx,
        );

        assert_eq!(data(rx.recv().unwrap()), b"tail");
        assert!(matches!(rx.recv().unwrap(), ReadEvent::Error(_)));
        assert!(rx.recv().is_err());
    }

    #[test]
    fn pump_retries_interrupted_reads() {
        let (tx, rx) = mpsc::channel();
        pump_output(
            scripted(vec![
                Err(io::Error::from(io::ErrorKind::Interrupted)),
                Ok(b"after".to_vec()),
            ]),
            tx,
        );

        assert_eq!(data(rx.recv().unwrap()), b"after");
        assert!(matches!(rx.recv().unwrap(), ReadEvent::Eof));
    }

    #[test]
    fn session_config_defaults() {
        let config = SessionConfig::new("target");
        assert_eq!(config.rows, 24);
        assert_eq!(config.cols, 80);
        assert!(config.args.is_empty());
        assert!(config.cwd.is_none());
        assert_eq!(config.exit_timeout, Duration::from_secs(10));
    }
}
