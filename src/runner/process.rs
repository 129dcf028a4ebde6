//! Lifecycle of one spawned emulator process.

use super::matcher::OutputMatcher;
use crate::core::error::{Error, Result};
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Sender};
use std::time::{Duration, Instant};

/// Default bytes sent to ask QEMU to quit (Ctrl-A x).
pub const QEMU_QUIT_SEQUENCE: &[u8] = b"\x01x";

const POLL_INTERVAL: Duration = Duration::from_millis(20);
#[cfg(unix)]
const TERM_GRACE: Duration = Duration::from_millis(500);

/// An emulator child process with its combined output routed to an [`OutputMatcher`].
///
/// The session is the only owner of the child. Dropping it stops the process.
#[derive(Debug)]
pub struct ProcessSession {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    program: String,
    quit_sequence: Vec<u8>,
    grace: Duration,
}

impl ProcessSession {
    /// Spawn `argv` and attach a matcher to its stdout and stderr.
    pub fn start(argv: &[String]) -> Result<(Self, OutputMatcher)> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::config("empty launch command"))?;

        log::debug!("spawning {:?}", argv);
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::launch(format!("failed to execute {}: {}", program, e)))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let session = Self {
            child: Some(child),
            stdin,
            program: program.clone(),
            quit_sequence: QEMU_QUIT_SEQUENCE.to_vec(),
            grace: Duration::from_secs(5),
        };

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = stdout {
            spawn_reader("emulator-stdout", stdout, tx.clone())
                .map_err(|e| Error::launch(format!("failed to start output reader: {}", e)))?;
        }
        if let Some(stderr) = stderr {
            spawn_reader("emulator-stderr", stderr, tx)
                .map_err(|e| Error::launch(format!("failed to start output reader: {}", e)))?;
        }

        Ok((session, OutputMatcher::new(rx)))
    }

    /// Bytes written to ask the process to quit on its own.
    pub fn with_quit_sequence(mut self, sequence: impl Into<Vec<u8>>) -> Self {
        self.quit_sequence = sequence.into();
        self
    }

    /// How long [`stop`](Self::stop) waits before killing the process.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// OS process id, while the process is owned by this session.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Non-blocking liveness probe.
    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Write raw bytes to the process input.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::runner(format!("{} is not running", self.program)));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::runner(format!("{} input is closed", self.program)))?;
        stdin
            .write_all(data)
            .and_then(|_| stdin.flush())
            .map_err(|e| Error::runner(format!("failed to write to {}: {}", self.program, e)))
    }

    /// Write `line` followed by a newline.
    pub fn send_line(&mut self, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.send(&data)
    }

    /// Stop the process: quit sequence, grace period, then force.
    ///
    /// Always reaps the child. Calling it again is a no-op.
    pub fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if matches!(child.try_wait(), Ok(None)) {
            if let Some(mut stdin) = self.stdin.take() {
                let _ = stdin.write_all(&self.quit_sequence);
                let _ = stdin.flush();
            }

            if !wait_with_grace(&mut child, self.grace) {
                log::warn!(
                    "{} did not quit within {:?}, terminating",
                    self.program,
                    self.grace
                );
                terminate(&mut child);
            }
        }

        self.stdin = None;
        match child.wait() {
            Ok(status) => log::debug!("{} exited with {}", self.program, status),
            Err(e) => log::warn!("failed to reap {}: {}", self.program, e),
        }
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Forward everything read from `source` to `tx` until EOF.
fn spawn_reader<R>(name: &str, mut source: R, tx: Sender<Vec<u8>>) -> std::io::Result<()>
where
    R: Read + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match source.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        })?;
    Ok(())
}

/// Poll until the child exits or `grace` elapses. Returns whether it exited.
fn wait_with_grace(child: &mut Child, grace: Duration) -> bool {
    let Some(deadline) = Instant::now().checked_add(grace) else {
        return child.wait().is_ok();
    };
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(_) => return false,
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        // SAFETY: the pid belongs to our child, which has not been reaped yet.
        unsafe {
            libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
        }
        if wait_with_grace(child, TERM_GRACE) {
            return;
        }
    }

    if let Err(e) = child.kill() {
        log::warn!("failed to kill emulator: {}", e);
    }
}
