//! The run state machine: boot, wait for the shell, send a command, classify.

use super::io::{IoObserver, Transcript};
use super::matcher::{MatchOutcome, OutputMatcher, Pattern};
use super::process::ProcessSession;
use super::{EchoStatus, RunOutcome, RunResult};
use crate::config::{BoardProfile, Config, MemoryProbe, SessionConfig};
use crate::core::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const CRASH_NOTE: &str = "[Crash detected]";
const TERMINATED_NOTE: &str = "[Process terminated unexpectedly]";
const NOT_FOUND_NOTE: &str = "[Command not found]";
const NO_ECHO_NOTE: &str = "[Command echo not observed]";

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No emulator running.
    Idle,
    /// Waiting for the boot banner and the first prompt.
    Booting,
    /// Shell prompt seen, ready for input.
    Ready,
    /// Command sent, waiting for its echo.
    Executing,
    /// Collecting output until the prompt returns.
    Draining,
    /// Emulator stopped.
    Stopped,
}

/// Drives one emulated board through a command run.
///
/// Every call to [`run`](Self::run) launches a fresh emulator and stops it
/// before returning, whatever the outcome.
pub struct SessionController {
    binary: PathBuf,
    board: BoardProfile,
    session: SessionConfig,
    state: SessionState,
    observer: Option<Box<dyn IoObserver>>,
    last_pid: Option<u32>,
}

/// Result of waiting for the command echo.
enum Echo {
    Confirmed,
    /// The exchange ended before the command ran.
    Finished {
        status: Option<EchoStatus>,
        exchange: Exchange,
    },
}

/// Classified interaction, before timing is attached.
struct Exchange {
    output: String,
    outcome: RunOutcome,
    echo: Option<EchoStatus>,
    free_before: Option<u64>,
    free_after: Option<u64>,
}

impl Exchange {
    fn new(output: String, outcome: RunOutcome) -> Self {
        Self {
            output,
            outcome,
            echo: None,
            free_before: None,
            free_after: None,
        }
    }

    fn failure(before: &str, note: &str) -> Self {
        Self::new(annotate(before, note), RunOutcome::Failure)
    }

    fn skipped(before: &str, note: &str) -> Self {
        Self::new(annotate(before, note), RunOutcome::Skipped)
    }
}

impl SessionController {
    /// Create a controller for `binary` on the board registered as `board`.
    ///
    /// Unknown boards are rejected before anything is spawned.
    pub fn new(binary: impl Into<PathBuf>, board: &str, config: &Config) -> Result<Self> {
        let profile = config.board(board)?;
        Ok(Self::with_profile(binary, profile, config.session.clone()))
    }

    /// Create a controller from an explicit board profile.
    pub fn with_profile(
        binary: impl Into<PathBuf>,
        board: BoardProfile,
        session: SessionConfig,
    ) -> Self {
        Self {
            binary: binary.into(),
            board,
            session,
            state: SessionState::Idle,
            observer: None,
            last_pid: None,
        }
    }

    /// Watch the console of every run with `observer`.
    pub fn with_observer(mut self, observer: impl IoObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Finish the observer and return what it recorded.
    pub fn take_transcript(&mut self) -> Option<Transcript> {
        self.observer.take().and_then(|observer| observer.finish())
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Board profile in use.
    pub fn board(&self) -> &BoardProfile {
        &self.board
    }

    /// Firmware image being run.
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Process id of the most recently launched emulator.
    pub fn last_pid(&self) -> Option<u32> {
        self.last_pid
    }

    /// Boot the image, run `command` and classify the result.
    ///
    /// `timeout` bounds the command itself and defaults to the board's timeout.
    /// Crashes, timeouts and early exits come back as a `Failure` result. Only
    /// launch errors and boot failures are returned as `Err`, and the emulator
    /// has been stopped by then either way.
    pub fn run(&mut self, command: &str, timeout: Option<Duration>) -> Result<RunResult> {
        let timeout = timeout.unwrap_or(self.board.timeout);
        let started = Instant::now();
        self.set_state(SessionState::Idle);

        let argv = self.board.launch_argv(&self.binary);
        let (session, mut matcher) = ProcessSession::start(&argv)?;
        let mut session = session
            .with_quit_sequence(self.board.quit_sequence.as_bytes())
            .with_grace(self.session.stop_grace);
        self.last_pid = session.pid();
        if let Some(observer) = self.observer.take() {
            matcher.set_observer(observer);
        }

        let interaction = self.interact(&mut session, &mut matcher, command, timeout);

        self.observer = matcher.take_observer();
        drop(session);
        if !matcher.buffered().is_empty() {
            log::debug!(
                "discarding unread console text (stream closed: {}): {:?}",
                matcher.is_closed(),
                matcher.buffered()
            );
        }
        self.set_state(SessionState::Stopped);

        let exchange = match interaction {
            Ok(exchange) => exchange,
            Err(err) if err.is_boot_failure() => {
                log::warn!("{} on {}: {}", self.binary.display(), self.board.name, err);
                return Err(err);
            }
            Err(err) => Exchange::new(
                format!("Error running command: {}", err),
                RunOutcome::Failure,
            ),
        };

        let result = RunResult::new(started.elapsed(), exchange.output, exchange.outcome)
            .with_echo(exchange.echo)
            .with_memory(exchange.free_before, exchange.free_after);
        log::info!(
            "'{}' on {}: {:?} in {:.2}s",
            command,
            self.board.name,
            result.outcome,
            result.duration.as_secs_f64()
        );
        Ok(result)
    }

    fn interact(
        &mut self,
        session: &mut ProcessSession,
        matcher: &mut OutputMatcher,
        command: &str,
        timeout: Duration,
    ) -> Result<Exchange> {
        self.set_state(SessionState::Booting);
        self.expect_boot_stage(
            matcher,
            "boot banner",
            &self.board.boot_banner,
            self.session.boot_timeout,
        )?;
        self.expect_boot_stage(
            matcher,
            "shell prompt",
            &self.board.prompt,
            self.session.prompt_timeout,
        )?;
        self.set_state(SessionState::Ready);

        let free_before = self.sample_if_enabled(session, matcher);

        self.set_state(SessionState::Executing);
        session.send_line(command)?;
        matcher.record_input(format!("{command}\n").as_bytes());

        let mut exchange = match self.confirm_echo(matcher, command) {
            Echo::Confirmed => {
                self.set_state(SessionState::Draining);
                let mut exchange = self.drain(matcher, timeout);
                exchange.echo = Some(EchoStatus::Confirmed);
                exchange
            }
            Echo::Finished {
                status,
                mut exchange,
            } => {
                exchange.echo = status;
                exchange
            }
        };

        exchange.free_before = free_before;
        if exchange.outcome != RunOutcome::Failure && free_before.is_some() {
            exchange.free_after = self.sample_if_enabled(session, matcher);
        }
        Ok(exchange)
    }

    /// Wait for one boot marker, racing it against crash signatures.
    fn expect_boot_stage(
        &self,
        matcher: &mut OutputMatcher,
        stage: &str,
        marker: &str,
        timeout: Duration,
    ) -> Result<()> {
        let mut patterns = vec![Pattern::literal(marker)];
        patterns.extend(self.crash_patterns());

        let stage = format!("{} '{}'", stage, marker);
        match matcher.wait_for(&patterns, timeout) {
            MatchOutcome::Matched { index: 0, .. } => Ok(()),
            MatchOutcome::Matched { before, matched, .. } => {
                log::warn!("crash signature '{}' while waiting for {}", matched, stage);
                Err(Error::boot_failure(stage, before))
            }
            MatchOutcome::TimedOut { before } => {
                log::warn!("no {} within {:?}", stage, timeout);
                Err(Error::boot_failure(stage, before))
            }
            MatchOutcome::StreamEnded { before } => {
                log::warn!("emulator exited while waiting for {}", stage);
                Err(Error::boot_failure(stage, before))
            }
        }
    }

    /// Confirm the shell echoed `command`.
    fn confirm_echo(&self, matcher: &mut OutputMatcher, command: &str) -> Echo {
        let mut patterns = vec![
            Pattern::literal(command),
            Pattern::literal(self.board.not_found_marker.as_str()),
            Pattern::literal(self.board.prompt.as_str()),
        ];
        patterns.extend(self.crash_patterns());

        let echo_timeout = self.session.echo_timeout;
        let (status, exchange) = match matcher.wait_for(&patterns, echo_timeout) {
            MatchOutcome::Matched { index: 0, .. } => return Echo::Confirmed,
            MatchOutcome::Matched {
                index: 1,
                before,
                matched,
            } => {
                // Let the rest of the message and the prompt come through.
                let rest = matcher.wait_for(
                    &[Pattern::literal(self.board.prompt.as_str())],
                    self.session.prompt_timeout,
                );
                let text = format!("{}{}{}", before, matched, rest.before());
                (
                    Some(EchoStatus::NotFound),
                    Exchange::skipped(&text, NOT_FOUND_NOTE),
                )
            }
            MatchOutcome::Matched {
                index: 2, before, ..
            } => {
                log::warn!("prompt returned before '{}' was echoed", command);
                (
                    Some(EchoStatus::PromptFirst),
                    Exchange::skipped(&before, NO_ECHO_NOTE),
                )
            }
            MatchOutcome::Matched { before, .. } => (None, Exchange::failure(&before, CRASH_NOTE)),
            MatchOutcome::TimedOut { before } => (
                None,
                Exchange::failure(
                    &before,
                    &format!(
                        "[Command echo timed out after {}s]",
                        echo_timeout.as_secs_f64()
                    ),
                ),
            ),
            MatchOutcome::StreamEnded { before } => {
                (None, Exchange::failure(&before, TERMINATED_NOTE))
            }
        };
        Echo::Finished { status, exchange }
    }

    /// Race the prompt against crash signatures, the deadline and stream end.
    fn drain(&self, matcher: &mut OutputMatcher, timeout: Duration) -> Exchange {
        let mut patterns = vec![Pattern::literal(self.board.prompt.as_str())];
        patterns.extend(self.crash_patterns());

        match matcher.wait_for(&patterns, timeout) {
            MatchOutcome::Matched {
                index: 0, before, ..
            } => self.classify_output(&before),
            MatchOutcome::Matched { before, .. } => Exchange::failure(&before, CRASH_NOTE),
            MatchOutcome::TimedOut { before } => Exchange::failure(
                &before,
                &format!("[Command timed out after {}s]", timeout.as_secs_f64()),
            ),
            MatchOutcome::StreamEnded { before } => Exchange::failure(&before, TERMINATED_NOTE),
        }
    }

    /// Inspect the output of a command that returned to the prompt.
    fn classify_output(&self, before: &str) -> Exchange {
        let output = clean(before);

        let not_found = &self.board.not_found_marker;
        if !not_found.is_empty() && output.contains(not_found.as_str()) {
            return Exchange::skipped(&output, NOT_FOUND_NOTE);
        }

        let error_marker = self
            .board
            .error_markers
            .iter()
            .find(|marker| !marker.is_empty() && output.contains(marker.as_str()));
        if let Some(marker) = error_marker {
            return Exchange::failure(&output, &format!("[Error marker detected: {}]", marker));
        }

        Exchange::new(output, RunOutcome::Success)
    }

    fn sample_if_enabled(
        &self,
        session: &mut ProcessSession,
        matcher: &mut OutputMatcher,
    ) -> Option<u64> {
        if !self.session.sample_memory {
            return None;
        }
        match self.sample_free_memory(session, matcher) {
            Ok(free) => Some(free),
            Err(e) => {
                log::warn!("free memory sample failed: {}", e);
                None
            }
        }
    }

    /// Send the board's memory status command and read the free figure.
    fn sample_free_memory(
        &self,
        session: &mut ProcessSession,
        matcher: &mut OutputMatcher,
    ) -> Result<u64> {
        let probe = self
            .board
            .memory_probe
            .as_ref()
            .ok_or_else(|| Error::parse(format!("board {} has no memory probe", self.board.name)))?;

        session.send_line(&probe.command)?;
        matcher.record_input(format!("{}\n", probe.command).as_bytes());
        match matcher.wait_for(
            &[Pattern::literal(self.board.prompt.as_str())],
            self.session.prompt_timeout,
        ) {
            MatchOutcome::Matched { before, .. } => parse_free_memory(&before, probe),
            _ => Err(Error::runner(format!(
                "prompt did not return after '{}'",
                probe.command
            ))),
        }
    }

    fn crash_patterns(&self) -> impl Iterator<Item = Pattern> + '_ {
        self.board
            .crash_markers
            .iter()
            .map(|marker| Pattern::literal(marker.as_str()))
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::debug!("session state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }
}

/// Read the free-memory figure from the output of the probe command.
pub fn parse_free_memory(text: &str, probe: &MemoryProbe) -> Result<u64> {
    let line = text
        .lines()
        .find(|line| line.contains(probe.line_marker.as_str()))
        .ok_or_else(|| Error::parse(format!("no '{}' line in output", probe.line_marker)))?;

    let rest = line
        .split_once(probe.line_marker.as_str())
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    let field = rest.split_whitespace().nth(probe.field).ok_or_else(|| {
        Error::parse(format!(
            "'{}' line has no field {}: {}",
            probe.line_marker,
            probe.field,
            line.trim()
        ))
    })?;

    field
        .parse::<u64>()
        .map_err(|e| Error::parse(format!("bad free memory value '{}': {}", field, e)))
}

fn clean(text: &str) -> String {
    text.replace('\r', "").trim().to_string()
}

fn annotate(before: &str, note: &str) -> String {
    let text = clean(before);
    if text.is_empty() {
        note.to_string()
    } else {
        format!("{}\n{}", text, note)
    }
}
