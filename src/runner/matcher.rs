//! Blocking "expect"-style matching over a live console stream.
//!
//! The emulator's output arrives as raw chunks on a channel. [`OutputMatcher`]
//! decodes them into a text buffer and resolves a wait on the first pattern
//! that shows up, or when the deadline passes or the stream closes.
//!
//! When several patterns are present, the one that starts earliest in the
//! stream wins; list order only breaks ties at the same position.

use super::io::IoObserver;
use crate::core::error::{Error, Result};
use regex::Regex;
use std::fmt;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Something to look for in the console stream.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Exact substring. An empty literal never matches.
    Literal(String),
    /// Regular expression.
    Regex(Regex),
}

impl Pattern {
    /// Exact substring pattern.
    pub fn literal(text: impl Into<String>) -> Self {
        Pattern::Literal(text.into())
    }

    /// Regular expression pattern.
    pub fn regex(expr: &str) -> Result<Self> {
        Regex::new(expr)
            .map(Pattern::Regex)
            .map_err(|e| Error::config(format!("invalid pattern '{}': {}", expr, e)))
    }

    /// Byte range of the first occurrence in `haystack`.
    fn find(&self, haystack: &str) -> Option<(usize, usize)> {
        match self {
            Pattern::Literal(text) if text.is_empty() => None,
            Pattern::Literal(text) => haystack
                .find(text.as_str())
                .map(|start| (start, start + text.len())),
            Pattern::Regex(regex) => regex.find(haystack).map(|m| (m.start(), m.end())),
        }
    }
}

impl From<&str> for Pattern {
    fn from(text: &str) -> Self {
        Pattern::literal(text)
    }
}

/// How a wait resolved. Captured text is always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Pattern `index` matched; `before` is the text preceding it.
    Matched {
        index: usize,
        before: String,
        matched: String,
    },
    /// The deadline passed first.
    TimedOut { before: String },
    /// The stream closed first.
    StreamEnded { before: String },
}

impl MatchOutcome {
    /// Text captured before the match, timeout or end of stream.
    pub fn before(&self) -> &str {
        match self {
            MatchOutcome::Matched { before, .. }
            | MatchOutcome::TimedOut { before }
            | MatchOutcome::StreamEnded { before } => before,
        }
    }

    /// Index of the matched pattern, if any.
    pub fn index(&self) -> Option<usize> {
        match self {
            MatchOutcome::Matched { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Consumes a console stream and waits for patterns in it.
pub struct OutputMatcher {
    rx: Receiver<Vec<u8>>,
    /// Decoded text not yet consumed by a match.
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    pending: Vec<u8>,
    closed: bool,
    observer: Option<Box<dyn IoObserver>>,
}

impl fmt::Debug for OutputMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputMatcher")
            .field("buffer", &self.buffer)
            .field("pending", &self.pending)
            .field("closed", &self.closed)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl OutputMatcher {
    /// Create a matcher over a channel of output chunks.
    ///
    /// The stream ends when every sender has been dropped.
    pub fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            buffer: String::new(),
            pending: Vec::new(),
            closed: false,
            observer: None,
        }
    }

    /// Attach an observer that sees every chunk as it is received.
    pub fn set_observer(&mut self, observer: Box<dyn IoObserver>) {
        self.observer = Some(observer);
    }

    /// Detach the observer, if any.
    pub fn take_observer(&mut self) -> Option<Box<dyn IoObserver>> {
        self.observer.take()
    }

    /// Notify the observer about bytes written to the emulator.
    pub fn record_input(&mut self, data: &[u8]) {
        if let Some(observer) = self.observer.as_mut() {
            observer.on_input(data);
        }
    }

    /// Text received but not yet consumed.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Whether the stream has reached its end.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Block until one of `patterns` appears, `timeout` elapses, or the stream ends.
    ///
    /// A match consumes the buffer up to the end of the matched text. The end of
    /// the stream consumes everything. A timeout leaves the buffer in place so a
    /// later wait can still see it. A timeout too large to represent as an
    /// instant waits without a deadline.
    pub fn wait_for(&mut self, patterns: &[Pattern], timeout: Duration) -> MatchOutcome {
        let deadline = Instant::now().checked_add(timeout);

        loop {
            if let Some((index, start, end)) = self.find_earliest(patterns) {
                let before = self.buffer[..start].to_string();
                let matched = self.buffer[start..end].to_string();
                self.buffer.drain(..end);
                log::debug!("matched pattern #{} {:?}", index, matched);
                return MatchOutcome::Matched {
                    index,
                    before,
                    matched,
                };
            }

            if self.closed {
                log::debug!("console stream ended");
                return MatchOutcome::StreamEnded {
                    before: std::mem::take(&mut self.buffer),
                };
            }

            let Some(deadline) = deadline else {
                match self.rx.recv() {
                    Ok(chunk) => self.push_bytes(&chunk),
                    Err(_) => self.close(),
                }
                continue;
            };

            let now = Instant::now();
            if now >= deadline {
                log::debug!("wait timed out after {:?}", timeout);
                return MatchOutcome::TimedOut {
                    before: self.buffer.clone(),
                };
            }

            match self.rx.recv_timeout(deadline - now) {
                Ok(chunk) => self.push_bytes(&chunk),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.close(),
            }
        }
    }

    /// Earliest occurrence among `patterns` as `(index, start, end)`.
    fn find_earliest(&self, patterns: &[Pattern]) -> Option<(usize, usize, usize)> {
        let mut best: Option<(usize, usize, usize)> = None;
        for (index, pattern) in patterns.iter().enumerate() {
            if let Some((start, end)) = pattern.find(&self.buffer) {
                let earlier = match best {
                    Some((_, best_start, _)) => start < best_start,
                    None => true,
                };
                if earlier {
                    best = Some((index, start, end));
                }
            }
        }
        best
    }

    fn push_bytes(&mut self, data: &[u8]) {
        log::trace!("console: {:?}", String::from_utf8_lossy(data));
        if let Some(observer) = self.observer.as_mut() {
            observer.on_output(data);
        }

        self.pending.extend_from_slice(data);
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.pending.clear();
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            // Incomplete sequence; wait for the rest of it.
                            self.pending.drain(..valid);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn close(&mut self) {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::io::TranscriptHandler;
    use std::sync::mpsc;
    use std::thread;

    fn patterns(texts: &[&str]) -> Vec<Pattern> {
        texts.iter().map(|t| Pattern::literal(*t)).collect()
    }

    #[test]
    fn test_earliest_in_stream_wins_over_list_order() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"booting... CRASH at 0x0 ... READY".to_vec()).unwrap();
        let mut matcher = OutputMatcher::new(rx);

        let outcome = matcher.wait_for(&patterns(&["READY", "CRASH"]), Duration::from_secs(1));
        assert_eq!(
            outcome,
            MatchOutcome::Matched {
                index: 1,
                before: "booting... ".to_string(),
                matched: "CRASH".to_string(),
            }
        );
        // READY is still buffered for the next wait.
        assert!(matcher.buffered().contains("READY"));
    }

    #[test]
    fn test_unrepresentable_timeout_waits_without_deadline() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"nsh> ".to_vec()).unwrap();
        let mut matcher = OutputMatcher::new(rx);
        let forever = Duration::try_from_secs_f64(1e19).unwrap();

        let outcome = matcher.wait_for(&patterns(&["nsh>"]), forever);
        assert_eq!(outcome.index(), Some(0));

        let feeder = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.send(b"late".to_vec()).unwrap();
        });
        let outcome = matcher.wait_for(&patterns(&["never"]), Duration::MAX);
        assert_eq!(
            outcome,
            MatchOutcome::StreamEnded {
                before: " late".to_string()
            }
        );
        feeder.join().unwrap();
    }

    #[test]
    fn test_debug_shows_buffer_state() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"nsh> ".to_vec()).unwrap();
        let mut matcher = OutputMatcher::new(rx);
        matcher.wait_for(&patterns(&["nsh"]), Duration::from_secs(1));
        let rendered = format!("{:?}", matcher);
        assert!(rendered.contains("buffer: \"> \""));
        assert!(rendered.contains("closed: false"));
    }

    #[test]
    fn test_tie_goes_to_first_listed() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"nsh> ".to_vec()).unwrap();
        let mut matcher = OutputMatcher::new(rx);

        let outcome = matcher.wait_for(&patterns(&["nsh", "nsh>"]), Duration::from_secs(1));
        assert_eq!(outcome.index(), Some(0));
    }

    #[test]
    fn test_pattern_split_across_chunks() {
        let (tx, rx) = mpsc::channel();
        let feeder = thread::spawn(move || {
            tx.send(b"Nutt".to_vec()).unwrap();
            thread::sleep(Duration::from_millis(20));
            tx.send(b"Shell (NSH)".to_vec()).unwrap();
        });
        let mut matcher = OutputMatcher::new(rx);

        let outcome = matcher.wait_for(&patterns(&["NuttShell "]), Duration::from_secs(2));
        assert_eq!(outcome.index(), Some(0));
        assert_eq!(matcher.buffered(), "(NSH)");
        feeder.join().unwrap();
    }

    #[test]
    fn test_timeout_keeps_captured_text() {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        tx.send(b"partial output".to_vec()).unwrap();
        let mut matcher = OutputMatcher::new(rx);

        let started = Instant::now();
        let outcome = matcher.wait_for(&patterns(&["nsh>"]), Duration::from_millis(100));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(
            outcome,
            MatchOutcome::TimedOut {
                before: "partial output".to_string()
            }
        );
        assert_eq!(matcher.buffered(), "partial output");
        drop(tx);
    }

    #[test]
    fn test_stream_end_returns_everything() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"last words".to_vec()).unwrap();
        drop(tx);
        let mut matcher = OutputMatcher::new(rx);

        let outcome = matcher.wait_for(&patterns(&["nsh>"]), Duration::from_secs(5));
        assert_eq!(
            outcome,
            MatchOutcome::StreamEnded {
                before: "last words".to_string()
            }
        );
        assert!(matcher.is_closed());
        assert!(matcher.buffered().is_empty());
    }

    #[test]
    fn test_match_found_even_after_stream_end() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"done\nnsh> ".to_vec()).unwrap();
        drop(tx);
        let mut matcher = OutputMatcher::new(rx);

        let outcome = matcher.wait_for(&patterns(&["nsh>"]), Duration::from_secs(1));
        assert_eq!(outcome.before(), "done\n");
    }

    #[test]
    fn test_regex_pattern() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"up_assert: Assertion failed at file: sched.c line: 42".to_vec())
            .unwrap();
        let mut matcher = OutputMatcher::new(rx);

        let regex = Pattern::regex(r"line: \d+").unwrap();
        let outcome = matcher.wait_for(&[regex], Duration::from_secs(1));
        match outcome {
            MatchOutcome::Matched { matched, .. } => assert_eq!(matched, "line: 42"),
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_regex_rejected() {
        assert!(Pattern::regex("(unclosed").is_err());
    }

    #[test]
    fn test_empty_literal_never_matches() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"anything".to_vec()).unwrap();
        drop(tx);
        let mut matcher = OutputMatcher::new(rx);

        let outcome = matcher.wait_for(&patterns(&["", "thing"]), Duration::from_secs(1));
        assert_eq!(outcome.index(), Some(1));
    }

    #[test]
    fn test_utf8_sequence_split_across_chunks() {
        let (tx, rx) = mpsc::channel();
        let text = "温度 ok".as_bytes();
        tx.send(text[..2].to_vec()).unwrap();
        tx.send(text[2..].to_vec()).unwrap();
        drop(tx);
        let mut matcher = OutputMatcher::new(rx);

        let outcome = matcher.wait_for(&patterns(&["ok"]), Duration::from_secs(1));
        assert_eq!(outcome.before(), "温度 ");
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let (tx, rx) = mpsc::channel();
        tx.send(vec![b'a', 0xff, b'b']).unwrap();
        drop(tx);
        let mut matcher = OutputMatcher::new(rx);

        let outcome = matcher.wait_for(&patterns(&["b"]), Duration::from_secs(1));
        assert_eq!(outcome.before(), "a\u{FFFD}");
    }

    #[test]
    fn test_observer_sees_chunks() {
        let (tx, rx) = mpsc::channel();
        tx.send(b"hello ".to_vec()).unwrap();
        tx.send(b"world".to_vec()).unwrap();
        drop(tx);
        let mut matcher = OutputMatcher::new(rx);
        matcher.set_observer(Box::new(TranscriptHandler::new()));
        matcher.record_input(b"ls\n");

        matcher.wait_for(&patterns(&["never"]), Duration::from_secs(1));
        let transcript = matcher.take_observer().unwrap().finish().unwrap();
        assert_eq!(transcript.output_text(), "hello world");
        assert_eq!(transcript.input, b"ls\n");
    }
}
