//! Console observers for watching an emulator session as it happens.
//!
//! An [`IoObserver`] sees every chunk of console output as the matcher
//! consumes it, plus everything written to the emulator.
//!
//! # Built-in Observers
//!
//! - [`TranscriptHandler`]: accumulates console output and sent input, returns them via `finish()`
//! - [`TeeHandler`]: records a transcript and echoes console output to the real terminal

/// Everything exchanged with the emulator, returned by [`IoObserver::finish()`].
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    /// Console output bytes, combined stdout and stderr.
    pub output: Vec<u8>,
    /// Bytes written to the emulator's input.
    pub input: Vec<u8>,
}

impl Transcript {
    /// Console output decoded as UTF-8, lossily.
    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Trait for observing the console of a running emulator.
pub trait IoObserver: Send {
    /// Called when output bytes arrive.
    fn on_output(&mut self, data: &[u8]) {
        let _ = data;
    }

    /// Called when bytes are written to the emulator.
    fn on_input(&mut self, data: &[u8]) {
        let _ = data;
    }

    /// Called after the session ends to extract recorded data.
    fn finish(self: Box<Self>) -> Option<Transcript> {
        None
    }
}

/// Observer that records the whole session for post-run inspection.
#[derive(Debug, Default)]
pub struct TranscriptHandler {
    transcript: Transcript,
}

impl TranscriptHandler {
    /// Create a new transcript handler.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IoObserver for TranscriptHandler {
    fn on_output(&mut self, data: &[u8]) {
        self.transcript.output.extend_from_slice(data);
    }

    fn on_input(&mut self, data: &[u8]) {
        self.transcript.input.extend_from_slice(data);
    }

    fn finish(self: Box<Self>) -> Option<Transcript> {
        Some(self.transcript)
    }
}

/// Observer that records a transcript AND echoes console output to stdout.
#[derive(Debug, Default)]
pub struct TeeHandler {
    transcript: TranscriptHandler,
}

impl TeeHandler {
    /// Create a new tee handler.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IoObserver for TeeHandler {
    fn on_output(&mut self, data: &[u8]) {
        use std::io::Write;
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(data);
        let _ = stdout.flush();
        self.transcript.on_output(data);
    }

    fn on_input(&mut self, data: &[u8]) {
        self.transcript.on_input(data);
    }

    fn finish(self: Box<Self>) -> Option<Transcript> {
        Box::new(self.transcript).finish()
    }
}
