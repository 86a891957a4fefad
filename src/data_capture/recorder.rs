//! Asciicast v2 recording of a single session.
//!
//! This module provides [`Recorder`], the single serialization point for the
//! bytes tapped from both relay directions of a session. Every tapped chunk
//! becomes one newline-terminated JSON event `[elapsed, "i"|"o", text]` in the
//! session's sink, after a one-line header.
//!
//! Highlights
//! - One mutex guards the clock and the sink, so events from the input and
//!   output relays never interleave and their timestamps follow sink order
//! - Idle gaps longer than the configured limit are recorded as the limit,
//!   while the wall-clock anchor keeps tracking real time
//! - UTF-8 sequences split across two chunks of the same direction are
//!   carried over instead of being mangled
//! - Raw mode bypasses framing and writes the payload bytes verbatim
//!
//! Minimal usage
//! ```no_run
//! use sshcast::data_capture::{Header, Recorder, RecordingOptions};
//! use uuid::Uuid;
//!
//! let sink = std::fs::File::create("/tmp/session.cast").unwrap();
//! let recorder = Recorder::new(Uuid::new_v4(), Box::new(sink), RecordingOptions::default());
//! recorder
//!     .write_header(&Header { version: 2, width: 80, height: 24, ..Default::default() })
//!     .unwrap();
//! recorder.log_output(b"$ ").unwrap();
//! recorder.log_input(b"ls\r").unwrap();
//! recorder.close().unwrap();
//! ```

use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, trace};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error_handling::types::CaptureError;

use super::types::{Direction, Header, RecordingOptions};

struct RecorderState {
    sink: Option<Box<dyn Write + Send>>,
    elapsed: Duration,
    last_write: Option<Instant>,
    header_written: bool,
    events: u64,
    /// Incomplete trailing UTF-8 bytes per direction (input, output).
    carry: [Vec<u8>; 2],
}

/// Converts tapped bytes into a timestamped event log.
///
/// Shared by both directions of a session through an `Arc`; all methods take
/// `&self` and serialize on an internal mutex.
pub struct Recorder {
    session_id: Uuid,
    options: RecordingOptions,
    state: Mutex<RecorderState>,
}

impl Recorder {
    pub fn new(session_id: Uuid, sink: Box<dyn Write + Send>, options: RecordingOptions) -> Self {
        debug!(
            "[{}] Recorder created (raw={}, idle_time_limit={:?})",
            session_id, options.raw, options.idle_time_limit
        );
        Self {
            session_id,
            options,
            state: Mutex::new(RecorderState {
                sink: Some(sink),
                elapsed: Duration::ZERO,
                last_write: None,
                header_written: false,
                events: 0,
                carry: [Vec::new(), Vec::new()],
            }),
        }
    }

    pub fn options(&self) -> &RecordingOptions {
        &self.options
    }

    /// Writes the header line. Allowed once, before any event. In raw mode
    /// nothing is written.
    pub fn write_header(&self, header: &Header) -> Result<(), CaptureError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.header_written {
            return Err(CaptureError::HeaderAlreadyWritten);
        }
        if state.events > 0 {
            return Err(CaptureError::HeaderAfterEvents);
        }
        if self.options.raw {
            state.header_written = true;
            return Ok(());
        }

        let mut line = serde_json::to_vec(header)?;
        line.push(b'\n');
        let sink = state.sink.as_mut().ok_or(CaptureError::SinkClosed)?;
        sink.write_all(&line)?;
        state.header_written = true;
        debug!("[{}] Recording header written", self.session_id);
        Ok(())
    }

    /// Records bytes typed by the client.
    pub fn log_input(&self, content: &[u8]) -> Result<(), CaptureError> {
        if !self.options.record_input {
            return Ok(());
        }
        self.log(Direction::Input, content)
    }

    /// Records bytes produced by the shell.
    pub fn log_output(&self, content: &[u8]) -> Result<(), CaptureError> {
        self.log(Direction::Output, content)
    }

    fn log(&self, direction: Direction, content: &[u8]) -> Result<(), CaptureError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.sink.is_none() {
            return Err(CaptureError::SinkClosed);
        }

        if self.options.raw {
            if let Some(sink) = state.sink.as_mut() {
                sink.write_all(content)?;
            }
            state.events += 1;
            return Ok(());
        }

        let elapsed = self.advance_clock(&mut state);

        let slot = carry_slot(direction);
        let mut bytes = std::mem::take(&mut state.carry[slot]);
        bytes.extend_from_slice(content);
        let (text, tail) = split_utf8_tail(bytes);
        state.carry[slot] = tail;

        // A chunk made only of an incomplete sequence waits for the next one.
        if !text.is_empty() {
            Self::write_event(&mut state, elapsed, direction, &text)?;
        }

        let preview = &content[..std::cmp::min(content.len(), 64)];
        trace!(
            "[{}] recorded {} {} bytes at {:.6}s: {}{}",
            self.session_id,
            direction.code(),
            content.len(),
            elapsed,
            String::from_utf8_lossy(preview),
            if content.len() > 64 { " ..." } else { "" }
        );
        Ok(())
    }

    /// Moves the recorded clock to now, capping the gap at the idle limit,
    /// and returns the elapsed seconds.
    fn advance_clock(&self, state: &mut RecorderState) -> f64 {
        let now = Instant::now();
        match state.last_write {
            None => state.last_write = Some(now),
            Some(last) => {
                let delta = now.saturating_duration_since(last);
                state.last_write = Some(last + delta);
                let recorded = match self.options.idle_time_limit {
                    Some(limit) if delta > limit => limit,
                    _ => delta,
                };
                state.elapsed += recorded;
            }
        }
        state.elapsed.as_secs_f64()
    }

    fn write_event(
        state: &mut RecorderState,
        elapsed: f64,
        direction: Direction,
        text: &str,
    ) -> Result<(), CaptureError> {
        let mut line = serde_json::to_vec(&(elapsed, direction.code(), text))?;
        line.push(b'\n');
        let sink = state.sink.as_mut().ok_or(CaptureError::SinkClosed)?;
        sink.write_all(&line)?;
        state.events += 1;
        Ok(())
    }

    /// Recorded duration so far (idle gaps capped).
    pub fn elapsed(&self) -> Duration {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).elapsed
    }

    /// Number of events (or raw chunks) written so far.
    pub fn event_count(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).events
    }

    /// Flushes and releases the sink. Later calls fail with
    /// [`CaptureError::SinkClosed`].
    pub fn close(&self) -> Result<(), CaptureError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.sink.is_none() {
            return Err(CaptureError::SinkClosed);
        }

        // Bytes still waiting for the rest of a sequence are written as is.
        if !self.options.raw && state.carry.iter().any(|tail| !tail.is_empty()) {
            let elapsed = self.advance_clock(&mut state);
            for direction in [Direction::Input, Direction::Output] {
                let tail = std::mem::take(&mut state.carry[carry_slot(direction)]);
                if !tail.is_empty() {
                    let text = String::from_utf8_lossy(&tail).into_owned();
                    Self::write_event(&mut state, elapsed, direction, &text)?;
                }
            }
        }

        let mut sink = state.sink.take().ok_or(CaptureError::SinkClosed)?;
        sink.flush()?;
        debug!(
            "[{}] Recorder closed after {} event(s), {:.3}s recorded",
            self.session_id,
            state.events,
            state.elapsed.as_secs_f64()
        );
        Ok(())
    }
}

fn carry_slot(direction: Direction) -> usize {
    match direction {
        Direction::Input => 0,
        Direction::Output => 1,
    }
}

/// Decodes `bytes` lossily, holding back a trailing incomplete UTF-8 sequence
/// so it can be completed by the next chunk.
fn split_utf8_tail(mut bytes: Vec<u8>) -> (String, Vec<u8>) {
    let tail = match std::str::from_utf8(&bytes) {
        Ok(_) => Vec::new(),
        Err(e) if e.error_len().is_none() => bytes.split_off(e.valid_up_to()),
        Err(_) => {
            // Invalid sequence somewhere; only an incomplete suffix is kept.
            let start = bytes.len().saturating_sub(3);
            match (start..bytes.len()).find(|&i| {
                let b = bytes[i];
                b >= 0xC0
                    && std::str::from_utf8(&bytes[i..])
                        .is_err_and(|e| e.valid_up_to() == 0 && e.error_len().is_none())
            }) {
                Some(i) => bytes.split_off(i),
                None => Vec::new(),
            }
        }
    };
    (String::from_utf8_lossy(&bytes).into_owned(), tail)
}
