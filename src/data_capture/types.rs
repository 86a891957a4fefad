//! Common data types used across the data_capture subsystem.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Direction of the bytes crossing a session relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Bytes typed by the network client, flowing towards the pty.
    Input,
    /// Bytes produced by the shell on the pty, flowing towards the client.
    Output,
}

impl Direction {
    /// Event code used in the recording stream.
    pub fn code(self) -> &'static str {
        match self {
            Direction::Input => "i",
            Direction::Output => "o",
        }
    }
}

/// Terminal colour theme, as carried by the recording header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fg: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bg: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub palette: String,
}

/// First line of a recording: asciicast v2 header.
///
/// Optional fields are left out of the encoded line when unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_time_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
}

/// Asciicast format version written in every header.
pub const ASCIICAST_VERSION: u32 = 2;

/// Per-session recording behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingOptions {
    /// Ceiling applied to the recorded gap between two events.
    pub idle_time_limit: Option<Duration>,
    /// Write payload bytes verbatim, without header or event framing.
    pub raw: bool,
    /// Record client input events; output is always recorded.
    pub record_input: bool,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            idle_time_limit: None,
            raw: false,
            record_input: true,
        }
    }
}
