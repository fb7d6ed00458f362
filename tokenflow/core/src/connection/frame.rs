//! Wire Frames
//!
//! Turns raw stream bytes into typed frames. Two layers:
//!
//! - [`LineDecoder`] buffers bytes and yields complete lines
//! - [`FrameParser`] classifies one line into a [`Frame`]
//!
//! # Default Wire Format
//!
//! [`JsonFrameParser`] understands newline-delimited JSON and Server-Sent
//! Events carrying JSON in `data:` lines:
//!
//! ```text
//! {"type":"metadata","job_id":"j-1","estimated_duration_ms":12000}
//! data: {"type":"token","content":"Hel"}
//! data: {"type":"progress","progress":40,"estimated_time_ms":7000}
//! data: {"type":"done","result":"ok"}
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FrameParseError;

/// Maximum line length kept in the decoder before it is discarded (1 MB)
pub const MAX_LINE_SIZE: usize = 1024 * 1024;

/// Metadata describing the overall streaming job
///
/// Replaced wholesale every time a metadata-frame arrives.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamingMetadata {
    /// Server-side job identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Model producing the stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Expected total duration of the job
    #[serde(
        default,
        rename = "estimated_duration_ms",
        with = "duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub estimated_duration: Option<Duration>,
    /// Any other fields the server sent
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One classified frame from the transport
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Incremental output
    Token(String),
    /// Job description
    Metadata(StreamingMetadata),
    /// Progress report
    Progress {
        /// Percentage, clamped to 0-100
        percent: f64,
        /// Server's estimate of total job time
        estimated: Option<Duration>,
    },
    /// Terminal success; payload is the frame minus its `type`
    Done(Value),
    /// Terminal failure reported by the server
    Error(String),
}

/// Splits a byte stream into lines
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes to the buffer
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() > MAX_LINE_SIZE && !self.buffer.contains(&b'\n') {
            tracing::warn!(bytes = self.buffer.len(), "Discarding oversized partial line");
            self.buffer.clear();
        }
    }

    /// Pop the next complete line, without its terminator
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Take whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest).trim_end().to_string();
        (!line.is_empty()).then_some(line)
    }

    /// Bytes currently buffered
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Classifies one line of the stream
pub trait FrameParser: Send + Sync {
    /// Parse a line
    ///
    /// Returns `Ok(None)` for lines that carry no frame (keep-alives,
    /// SSE field lines, blank lines).
    fn parse(&self, line: &str) -> Result<Option<Frame>, FrameParseError>;
}

/// JSON frames over NDJSON or SSE
#[derive(Clone, Debug, Default)]
pub struct JsonFrameParser;

impl JsonFrameParser {
    /// Create the parser
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn parse_object(&self, mut object: Map<String, Value>) -> Result<Frame, FrameParseError> {
        let frame_type = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameParseError::MissingField {
                frame: "<untyped>".to_string(),
                field: "type",
            })?
            .to_string();

        match frame_type.as_str() {
            "token" => object
                .remove("content")
                .and_then(|v| v.as_str().map(str::to_string))
                .map(Frame::Token)
                .ok_or_else(|| FrameParseError::MissingField {
                    frame: frame_type.clone(),
                    field: "content",
                }),
            "metadata" => {
                object.remove("type");
                serde_json::from_value(Value::Object(object))
                    .map(Frame::Metadata)
                    .map_err(|e| FrameParseError::InvalidJson(e.to_string()))
            }
            "progress" => {
                let percent = object
                    .get("progress")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| FrameParseError::MissingField {
                        frame: frame_type.clone(),
                        field: "progress",
                    })?;
                let estimated = object
                    .get("estimated_time_ms")
                    .and_then(Value::as_u64)
                    .map(Duration::from_millis);
                Ok(Frame::Progress {
                    percent: percent.clamp(0.0, 100.0),
                    estimated,
                })
            }
            "done" => {
                object.remove("type");
                Ok(Frame::Done(Value::Object(object)))
            }
            "error" => {
                let message = object
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified server error")
                    .to_string();
                Ok(Frame::Error(message))
            }
            _ => Err(FrameParseError::UnknownType(frame_type.clone())),
        }
    }
}

impl FrameParser for JsonFrameParser {
    fn parse(&self, line: &str) -> Result<Option<Frame>, FrameParseError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }

        let payload = if let Some(data) = line.strip_prefix("data:") {
            data.trim_start()
        } else if ["event:", "id:", "retry:"]
            .iter()
            .any(|field| line.starts_with(field))
        {
            return Ok(None);
        } else {
            line
        };

        if payload == "[DONE]" {
            return Ok(Some(Frame::Done(Value::Null)));
        }

        match serde_json::from_str::<Value>(payload) {
            Ok(Value::Object(object)) => self.parse_object(object).map(Some),
            Ok(other) => Err(FrameParseError::InvalidJson(format!(
                "expected object, got {other}"
            ))),
            Err(e) => Err(FrameParseError::InvalidJson(e.to_string())),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_u64(d.as_millis() as u64),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
