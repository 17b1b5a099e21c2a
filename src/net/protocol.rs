//! Command framing for the evaluation protocol.
//!
//! Every message is a sequence of fixed-width ASCII command fields,
//! optionally followed by a binary payload whose length was declared in
//! the preceding size field. Fields are space-padded to
//! [`COMMAND_LENGTH`] bytes and whitespace-stripped on read.
//!
//! Multi-part messages are assembled into a single buffer before being
//! handed to a connection's write strand, which is what makes them
//! atomic with respect to concurrent keep-alive writes.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::broker::WorkItem;
use crate::error::Error;

/// Width of every command, size, and mode field on the wire.
pub const COMMAND_LENGTH: usize = 16;

/// Payload encodings understood by both ends of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationMode {
    /// JSON text.
    Text,
    /// XML text.
    Xml,
    /// Compact binary.
    #[default]
    Binary,
}

impl SerializationMode {
    /// Numeric wire/configuration encoding (0/1/2).
    pub fn from_code(code: u8) -> Result<Self, String> {
        match code {
            0 => Ok(SerializationMode::Text),
            1 => Ok(SerializationMode::Xml),
            2 => Ok(SerializationMode::Binary),
            other => Err(format!(
                "unknown serialization mode {other} (expected 0..=2)"
            )),
        }
    }

    /// The numeric code of this mode.
    pub fn code(self) -> u8 {
        match self {
            SerializationMode::Text => 0,
            SerializationMode::Xml => 1,
            SerializationMode::Binary => 2,
        }
    }
}

// Configuration files carry the mode as its numeric code.
impl Serialize for SerializationMode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for SerializationMode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        SerializationMode::from_code(code).map_err(serde::de::Error::custom)
    }
}

/// Encodes a work item under the given mode.
pub fn encode_work_item(item: &WorkItem, mode: SerializationMode) -> Result<Vec<u8>, Error> {
    match mode {
        SerializationMode::Text => {
            serde_json::to_vec(item).map_err(|e| Error::Serialization(e.to_string()))
        }
        SerializationMode::Xml => quick_xml::se::to_string(item)
            .map(String::into_bytes)
            .map_err(|e| Error::Serialization(e.to_string())),
        SerializationMode::Binary => {
            bincode::serialize(item).map_err(|e| Error::Serialization(e.to_string()))
        }
    }
}

/// Decodes a work item under the given mode.
pub fn decode_work_item(bytes: &[u8], mode: SerializationMode) -> Result<WorkItem, Error> {
    match mode {
        SerializationMode::Text => {
            serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
        }
        SerializationMode::Xml => {
            let text =
                std::str::from_utf8(bytes).map_err(|e| Error::Serialization(e.to_string()))?;
            quick_xml::de::from_str(text).map_err(|e| Error::Serialization(e.to_string()))
        }
        SerializationMode::Binary => {
            bincode::deserialize(bytes).map_err(|e| Error::Serialization(e.to_string()))
        }
    }
}

/// Pads a command to one fixed-width field.
///
/// # Panics
/// Panics if `text` does not fit; callers only pass protocol constants
/// and decimal integers, which always do.
pub fn field(text: &str) -> Vec<u8> {
    assert!(
        text.len() <= COMMAND_LENGTH,
        "command {text:?} exceeds the field width"
    );
    let mut buf = vec![b' '; COMMAND_LENGTH];
    buf[..text.len()].copy_from_slice(text.as_bytes());
    buf
}

/// Reads one fixed-width field and strips padding.
pub async fn read_field<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<String> {
    let mut buf = [0u8; COMMAND_LENGTH];
    reader.read_exact(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).trim().to_string())
}

/// Reads a fixed-width field holding an ASCII-decoded integer.
pub async fn read_numeric_field<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<u64> {
    let text = read_field(reader).await?;
    text.parse::<u64>().map_err(|_| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("expected a numeric field, got {text:?}"),
        )
    })
}

/// Reads `len` payload bytes.
pub async fn read_payload<R: AsyncRead + Unpin>(
    reader: &mut R,
    len: usize,
) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// A single-field message (`ready`, `ping`, `pong`, `close`, `unknown`).
pub fn assemble_command(command: &str) -> Vec<u8> {
    field(command)
}

/// The `idle(<ms>)` backoff message.
pub fn assemble_idle(sleep_ms: u64) -> Vec<u8> {
    field(&format!("idle({sleep_ms})"))
}

/// Extracts the sleep time from an `idle(<ms>)` command.
pub fn parse_idle(command: &str) -> Option<u64> {
    command
        .strip_prefix("idle(")?
        .strip_suffix(')')?
        .parse()
        .ok()
}

/// `compute` + size + serialization mode + payload, as one buffer.
pub fn assemble_compute(payload: &[u8], mode: SerializationMode) -> Vec<u8> {
    let mut buf = field("compute");
    buf.extend(field(&payload.len().to_string()));
    buf.extend(field(&mode.code().to_string()));
    buf.extend_from_slice(payload);
    buf
}

/// `result` + size + payload, as one buffer.
pub fn assemble_result(payload: &[u8]) -> Vec<u8> {
    let mut buf = field("result");
    buf.extend(field(&payload.len().to_string()));
    buf.extend_from_slice(payload);
    buf
}
