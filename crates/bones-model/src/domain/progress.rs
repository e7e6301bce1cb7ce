use serde::{Deserialize, Serialize};

use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Message,
    Error,
}

/// One line of a newline-delimited JSON progress stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMessage {
    #[serde(alias = "Message_type")]
    pub message_type: MessageType,
    /// Only present on error records (e.g. `"500"`).
    #[serde(default, alias = "Status", skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, alias = "Message")]
    pub message: String,
}

impl ProgressMessage {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Message,
            status: None,
            message: message.into(),
        }
    }

    pub fn error(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Error,
            status: Some(status.into()),
            message: message.into(),
        }
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.message_type == MessageType::Error
    }

    /// Encode as a single stream line, trailing newline included.
    pub fn to_line(&self) -> Result<String, ModelError> {
        let mut line =
            serde_json::to_string(self).map_err(|e| ModelError::InvalidProgress(e.to_string()))?;
        line.push('\n');
        Ok(line)
    }
}

/// Incremental decoder for a progress stream arriving in arbitrary chunks.
#[derive(Debug, Default)]
pub struct ProgressDecoder {
    buf: Vec<u8>,
}

impl ProgressDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk and return every record completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<ProgressMessage>, ModelError> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(msg) = decode_line(&line)? {
                out.push(msg);
            }
        }
        Ok(out)
    }

    /// Decode whatever is left once the stream has closed.
    pub fn finish(self) -> Result<Option<ProgressMessage>, ModelError> {
        decode_line(&self.buf)
    }
}

fn decode_line(line: &[u8]) -> Result<Option<ProgressMessage>, ModelError> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(trimmed)
        .map(Some)
        .map_err(|e| ModelError::InvalidProgress(e.to_string()))
}
