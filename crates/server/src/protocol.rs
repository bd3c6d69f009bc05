//! JSON wire messages exchanged over the WebSocket connection (§6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
  Query {
    question: String,
    #[serde(default)]
    index: Option<String>,
  },
  Status,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
  StreamStart,
  StreamChunk {
    chunk: String,
  },
  StreamEnd {
    sources: Vec<String>,
  },
  Error {
    message: String,
  },
  Status {
    status: IndexStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
  Ready,
  Indexing,
  NotReady,
}

/// The in-stream error sentinel prefix used when a chat API fails after
/// `stream_start` has already been sent (§4.7 step 8).
pub const STREAM_ERROR_PREFIX: &str = "[error] ";
