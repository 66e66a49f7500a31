//! Wire messages and line framing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use crate::transport::Connection;

/// Longest accepted message line (16 MiB).
pub(crate) const MAX_LINE: usize = 16 * 1024 * 1024;

/// One call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Reply to the request with the same `id`; exactly one of `result`/`error` is meaningful.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(error.into()),
        }
    }
}

pub(crate) type LineReader = FramedRead<ReadHalf<Connection>, LinesCodec>;
pub(crate) type LineWriter = FramedWrite<WriteHalf<Connection>, LinesCodec>;

/// Splits a connection into framed line halves.
pub(crate) fn framed(conn: Connection) -> (LineReader, LineWriter) {
    let (r, w) = tokio::io::split(conn);
    (
        FramedRead::new(r, LinesCodec::new_with_max_length(MAX_LINE)),
        FramedWrite::new(w, LinesCodec::new_with_max_length(MAX_LINE)),
    )
}
