//! Response envelope decoding.
//!
//! Every JSON endpoint answers with `{"status": "OK"|"FAILED", "comment": ..., "result": ...}`.
//! A body that does not parse as such an envelope (truncated JSON, an HTML
//! error page served with 200, ...) is a [`DecodeError`], which callers treat
//! differently from both network failures and `FAILED` envelopes.

use serde::Deserialize;
use serde_json::Value;

const SNIPPET_LEN: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnvelopeStatus {
    Ok,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseEnvelope {
    pub status: EnvelopeStatus,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}

/// The body was not a response envelope.
#[derive(Debug, thiserror::Error)]
#[error("response body is not a valid envelope: {reason} (body starts with {snippet:?})")]
pub struct DecodeError {
    pub reason: String,
    pub snippet: String,
}

impl DecodeError {
    fn new(reason: impl ToString, body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);
        Self {
            reason: reason.to_string(),
            snippet: text.chars().take(SNIPPET_LEN).collect(),
        }
    }
}

impl ResponseEnvelope {
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        Self::decode_bytes(body.as_bytes())
    }

    pub fn decode_bytes(body: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(body).map_err(|e| DecodeError::new(e, body))
    }

    /// Success payload or service comment, chosen by `status`.
    ///
    /// An `OK` envelope without `result` yields `null` (update endpoints return nothing).
    pub fn into_result(self) -> Result<Value, String> {
        match self.status {
            EnvelopeStatus::Ok => Ok(self.result.unwrap_or(Value::Null)),
            EnvelopeStatus::Failed => Err(self
                .comment
                .unwrap_or_else(|| "no comment provided".to_string())),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == EnvelopeStatus::Failed
    }
}
