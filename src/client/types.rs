use tokio_util::sync::CancellationToken;

/// Caller-side cancellation for in-flight calls.
///
/// Cancelling interrupts both the network exchange and any backoff sleep;
/// the call then fails with [`Error::Cancelled`](crate::Error::Cancelled).
/// Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A handle that is cancelled with this one but can also be cancelled alone.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Per-call facts, reported by `*_with_stats` calls and logged at the end of every call.
#[derive(Debug, Clone, Default)]
pub struct CallStats {
    pub method: String,
    /// Correlation id shared by every log line of the call.
    pub call_id: String,
    /// Requests sent, including the first one.
    pub attempts: u32,
    /// Total time spent sleeping between attempts.
    pub backoff_ms: u64,
    pub duration_ms: u128,
    /// HTTP status of the last response, if one was received.
    pub http_status: Option<u16>,
}

impl CallStats {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}
