use crate::client::policy::BackoffPolicy;
use crate::protocol::{ParamPair, RequestSigner};
use crate::transport::{HttpTransport, StreamingDownloader};
use crate::ErrorContext;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_BASE_URL: &str = "https://polygon.codeforces.com/api/";

/// Authenticated session against the Polygon API.
///
/// Owns one pooled HTTP client and immutable configuration. It holds no
/// per-call state, so a single session can serve concurrent calls from many
/// tasks (wrap it in an `Arc` to share it).
pub struct PolygonSession {
    pub(crate) transport: HttpTransport,
    pub(crate) downloader: StreamingDownloader,
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) signer: RequestSigner,
    pub(crate) policy: BackoffPolicy,
    pub(crate) pin: RwLock<Option<String>>,
}

impl PolygonSession {
    pub fn builder() -> crate::client::builder::PolygonSessionBuilder {
        crate::client::builder::PolygonSessionBuilder::new()
    }

    /// Build a session purely from keyring / environment configuration.
    pub fn from_env() -> crate::Result<Self> {
        Self::builder().build()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Replace the pin sent with every following request (`None` removes it).
    ///
    /// Calls already in flight keep the pin they started with.
    pub fn set_pin(&self, pin: Option<String>) {
        match self.pin.write() {
            Ok(mut guard) => *guard = pin,
            Err(poisoned) => *poisoned.into_inner() = pin,
        }
    }

    pub fn pin(&self) -> Option<String> {
        match self.pin.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn method_url(&self, method: &str) -> String {
        format!("{}{}", self.base_url, method)
    }

    /// Extend marshalled parameters into the final wire set for one attempt:
    /// `pin` (if any), `apiKey`, `time` and a freshly salted `apiSig`.
    ///
    /// The signature covers every pair that precedes it.
    pub(crate) fn sign_request(
        &self,
        method: &str,
        params: &[ParamPair],
        pin: Option<&str>,
    ) -> Vec<ParamPair> {
        let mut signed = Vec::with_capacity(params.len() + 4);
        signed.extend_from_slice(params);
        if let Some(pin) = pin {
            signed.push(ParamPair::new("pin", pin));
        }
        signed.push(ParamPair::new("apiKey", self.api_key.as_str()));
        signed.push(ParamPair::new("time", unix_time().to_string()));
        let sig = self.signer.sign(method, &signed);
        signed.push(ParamPair::new("apiSig", sig));
        signed
    }

    pub(crate) fn request_context(&self, url: &str, params: &[ParamPair]) -> ErrorContext {
        ErrorContext::new()
            .with_url(url)
            .with_parameters(params.to_vec())
    }
}

impl std::fmt::Debug for PolygonSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolygonSession")
            .field("base_url", &self.base_url)
            .field("api_key", &"<hidden>")
            .field("signer", &self.signer)
            .field("policy", &self.policy)
            .field("pin", &self.pin().map(|_| "<set>"))
            .finish()
    }
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
