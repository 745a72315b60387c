use crate::client::core::{PolygonSession, DEFAULT_BASE_URL};
use crate::client::policy::BackoffPolicy;
use crate::protocol::RequestSigner;
use crate::transport::http::DEFAULT_HTTP_TIMEOUT;
use crate::transport::{HttpTransport, StreamingDownloader};
use crate::{Error, Result};
use keyring::Entry;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

const KEYRING_SERVICE: &str = "polygon-api";

/// Builder for [`PolygonSession`].
///
/// Each setting is resolved as: explicit setter, then environment (credentials
/// also consult the OS keyring first), then default.
///
/// | Setting | Env |
/// |---------|-----|
/// | base URL | `POLYGON_API_URL` |
/// | API key / secret | keyring `polygon-api` (`api-key`, `api-secret`), `POLYGON_API_KEY`, `POLYGON_API_SECRET` |
/// | pin | `POLYGON_PIN` |
/// | backoff | `POLYGON_RETRY_START_WAIT_MS`, `POLYGON_RETRY_MULTIPLIER`, `POLYGON_RETRY_MAX_WAIT_MS`, `POLYGON_RETRY_MAX_RETRIES` |
/// | HTTP timeout | `POLYGON_HTTP_TIMEOUT_SECS` |
#[derive(Default)]
pub struct PolygonSessionBuilder {
    base_url: Option<String>,
    api_key: Option<String>,
    api_secret: Option<String>,
    pin: Option<String>,
    start_wait: Option<Duration>,
    backoff_multiplier: Option<f64>,
    max_cumulative_wait: Option<Duration>,
    max_retries: Option<u32>,
    http_timeout: Option<Duration>,
    skip_keyring: bool,
    skip_env: bool,
}

impl PolygonSessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the API base address (primarily for testing with mock servers).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn api_secret(mut self, secret: impl Into<String>) -> Self {
        self.api_secret = Some(secret.into());
        self
    }

    /// Pin code sent with every request, for pin-protected problems and contests.
    pub fn pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(pin.into());
        self
    }

    pub fn start_wait(mut self, wait: Duration) -> Self {
        self.start_wait = Some(wait);
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    pub fn max_cumulative_wait(mut self, wait: Duration) -> Self {
        self.max_cumulative_wait = Some(wait);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Replace all backoff parameters at once.
    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.start_wait = Some(policy.start_wait);
        self.backoff_multiplier = Some(policy.multiplier);
        self.max_cumulative_wait = Some(policy.max_cumulative_wait);
        self.max_retries = Some(policy.max_retries);
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    /// Whether missing credentials are looked up in the OS keyring (default: yes).
    pub fn use_keyring(mut self, enable: bool) -> Self {
        self.skip_keyring = !enable;
        self
    }

    /// Whether unset settings fall back to `POLYGON_*` environment variables (default: yes).
    pub fn use_environment(mut self, enable: bool) -> Self {
        self.skip_env = !enable;
        self
    }

    /// Build the session.
    pub fn build(self) -> Result<PolygonSession> {
        let use_keyring = !self.skip_keyring;
        let env = Env {
            enabled: !self.skip_env,
        };
        let base_url = normalize_base_url(
            &self
                .base_url
                .or_else(|| env.string("POLYGON_API_URL"))
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        )?;

        let api_key = self
            .api_key
            .or_else(|| credential(use_keyring, &env, "api-key", "POLYGON_API_KEY"))
            .ok_or_else(|| {
                Error::configuration("API key is not set (builder, keyring or POLYGON_API_KEY)")
            })?;
        let api_secret = self
            .api_secret
            .or_else(|| credential(use_keyring, &env, "api-secret", "POLYGON_API_SECRET"))
            .ok_or_else(|| {
                Error::configuration(
                    "API secret is not set (builder, keyring or POLYGON_API_SECRET)",
                )
            })?;

        let defaults = BackoffPolicy::default();
        let policy = BackoffPolicy {
            start_wait: self
                .start_wait
                .or_else(|| env.parse::<u64>("POLYGON_RETRY_START_WAIT_MS").map(Duration::from_millis))
                .unwrap_or(defaults.start_wait),
            multiplier: self
                .backoff_multiplier
                .or_else(|| env.parse::<f64>("POLYGON_RETRY_MULTIPLIER"))
                .unwrap_or(defaults.multiplier),
            max_cumulative_wait: self
                .max_cumulative_wait
                .or_else(|| env.parse::<u64>("POLYGON_RETRY_MAX_WAIT_MS").map(Duration::from_millis))
                .unwrap_or(defaults.max_cumulative_wait),
            max_retries: self
                .max_retries
                .or_else(|| env.parse::<u32>("POLYGON_RETRY_MAX_RETRIES"))
                .unwrap_or(defaults.max_retries),
        };
        policy.validate()?;

        let timeout = self
            .http_timeout
            .or_else(|| env.parse::<u64>("POLYGON_HTTP_TIMEOUT_SECS").map(Duration::from_secs))
            .unwrap_or(DEFAULT_HTTP_TIMEOUT);
        let pin = self.pin.or_else(|| env.string("POLYGON_PIN"));

        debug!(
            base_url = base_url.as_str(),
            start_wait_ms = policy.start_wait.as_millis() as u64,
            max_retries = policy.max_retries,
            pin_set = pin.is_some(),
            "polygon session configured"
        );

        Ok(PolygonSession {
            transport: HttpTransport::new(timeout)?,
            downloader: StreamingDownloader::new(),
            base_url,
            api_key,
            signer: RequestSigner::new(api_secret),
            policy,
            pin: RwLock::new(pin),
        })
    }
}

fn credential(use_keyring: bool, env: &Env, keyring_user: &str, env_var: &str) -> Option<String> {
    // 1. Try Keyring
    if use_keyring {
        if let Ok(entry) = Entry::new(KEYRING_SERVICE, keyring_user) {
            if let Ok(value) = entry.get_password() {
                return Some(value);
            }
        }
    }

    // 2. Try Environment Variable
    env.string(env_var)
}

/// Validate the base address and make sure method paths can be appended to it.
pub(crate) fn normalize_base_url(raw: &str) -> Result<String> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| Error::configuration(format!("invalid base URL {:?}: {}", raw, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::configuration(format!(
            "base URL must use http or https, got {:?}",
            raw
        )));
    }
    let mut url = parsed.to_string();
    if !url.ends_with('/') {
        url.push('/');
    }
    Ok(url)
}

/// Environment lookups, switched off by [`PolygonSessionBuilder::use_environment`].
struct Env {
    enabled: bool,
}

impl Env {
    fn string(&self, name: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        std::env::var(name).ok().filter(|s| !s.trim().is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.string(name).and_then(|s| s.trim().parse::<T>().ok())
    }
}
