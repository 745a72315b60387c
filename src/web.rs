//! 基于登录凭据的下载器（不经过 API 签名）。
//!
//! Downloads that authenticate with the account login and password instead of
//! an API key: problem packages, `problem.xml` and `contest.xml`.
//!
//! Every request is a single GET. There is no retry policy here. The login and
//! password travel in the query string, so request URLs never reach error text.

use crate::client::builder::normalize_base_url;
use crate::client::execution::download_error;
use crate::protocol::ParamPair;
use crate::transport::download::ProgressSink;
use crate::transport::http::DEFAULT_HTTP_TIMEOUT;
use crate::transport::{HttpTransport, StreamingDownloader, Transfer, TransportError};
use crate::{Error, ErrorContext, Result};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_WEB_URL: &str = "https://polygon.codeforces.com/";

/// Login-authenticated downloader for archives the API does not serve.
pub struct WebDownloader {
    transport: HttpTransport,
    downloader: StreamingDownloader,
    base_url: String,
    login: String,
    password: String,
}

impl WebDownloader {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        Self::with_timeout(login, password, DEFAULT_HTTP_TIMEOUT)
    }

    /// `connect_timeout` bounds connection setup; transfers themselves are not capped.
    pub fn with_timeout(
        login: impl Into<String>,
        password: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            transport: HttpTransport::new(connect_timeout)?,
            downloader: StreamingDownloader::new(),
            base_url: DEFAULT_WEB_URL.to_string(),
            login: login.into(),
            password: password.into(),
        })
    }

    /// Site root used to build contest descriptor addresses.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.base_url = normalize_base_url(base_url)?;
        Ok(self)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Download a problem package archive from `problem_url`.
    ///
    /// `revision` defaults to the latest one on the server side, `package_type`
    /// is e.g. `standard`, `linux` or `windows`.
    pub async fn download_problem_package(
        &self,
        problem_url: &str,
        revision: Option<u32>,
        package_type: Option<&str>,
        pin: Option<&str>,
        dest: impl AsRef<Path>,
        progress: &dyn ProgressSink,
    ) -> Result<Transfer> {
        let mut params = self.credentials();
        if let Some(revision) = revision {
            params.push(ParamPair::new("revision", revision.to_string()));
        }
        if let Some(package_type) = package_type {
            params.push(ParamPair::new("type", package_type));
        }
        if let Some(pin) = pin {
            params.push(ParamPair::new("pin", pin));
        }
        self.fetch(problem_url, &params, dest.as_ref(), progress).await
    }

    /// Download `<problem_url>/problem.xml`.
    pub async fn download_problem_descriptor(
        &self,
        problem_url: &str,
        revision: Option<u32>,
        pin: Option<&str>,
        dest: impl AsRef<Path>,
        progress: &dyn ProgressSink,
    ) -> Result<Transfer> {
        let mut params = self.credentials();
        if let Some(revision) = revision {
            params.push(ParamPair::new("revision", revision.to_string()));
        }
        if let Some(pin) = pin {
            params.push(ParamPair::new("pin", pin));
        }
        let url = format!("{}/problem.xml", problem_url.trim_end_matches('/'));
        self.fetch(&url, &params, dest.as_ref(), progress).await
    }

    /// Download `<base>/c/<contest_uid>/contest.xml`.
    pub async fn download_contest_descriptor(
        &self,
        contest_uid: &str,
        pin: Option<&str>,
        dest: impl AsRef<Path>,
        progress: &dyn ProgressSink,
    ) -> Result<Transfer> {
        let mut params = self.credentials();
        if let Some(pin) = pin {
            params.push(ParamPair::new("pin", pin));
        }
        let url = format!("{}c/{}/contest.xml", self.base_url, contest_uid);
        self.fetch(&url, &params, dest.as_ref(), progress).await
    }

    fn credentials(&self) -> Vec<ParamPair> {
        vec![
            ParamPair::new("login", self.login.as_str()),
            ParamPair::new("password", self.password.as_str()),
        ]
    }

    async fn fetch(
        &self,
        url: &str,
        params: &[ParamPair],
        dest: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<Transfer> {
        let context = ErrorContext::new()
            .with_url(url)
            .with_parameters(params.to_vec())
            .with_source("web_downloader");

        let resp = self
            .transport
            .get(url, params)
            .await
            .map_err(|e| Error::transport(e, context.clone()))?;
        let status = resp.status();
        if !status.is_success() {
            debug!(url, http_status = status.as_u16(), "web download refused");
            return Err(Error::transport(
                TransportError::Status {
                    status: status.as_u16(),
                },
                context,
            ));
        }

        let total = resp.content_length();
        let transfer = self
            .downloader
            .copy_to_path(HttpTransport::body_without_url(resp), total, dest, progress)
            .await
            .map_err(|e| download_error(e, context))?;
        info!(url, bytes = transfer.bytes, path = %dest.display(), "web download saved");
        Ok(transfer)
    }
}

impl std::fmt::Debug for WebDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDownloader")
            .field("base_url", &self.base_url)
            .field("login", &self.login)
            .field("password", &"<hidden>")
            .finish()
    }
}
