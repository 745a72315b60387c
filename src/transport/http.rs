use crate::protocol::ParamPair;
use crate::Result;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::Proxy;
use std::env;
use std::time::Duration;
use tracing::debug;

/// Default overall timeout for one JSON or text exchange.
///
/// Streaming downloads are not capped as a whole; package archives can take
/// longer than this to transfer.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Default timeout for establishing a connection, applied to every request.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Pooled HTTP client shared by every call of a session.
///
/// `reqwest::Client` is internally reference counted and safe to use from
/// many tasks at once, so no call-level locking is needed.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpTransport {
    /// `request_timeout` bounds whole JSON and text exchanges; downloads only
    /// get the connect timeout.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT.min(request_timeout))
            .pool_max_idle_per_host(
                env::var("POLYGON_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(8),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .user_agent(concat!("polygon-api-rust/", env!("CARGO_PKG_VERSION")));

        if let Ok(proxy_url) = env::var("POLYGON_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder.build().map_err(|e| {
            crate::Error::transport(
                TransportError::Other(e.to_string()),
                crate::ErrorContext::new().with_source("http_transport"),
            )
        })?;

        Ok(Self {
            client,
            request_timeout,
        })
    }

    /// POST the parameters as a multipart body, one binary part per pair.
    ///
    /// Binary parts (instead of url-encoded fields) keep large text values such
    /// as embedded sources intact. The whole exchange, body included, is bounded
    /// by the request timeout.
    pub async fn post_multipart(
        &self,
        url: &str,
        params: &[ParamPair],
    ) -> std::result::Result<reqwest::Response, TransportError> {
        let request = self
            .client
            .post(url)
            .multipart(multipart_form(params)?)
            .timeout(self.request_timeout);
        debug!(url, parts = params.len(), "polygon POST");
        let resp = request.send().await?;
        debug!(url, http_status = resp.status().as_u16(), "polygon POST answered");
        Ok(resp)
    }

    /// Like [`post_multipart`](Self::post_multipart) for streamed bodies: no
    /// overall timeout, only the connect timeout.
    pub async fn post_multipart_streaming(
        &self,
        url: &str,
        params: &[ParamPair],
    ) -> std::result::Result<reqwest::Response, TransportError> {
        let request = self.client.post(url).multipart(multipart_form(params)?);
        debug!(url, parts = params.len(), "polygon POST (streaming)");
        let resp = request.send().await?;
        debug!(url, http_status = resp.status().as_u16(), "polygon POST answered");
        Ok(resp)
    }

    /// GET with the parameters in the query string, for streamed bodies.
    ///
    /// The query may carry credentials, so the URL is stripped from any
    /// `reqwest` error before it leaves this function.
    pub async fn get(
        &self,
        url: &str,
        query: &[ParamPair],
    ) -> std::result::Result<reqwest::Response, TransportError> {
        let query: Vec<(&str, &str)> = query
            .iter()
            .map(|p| (p.name.as_str(), p.value.as_str()))
            .collect();
        debug!(url, "polygon GET");
        let resp = self
            .client
            .get(url)
            .query(&query)
            .send()
            .await
            .map_err(TransportError::without_url)?;
        Ok(resp)
    }

    /// Body chunks of a response whose URL must not appear in errors.
    pub fn body_without_url(
        resp: reqwest::Response,
    ) -> impl Stream<Item = std::result::Result<Bytes, TransportError>> + Unpin {
        Box::pin(resp.bytes_stream().map(|chunk| chunk.map_err(TransportError::without_url)))
    }

    /// Read the whole body as text.
    pub async fn read_text(
        resp: reqwest::Response,
    ) -> std::result::Result<String, TransportError> {
        Ok(resp.text().await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {status}")]
    Status { status: u16 },

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Wrap a `reqwest` error with its URL (and query string) removed.
    pub fn without_url(e: reqwest::Error) -> Self {
        TransportError::Http(e.without_url())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Http(e) if e.is_timeout())
    }
}

fn multipart_form(params: &[ParamPair]) -> std::result::Result<Form, TransportError> {
    let mut form = Form::new();
    for p in params {
        let part = Part::bytes(p.value.clone().into_bytes())
            .mime_str("application/octet-stream")
            .map_err(TransportError::Http)?;
        form = form.part(p.name.clone(), part);
    }
    Ok(form)
}
