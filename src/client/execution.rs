//! 请求执行逻辑：签名、发送、信封解析与退避重试。
//!
//! Request execution: signing, sending, envelope decoding and the backoff loop.
//!
//! Marshalling happens once per logical call; every attempt is signed anew
//! (new nonce, new timestamp). Only undecodable bodies are retried.

use crate::client::policy::{BackoffPolicy, Decision, RetryState};
use crate::client::types::{CallStats, CancelHandle};
use crate::protocol::{CallDescriptor, DecodeError, ParamPair, ResponseEnvelope};
use crate::transport::download::{DownloadError, ProgressSink, Transfer};
use crate::transport::HttpTransport;
use crate::{Error, ErrorContext, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::time::Instant;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::core::PolygonSession;

/// Outcome of one attempt that reached the server.
pub(crate) enum Attempt<T> {
    Decoded(T),
    Undecodable(DecodeError),
}

/// Run `attempt` until it yields a decoded value, sleeping between
/// undecodable responses according to `policy`.
///
/// Errors returned by `attempt` (network failures) end the loop immediately.
/// Both the attempt and the sleep race against `cancel`.
pub(crate) async fn retry_undecodable<T, F, Fut>(
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    context: &ErrorContext,
    mut attempt: F,
) -> Result<(T, RetryState)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Attempt<T>>>,
{
    let mut state = policy.start();
    loop {
        let n = state.attempts();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(context)),
            outcome = attempt(n) => outcome?,
        };

        let decode_error = match outcome {
            Attempt::Decoded(value) => return Ok((value, state)),
            Attempt::Undecodable(e) => e,
        };

        match state.on_decode_failure(policy) {
            Decision::Retry { delay } => {
                warn!(
                    attempt = n,
                    wait_ms = delay.as_millis() as u64,
                    error = %decode_error,
                    "polygon response is not an envelope, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(cancelled(context)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Decision::Exhausted => {
                warn!(
                    attempts = n,
                    waited_ms = state.elapsed().as_millis() as u64,
                    error = %decode_error,
                    "polygon API unavailable, giving up"
                );
                return Err(Error::ServiceUnavailable {
                    attempts: n,
                    waited_ms: state.elapsed().as_millis() as u64,
                    context: context.clone().with_source("retry_engine"),
                });
            }
        }
    }
}

/// Run `work` unless `cancel` fires first. Dropping `work` aborts the exchange.
async fn race_cancel<T>(
    cancel: Option<&CancelHandle>,
    url: String,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    match cancel {
        Some(cancel) => tokio::select! {
            biased;
            _ = cancel.token().cancelled() => Err(Error::Cancelled {
                context: ErrorContext::new().with_url(url).with_source("download"),
            }),
            done = work => done,
        },
        None => work.await,
    }
}

fn cancelled(context: &ErrorContext) -> Error {
    Error::Cancelled {
        context: context.clone().with_source("retry_engine"),
    }
}

/// Map a streaming failure onto the public taxonomy.
pub(crate) fn download_error(e: DownloadError, context: ErrorContext) -> Error {
    match e {
        DownloadError::Rejected(comment) => Error::rejected(comment, context),
        DownloadError::Transport(source) => Error::transport(source, context),
        DownloadError::Write(source) => Error::Io {
            source,
            context: context.with_source("download_sink"),
        },
    }
}

impl PolygonSession {
    /// Call a JSON endpoint and deserialize its `result` into `T`.
    ///
    /// Use `()` for endpoints that return nothing and `serde_json::Value` to
    /// keep the payload untyped.
    pub async fn call<T: DeserializeOwned>(&self, call: &CallDescriptor) -> Result<T> {
        self.call_with_stats(call, None).await.map(|(v, _)| v)
    }

    /// Like [`call`](Self::call), abandoning the call once `cancel` fires.
    pub async fn call_with_cancel<T: DeserializeOwned>(
        &self,
        call: &CallDescriptor,
        cancel: &CancelHandle,
    ) -> Result<T> {
        self.call_with_stats(call, Some(cancel)).await.map(|(v, _)| v)
    }

    /// Call a JSON endpoint and also return per-call statistics.
    pub async fn call_with_stats<T: DeserializeOwned>(
        &self,
        call: &CallDescriptor,
        cancel: Option<&CancelHandle>,
    ) -> Result<(T, CallStats)> {
        let (value, stats) = self.execute_json(call, cancel).await?;
        let typed = serde_json::from_value(value)?;
        Ok((typed, stats))
    }

    /// Call an endpoint that answers with raw text (file contents, test data, scripts).
    ///
    /// A body that decodes as a `FAILED` envelope is a rejection; any other
    /// body is returned verbatim. Never retried.
    pub async fn call_text(&self, call: &CallDescriptor) -> Result<String> {
        self.call_text_inner(call, None).await
    }

    pub async fn call_text_with_cancel(
        &self,
        call: &CallDescriptor,
        cancel: &CancelHandle,
    ) -> Result<String> {
        self.call_text_inner(call, Some(cancel)).await
    }

    /// Stream a binary endpoint (e.g. `problem.package`) into `sink`.
    ///
    /// A `FAILED` envelope delivered with HTTP 200 is reported as
    /// [`Error::RequestRejected`] and nothing is written. The transfer has no
    /// overall timeout, only the connect timeout.
    pub async fn download<W>(
        &self,
        call: &CallDescriptor,
        sink: &mut W,
        progress: &dyn ProgressSink,
    ) -> Result<Transfer>
    where
        W: AsyncWrite + Unpin,
    {
        self.download_inner(call, sink, progress, None).await
    }

    /// Like [`download`](Self::download), failing with [`Error::Cancelled`]
    /// once `cancel` fires. Bytes already written to `sink` stay there.
    pub async fn download_with_cancel<W>(
        &self,
        call: &CallDescriptor,
        sink: &mut W,
        progress: &dyn ProgressSink,
        cancel: &CancelHandle,
    ) -> Result<Transfer>
    where
        W: AsyncWrite + Unpin,
    {
        self.download_inner(call, sink, progress, Some(cancel)).await
    }

    /// Stream a binary endpoint into a file; the file only appears on success.
    pub async fn download_to_path(
        &self,
        call: &CallDescriptor,
        path: impl AsRef<Path>,
        progress: &dyn ProgressSink,
    ) -> Result<Transfer> {
        self.download_to_path_inner(call, path.as_ref(), progress, None)
            .await
    }

    /// Like [`download_to_path`](Self::download_to_path), failing with
    /// [`Error::Cancelled`] once `cancel` fires. The partial file is removed.
    pub async fn download_to_path_with_cancel(
        &self,
        call: &CallDescriptor,
        path: impl AsRef<Path>,
        progress: &dyn ProgressSink,
        cancel: &CancelHandle,
    ) -> Result<Transfer> {
        self.download_to_path_inner(call, path.as_ref(), progress, Some(cancel))
            .await
    }

    async fn download_inner<W>(
        &self,
        call: &CallDescriptor,
        sink: &mut W,
        progress: &dyn ProgressSink,
        cancel: Option<&CancelHandle>,
    ) -> Result<Transfer>
    where
        W: AsyncWrite + Unpin,
    {
        let work = async {
            let (resp, context) = self.open_download(call).await?;
            let total = resp.content_length();
            self.downloader
                .copy(Box::pin(resp.bytes_stream()), total, sink, progress)
                .await
                .map_err(|e| download_error(e, context))
        };
        let transfer = race_cancel(cancel, self.method_url(call.method()), work).await?;
        info!(method = call.method(), bytes = transfer.bytes, "polygon download finished");
        Ok(transfer)
    }

    async fn download_to_path_inner(
        &self,
        call: &CallDescriptor,
        path: &Path,
        progress: &dyn ProgressSink,
        cancel: Option<&CancelHandle>,
    ) -> Result<Transfer> {
        let work = async {
            let (resp, context) = self.open_download(call).await?;
            let total = resp.content_length();
            self.downloader
                .copy_to_path(Box::pin(resp.bytes_stream()), total, path, progress)
                .await
                .map_err(|e| download_error(e, context))
        };
        let transfer = race_cancel(cancel, self.method_url(call.method()), work).await?;
        info!(
            method = call.method(),
            bytes = transfer.bytes,
            path = %path.display(),
            "polygon download saved"
        );
        Ok(transfer)
    }

    async fn execute_json(
        &self,
        call: &CallDescriptor,
        cancel: Option<&CancelHandle>,
    ) -> Result<(Value, CallStats)> {
        let start = Instant::now();
        let call_id = Uuid::new_v4().to_string();
        let method = call.method();
        let url = self.method_url(method);
        let params = call.marshal().await?;
        let pin = self.pin();
        let context = self.request_context(&url, &self.unsigned_view(&params, pin.as_deref()));

        let never = CancellationToken::new();
        let token = cancel.map(|c| c.token()).unwrap_or(&never);

        debug!(call_id = call_id.as_str(), method, params = params.len(), "polygon call started");

        let result = retry_undecodable(&self.policy, token, &context, |attempt| {
            let url = url.as_str();
            let params = params.as_slice();
            let pin = pin.as_deref();
            let call_id = call_id.as_str();
            async move {
                let signed = self.sign_request(method, params, pin);
                let (status, body) = self.send(url, &signed).await?;
                debug!(call_id, attempt, http_status = status, bytes = body.len(), "polygon response");
                Ok(match ResponseEnvelope::decode(&body) {
                    Ok(envelope) => Attempt::Decoded((envelope, status)),
                    Err(e) => Attempt::Undecodable(e),
                })
            }
        })
        .await;

        let ((envelope, status), state) = match result {
            Ok(done) => done,
            Err(e) => {
                warn!(
                    call_id = call_id.as_str(),
                    method,
                    duration_ms = start.elapsed().as_millis() as u64,
                    timeout = e.is_timeout(),
                    error = %e,
                    "polygon call failed"
                );
                return Err(e);
            }
        };

        let stats = CallStats {
            method: method.to_string(),
            call_id,
            attempts: state.attempts(),
            backoff_ms: state.elapsed().as_millis() as u64,
            duration_ms: start.elapsed().as_millis(),
            http_status: Some(status),
        };

        match envelope.into_result() {
            Ok(value) => {
                info!(
                    call_id = stats.call_id.as_str(),
                    method,
                    attempts = stats.attempts,
                    backoff_ms = stats.backoff_ms,
                    duration_ms = stats.duration_ms as u64,
                    "polygon call finished"
                );
                Ok((value, stats))
            }
            Err(comment) => {
                info!(
                    call_id = stats.call_id.as_str(),
                    method,
                    http_status = status,
                    comment = comment.as_str(),
                    "polygon call rejected"
                );
                Err(Error::rejected(comment, context))
            }
        }
    }

    async fn call_text_inner(
        &self,
        call: &CallDescriptor,
        cancel: Option<&CancelHandle>,
    ) -> Result<String> {
        let method = call.method();
        let url = self.method_url(method);
        let params = call.marshal().await?;
        let pin = self.pin();
        let context = self.request_context(&url, &self.unsigned_view(&params, pin.as_deref()));

        let signed = self.sign_request(method, &params, pin.as_deref());
        let (status, body) = match cancel {
            Some(cancel) => tokio::select! {
                biased;
                _ = cancel.token().cancelled() => return Err(cancelled(&context)),
                sent = self.send(&url, &signed) => sent?,
            },
            None => self.send(&url, &signed).await?,
        };

        if let Ok(envelope) = ResponseEnvelope::decode(&body) {
            if let Err(comment) = envelope.into_result() {
                return Err(Error::rejected(comment, context));
            }
        }
        debug!(method, http_status = status, bytes = body.len(), "polygon text response");
        Ok(body)
    }

    /// Send a download request and check that a body worth streaming came back.
    async fn open_download(
        &self,
        call: &CallDescriptor,
    ) -> Result<(reqwest::Response, ErrorContext)> {
        let method = call.method();
        let url = self.method_url(method);
        let params = call.marshal().await?;
        let pin = self.pin();
        let context = self.request_context(&url, &self.unsigned_view(&params, pin.as_deref()));

        let signed = self.sign_request(method, &params, pin.as_deref());
        let resp = self
            .transport
            .post_multipart_streaming(&url, &signed)
            .await
            .map_err(|e| Error::transport(e, self.request_context(&url, &signed)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = HttpTransport::read_text(resp)
                .await
                .map_err(|e| Error::transport(e, context.clone()))?;
            if let Ok(envelope) = ResponseEnvelope::decode(&body) {
                if let Err(comment) = envelope.into_result() {
                    return Err(Error::rejected(comment, context));
                }
            }
            return Err(Error::transport(
                crate::transport::TransportError::Status {
                    status: status.as_u16(),
                },
                context,
            ));
        }

        debug!(
            method,
            http_status = status.as_u16(),
            content_length = resp.content_length(),
            "polygon download started"
        );
        Ok((resp, context))
    }

    /// POST the signed pairs and read the body as text.
    async fn send(&self, url: &str, signed: &[ParamPair]) -> Result<(u16, String)> {
        let resp = self
            .transport
            .post_multipart(url, signed)
            .await
            .map_err(|e| Error::transport(e, self.request_context(url, signed)))?;
        let status = resp.status().as_u16();
        let body = HttpTransport::read_text(resp)
            .await
            .map_err(|e| Error::transport(e, self.request_context(url, signed)))?;
        Ok((status, body))
    }

    /// Parameters for diagnostics that are not tied to a single attempt.
    fn unsigned_view(&self, params: &[ParamPair], pin: Option<&str>) -> Vec<ParamPair> {
        let mut view = params.to_vec();
        if let Some(pin) = pin {
            view.push(ParamPair::new("pin", pin));
        }
        view.push(ParamPair::new("apiKey", self.api_key.as_str()));
        view
    }
}
