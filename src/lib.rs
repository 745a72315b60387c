//! # polygon-api-rust
//!
//! 这是 Polygon 题目管理服务 HTTP API 的 Rust 客户端，负责签名、传输、重试与流式下载。
//!
//! Client binding for the Polygon problem-management HTTP API.
//!
//! ## Overview
//!
//! Every remote procedure goes through the same request pipeline:
//!
//! 1. **Marshalling**: a [`CallDescriptor`] (method path plus ordered, optional
//!    parameters) becomes an ordered list of [`ParamPair`]s. File parameters are
//!    read as UTF-8 text, absent parameters are dropped.
//! 2. **Signing**: each attempt is signed with a fresh nonce and timestamp
//!    (`apiKey`, `time`, `apiSig`).
//! 3. **Transport**: the signed pairs are POSTed as a multipart body.
//! 4. **Decoding + retry**: the body is decoded as a `{status, comment, result}`
//!    envelope. Undecodable bodies are treated as transient unavailability and
//!    retried with exponential backoff; `FAILED` envelopes and network errors
//!    are final.
//!
//! Binary endpoints (package archives) use a streaming path that never buffers
//! the whole body and never writes a `FAILED` envelope to the destination.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use polygon_api::{CallDescriptor, PolygonSession};
//!
//! #[tokio::main]
//! async fn main() -> polygon_api::Result<()> {
//!     let session = PolygonSession::builder()
//!         .api_key("your-api-key")
//!         .api_secret("your-secret")
//!         .build()?;
//!
//!     let info: serde_json::Value = session
//!         .call(&CallDescriptor::new("problem.info").param("problemId", 12345))
//!         .await?;
//!     println!("{info}");
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`protocol`] | Parameter marshalling, request signing, response envelopes |
//! | [`transport`] | Multipart HTTP transport and streaming downloads |
//! | [`client`] | Session, builder, retry engine |
//! | [`web`] | Login-authenticated archive and descriptor downloads |

pub mod client;
pub mod protocol;
pub mod transport;
pub mod web;

pub use client::{CallStats, CancelHandle, PolygonSession, PolygonSessionBuilder};
pub use client::policy::BackoffPolicy;
pub use protocol::{CallDescriptor, IntoParam, ParamPair, ParamValue};
pub use transport::download::{NoopProgress, ProgressSink, TracingProgress};
pub use web::WebDownloader;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
