//! HTTP transport: multipart POST for API calls, GET for web downloads,
//! and the streaming body copier used for binary endpoints.

pub mod download;
pub mod http;

pub use download::{StreamingDownloader, Transfer};
pub use http::{HttpTransport, TransportError};
