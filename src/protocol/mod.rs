//! 协议层：参数编组、请求签名与响应信封解析。
//!
//! # Protocol Layer
//!
//! Everything that defines what goes on the wire and how responses are read,
//! without knowing about HTTP clients, sessions or retries.
//!
//! ## Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`params`] | Call descriptors and the parameter marshaller |
//! | [`signature`] | `apiSig` generation (nonce + SHA-512) |
//! | [`envelope`] | `{status, comment, result}` response envelope decoding |
//!
//! ## Example
//!
//! ```rust
//! use polygon_api::protocol::{CallDescriptor, RequestSigner};
//!
//! # async fn run() -> polygon_api::Result<()> {
//! let call = CallDescriptor::new("problem.tests")
//!     .param("problemId", 42)
//!     .param("testset", "tests")
//!     .param("noInputs", None::<bool>);
//! let pairs = call.marshal().await?;
//! assert_eq!(pairs.len(), 2);
//!
//! let signer = RequestSigner::new("secret");
//! let sig = signer.sign(call.method(), &pairs);
//! assert_eq!(sig.len(), 6 + 128);
//! # Ok(())
//! # }
//! ```

pub mod envelope;
pub mod params;
pub mod signature;

// Re-export main types for convenient access
pub use envelope::{DecodeError, EnvelopeStatus, ResponseEnvelope};
pub use params::{CallDescriptor, IntoParam, ParamPair, ParamValue};
pub use signature::RequestSigner;
