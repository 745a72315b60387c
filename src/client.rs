//! Polygon API session.
//!
//! Keep the public surface small: a session built once, then `call`,
//! `call_text` and `download` for every endpoint. Implementation details are
//! split into submodules under `src/client/`.

pub mod builder;
pub mod core;
pub(crate) mod execution;
pub mod policy;
pub mod types;

pub use builder::PolygonSessionBuilder;
pub use core::PolygonSession;
pub use policy::{BackoffPolicy, RetryState};
pub use types::{CallStats, CancelHandle};
