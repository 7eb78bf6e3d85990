//! Browser-facing progress stream.
//!
//! [`ProgressHub`] fans relay messages out to every open `/ws` session and
//! keeps idle sockets alive; [`progress_stream`] is the upgrade handler.

pub mod hub;
mod session;

pub use hub::ProgressHub;
pub use session::progress_stream;
