//! Domain types and pure decision logic for the render job monitor.
//!
//! Nothing in this crate performs I/O. The worker and API crates feed it
//! observations (ComfyUI history, queue state, file checks) and apply the
//! resulting decisions to the database.

pub mod completion;
pub mod error;
pub mod job_events;
pub mod job_status;
pub mod outputs;
pub mod retry;
pub mod timeout;
pub mod types;
