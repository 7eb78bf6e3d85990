//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` (or any executor, for use inside transactions) as the
//! first argument.

pub mod event_repo;
pub mod job_status_history_repo;
pub mod production_job_repo;

pub use event_repo::EventRepo;
pub use job_status_history_repo::JobStatusHistoryRepo;
pub use production_job_repo::{ProductionJobRepo, TransitionGuard};
