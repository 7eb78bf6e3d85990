//! Domain model structs and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct matching
//! the database row, plus the `Deserialize` DTOs used for inserts and
//! listing.

pub mod event;
pub mod production_job;
