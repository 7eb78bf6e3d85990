//! External delivery channels for job events.

pub mod webhook;
