//! # coursetally - THE BINARY
//!
//! Library surface of the coursetally application, exposed so the
//! integration tests can exercise the HTTP API in-process.

pub mod api;
pub mod cli;
