//! Studio gateway: generation and admin API in front of a ComfyUI image backend.
//!
//! Requests are checked against the shared users file, patched into a
//! template workflow, submitted to the backend and polled until an output
//! image appears. Usage is kept in flat JSON files next to the users file.

pub mod config;
pub mod dashboard;
pub mod error;
pub mod metrics;
pub mod models;
pub mod routes;
pub mod services;

#[cfg(test)]
pub(crate) mod test_support;
