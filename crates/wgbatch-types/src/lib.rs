//! wgbatch-types: wire types for the WGDashboard HTTP API.
//!
//! The dashboard is an external service; this crate pins down the request
//! and response shapes wgbatch exchanges with it so the client code and the
//! test doubles agree on one definition.

#![warn(missing_docs)]

pub mod dashboard;

/// Header carrying the dashboard API key on every request.
pub const API_KEY_HEADER: &str = "wg-dashboard-apikey";
