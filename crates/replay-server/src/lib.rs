//! Fleet replay server
//!
//! Thin JSON layer over [`replay_lib::Replayer`]: ingestion and fleet
//! queries, plus health and Prometheus endpoints.

pub mod api;
pub mod config;
