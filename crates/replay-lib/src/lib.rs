//! Fleet replay library
//!
//! This crate provides the core functionality for:
//! - Host/workload entity trees with append-only snapshot histories
//! - A snapshot store that maps those trees onto a flat key-value namespace
//! - Point-in-time fleet reconstruction at an instant, on an interval, or at
//!   every change
//! - Health checks and observability

pub mod error;
pub mod health;
pub mod model;
pub mod observability;
pub mod replay;
pub mod store;

pub use error::{BackendError, CancelReason, ReplayError, Result, StoreFault};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use model::*;
pub use observability::{ReplayMetrics, StructuredLogger};
pub use replay::{
    FleetView, HostObservation, HostView, Replayer, ReplayerConfig, WorkloadObservation,
    WorkloadView,
};
pub use store::{RequestContext, StoreConfig, TreeStore};
