//! API layer
//!
//! HTTP handlers for:
//! - ActivityPub (for federation)
//! - WebFinger / NodeInfo discovery
//! - Home page
//! - Metrics (Prometheus)

mod activitypub;
mod home;
pub mod metrics;
mod wellknown;

pub use activitypub::activitypub_router;
pub use home::home_router;
pub use metrics::{metrics_router, track_http_metrics};
pub use wellknown::wellknown_router;
