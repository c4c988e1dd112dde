//! ABOUTME: Core types, errors, IDs, metrics, and tracing utilities
//! ABOUTME: Foundation crate used by all other userhub components

pub mod error;
pub mod id;
pub mod metrics;
pub mod telemetry;
pub mod time;

pub use error::{Error, Result};
pub use id::Id;
pub use metrics::PipelineMetrics;
pub use time::{now_iso8601, to_rfc3339, utc_now};
