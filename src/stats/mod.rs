//! Statistics and metrics

pub mod metrics;

pub use metrics::{
    rate_per_second, AdapterStats, BroadcastStats, PacerStats, RelayStats, ServerStats,
};
