// Observability: metrics recording and snapshots

pub mod metrics;

pub use metrics::{emit_counter, emit_gauge, emit_histogram, MetricName};
