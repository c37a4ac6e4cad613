//! Observability for the backing-service provisioner.
//!
//! Structured logging through `tracing`, installed once per process with
//! [`init_tracing`]. HTTP request spans come from `tower-http`'s
//! `TraceLayer` in the API router; everything else logs with structured
//! fields (`instance_id`, `kind`, `container_id`).

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, parse_level, try_init_tracing, TracingConfig, TracingError};

/// Re-export tracing macros for convenience
pub use tracing::{debug, error, info, instrument, trace, warn, Level};
