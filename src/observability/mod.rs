//! Observability for the MQTT agent
//!
//! Structured logging setup and span macros, plus a process-wide metrics
//! collector the queue and the agent loop report into.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{agent_span, command_span, connection_span};
