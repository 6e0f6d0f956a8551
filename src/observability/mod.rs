//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! registry/ and health/ produce:
//!     → tracing events (structured fields, no per-request spans)
//!     → metrics.rs (counters and gauges through the `metrics` facade)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, plain or JSON)
//!     → whatever metrics recorder the host application installs
//! ```
//!
//! # Design Decisions
//! - The library never installs a metrics recorder; without one every
//!   update is a no-op
//! - Logging setup is opt-in so an embedding service keeps its own subscriber

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LoggingError};
