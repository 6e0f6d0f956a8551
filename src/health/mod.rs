//! Server health and isolation subsystem.
//!
//! # Data Flow
//! ```text
//! Invocation finished:
//!     → tracker.rs (stats per instance id)
//!     → stats.rs (mark success/failure in current window)
//!     → trying_chance.rs (release if this invocation was the probe)
//!
//! Server selection:
//!     → isolation.rs (isolated? quiet long enough?)
//!     → trying_chance.rs (one probe permit, TTL bounded)
//! ```
//!
//! # Design Decisions
//! - Counters live in fixed windows, not a sliding average
//! - One probe permit per coordinator; coordinators are injected, not global
//! - Time comes from `clock::Clock` so tests control it

pub mod isolation;
pub mod stats;
pub mod tracker;
pub mod trying_chance;

pub use isolation::{Availability, IsolationFilter};
pub use stats::ServerStats;
pub use tracker::ServerStatsTracker;
pub use trying_chance::{InvocationId, TryingChanceCoordinator, TryingChanceToken};
