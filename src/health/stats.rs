//! Per-server invocation statistics.
//!
//! # Responsibilities
//! - Count total, failed and consecutive failed invocations per server
//! - Keep counters scoped to a fixed, non-overlapping time window
//! - Answer failed/success rate for the isolation policy
//!
//! # Design Decisions
//! - The window is an immutable start time plus atomic counters behind an
//!   `ArcSwap`; rolling over swaps in a fresh window with one compare-and-swap,
//!   so an increment lands either in the old window or in the new one, never
//!   in a half-reset one
//! - A caller that loaded the old window just before another caller rolled it
//!   over still increments the old window; that late increment is discarded
//!   together with it
//! - Reads never roll the window; only a new invocation does

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::clock::Clock;

#[derive(Debug)]
struct Window {
    start: u64,
    total: AtomicU64,
    failed: AtomicU64,
    continuous_failures: AtomicU64,
}

impl Window {
    fn starting_at(start: u64) -> Self {
        Self {
            start,
            total: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            continuous_failures: AtomicU64::new(0),
        }
    }
}

/// Rolling statistics of one destination server.
pub struct ServerStats {
    clock: Arc<dyn Clock>,
    window_ms: u64,
    window: ArcSwap<Window>,
    last_visit: AtomicU64,
    last_active: AtomicU64,
}

impl ServerStats {
    pub fn new(clock: Arc<dyn Clock>, window_ms: u64) -> Self {
        let now = clock.now_millis();
        Self {
            clock,
            window_ms,
            window: ArcSwap::from_pointee(Window::starting_at(now)),
            last_visit: AtomicU64::new(now),
            last_active: AtomicU64::new(now),
        }
    }

    /// Record a successful invocation.
    pub fn mark_success(&self) {
        let now = self.clock.now_millis();
        let window = self.window_at(now);
        window.total.fetch_add(1, Ordering::AcqRel);
        window.continuous_failures.store(0, Ordering::Release);
        self.last_visit.fetch_max(now, Ordering::AcqRel);
        self.last_active.fetch_max(now, Ordering::AcqRel);
    }

    /// Record a failed invocation.
    pub fn mark_failure(&self) {
        let now = self.clock.now_millis();
        let window = self.window_at(now);
        // total before failed, so a reader loading failed first never sees failed > total
        window.total.fetch_add(1, Ordering::AcqRel);
        window.failed.fetch_add(1, Ordering::AcqRel);
        window.continuous_failures.fetch_add(1, Ordering::AcqRel);
        self.last_visit.fetch_max(now, Ordering::AcqRel);
    }

    /// The window covering `now`, rolling over to a fresh one if the current
    /// window is older than its width.
    fn window_at(&self, now: u64) -> Arc<Window> {
        loop {
            let current = self.window.load_full();
            if now.saturating_sub(current.start) <= self.window_ms {
                return current;
            }

            let fresh = Arc::new(Window::starting_at(now));
            let previous = self.window.compare_and_swap(&current, fresh.clone());
            if Arc::ptr_eq(&previous, &current) {
                return fresh;
            }
            // Another caller rolled the window first; use theirs.
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.window.load().total.load(Ordering::Acquire)
    }

    pub fn failed_requests(&self) -> u64 {
        self.window.load().failed.load(Ordering::Acquire)
    }

    /// Consecutive failures since the last success in the current window.
    pub fn continuous_failure_count(&self) -> u64 {
        self.window.load().continuous_failures.load(Ordering::Acquire)
    }

    /// Failed invocations as an integer percentage of the window's total.
    pub fn failed_rate(&self) -> u32 {
        let (failed, total) = self.counts();
        percentage(failed, total)
    }

    /// Successful invocations as an integer percentage of the window's total.
    pub fn success_rate(&self) -> u32 {
        let (failed, total) = self.counts();
        percentage(total - failed, total)
    }

    fn counts(&self) -> (u64, u64) {
        let window = self.window.load();
        let failed = window.failed.load(Ordering::Acquire);
        let total = window.total.load(Ordering::Acquire);
        (failed.min(total), total)
    }

    pub fn window_start(&self) -> u64 {
        self.window.load().start
    }

    /// Time of the last invocation, successful or not (epoch ms).
    pub fn last_visit_time(&self) -> u64 {
        self.last_visit.load(Ordering::Acquire)
    }

    /// Time of the last successful invocation (epoch ms).
    pub fn last_active_time(&self) -> u64 {
        self.last_active.load(Ordering::Acquire)
    }
}

fn percentage(part: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    (part.saturating_mul(100) / total) as u32
}

impl fmt::Debug for ServerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerStats")
            .field("window_start", &self.window_start())
            .field("total", &self.total_requests())
            .field("failed", &self.failed_requests())
            .field("continuous_failures", &self.continuous_failure_count())
            .field("last_visit", &self.last_visit_time())
            .field("last_active", &self.last_active_time())
            .finish()
    }
}
