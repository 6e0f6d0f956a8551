//! Single-flight recovery probing.
//!
//! At most one invocation at a time may probe an isolated server. The permit
//! is a token with a time-to-live held in an `ArcSwapOption`; it is installed
//! by compare-and-swap and never guarded by a lock held across the request, so
//! a holder that never finishes only blocks probing until the TTL runs out.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use uuid::Uuid;

use crate::clock::Clock;
use crate::observability::metrics;

/// Identity of one in-flight invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvocationId(Uuid);

impl InvocationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The permit currently granted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryingChanceToken {
    pub invocation: InvocationId,
    pub granted_at: u64,
    pub ttl_ms: u64,
}

impl TryingChanceToken {
    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.granted_at) >= self.ttl_ms
    }
}

/// Grants the one recovery-probe permit.
///
/// Cloning is not offered; share it through an `Arc` so every caller sees the
/// same token.
pub struct TryingChanceCoordinator {
    current: ArcSwapOption<TryingChanceToken>,
    clock: Arc<dyn Clock>,
    ttl_ms: u64,
}

impl TryingChanceCoordinator {
    pub fn new(clock: Arc<dyn Clock>, ttl_ms: u64) -> Self {
        Self {
            current: ArcSwapOption::empty(),
            clock,
            ttl_ms,
        }
    }

    /// Try to take the permit for `invocation`.
    ///
    /// Granted when nobody holds it or the holder's token has expired. Among
    /// simultaneous applicants exactly one wins.
    pub fn apply_for_trying_chance(&self, invocation: InvocationId) -> bool {
        let now = self.clock.now_millis();
        loop {
            let current = self.current.load_full();
            if let Some(token) = &current {
                if !token.is_expired(now) {
                    metrics::record_trying_chance(false);
                    return false;
                }
            }

            let fresh = Arc::new(TryingChanceToken {
                invocation,
                granted_at: now,
                ttl_ms: self.ttl_ms,
            });
            let previous = self.current.compare_and_swap(&current, Some(fresh));
            if same_token(&previous, &current) {
                tracing::debug!(%invocation, "Trying chance granted");
                metrics::record_trying_chance(true);
                return true;
            }
            // Lost the race; re-check whoever won.
        }
    }

    /// Clear the permit whoever holds it.
    pub fn release_trying_chance(&self) {
        self.current.store(None);
    }

    /// Clear the permit only if `invocation` holds it. Returns whether it did.
    pub fn check_and_release(&self, invocation: InvocationId) -> bool {
        let current = self.current.load_full();
        match &current {
            Some(token) if token.invocation == invocation => {
                let previous = self.current.compare_and_swap(&current, None::<Arc<TryingChanceToken>>);
                same_token(&previous, &current)
            }
            _ => false,
        }
    }

    /// The invocation holding an unexpired permit, if any.
    pub fn current_holder(&self) -> Option<InvocationId> {
        let now = self.clock.now_millis();
        let guard = self.current.load();
        (*guard)
            .as_ref()
            .filter(|token| !token.is_expired(now))
            .map(|token| token.invocation)
    }

    /// Snapshot of the installed token, expired or not.
    pub fn token(&self) -> Option<Arc<TryingChanceToken>> {
        self.current.load_full()
    }
}

fn same_token(a: &Option<Arc<TryingChanceToken>>, b: &Option<Arc<TryingChanceToken>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl fmt::Debug for TryingChanceCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TryingChanceCoordinator")
            .field("token", &self.current.load())
            .field("ttl_ms", &self.ttl_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn coordinator_at(millis: u64) -> (TryingChanceCoordinator, ManualClock) {
        let clock = ManualClock::new(millis);
        (TryingChanceCoordinator::new(Arc::new(clock.clone()), 60_000), clock)
    }

    #[test]
    fn test_single_grant_until_expiry() {
        let (coordinator, clock) = coordinator_at(1_000);
        let first = InvocationId::new();
        let second = InvocationId::new();

        assert!(coordinator.apply_for_trying_chance(first));
        assert!(!coordinator.apply_for_trying_chance(second));
        assert_eq!(coordinator.current_holder(), Some(first));

        clock.set(60_999);
        assert!(!coordinator.apply_for_trying_chance(second));

        clock.set(61_000);
        assert_eq!(coordinator.current_holder(), None);
        assert!(coordinator.apply_for_trying_chance(second));
        assert_eq!(coordinator.current_holder(), Some(second));
    }

    #[test]
    fn test_release_frees_permit_immediately() {
        let (coordinator, _) = coordinator_at(0);
        assert!(coordinator.apply_for_trying_chance(InvocationId::new()));

        coordinator.release_trying_chance();
        assert!(coordinator.token().is_none());
        assert!(coordinator.apply_for_trying_chance(InvocationId::new()));
    }

    #[test]
    fn test_check_and_release_only_for_holder() {
        let (coordinator, _) = coordinator_at(0);
        let holder = InvocationId::new();
        let other = InvocationId::new();
        assert!(coordinator.apply_for_trying_chance(holder));

        assert!(!coordinator.check_and_release(other));
        assert_eq!(coordinator.current_holder(), Some(holder));

        assert!(coordinator.check_and_release(holder));
        assert_eq!(coordinator.current_holder(), None);
        assert!(!coordinator.check_and_release(holder));
    }

    #[test]
    fn test_concurrent_applicants_single_winner() {
        let (coordinator, _) = coordinator_at(5_000);
        let coordinator = Arc::new(coordinator);
        let barrier = Arc::new(std::sync::Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let coordinator = coordinator.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    coordinator.apply_for_trying_chance(InvocationId::new())
                })
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|granted| *granted)
            .count();
        assert_eq!(granted, 1);
    }
}
