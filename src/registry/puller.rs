//! Periodic instance pull.
//!
//! # Responsibilities
//! - Drive `RegistryCacheStore::refresh_cache` on a fixed interval
//! - Stop cleanly on shutdown
//!
//! # Design Decisions
//! - Missed ticks are skipped, not bursted: a late pull is as good as several
//! - A tick that lands while a sweep is still running is dropped by the store

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::RegistryConfig;
use crate::registry::store::RegistryCacheStore;

/// Background task refreshing every cached entry.
pub struct InstancePuller {
    store: Arc<RegistryCacheStore>,
    interval: Duration,
}

impl InstancePuller {
    pub fn new(store: Arc<RegistryCacheStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Pull every `instance_pull_interval_secs`.
    pub fn from_config(store: Arc<RegistryCacheStore>, config: &RegistryConfig) -> Self {
        Self::new(store, config.pull_interval())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the pull loop on the current runtime.
    pub fn spawn(self) -> PullerHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(self.run(shutdown_rx));
        PullerHandle { shutdown_tx, task }
    }

    /// Pull until a shutdown signal arrives.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Instance puller starting");

        // First tick after one full interval; entries refresh themselves on creation.
        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let store = self.store.clone();
                    // Detached so a slow sweep never delays the next tick; overlapping
                    // ticks are dropped by the store's try-lock.
                    tokio::spawn(async move {
                        store.refresh_cache().await;
                    });
                }
                _ = shutdown.recv() => {
                    tracing::info!("Instance puller received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

/// Handle to a spawned [`InstancePuller`].
pub struct PullerHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl PullerHandle {
    /// Signal the loop to stop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Instance puller task failed");
        }
    }
}
