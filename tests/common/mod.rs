//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use discovery_runtime::registry::{
    FetchOutcome, InstancesSnapshot, MicroserviceCacheKey, MicroserviceInstance, RegistryClient, RegistryError,
    RegistryResult,
};

/// Registry whose answer is set by the test, counting every fetch.
pub struct ProgrammableRegistry {
    answer: Mutex<RegistryResult<FetchOutcome>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl ProgrammableRegistry {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    /// Every fetch sleeps for `delay` before answering.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Ok(FetchOutcome::NotFound)),
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn serve(&self, count: usize, revision: &str) {
        *self.answer.lock().unwrap() = Ok(FetchOutcome::Found(InstancesSnapshot::new(instances(count), revision)));
    }

    pub fn serve_not_found(&self) {
        *self.answer.lock().unwrap() = Ok(FetchOutcome::NotFound);
    }

    pub fn serve_error(&self, message: &str) {
        *self.answer.lock().unwrap() = Err(RegistryError::FetchFailed(message.to_string()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryClient for ProgrammableRegistry {
    async fn fetch_instances(&self, _key: &MicroserviceCacheKey) -> RegistryResult<FetchOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let answer = self.answer.lock().unwrap().clone();
        answer
    }
}

pub fn instances(count: usize) -> Vec<MicroserviceInstance> {
    (0..count)
        .map(|i| MicroserviceInstance::new(format!("inst-{i}"), "svc-1", vec![format!("rest://10.0.0.{i}:8080")]))
        .collect()
}

pub fn key(service: &str) -> MicroserviceCacheKey {
    MicroserviceCacheKey::all_versions("consumer", "app", service)
}
