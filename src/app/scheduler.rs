use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};

/// Serializes multi-step actions per device and bounds probe fan-out.
pub struct TaskScheduler {
    probes: Arc<Semaphore>,
    device_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl TaskScheduler {
    pub fn new(probe_limit: usize) -> Self {
        Self {
            probes: Arc::new(Semaphore::new(probe_limit.max(1))),
            device_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire_probe(&self) -> Option<OwnedSemaphorePermit> {
        // The semaphore is never closed, so acquisition only fails on shutdown.
        Arc::clone(&self.probes).acquire_owned().await.ok()
    }

    pub fn device_lock(&self, udid: &str) -> Arc<AsyncMutex<()>> {
        let mut guard = self
            .device_locks
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        guard
            .entry(udid.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub async fn lock_device(&self, udid: &str) -> OwnedMutexGuard<()> {
        self.device_lock(udid).lock_owned().await
    }
}
