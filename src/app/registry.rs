use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::app::backend::{BackendKind, BackendSet};
use crate::app::models::DeviceDescriptor;

/// One device as reported by the backend that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedDevice {
    pub backend: BackendKind,
    pub device: DeviceDescriptor,
}

/// Enumerates every configured backend concurrently. Ids reported by more than
/// one backend belong to the first backend in priority order.
pub async fn enumerate_all(backends: &BackendSet) -> Vec<OwnedDevice> {
    let listings = futures_util::future::join_all(backends.iter().map(|backend| async move {
        (backend.kind(), backend.list_devices().await)
    }))
    .await;

    let mut seen = HashSet::new();
    let mut owned = Vec::new();
    for (backend, devices) in listings {
        for device in devices {
            if !seen.insert(device.id.clone()) {
                warn!(udid = %device.id, backend = %backend, "device id reported by more than one backend");
                continue;
            }
            owned.push(OwnedDevice { backend, device });
        }
    }
    owned
}

struct Snapshot {
    fetched_at: Instant,
    kinds: HashMap<String, BackendKind>,
    devices: Vec<OwnedDevice>,
}

/// Short-lived map of device id to owning backend, replaced wholesale on
/// every full enumeration.
pub struct RegistryCache {
    ttl: Duration,
    snapshot: Mutex<Option<Snapshot>>,
}

impl RegistryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            snapshot: Mutex::new(None),
        }
    }

    pub fn replace(&self, devices: Vec<OwnedDevice>) {
        let kinds = devices
            .iter()
            .map(|owned| (owned.device.id.clone(), owned.backend))
            .collect();
        let mut guard = self.snapshot.lock().unwrap_or_else(|err| err.into_inner());
        *guard = Some(Snapshot {
            fetched_at: Instant::now(),
            kinds,
            devices,
        });
    }

    /// The owning backend for a device, if a fresh enumeration reported it.
    pub fn lookup(&self, udid: &str) -> Option<BackendKind> {
        let guard = self.snapshot.lock().unwrap_or_else(|err| err.into_inner());
        let snapshot = guard.as_ref()?;
        if snapshot.fetched_at.elapsed() >= self.ttl {
            return None;
        }
        snapshot.kinds.get(udid).copied()
    }

    /// Devices from the last enumeration while it is still fresh.
    pub fn fresh_devices(&self) -> Option<Vec<OwnedDevice>> {
        let guard = self.snapshot.lock().unwrap_or_else(|err| err.into_inner());
        let snapshot = guard.as_ref()?;
        if snapshot.fetched_at.elapsed() >= self.ttl {
            return None;
        }
        Some(snapshot.devices.clone())
    }

    pub fn descriptor(&self, udid: &str) -> Option<DeviceDescriptor> {
        self.fresh_devices()?
            .into_iter()
            .find(|owned| owned.device.id == udid)
            .map(|owned| owned.device)
    }

    pub fn invalidate(&self) {
        let mut guard = self.snapshot.lock().unwrap_or_else(|err| err.into_inner());
        *guard = None;
    }

    /// Routing decision with the simulator default for unknown ids.
    pub fn kind_or_default(&self, udid: &str) -> BackendKind {
        match self.lookup(udid) {
            Some(kind) => {
                debug!(udid = %udid, backend = %kind, "registry hit");
                kind
            }
            None => {
                debug!(udid = %udid, "unknown device id; routing to simulator backend");
                BackendKind::Simulator
            }
        }
    }
}
