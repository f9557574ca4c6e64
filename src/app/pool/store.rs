//! On-disk pool state, rewritten whole under an exclusive `flock`.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::app::backend::BackendKind;
use crate::app::error::{FleetError, FleetResult};
use crate::app::models::DeviceDescriptor;
use crate::app::registry::OwnedDevice;

pub const POOL_STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    pub session: String,
    pub expires_at: DateTime<Utc>,
}

impl Claim {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PoolEntry {
    #[serde(flatten)]
    pub device: DeviceDescriptor,
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    pub last_used_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<Claim>,
}

fn default_backend() -> BackendKind {
    BackendKind::Simulator
}

impl PoolEntry {
    /// Claimed by a session other than `session` with an unexpired lease.
    pub fn claimed_by_other(&self, session: Option<&str>, now: DateTime<Utc>) -> bool {
        match &self.claim {
            Some(claim) if claim.is_live(now) => session != Some(claim.session.as_str()),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PoolState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub devices: BTreeMap<String, PoolEntry>,
}

fn default_version() -> u32 {
    POOL_STATE_VERSION
}

impl Default for PoolState {
    fn default() -> Self {
        Self {
            version: POOL_STATE_VERSION,
            updated_at: None,
            devices: BTreeMap::new(),
        }
    }
}

impl PoolState {
    /// Folds a full enumeration into the pool: new ids are inserted, known
    /// ids keep their `last_used_at` and claim, missing ids are dropped.
    pub fn merge_enumeration(&mut self, devices: Vec<OwnedDevice>, now: DateTime<Utc>) {
        let mut next = BTreeMap::new();
        for OwnedDevice { backend, device } in devices {
            let entry = match self.devices.remove(&device.id) {
                Some(mut existing) => {
                    existing.device = device;
                    existing.backend = backend;
                    existing
                }
                None => PoolEntry {
                    device,
                    backend,
                    last_used_at: now,
                    claim: None,
                },
            };
            next.insert(entry.device.id.clone(), entry);
        }
        for removed in self.devices.keys() {
            debug!(udid = %removed, "device no longer reported; removing from pool");
        }
        self.devices = next;
    }

    pub fn release_session(&mut self, session: &str) -> usize {
        let mut released = 0;
        for entry in self.devices.values_mut() {
            if entry
                .claim
                .as_ref()
                .is_some_and(|claim| claim.session == session)
            {
                entry.claim = None;
                released += 1;
            }
        }
        released
    }
}

/// Location of the pool file; every access goes through [`PoolStore::lock`].
#[derive(Debug, Clone)]
pub struct PoolStore {
    path: PathBuf,
}

impl PoolStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the pool file and blocks (off the async runtime) until the
    /// exclusive lock is held.
    pub async fn lock(&self) -> FleetResult<PoolLock> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || PoolLock::acquire(path))
            .await
            .map_err(|err| FleetError::Storage(format!("pool lock task failed: {err}")))?
    }

    /// Locked read-modify-write. The state is written back only when `apply`
    /// succeeds.
    pub async fn update<T, F>(&self, apply: F) -> FleetResult<T>
    where
        F: FnOnce(&mut PoolState) -> FleetResult<T> + Send,
        T: Send,
    {
        let mut lock = self.lock().await?;
        let mut state = lock.read()?;
        let value = apply(&mut state)?;
        lock.write(&mut state)?;
        Ok(value)
    }

    pub async fn snapshot(&self) -> FleetResult<PoolState> {
        let mut lock = self.lock().await?;
        lock.read()
    }
}

/// Exclusive hold on the pool file. Released when dropped.
pub struct PoolLock {
    file: File,
    path: PathBuf,
}

impl PoolLock {
    fn acquire(path: PathBuf) -> FleetResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    FleetError::Storage(format!("create {}: {err}", parent.display()))
                })?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| FleetError::Storage(format!("open {}: {err}", path.display())))?;
        lock_exclusive(&file)
            .map_err(|err| FleetError::Storage(format!("lock {}: {err}", path.display())))?;
        Ok(Self { file, path })
    }

    pub fn read(&mut self) -> FleetResult<PoolState> {
        let mut raw = String::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_string(&mut raw))
            .map_err(|err| FleetError::Storage(format!("read {}: {err}", self.path.display())))?;
        if raw.trim().is_empty() {
            return Ok(PoolState::default());
        }
        match serde_json::from_str::<PoolState>(&raw) {
            Ok(state) => Ok(state),
            Err(err) => {
                // A torn or hand-edited file is rebuilt by the next refresh.
                warn!(path = %self.path.display(), error = %err, "pool state unreadable; starting empty");
                Ok(PoolState::default())
            }
        }
    }

    pub fn write(&mut self, state: &mut PoolState) -> FleetResult<()> {
        state.version = POOL_STATE_VERSION;
        state.updated_at = Some(Utc::now());
        let payload = serde_json::to_string_pretty(state)
            .map_err(|err| FleetError::Storage(format!("encode pool state: {err}")))?;
        let path = self.path.display().to_string();
        self.file
            .set_len(0)
            .and_then(|_| self.file.seek(SeekFrom::Start(0)))
            .and_then(|_| self.file.write_all(payload.as_bytes()))
            .and_then(|_| self.file.sync_data())
            .map_err(|err| FleetError::Storage(format!("write {path}: {err}")))
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    loop {
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if result == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::backend::fake::device;
    use crate::app::models::PowerState;

    fn owned(id: &str, name: &str, power: PowerState) -> OwnedDevice {
        OwnedDevice {
            backend: BackendKind::Simulator,
            device: device(id, name, "iOS 18.2", power),
        }
    }

    #[test]
    fn merge_preserves_last_used_and_drops_missing() {
        let earlier = Utc::now() - chrono::Duration::hours(1);
        let mut state = PoolState::default();
        state.merge_enumeration(
            vec![
                owned("A", "iPhone 15", PowerState::Shutdown),
                owned("B", "iPhone 16", PowerState::Booted),
            ],
            earlier,
        );
        state.merge_enumeration(
            vec![
                owned("A", "iPhone 15 renamed", PowerState::Booted),
                owned("C", "iPad Air", PowerState::Shutdown),
            ],
            Utc::now(),
        );

        assert_eq!(state.devices.len(), 2);
        let a = &state.devices["A"];
        assert_eq!(a.last_used_at, earlier);
        assert_eq!(a.device.name, "iPhone 15 renamed");
        assert!(a.device.is_booted());
        assert!(!state.devices.contains_key("B"));
        assert!(state.devices["C"].last_used_at > earlier);
    }

    #[tokio::test]
    async fn update_round_trips_through_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PoolStore::new(dir.path().join("nested").join("pool.json"));

        store
            .update(|state| {
                state.merge_enumeration(vec![owned("A", "iPhone 15", PowerState::Booted)], Utc::now());
                Ok(())
            })
            .await
            .expect("update");

        let raw = std::fs::read_to_string(store.path()).expect("raw");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["version"], 1);
        assert!(value["updatedAt"].is_string());
        assert_eq!(value["devices"]["A"]["powerState"], "booted");
        assert!(value["devices"]["A"]["lastUsedAt"].is_string());

        let snapshot = store.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.devices.len(), 1);
    }

    #[tokio::test]
    async fn failed_update_leaves_file_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PoolStore::new(dir.path().join("pool.json"));
        let result: FleetResult<()> = store
            .update(|state| {
                state.merge_enumeration(vec![owned("A", "iPhone 15", PowerState::Booted)], Utc::now());
                Err(FleetError::validation("nope"))
            })
            .await;
        assert!(result.is_err());
        assert!(store.snapshot().await.expect("snapshot").devices.is_empty());
    }

    #[tokio::test]
    async fn unknown_fields_and_corrupt_files_are_tolerated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pool.json");
        std::fs::write(
            &path,
            r#"{"version": 7, "futureField": true, "devices": {"A": {"id": "A", "name": "iPhone 15", "kind": "simulated", "powerState": "shutdown", "lastUsedAt": "2026-01-01T00:00:00Z", "extra": 1}}}"#,
        )
        .expect("seed");
        let store = PoolStore::new(&path);
        let state = store.snapshot().await.expect("snapshot");
        assert_eq!(state.devices["A"].backend, BackendKind::Simulator);

        std::fs::write(&path, "{not json").expect("corrupt");
        assert!(store.snapshot().await.expect("snapshot").devices.is_empty());
    }

    #[test]
    fn claims_expire_and_release_by_session() {
        let now = Utc::now();
        let mut state = PoolState::default();
        state.merge_enumeration(vec![owned("A", "iPhone 15", PowerState::Booted)], now);
        let entry = state.devices.get_mut("A").expect("entry");
        entry.claim = Some(Claim {
            session: "s1".to_string(),
            expires_at: now + chrono::Duration::seconds(60),
        });
        assert!(entry.claimed_by_other(Some("s2"), now));
        assert!(entry.claimed_by_other(None, now));
        assert!(!entry.claimed_by_other(Some("s1"), now));
        assert!(!entry.claimed_by_other(Some("s2"), now + chrono::Duration::seconds(120)));

        assert_eq!(state.release_session("s1"), 1);
        assert!(state.devices["A"].claim.is_none());
    }
}
