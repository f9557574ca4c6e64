//! Persisted device pool and the criteria resolver built on it.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::active::ActiveDevice;
use crate::app::backend::{BackendKind, BackendSet, DeviceBackend};
use crate::app::config::PoolSettings;
use crate::app::error::{FleetError, FleetResult};
use crate::app::models::{EnsureResult, PowerState, ResolvedDevice};
use crate::app::registry::{enumerate_all, RegistryCache};

pub mod matching;
pub mod store;

pub use matching::ResolveCriteria;
pub use store::{Claim, PoolEntry, PoolState, PoolStore};

use matching::{explain_all_shutdown, explain_no_match, explain_shortfall, select};

pub struct DevicePool {
    store: PoolStore,
    backends: BackendSet,
    registry: Option<Arc<RegistryCache>>,
    settings: PoolSettings,
    last_refresh: Mutex<Option<Instant>>,
}

/// Stamps use and leases the entry to `owner`. Returns whether the lease is
/// new to this owner.
fn stamp(state: &mut PoolState, udid: &str, owner: &str, now: DateTime<Utc>, lease_secs: u64) -> bool {
    let Some(entry) = state.devices.get_mut(udid) else {
        return false;
    };
    let held = entry
        .claim
        .as_ref()
        .is_some_and(|claim| claim.is_live(now) && claim.session == owner);
    entry.last_used_at = now;
    entry.claim = Some(Claim {
        session: owner.to_string(),
        expires_at: now + chrono::Duration::seconds(lease_secs as i64),
    });
    !held
}

/// Claim owner for one call: the caller's session, else a fresh one-off id.
fn lease_owner(criteria: &ResolveCriteria) -> String {
    criteria
        .session()
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn resolved(
    entry: &PoolEntry,
    state: PowerState,
    waited_seconds: u64,
    owner: Option<&str>,
) -> ResolvedDevice {
    ResolvedDevice {
        id: entry.device.id.clone(),
        name: entry.device.name.clone(),
        state,
        waited_seconds,
        session: owner.map(str::to_string),
    }
}

impl DevicePool {
    pub fn new(store: PoolStore, backends: BackendSet, settings: PoolSettings) -> Self {
        Self {
            store,
            backends,
            registry: None,
            settings,
            last_refresh: Mutex::new(None),
        }
    }

    /// Shares every pool enumeration with the controller's routing cache.
    pub fn with_registry(mut self, registry: Arc<RegistryCache>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn store(&self) -> &PoolStore {
        &self.store
    }

    fn is_fresh(&self) -> bool {
        let guard = self.last_refresh.lock().unwrap_or_else(|err| err.into_inner());
        guard.is_some_and(|at| at.elapsed() < self.settings.freshness())
    }

    fn mark_refreshed(&self) {
        *self.last_refresh.lock().unwrap_or_else(|err| err.into_inner()) = Some(Instant::now());
    }

    /// Merges a fresh enumeration into the pool file. Returns whether an
    /// enumeration actually ran.
    pub async fn refresh(&self, force: bool) -> FleetResult<bool> {
        if !force && self.is_fresh() {
            debug!("pool refreshed recently; skipping enumeration");
            return Ok(false);
        }
        let mut lock = self.store.lock().await?;
        // Another task may have refreshed while this one waited for the lock.
        if !force && self.is_fresh() {
            return Ok(false);
        }
        let devices = enumerate_all(&self.backends).await;
        if let Some(registry) = &self.registry {
            registry.replace(devices.clone());
        }
        let mut state = lock.read()?;
        state.merge_enumeration(devices, Utc::now());
        lock.write(&mut state)?;
        self.mark_refreshed();
        debug!(devices = state.devices.len(), "pool refreshed");
        Ok(true)
    }

    pub async fn entries(&self) -> FleetResult<Vec<PoolEntry>> {
        self.refresh(false).await?;
        Ok(self.store.snapshot().await?.devices.into_values().collect())
    }

    pub async fn resolve(
        &self,
        criteria: &ResolveCriteria,
        active: &ActiveDevice,
    ) -> FleetResult<ResolvedDevice> {
        if !criteria.has_selectors() && criteria.session().is_none() {
            if let Some(udid) = active.get() {
                debug!(udid = %udid, "reusing active device");
                let known = self.store.snapshot().await?.devices.remove(&udid);
                return Ok(match known {
                    Some(entry) => resolved(&entry, entry.device.power_state, 0, None),
                    None => ResolvedDevice {
                        name: udid.clone(),
                        id: udid,
                        state: PowerState::Booted,
                        waited_seconds: 0,
                        session: None,
                    },
                });
            }
        }
        if let Some(udid) = criteria.id() {
            return self.resolve_by_id(udid, criteria, active).await;
        }

        self.refresh(false).await?;
        let now = Utc::now();
        let default_family = self.settings.default_family.clone();
        let lease = self.settings.claim_ttl_secs;
        let owner = lease_owner(criteria);
        let (chosen, fresh_claim) = self
            .store
            .update(|state| {
                let selection = select(state.devices.values(), criteria, &default_family, now);
                let Some(best) = selection.candidates.first() else {
                    return Err(explain_no_match(
                        state.devices.values(),
                        criteria,
                        &default_family,
                        selection.claimed_elsewhere,
                    ));
                };
                if !best.device.is_booted() && !criteria.auto_boot {
                    return Err(explain_all_shutdown(&selection));
                }
                let chosen = (*best).clone();
                let fresh_claim = stamp(state, &chosen.device.id, &owner, now, lease);
                Ok((chosen, fresh_claim))
            })
            .await?;

        let waited = match self.bring_up(&chosen).await {
            Ok(waited) => waited,
            Err(err) => {
                if fresh_claim {
                    self.release_claims(&owner, &[chosen.device.id.clone()]).await;
                }
                return Err(err);
            }
        };
        active.set(&chosen.device.id);
        info!(udid = %chosen.device.id, name = %chosen.device.name, waited_seconds = waited, "device resolved");
        Ok(resolved(&chosen, PowerState::Booted, waited, Some(&owner)))
    }

    async fn resolve_by_id(
        &self,
        udid: &str,
        criteria: &ResolveCriteria,
        active: &ActiveDevice,
    ) -> FleetResult<ResolvedDevice> {
        self.refresh(false).await?;
        if !self.store.snapshot().await?.devices.contains_key(udid) {
            self.refresh(true).await?;
        }
        let now = Utc::now();
        let lease = self.settings.claim_ttl_secs;
        let owner = lease_owner(criteria);
        let entry = self
            .store
            .update(|state| {
                let Some(entry) = state.devices.get(udid) else {
                    let known = state.devices.keys().cloned().collect::<Vec<_>>();
                    return Err(FleetError::not_found(format!(
                        "device {udid} is not in the pool; known ids: {}",
                        if known.is_empty() { "none".to_string() } else { known.join(", ") }
                    )));
                };
                if entry.claimed_by_other(criteria.session(), now) {
                    return Err(FleetError::unavailable(format!(
                        "device {udid} is claimed by another session"
                    )));
                }
                let entry = entry.clone();
                stamp(state, udid, &owner, now, lease);
                Ok(entry)
            })
            .await?;
        active.set(udid);
        Ok(resolved(&entry, entry.device.power_state, 0, Some(&owner)))
    }

    /// Selects `count` devices: booted ones first, then boots more when
    /// allowed. The first selected device becomes active.
    pub async fn ensure(
        &self,
        count: usize,
        criteria: &ResolveCriteria,
        active: &ActiveDevice,
    ) -> FleetResult<EnsureResult> {
        if count == 0 {
            return Err(FleetError::validation("count must be at least 1"));
        }
        if criteria.id().is_some() {
            if count > 1 {
                return Err(FleetError::validation(
                    "an explicit id selects exactly one device",
                ));
            }
            let device = self.resolve(criteria, active).await?;
            return Ok(EnsureResult {
                active_id: device.id.clone(),
                devices: vec![device],
            });
        }

        self.refresh(false).await?;
        let now = Utc::now();
        let default_family = self.settings.default_family.clone();
        let lease = self.settings.claim_ttl_secs;
        let owner = lease_owner(criteria);
        let (chosen, claimed) = self
            .store
            .update(|state| {
                let selection = select(state.devices.values(), criteria, &default_family, now);
                if selection.candidates.is_empty() {
                    return Err(explain_no_match(
                        state.devices.values(),
                        criteria,
                        &default_family,
                        selection.claimed_elsewhere,
                    ));
                }
                let mut chosen = selection.booted().take(count).cloned().collect::<Vec<_>>();
                if chosen.len() < count && criteria.auto_boot {
                    let missing = count - chosen.len();
                    chosen.extend(selection.bootable().take(missing).cloned());
                }
                if chosen.len() < count {
                    return Err(explain_shortfall(count, &selection, criteria.auto_boot));
                }
                let claimed = chosen
                    .iter()
                    .filter(|entry| stamp(state, &entry.device.id, &owner, now, lease))
                    .map(|entry| entry.device.id.clone())
                    .collect::<Vec<_>>();
                Ok((chosen, claimed))
            })
            .await?;

        let waits = join_all(chosen.iter().map(|entry| self.bring_up(entry))).await;
        let mut devices = Vec::with_capacity(chosen.len());
        for (entry, waited) in chosen.iter().zip(waits) {
            match waited {
                Ok(waited) => devices.push(resolved(entry, PowerState::Booted, waited, Some(&owner))),
                Err(err) => {
                    self.release_claims(&owner, &claimed).await;
                    return Err(err);
                }
            }
        }
        let active_id = devices
            .first()
            .map(|device| device.id.clone())
            .unwrap_or_default();
        active.set(&active_id);
        info!(count = devices.len(), active = %active_id, "devices ensured");
        Ok(EnsureResult { devices, active_id })
    }

    async fn bring_up(&self, entry: &PoolEntry) -> FleetResult<u64> {
        match entry.device.power_state {
            PowerState::Booted => Ok(0),
            PowerState::Booting => {
                let backend = self.backend(entry.backend)?;
                self.wait_until_booted(&entry.device.id, backend.as_ref()).await
            }
            PowerState::Shutdown => self.boot_and_wait(&entry.device.id, entry.backend).await,
        }
    }

    fn backend(&self, kind: BackendKind) -> FleetResult<Arc<dyn DeviceBackend>> {
        self.backends
            .get(kind)
            .cloned()
            .ok_or_else(|| FleetError::unavailable(format!("no {kind} backend is configured")))
    }

    /// Issues a boot and polls the owning backend until the device reports
    /// booted. Returns the whole seconds waited.
    pub async fn boot_and_wait(&self, udid: &str, kind: BackendKind) -> FleetResult<u64> {
        let backend = self.backend(kind)?;
        info!(udid = %udid, backend = %kind, "booting device");
        backend.boot(udid).await.map_err(|err| match err {
            FleetError::Backend(inner) => {
                FleetError::unavailable(format!("boot of {udid} failed: {inner}"))
            }
            other => other,
        })?;
        self.wait_until_booted(udid, backend.as_ref()).await
    }

    async fn wait_until_booted(&self, udid: &str, backend: &dyn DeviceBackend) -> FleetResult<u64> {
        let started = Instant::now();
        let timeout = self.settings.boot_timeout();
        let interval = self.settings.boot_poll_interval();
        loop {
            let booted = backend
                .list_devices()
                .await
                .iter()
                .any(|device| device.id == udid && device.is_booted());
            if booted {
                self.refresh(true).await?;
                return Ok(started.elapsed().as_secs());
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                if let Err(err) = self.refresh(true).await {
                    warn!(udid = %udid, error = %err, "pool refresh after boot timeout failed");
                }
                return Err(FleetError::timeout(format!("boot of {udid}"), timeout.as_secs()));
            }
            tokio::time::sleep(interval.min(timeout - elapsed)).await;
        }
    }

    /// Undoes the leases one failed call took; claims `owner` already held
    /// before the call are left alone.
    async fn release_claims(&self, owner: &str, udids: &[String]) {
        let released = self
            .store
            .update(|state| {
                let mut released = 0;
                for udid in udids {
                    if let Some(entry) = state.devices.get_mut(udid) {
                        if entry.claim.as_ref().is_some_and(|claim| claim.session == owner) {
                            entry.claim = None;
                            released += 1;
                        }
                    }
                }
                Ok(released)
            })
            .await;
        match released {
            Ok(released) => debug!(session = %owner, released, "claims rolled back"),
            Err(err) => warn!(session = %owner, error = %err, "claim rollback failed"),
        }
    }

    /// Drops every claim held by `session`.
    pub async fn release(&self, session: &str) -> FleetResult<usize> {
        let released = self
            .store
            .update(|state| Ok(state.release_session(session)))
            .await?;
        debug!(session = %session, released, "claims released");
        Ok(released)
    }
}
