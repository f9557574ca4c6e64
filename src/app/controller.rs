//! Orchestration façade: picks the device an operation acts on, routes it to
//! the owning backend, and keeps the UI cache honest after mutations.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::app::active::ActiveDevice;
use crate::app::backend::{BackendKind, BackendSet, DeviceBackend};
use crate::app::error::{FleetError, FleetResult};
use crate::app::models::{
    AppInfo, CacheStats, DeviceDescriptor, Element, ElementFilters, EnsureResult, ResolvedDevice,
    TapOutcome, WaitResult,
};
use crate::app::pool::{DevicePool, ResolveCriteria};
use crate::app::registry::{enumerate_all, OwnedDevice, RegistryCache};
use crate::app::ui::{UiEngine, UiTarget, WaitRequest};

pub struct Controller {
    backends: BackendSet,
    registry: Arc<RegistryCache>,
    pool: Option<Arc<DevicePool>>,
    ui: UiEngine,
    active: ActiveDevice,
}

impl Controller {
    pub fn new(backends: BackendSet, registry: Arc<RegistryCache>, ui: UiEngine) -> Self {
        Self {
            backends,
            registry,
            pool: None,
            ui,
            active: ActiveDevice::new(),
        }
    }

    pub fn with_pool(mut self, pool: Arc<DevicePool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn active(&self) -> &ActiveDevice {
        &self.active
    }

    pub fn ui(&self) -> &UiEngine {
        &self.ui
    }

    fn pool(&self) -> FleetResult<&DevicePool> {
        self.pool
            .as_deref()
            .ok_or_else(|| FleetError::unavailable("device pool is not configured"))
    }

    async fn enumerate(&self) -> Vec<OwnedDevice> {
        let devices = enumerate_all(&self.backends).await;
        self.registry.replace(devices.clone());
        devices
    }

    pub async fn list_devices(&self) -> Vec<DeviceDescriptor> {
        self.enumerate()
            .await
            .into_iter()
            .map(|owned| owned.device)
            .collect()
    }

    /// Device an operation acts on: explicit id, then the sticky active
    /// device, then the pool resolver, then the single booted device.
    pub async fn resolve_active(&self, udid: Option<&str>) -> FleetResult<String> {
        if let Some(udid) = udid.map(str::trim).filter(|udid| !udid.is_empty()) {
            return Ok(udid.to_string());
        }
        if let Some(udid) = self.active.get() {
            return Ok(udid);
        }
        if let Some(pool) = &self.pool {
            match pool.resolve(&ResolveCriteria::default(), &self.active).await {
                Ok(device) => return Ok(device.id),
                Err(err) => {
                    warn!(error = %err, "pool resolution failed; falling back to booted devices");
                }
            }
        }

        let booted = self
            .enumerate()
            .await
            .into_iter()
            .filter(|owned| owned.device.is_booted())
            .map(|owned| owned.device)
            .collect::<Vec<_>>();
        match booted.as_slice() {
            [] => Err(FleetError::unavailable(
                "no booted device; boot one or pass a device id",
            )),
            [only] => {
                self.active.set(&only.id);
                Ok(only.id.clone())
            }
            many => Err(FleetError::validation(format!(
                "multiple booted devices ({}); specify one",
                many.iter()
                    .map(|device| format!("{} ({})", device.name, device.id))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Owning backend for a device. Ids missing from a fresh registry trigger
    /// one re-enumeration before the simulator default applies.
    async fn route(&self, udid: &str) -> FleetResult<Arc<dyn DeviceBackend>> {
        let kind = match self.registry.lookup(udid) {
            Some(kind) => kind,
            None => {
                debug!(udid = %udid, "registry miss; re-enumerating");
                self.enumerate().await;
                self.registry.kind_or_default(udid)
            }
        };
        self.backend(kind)
    }

    fn backend(&self, kind: BackendKind) -> FleetResult<Arc<dyn DeviceBackend>> {
        self.backends
            .get(kind)
            .cloned()
            .ok_or_else(|| FleetError::unavailable(format!("no {kind} backend is configured")))
    }

    async fn target(&self, udid: Option<&str>) -> FleetResult<UiTarget> {
        let udid = self.resolve_active(udid).await?;
        let backend = self.route(&udid).await?;
        Ok(UiTarget {
            device: self.registry.descriptor(&udid),
            udid,
            backend,
        })
    }

    pub async fn resolve_device(&self, criteria: &ResolveCriteria) -> FleetResult<ResolvedDevice> {
        self.pool()?.resolve(criteria, &self.active).await
    }

    pub async fn ensure_devices(
        &self,
        count: usize,
        criteria: &ResolveCriteria,
    ) -> FleetResult<EnsureResult> {
        self.pool()?.ensure(count, criteria, &self.active).await
    }

    pub async fn release_session(&self, session: &str) -> FleetResult<usize> {
        self.pool()?.release(session).await
    }

    /// Boots and waits until booted. Returns the seconds waited.
    pub async fn boot_device(&self, udid: &str) -> FleetResult<u64> {
        let target = self.target(Some(udid)).await?;
        let waited = match &self.pool {
            Some(pool) => pool.boot_and_wait(&target.udid, target.backend.kind()).await?,
            None => {
                target.backend.boot(&target.udid).await?;
                0
            }
        };
        self.registry.invalidate();
        self.ui.invalidate(&target.udid);
        Ok(waited)
    }

    pub async fn shutdown_device(&self, udid: &str) -> FleetResult<()> {
        let target = self.target(Some(udid)).await?;
        target.backend.shutdown(&target.udid).await?;
        if self.active.clear_if(&target.udid) {
            info!(udid = %target.udid, "active device shut down; cleared");
        }
        self.registry.invalidate();
        self.ui.invalidate(&target.udid);
        if let Some(pool) = &self.pool {
            if let Err(err) = pool.refresh(true).await {
                warn!(udid = %target.udid, error = %err, "pool refresh after shutdown failed");
            }
        }
        Ok(())
    }

    pub async fn install_app(&self, udid: Option<&str>, path: &str) -> FleetResult<String> {
        let target = self.target(udid).await?;
        let result = target.backend.install_app(&target.udid, path).await;
        self.ui.invalidate(&target.udid);
        result.map(|()| target.udid)
    }

    pub async fn launch_app(&self, udid: Option<&str>, bundle_id: &str) -> FleetResult<Option<u32>> {
        let target = self.target(udid).await?;
        let result = target.backend.launch_app(&target.udid, bundle_id).await;
        self.ui.invalidate(&target.udid);
        result
    }

    pub async fn terminate_app(&self, udid: Option<&str>, bundle_id: &str) -> FleetResult<()> {
        let target = self.target(udid).await?;
        let result = target.backend.terminate_app(&target.udid, bundle_id).await;
        self.ui.invalidate(&target.udid);
        result
    }

    pub async fn uninstall_app(&self, udid: Option<&str>, bundle_id: &str) -> FleetResult<()> {
        let target = self.target(udid).await?;
        let result = target.backend.uninstall_app(&target.udid, bundle_id).await;
        self.ui.invalidate(&target.udid);
        result
    }

    pub async fn list_apps(&self, udid: Option<&str>) -> FleetResult<Vec<AppInfo>> {
        let target = self.target(udid).await?;
        target.backend.list_apps(&target.udid).await
    }

    pub async fn swipe(
        &self,
        udid: Option<&str>,
        from: (f64, f64),
        to: (f64, f64),
        duration_secs: f64,
    ) -> FleetResult<()> {
        let target = self.target(udid).await?;
        let result = target
            .backend
            .swipe(&target.udid, from, to, duration_secs)
            .await;
        self.ui.invalidate(&target.udid);
        result
    }

    pub async fn type_text(&self, udid: Option<&str>, text: &str) -> FleetResult<()> {
        let target = self.target(udid).await?;
        let result = target.backend.type_text(&target.udid, text).await;
        self.ui.invalidate(&target.udid);
        result
    }

    pub async fn press_button(&self, udid: Option<&str>, button: &str) -> FleetResult<()> {
        let target = self.target(udid).await?;
        let result = target.backend.press_button(&target.udid, button).await;
        self.ui.invalidate(&target.udid);
        result
    }

    pub async fn set_location(
        &self,
        udid: Option<&str>,
        latitude: f64,
        longitude: f64,
    ) -> FleetResult<()> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(FleetError::validation(format!(
                "coordinates out of range: {latitude}, {longitude}"
            )));
        }
        let target = self.target(udid).await?;
        target
            .backend
            .set_location(&target.udid, latitude, longitude)
            .await
    }

    pub async fn get_ui_elements(
        &self,
        udid: Option<&str>,
        filters: &ElementFilters,
        fresh: bool,
    ) -> FleetResult<Vec<Element>> {
        let target = self.target(udid).await?;
        self.ui.query(&target, filters, fresh).await
    }

    pub async fn tap_element(
        &self,
        udid: Option<&str>,
        filters: &ElementFilters,
    ) -> FleetResult<TapOutcome> {
        let target = self.target(udid).await?;
        self.ui.tap(&target, filters).await
    }

    pub async fn wait_for_element(
        &self,
        udid: Option<&str>,
        request: &WaitRequest,
    ) -> FleetResult<WaitResult> {
        let target = self.target(udid).await?;
        self.ui.wait_for(&target, request).await
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.ui.cache().stats()
    }

    pub fn clear_ui_cache(&self) {
        self.ui.cache().clear();
    }
}
