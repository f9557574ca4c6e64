//! UI interaction engine: cached tree queries, taps with stability and
//! occlusion handling, condition waits, and point probing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::app::backend::DeviceBackend;
use crate::app::config::UiSettings;
use crate::app::error::FleetResult;
use crate::app::models::{DeviceDescriptor, DeviceKind, Element, ElementFilters};
use crate::app::scheduler::TaskScheduler;

pub mod cache;
pub mod catalog;
pub mod elements;
mod probe;
mod query;
mod tap;
mod wait;

pub use wait::{WaitRequest, MAX_WAIT};

use cache::UiCache;
use catalog::{ScreenCatalog, ScreenSize};

/// The device a UI call acts on, already routed to its backend.
#[derive(Clone)]
pub struct UiTarget {
    pub udid: String,
    pub backend: Arc<dyn DeviceBackend>,
    pub device: Option<DeviceDescriptor>,
}

pub struct UiEngine {
    settings: UiSettings,
    cache: UiCache,
    catalog: ScreenCatalog,
    scheduler: Arc<TaskScheduler>,
    screens: Mutex<HashMap<String, ScreenSize>>,
}

impl UiEngine {
    pub fn new(
        settings: UiSettings,
        cache_ttl: Duration,
        catalog: ScreenCatalog,
        scheduler: Arc<TaskScheduler>,
    ) -> Self {
        Self {
            settings,
            cache: UiCache::new(cache_ttl),
            catalog,
            scheduler,
            screens: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &UiCache {
        &self.cache
    }

    pub fn invalidate(&self, udid: &str) {
        self.cache.invalidate(udid);
    }

    fn stability_delay(&self) -> Duration {
        Duration::from_millis(self.settings.stability_delay_ms)
    }

    fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settings.settle_delay_ms)
    }

    /// Point probing is only cheap on physical devices whose backend has a
    /// single-point query.
    fn fast_path_eligible(&self, target: &UiTarget) -> bool {
        target.backend.kind().device_kind() == DeviceKind::Physical
            && target.backend.supports_point_probe()
    }

    /// Screen size without touching the device: remembered, else catalogued.
    pub fn known_screen(&self, target: &UiTarget) -> Option<ScreenSize> {
        let mut screens = self.screens.lock().unwrap_or_else(|err| err.into_inner());
        if let Some(screen) = screens.get(&target.udid) {
            return Some(*screen);
        }
        let screen = target
            .device
            .as_ref()
            .and_then(|device| self.catalog.screen_for(device))?;
        screens.insert(target.udid.clone(), screen);
        Some(screen)
    }

    /// Remembers the root frame of a full tree for devices the catalog does
    /// not know.
    fn remember_screen(&self, target: &UiTarget, tree: &[Element]) {
        if self.known_screen(target).is_some() {
            return;
        }
        let root = tree.iter().find_map(|element| {
            let frame = element.frame.filter(|frame| frame.has_area())?;
            (elements::is_type(element, "Application") || elements::is_type(element, "Window"))
                .then_some(frame)
        });
        if let Some(frame) = root {
            self.screens
                .lock()
                .unwrap_or_else(|err| err.into_inner())
                .insert(target.udid.clone(), ScreenSize::from_root_frame(&frame));
        }
    }

    /// Known screen, fetching the (cached) tree once if needed.
    pub async fn screen_size(&self, target: &UiTarget) -> FleetResult<Option<ScreenSize>> {
        if let Some(screen) = self.known_screen(target) {
            return Ok(Some(screen));
        }
        self.lookup(target, &ElementFilters::default(), false).await?;
        Ok(self.known_screen(target))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use serde_json::Value;

    use super::*;
    use crate::app::backend::fake::{device, raw_element, FakeBackend};
    use crate::app::models::{Frame, PowerState};

    pub fn settings() -> UiSettings {
        UiSettings {
            stability_delay_ms: 1,
            settle_delay_ms: 1,
            wait_interval_ms: 10,
            ..UiSettings::default()
        }
    }

    pub fn engine(catalog: ScreenCatalog) -> UiEngine {
        UiEngine::new(
            settings(),
            Duration::from_secs(3),
            catalog,
            Arc::new(TaskScheduler::new(4)),
        )
    }

    pub fn target(backend: Arc<FakeBackend>, name: Option<&str>) -> UiTarget {
        UiTarget {
            udid: "DEV".to_string(),
            backend,
            device: name.map(|name| device("DEV", name, "iOS 18.2", PowerState::Booted)),
        }
    }

    pub fn frame(x: f64, y: f64, w: f64, h: f64) -> Frame {
        Frame { x, y, w, h }
    }

    pub fn app_root() -> Value {
        raw_element("Application", "App", None, frame(0.0, 0.0, 393.0, 852.0))
    }

    pub fn button(label: &str, identifier: Option<&str>, at: Frame) -> Value {
        raw_element("Button", label, identifier, at)
    }
}
