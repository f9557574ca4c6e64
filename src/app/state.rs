use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::backend::devicectl::DevicectlBackend;
use crate::app::backend::locator::resolve_program;
use crate::app::backend::simctl::SimctlBackend;
use crate::app::backend::usb::UsbBackend;
use crate::app::backend::BackendSet;
use crate::app::config::AppConfig;
use crate::app::controller::Controller;
use crate::app::pool::{DevicePool, PoolStore};
use crate::app::registry::RegistryCache;
use crate::app::scheduler::TaskScheduler;
use crate::app::ui::catalog::ScreenCatalog;
use crate::app::ui::UiEngine;

pub struct AppState {
    pub config: AppConfig,
    pub controller: Arc<Controller>,
}

impl AppState {
    /// Wires the real tool backends from `config`.
    pub fn new(config: AppConfig) -> Self {
        let tools = &config.tools;
        let timeout = tools.command_timeout();
        let xcrun = resolve_program(&tools.xcrun_path, "xcrun");
        let idb = resolve_program(&tools.idb_path, "idb");
        let backends = BackendSet::new()
            .with(Arc::new(SimctlBackend::new(xcrun.clone(), idb.clone(), timeout)))
            .with(Arc::new(DevicectlBackend::new(xcrun, idb, timeout)))
            .with(Arc::new(UsbBackend::new(
                resolve_program(&tools.idevice_id_path, "idevice_id"),
                resolve_program(&tools.ideviceinfo_path, "ideviceinfo"),
                resolve_program(&tools.ideviceinstaller_path, "ideviceinstaller"),
                timeout,
            )));
        Self::with_backends(config, backends)
    }

    pub fn with_backends(config: AppConfig, backends: BackendSet) -> Self {
        let registry = Arc::new(RegistryCache::new(Duration::from_millis(
            config.cache.registry_ttl_ms,
        )));
        let scheduler = Arc::new(TaskScheduler::new(config.ui.probe_concurrency));
        let catalog = config
            .ui
            .static_elements
            .iter()
            .cloned()
            .fold(ScreenCatalog::builtin(), ScreenCatalog::with_static);
        let ui = UiEngine::new(
            config.ui.clone(),
            Duration::from_millis(config.cache.ui_ttl_ms),
            catalog,
            scheduler,
        );

        let mut controller = Controller::new(backends.clone(), Arc::clone(&registry), ui);
        match prepare_pool_path(config.pool.resolved_state_path()) {
            Ok(path) => {
                info!(path = %path.display(), "device pool enabled");
                let pool = DevicePool::new(PoolStore::new(path), backends, config.pool.clone())
                    .with_registry(registry);
                controller = controller.with_pool(Arc::new(pool));
            }
            Err(err) => {
                warn!(error = %err, "device pool disabled; resolving from booted devices only");
            }
        }

        Self {
            config,
            controller: Arc::new(controller),
        }
    }
}

fn prepare_pool_path(path: PathBuf) -> std::io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(path)
}
