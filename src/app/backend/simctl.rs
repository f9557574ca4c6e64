use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::app::backend::idb::IdbUi;
use crate::app::backend::locator::program_exists;
use crate::app::backend::parse::{
    parse_simctl_devices, parse_simctl_launch_pid, parse_simctl_listapps,
};
use crate::app::backend::runner::{args, run_command_with_timeout, CommandOutput};
use crate::app::backend::{BackendKind, DeviceBackend};
use crate::app::error::FleetResult;
use crate::app::models::{AppInfo, DeviceDescriptor};

const BACKEND: &str = "simctl";

/// Simulators driven through `xcrun simctl`, with UI through idb.
pub struct SimctlBackend {
    xcrun: String,
    ui: IdbUi,
    timeout: Duration,
}

impl SimctlBackend {
    pub fn new(xcrun: impl Into<String>, idb: impl Into<String>, timeout: Duration) -> Self {
        Self {
            xcrun: xcrun.into(),
            ui: IdbUi::new(idb, BACKEND, timeout),
            timeout,
        }
    }

    async fn simctl(&self, action: &str, rest: &[&str], trace_id: &str) -> FleetResult<CommandOutput> {
        let mut command = args(["simctl", action]);
        command.extend(rest.iter().map(|item| item.to_string()));
        let output = run_command_with_timeout(&self.xcrun, &command, self.timeout, trace_id)
            .await
            .map_err(|err| err.into_backend(BACKEND))?;
        Ok(output.ensure_success(BACKEND, action)?)
    }
}

#[async_trait]
impl DeviceBackend for SimctlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Simulator
    }

    async fn is_available(&self) -> bool {
        program_exists(&self.xcrun)
    }

    async fn list_devices(&self) -> Vec<DeviceDescriptor> {
        if !self.is_available().await {
            debug!(program = %self.xcrun, "simctl tooling not found");
            return Vec::new();
        }
        match self.simctl("list", &["devices", "--json"], "list").await {
            Ok(output) => parse_simctl_devices(&output.stdout),
            Err(err) => {
                warn!(error = %err, "simctl list failed");
                Vec::new()
            }
        }
    }

    async fn boot(&self, udid: &str) -> FleetResult<()> {
        match self.simctl("boot", &[udid], udid).await {
            Ok(_) => Ok(()),
            // Booting an already-booted simulator is not a failure.
            Err(err) if err.to_string().contains("current state: Booted") => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn shutdown(&self, udid: &str) -> FleetResult<()> {
        match self.simctl("shutdown", &[udid], udid).await {
            Ok(_) => Ok(()),
            Err(err) if err.to_string().contains("current state: Shutdown") => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn install_app(&self, udid: &str, path: &str) -> FleetResult<()> {
        self.simctl("install", &[udid, path], udid).await.map(|_| ())
    }

    async fn launch_app(&self, udid: &str, bundle_id: &str) -> FleetResult<Option<u32>> {
        let output = self.simctl("launch", &[udid, bundle_id], udid).await?;
        Ok(parse_simctl_launch_pid(&output.stdout))
    }

    async fn terminate_app(&self, udid: &str, bundle_id: &str) -> FleetResult<()> {
        self.simctl("terminate", &[udid, bundle_id], udid)
            .await
            .map(|_| ())
    }

    async fn uninstall_app(&self, udid: &str, bundle_id: &str) -> FleetResult<()> {
        self.simctl("uninstall", &[udid, bundle_id], udid)
            .await
            .map(|_| ())
    }

    async fn list_apps(&self, udid: &str) -> FleetResult<Vec<AppInfo>> {
        let output = self.simctl("listapps", &[udid], udid).await?;
        Ok(parse_simctl_listapps(&output.stdout))
    }

    async fn describe_ui_tree(&self, udid: &str, _depth: Option<u32>) -> FleetResult<Vec<Value>> {
        self.ui.describe_all(udid).await
    }

    async fn probe_point(&self, udid: &str, x: f64, y: f64) -> FleetResult<Option<Value>> {
        self.ui.describe_point(udid, x, y).await
    }

    async fn tap(&self, udid: &str, x: f64, y: f64) -> FleetResult<()> {
        self.ui.tap(udid, x, y).await
    }

    async fn swipe(
        &self,
        udid: &str,
        from: (f64, f64),
        to: (f64, f64),
        duration_secs: f64,
    ) -> FleetResult<()> {
        self.ui.swipe(udid, from, to, duration_secs).await
    }

    async fn type_text(&self, udid: &str, text: &str) -> FleetResult<()> {
        self.ui.type_text(udid, text).await
    }

    async fn press_button(&self, udid: &str, button: &str) -> FleetResult<()> {
        self.ui.press_button(udid, button).await
    }

    async fn set_location(&self, udid: &str, latitude: f64, longitude: f64) -> FleetResult<()> {
        let coordinate = format!("{latitude:.6},{longitude:.6}");
        self.simctl("location", &[udid, "set", &coordinate], udid)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_xcrun_degrades_to_empty_listing() {
        let backend = SimctlBackend::new(
            "/this/path/should/not/exist/xcrun",
            "idb",
            Duration::from_secs(1),
        );
        assert!(!backend.is_available().await);
        assert!(backend.list_devices().await.is_empty());
    }

    #[tokio::test]
    async fn missing_xcrun_fails_operations_with_backend_attribution() {
        let backend = SimctlBackend::new(
            "/this/path/should/not/exist/xcrun",
            "idb",
            Duration::from_secs(1),
        );
        let err = backend.boot("A1").await.expect_err("spawn should fail");
        assert!(matches!(err, crate::app::error::FleetError::Backend(ref inner) if inner.backend == "simctl"));
    }
}
