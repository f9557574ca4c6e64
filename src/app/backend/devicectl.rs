use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::app::backend::idb::IdbUi;
use crate::app::backend::locator::program_exists;
use crate::app::backend::parse::{
    parse_devicectl_apps, parse_devicectl_devices, parse_devicectl_launch_pid,
    parse_devicectl_processes,
};
use crate::app::backend::runner::{args, run_command_with_timeout};
use crate::app::backend::{BackendKind, DeviceBackend};
use crate::app::error::{BackendError, FleetError, FleetResult};
use crate::app::models::{AppInfo, DeviceDescriptor};

const BACKEND: &str = "devicectl";

/// Physical devices driven through `xcrun devicectl`. UI goes through idb,
/// whose companion answers single-point queries cheaply.
pub struct DevicectlBackend {
    xcrun: String,
    ui: IdbUi,
    timeout: Duration,
}

impl DevicectlBackend {
    pub fn new(xcrun: impl Into<String>, idb: impl Into<String>, timeout: Duration) -> Self {
        Self {
            xcrun: xcrun.into(),
            ui: IdbUi::new(idb, BACKEND, timeout),
            timeout,
        }
    }

    /// Runs a devicectl command and returns the JSON document it wrote.
    async fn devicectl_json(&self, rest: &[&str], trace_id: &str) -> FleetResult<String> {
        let output_file = tempfile::Builder::new()
            .prefix("devicectl-")
            .suffix(".json")
            .tempfile()
            .map_err(|err| BackendError::new(BACKEND, format!("temp file: {err}")))?;
        let output_path = output_file.path().to_string_lossy().to_string();

        let mut command = args(["devicectl"]);
        command.extend(rest.iter().map(|item| item.to_string()));
        command.push("--json-output".to_string());
        command.push(output_path);

        let action = rest.iter().take(3).copied().collect::<Vec<_>>().join(" ");
        run_command_with_timeout(&self.xcrun, &command, self.timeout, trace_id)
            .await
            .map_err(|err| err.into_backend(BACKEND))?
            .ensure_success(BACKEND, &action)?;

        tokio::fs::read_to_string(output_file.path())
            .await
            .map_err(|err| BackendError::new(BACKEND, format!("read {action} output: {err}")).into())
    }

    async fn running_pids_for(&self, udid: &str, bundle_id: &str) -> FleetResult<Vec<u32>> {
        let apps = parse_devicectl_apps(
            &self
                .devicectl_json(&["device", "info", "apps", "--device", udid], udid)
                .await?,
        );
        let Some(app_url) = apps
            .into_iter()
            .find(|app| app.bundle_id == bundle_id)
            .and_then(|app| app.install_path)
        else {
            return Err(BackendError::new(BACKEND, format!("{bundle_id} is not installed")).into());
        };
        let processes = parse_devicectl_processes(
            &self
                .devicectl_json(&["device", "info", "processes", "--device", udid], udid)
                .await?,
        );
        Ok(processes
            .into_iter()
            .filter(|(_, executable)| executable.starts_with(&app_url))
            .map(|(pid, _)| pid)
            .collect())
    }
}

#[async_trait]
impl DeviceBackend for DevicectlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Device
    }

    fn supports_point_probe(&self) -> bool {
        self.ui.is_available()
    }

    async fn is_available(&self) -> bool {
        program_exists(&self.xcrun)
    }

    async fn list_devices(&self) -> Vec<DeviceDescriptor> {
        if !self.is_available().await {
            debug!(program = %self.xcrun, "devicectl tooling not found");
            return Vec::new();
        }
        match self.devicectl_json(&["list", "devices"], "list").await {
            Ok(output) => parse_devicectl_devices(&output),
            Err(err) => {
                warn!(error = %err, "devicectl list failed");
                Vec::new()
            }
        }
    }

    async fn install_app(&self, udid: &str, path: &str) -> FleetResult<()> {
        self.devicectl_json(&["device", "install", "app", "--device", udid, path], udid)
            .await
            .map(|_| ())
    }

    async fn launch_app(&self, udid: &str, bundle_id: &str) -> FleetResult<Option<u32>> {
        let output = self
            .devicectl_json(
                &["device", "process", "launch", "--device", udid, bundle_id],
                udid,
            )
            .await?;
        Ok(parse_devicectl_launch_pid(&output))
    }

    async fn terminate_app(&self, udid: &str, bundle_id: &str) -> FleetResult<()> {
        let pids = self.running_pids_for(udid, bundle_id).await?;
        if pids.is_empty() {
            debug!(udid = %udid, bundle_id = %bundle_id, "app not running; nothing to terminate");
            return Ok(());
        }
        for pid in pids {
            let pid = pid.to_string();
            self.devicectl_json(
                &["device", "process", "terminate", "--device", udid, "--pid", &pid],
                udid,
            )
            .await?;
        }
        Ok(())
    }

    async fn uninstall_app(&self, udid: &str, bundle_id: &str) -> FleetResult<()> {
        self.devicectl_json(
            &["device", "uninstall", "app", "--device", udid, bundle_id],
            udid,
        )
        .await
        .map(|_| ())
    }

    async fn list_apps(&self, udid: &str) -> FleetResult<Vec<AppInfo>> {
        let output = self
            .devicectl_json(&["device", "info", "apps", "--device", udid], udid)
            .await?;
        Ok(parse_devicectl_apps(&output))
    }

    async fn describe_ui_tree(&self, udid: &str, _depth: Option<u32>) -> FleetResult<Vec<Value>> {
        self.ui.describe_all(udid).await
    }

    async fn probe_point(&self, udid: &str, x: f64, y: f64) -> FleetResult<Option<Value>> {
        if !self.ui.is_available() {
            return Err(FleetError::unavailable("idb is required for point queries"));
        }
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
}
