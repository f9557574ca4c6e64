use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::app::backend::locator::program_exists;
use crate::app::backend::parse::{
    build_usb_descriptor, parse_idevice_ids, parse_ideviceinfo_map, parse_ideviceinstaller_list,
};
use crate::app::backend::runner::{args, run_command_with_timeout, CommandOutput};
use crate::app::backend::{BackendKind, DeviceBackend};
use crate::app::error::FleetResult;
use crate::app::models::{AppInfo, DeviceDescriptor};

const BACKEND: &str = "usb";

/// Older physical devices reachable only through libimobiledevice tools.
/// App management works; power control, UI and location do not.
pub struct UsbBackend {
    idevice_id: String,
    ideviceinfo: String,
    ideviceinstaller: String,
    timeout: Duration,
}

impl UsbBackend {
    pub fn new(
        idevice_id: impl Into<String>,
        ideviceinfo: impl Into<String>,
        ideviceinstaller: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            idevice_id: idevice_id.into(),
            ideviceinfo: ideviceinfo.into(),
            ideviceinstaller: ideviceinstaller.into(),
            timeout,
        }
    }

    async fn run(&self, program: &str, command: Vec<String>, action: &str, trace_id: &str) -> FleetResult<CommandOutput> {
        let output = run_command_with_timeout(program, &command, self.timeout, trace_id)
            .await
            .map_err(|err| err.into_backend(BACKEND))?;
        Ok(output.ensure_success(BACKEND, action)?)
    }

    async fn installer(&self, udid: &str, rest: &[&str], action: &str) -> FleetResult<CommandOutput> {
        let mut command = args(["-u", udid]);
        command.extend(rest.iter().map(|item| item.to_string()));
        self.run(&self.ideviceinstaller, command, action, udid).await
    }
}

#[async_trait]
impl DeviceBackend for UsbBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::LegacyUsb
    }

    async fn is_available(&self) -> bool {
        program_exists(&self.idevice_id) && program_exists(&self.ideviceinfo)
    }

    async fn list_devices(&self) -> Vec<DeviceDescriptor> {
        if !self.is_available().await {
            debug!(program = %self.idevice_id, "libimobiledevice tooling not found");
            return Vec::new();
        }
        let ids = match self
            .run(&self.idevice_id, args(["-l"]), "idevice_id", "list")
            .await
        {
            Ok(output) => parse_idevice_ids(&output.stdout),
            Err(err) => {
                warn!(error = %err, "idevice_id failed");
                return Vec::new();
            }
        };

        let mut devices = Vec::with_capacity(ids.len());
        for udid in ids {
            match self
                .run(&self.ideviceinfo, args(["-u", udid.as_str()]), "ideviceinfo", &udid)
                .await
            {
                Ok(output) => {
                    let info = parse_ideviceinfo_map(&output.stdout);
                    devices.push(build_usb_descriptor(&udid, &info));
                }
                Err(err) => {
                    // Paired but locked or untrusted devices fail here; list them by id.
                    debug!(udid = %udid, error = %err, "ideviceinfo failed");
                    let mut descriptor = build_usb_descriptor(&udid, &Default::default());
                    descriptor.reachable = false;
                    devices.push(descriptor);
                }
            }
        }
        devices
    }

    async fn install_app(&self, udid: &str, path: &str) -> FleetResult<()> {
        self.installer(udid, &["-i", path], "install").await.map(|_| ())
    }

    async fn uninstall_app(&self, udid: &str, bundle_id: &str) -> FleetResult<()> {
        self.installer(udid, &["-U", bundle_id], "uninstall")
            .await
            .map(|_| ())
    }

    async fn list_apps(&self, udid: &str) -> FleetResult<Vec<AppInfo>> {
        let output = self.installer(udid, &["-l"], "list").await?;
        Ok(parse_ideviceinstaller_list(&output.stdout))
    }
}
