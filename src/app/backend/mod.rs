//! Backend capability providers.
//!
//! Every device-control tool is wrapped in a [`DeviceBackend`]. The set of
//! backends is closed ([`BackendKind`]) so routing a device id to its tool is
//! a plain `match` on the kind recorded by the registry cache.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app::error::{FleetError, FleetResult};
use crate::app::models::{AppInfo, DeviceDescriptor, DeviceKind};

pub mod devicectl;
pub mod idb;
pub mod locator;
pub mod parse;
pub mod runner;
pub mod simctl;
pub mod usb;

#[cfg(test)]
pub mod fake;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Simulator,
    Device,
    LegacyUsb,
}

impl BackendKind {
    /// Enumeration priority; the first backend to report an id owns it.
    pub const ALL: [BackendKind; 3] = [
        BackendKind::Simulator,
        BackendKind::Device,
        BackendKind::LegacyUsb,
    ];

    pub fn device_kind(&self) -> DeviceKind {
        match self {
            BackendKind::Simulator => DeviceKind::Simulated,
            BackendKind::Device | BackendKind::LegacyUsb => DeviceKind::Physical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Simulator => "simctl",
            BackendKind::Device => "devicectl",
            BackendKind::LegacyUsb => "usb",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability contract shared by all device-control tools.
///
/// `list_devices` never fails: a backend whose tooling is missing reports no
/// devices. Operations a backend cannot perform default to
/// [`FleetError::UnsupportedOperation`].
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Whether `probe_point` is a cheap single-point query on this backend.
    fn supports_point_probe(&self) -> bool {
        false
    }

    async fn is_available(&self) -> bool;

    async fn list_devices(&self) -> Vec<DeviceDescriptor>;

    async fn boot(&self, _udid: &str) -> FleetResult<()> {
        Err(self.unsupported("boot"))
    }

    async fn shutdown(&self, _udid: &str) -> FleetResult<()> {
        Err(self.unsupported("shutdown"))
    }

    async fn install_app(&self, _udid: &str, _path: &str) -> FleetResult<()> {
        Err(self.unsupported("install_app"))
    }

    async fn launch_app(&self, _udid: &str, _bundle_id: &str) -> FleetResult<Option<u32>> {
        Err(self.unsupported("launch_app"))
    }

    async fn terminate_app(&self, _udid: &str, _bundle_id: &str) -> FleetResult<()> {
        Err(self.unsupported("terminate_app"))
    }

    async fn uninstall_app(&self, _udid: &str, _bundle_id: &str) -> FleetResult<()> {
        Err(self.unsupported("uninstall_app"))
    }

    async fn list_apps(&self, _udid: &str) -> FleetResult<Vec<AppInfo>> {
        Err(self.unsupported("list_apps"))
    }

    async fn describe_ui_tree(&self, _udid: &str, _depth: Option<u32>) -> FleetResult<Vec<Value>> {
        Err(self.unsupported("describe_ui_tree"))
    }

    async fn probe_point(&self, _udid: &str, _x: f64, _y: f64) -> FleetResult<Option<Value>> {
        Err(self.unsupported("probe_point"))
    }

    async fn tap(&self, _udid: &str, _x: f64, _y: f64) -> FleetResult<()> {
        Err(self.unsupported("tap"))
    }

    async fn swipe(
        &self,
        _udid: &str,
        _from: (f64, f64),
        _to: (f64, f64),
        _duration_secs: f64,
    ) -> FleetResult<()> {
        Err(self.unsupported("swipe"))
    }

    async fn type_text(&self, _udid: &str, _text: &str) -> FleetResult<()> {
        Err(self.unsupported("type_text"))
    }

    async fn press_button(&self, _udid: &str, _button: &str) -> FleetResult<()> {
        Err(self.unsupported("press_button"))
    }

    async fn set_location(&self, _udid: &str, _latitude: f64, _longitude: f64) -> FleetResult<()> {
        Err(self.unsupported("set_location"))
    }

    fn unsupported(&self, operation: &str) -> FleetError {
        FleetError::unsupported(operation, self.kind().device_kind())
    }
}

/// The configured backends, at most one per kind.
#[derive(Clone, Default)]
pub struct BackendSet {
    simulator: Option<Arc<dyn DeviceBackend>>,
    device: Option<Arc<dyn DeviceBackend>>,
    legacy_usb: Option<Arc<dyn DeviceBackend>>,
}

impl BackendSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, backend: Arc<dyn DeviceBackend>) -> Self {
        match backend.kind() {
            BackendKind::Simulator => self.simulator = Some(backend),
            BackendKind::Device => self.device = Some(backend),
            BackendKind::LegacyUsb => self.legacy_usb = Some(backend),
        }
        self
    }

    pub fn get(&self, kind: BackendKind) -> Option<&Arc<dyn DeviceBackend>> {
        match kind {
            BackendKind::Simulator => self.simulator.as_ref(),
            BackendKind::Device => self.device.as_ref(),
            BackendKind::LegacyUsb => self.legacy_usb.as_ref(),
        }
    }

    /// Configured backends in enumeration priority order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn DeviceBackend>> {
        BackendKind::ALL.into_iter().filter_map(move |kind| self.get(kind))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}
