//! Scripted in-memory backend for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::app::backend::{BackendKind, DeviceBackend};
use crate::app::error::{BackendError, FleetResult};
use crate::app::models::{AppInfo, DeviceDescriptor, DeviceKind, Frame, PowerState};

#[derive(Default)]
struct FakeState {
    devices: Vec<DeviceDescriptor>,
    ui_trees: HashMap<String, VecDeque<Vec<Value>>>,
    probe_elements: Vec<Value>,
    /// List calls a freshly booted device keeps reporting `booting`.
    booting_polls: usize,
    pending_boots: HashMap<String, usize>,
    never_boots: bool,
    list_calls: usize,
    describe_calls: usize,
    probe_calls: usize,
    boots: Vec<String>,
    taps: Vec<(String, f64, f64)>,
    swipes: Vec<(String, (f64, f64), (f64, f64))>,
    calls: Vec<String>,
}

pub struct FakeBackend {
    kind: BackendKind,
    point_probe: bool,
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            point_probe: false,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn with_device(self, device: DeviceDescriptor) -> Self {
        self.lock().devices.push(device);
        self
    }

    pub fn with_point_probe(mut self) -> Self {
        self.point_probe = true;
        self
    }

    /// Queues a tree; `describe_ui_tree` serves queued trees in order and
    /// keeps repeating the last one.
    pub fn with_ui_tree(self, udid: &str, tree: Vec<Value>) -> Self {
        self.push_ui_tree(udid, tree);
        self
    }

    /// `probe_point` answers with the first registered element whose frame
    /// contains the point.
    pub fn with_probe_element(self, element: Value) -> Self {
        self.lock().probe_elements.push(element);
        self
    }

    pub fn with_booting_polls(self, polls: usize) -> Self {
        self.lock().booting_polls = polls;
        self
    }

    pub fn never_boots(self) -> Self {
        self.lock().never_boots = true;
        self
    }

    pub fn push_ui_tree(&self, udid: &str, tree: Vec<Value>) {
        self.lock()
            .ui_trees
            .entry(udid.to_string())
            .or_default()
            .push_back(tree);
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    pub fn describe_calls(&self) -> usize {
        self.lock().describe_calls
    }

    pub fn probe_calls(&self) -> usize {
        self.lock().probe_calls
    }

    pub fn boots(&self) -> Vec<String> {
        self.lock().boots.clone()
    }

    pub fn taps(&self) -> Vec<(String, f64, f64)> {
        self.lock().taps.clone()
    }

    pub fn swipes(&self) -> Vec<(String, (f64, f64), (f64, f64))> {
        self.lock().swipes.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake backend state")
    }

    fn record(&self, call: String) {
        self.lock().calls.push(call);
    }

    fn set_power(&self, udid: &str, power: PowerState) -> FleetResult<()> {
        let mut state = self.lock();
        let Some(device) = state.devices.iter_mut().find(|device| device.id == udid) else {
            return Err(BackendError::new(self.kind.as_str(), format!("no device {udid}")).into());
        };
        device.power_state = power;
        Ok(())
    }
}

pub fn device(id: &str, name: &str, os_version: &str, power: PowerState) -> DeviceDescriptor {
    DeviceDescriptor {
        id: id.to_string(),
        name: name.to_string(),
        kind: DeviceKind::Simulated,
        power_state: power,
        os_version: os_version.to_string(),
        family: crate::app::backend::parse::infer_family(name)
            .unwrap_or_default()
            .to_string(),
        runtime_id: String::new(),
        model: String::new(),
        reachable: true,
        is_available: true,
    }
}

pub fn raw_element(element_type: &str, label: &str, identifier: Option<&str>, frame: Frame) -> Value {
    let mut value = serde_json::json!({
        "type": element_type,
        "AXLabel": label,
        "frame": {"x": frame.x, "y": frame.y, "width": frame.w, "height": frame.h},
        "enabled": true,
    });
    if let Some(identifier) = identifier {
        value["AXUniqueId"] = Value::from(identifier);
    }
    value
}

fn raw_frame(value: &Value) -> Option<Frame> {
    serde_json::from_value(value.get("frame")?.clone()).ok()
}

#[async_trait]
impl DeviceBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn supports_point_probe(&self) -> bool {
        self.point_probe
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn list_devices(&self) -> Vec<DeviceDescriptor> {
        let mut state = self.lock();
        state.list_calls += 1;
        let pending = std::mem::take(&mut state.pending_boots);
        let mut still_pending = HashMap::new();
        for (udid, remaining) in pending {
            if remaining == 0 {
                if let Some(device) = state.devices.iter_mut().find(|device| device.id == udid) {
                    device.power_state = PowerState::Booted;
                }
            } else {
                still_pending.insert(udid, remaining - 1);
            }
        }
        state.pending_boots = still_pending;
        state.devices.clone()
    }

    async fn boot(&self, udid: &str) -> FleetResult<()> {
        self.set_power(udid, PowerState::Booting)?;
        let mut state = self.lock();
        state.boots.push(udid.to_string());
        if !state.never_boots {
            let polls = state.booting_polls;
            state.pending_boots.insert(udid.to_string(), polls);
        }
        Ok(())
    }

    async fn shutdown(&self, udid: &str) -> FleetResult<()> {
        self.set_power(udid, PowerState::Shutdown)?;
        self.record(format!("shutdown {udid}"));
        Ok(())
    }

    async fn install_app(&self, udid: &str, path: &str) -> FleetResult<()> {
        self.record(format!("install {udid} {path}"));
        Ok(())
    }

    async fn launch_app(&self, udid: &str, bundle_id: &str) -> FleetResult<Option<u32>> {
        self.record(format!("launch {udid} {bundle_id}"));
        Ok(Some(4242))
    }

    async fn terminate_app(&self, udid: &str, bundle_id: &str) -> FleetResult<()> {
        self.record(format!("terminate {udid} {bundle_id}"));
        Ok(())
    }

    async fn uninstall_app(&self, udid: &str, bundle_id: &str) -> FleetResult<()> {
        self.record(format!("uninstall {udid} {bundle_id}"));
        Ok(())
    }

    async fn list_apps(&self, udid: &str) -> FleetResult<Vec<AppInfo>> {
        self.record(format!("list_apps {udid}"));
        Ok(vec![AppInfo {
            bundle_id: "com.example.app".to_string(),
            display_name: Some("Example".to_string()),
            version: Some("1.0".to_string()),
            install_path: None,
        }])
    }

    async fn describe_ui_tree(&self, udid: &str, _depth: Option<u32>) -> FleetResult<Vec<Value>> {
        let mut state = self.lock();
        state.describe_calls += 1;
        let Some(queue) = state.ui_trees.get_mut(udid) else {
            return Ok(Vec::new());
        };
        let tree = if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().cloned().unwrap_or_default()
        };
        Ok(tree)
    }

    async fn probe_point(&self, _udid: &str, x: f64, y: f64) -> FleetResult<Option<Value>> {
        let mut state = self.lock();
        state.probe_calls += 1;
        Ok(state
            .probe_elements
            .iter()
            .find(|element| raw_frame(element).is_some_and(|frame| frame.contains(x, y)))
            .cloned())
    }

    async fn tap(&self, udid: &str, x: f64, y: f64) -> FleetResult<()> {
        self.lock().taps.push((udid.to_string(), x, y));
        Ok(())
    }

    async fn swipe(
        &self,
        udid: &str,
        from: (f64, f64),
        to: (f64, f64),
        _duration_secs: f64,
    ) -> FleetResult<()> {
        self.lock().swipes.push((udid.to_string(), from, to));
        Ok(())
    }

    async fn type_text(&self, udid: &str, text: &str) -> FleetResult<()> {
        self.record(format!("type {udid} {text}"));
        Ok(())
    }

    async fn press_button(&self, udid: &str, button: &str) -> FleetResult<()> {
        self.record(format!("button {udid} {button}"));
        Ok(())
    }

    async fn set_location(&self, udid: &str, latitude: f64, longitude: f64) -> FleetResult<()> {
        if self.kind != BackendKind::Simulator {
            return Err(self.unsupported("set_location"));
        }
        self.record(format!("location {udid} {latitude},{longitude}"));
        Ok(())
    }
}
