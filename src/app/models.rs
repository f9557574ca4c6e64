use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Simulated,
    Physical,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Simulated => write!(f, "simulated"),
            DeviceKind::Physical => write!(f, "physical"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Booted,
    Shutdown,
    Booting,
}

impl PowerState {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "booted" | "connected" | "available" => PowerState::Booted,
            "booting" | "creating" => PowerState::Booting,
            _ => PowerState::Shutdown,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::Booted => write!(f, "booted"),
            PowerState::Shutdown => write!(f, "shutdown"),
            PowerState::Booting => write!(f, "booting"),
        }
    }
}

/// Snapshot of one device as reported by a backend enumeration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
    pub power_state: PowerState,
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub runtime_id: String,
    /// Hardware model or simulator device type, used for screen lookups.
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_true")]
    pub reachable: bool,
    #[serde(default = "default_true")]
    pub is_available: bool,
}

fn default_true() -> bool {
    true
}

impl DeviceDescriptor {
    pub fn is_booted(&self) -> bool {
        self.power_state == PowerState::Booted
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppInfo {
    pub bundle_id: String,
    pub display_name: Option<String>,
    pub version: Option<String>,
    pub install_path: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub x: f64,
    pub y: f64,
    #[serde(alias = "width")]
    pub w: f64,
    #[serde(alias = "height")]
    pub h: f64,
}

impl Frame {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.x + self.w && y >= self.y && y <= self.y + self.h
    }

    pub fn has_area(&self) -> bool {
        self.w > 0.0 && self.h > 0.0
    }

    /// Frame rounded to whole points, used to compare and deduplicate.
    pub fn rounded(&self) -> (i64, i64, i64, i64) {
        (
            self.x.round() as i64,
            self.y.round() as i64,
            self.w.round() as i64,
            self.h.round() as i64,
        )
    }

    pub fn same_as(&self, other: &Frame) -> bool {
        self.rounded() == other.rounded()
    }
}

/// One node of a parsed accessibility tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Element {
    #[serde(rename = "type")]
    pub element_type: String,
    pub label: String,
    pub identifier: Option<String>,
    pub value: Option<String>,
    pub frame: Option<Frame>,
    pub enabled: bool,
    pub role: String,
    pub role_description: String,
    /// Direct children reported by a nested describe; `None` for flat output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_count: Option<usize>,
}

impl Element {
    pub fn center(&self) -> Option<(f64, f64)> {
        self.frame.map(|frame| frame.center())
    }
}

/// Label / identifier / type search filters for UI queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ElementFilters {
    pub label: Option<String>,
    pub identifier: Option<String>,
    pub element_type: Option<String>,
}

impl ElementFilters {
    pub fn by_label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn by_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.label.as_deref().map_or(true, |v| v.trim().is_empty())
            && self.identifier.as_deref().map_or(true, |v| v.trim().is_empty())
            && self
                .element_type
                .as_deref()
                .map_or(true, |v| v.trim().is_empty())
    }

    pub fn identifier_only(&self) -> Option<&str> {
        match (&self.label, &self.identifier, &self.element_type) {
            (None, Some(identifier), None) => Some(identifier.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for ElementFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(label) = &self.label {
            parts.push(format!("label={label:?}"));
        }
        if let Some(identifier) = &self.identifier {
            parts.push(format!("identifier={identifier:?}"));
        }
        if let Some(element_type) = &self.element_type {
            parts.push(format!("type={element_type:?}"));
        }
        write!(f, "{}", parts.join(", "))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedDevice {
    pub id: String,
    pub name: String,
    pub state: PowerState,
    pub waited_seconds: u64,
    /// Lease owner; pass it to `release_devices` to free the device early.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnsureResult {
    pub devices: Vec<ResolvedDevice>,
    pub active_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementMatch {
    pub element: Element,
    pub center: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TapOutcome {
    Tapped {
        x: f64,
        y: f64,
        element: Option<Element>,
        fast_path: bool,
        corrected: bool,
    },
    Ambiguous {
        matches: Vec<ElementMatch>,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WaitCondition {
    Exists,
    NotExists,
    Visible,
    Enabled,
    Disabled,
    ValueEquals,
    ValueContains,
}

impl WaitCondition {
    pub fn needs_value(&self) -> bool {
        matches!(self, WaitCondition::ValueEquals | WaitCondition::ValueContains)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitResult {
    pub matched: bool,
    pub condition: WaitCondition,
    pub elapsed_ms: u64,
    pub polls: u32,
    pub element: Option<Element>,
    /// Elements matching the filters on the last poll when the wait gave up.
    pub last_observed: Vec<Element>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub device_age_ms: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResponse<T> {
    pub trace_id: String,
    pub data: T,
}
