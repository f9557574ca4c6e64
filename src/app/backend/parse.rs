use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

use crate::app::models::{AppInfo, DeviceDescriptor, DeviceKind, PowerState};

/// Device family implied by a device name ("iPad Air" -> "iPad").
pub fn infer_family(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    if lower.contains("ipad") {
        Some("iPad")
    } else if lower.contains("iphone") {
        Some("iPhone")
    } else if lower.contains("watch") {
        Some("Apple Watch")
    } else if lower.contains("apple tv") || lower.contains("appletv") {
        Some("Apple TV")
    } else if lower.contains("vision") {
        Some("Apple Vision")
    } else {
        None
    }
}

/// "com.apple.CoreSimulator.SimRuntime.iOS-18-2" -> "iOS 18.2".
pub fn runtime_os_version(runtime_id: &str) -> String {
    let tail = runtime_id.rsplit('.').next().unwrap_or(runtime_id);
    let mut parts = tail.split('-');
    let platform = parts.next().unwrap_or_default();
    let version = parts.collect::<Vec<_>>().join(".");
    if version.is_empty() {
        platform.to_string()
    } else {
        format!("{platform} {version}")
    }
}

/// "com.apple.CoreSimulator.SimDeviceType.iPad-Air-11-inch-M2" -> "iPad".
pub fn family_from_device_type(device_type: &str, name: &str) -> String {
    let tail = device_type.rsplit('.').next().unwrap_or(device_type);
    let family = if tail.starts_with("iPhone") {
        Some("iPhone")
    } else if tail.starts_with("iPad") {
        Some("iPad")
    } else if tail.starts_with("Apple-Watch") {
        Some("Apple Watch")
    } else if tail.starts_with("Apple-TV") {
        Some("Apple TV")
    } else if tail.starts_with("Apple-Vision") {
        Some("Apple Vision")
    } else {
        None
    };
    family
        .or_else(|| infer_family(name))
        .unwrap_or_default()
        .to_string()
}

pub fn parse_simctl_devices(output: &str) -> Vec<DeviceDescriptor> {
    let Ok(root) = serde_json::from_str::<Value>(output) else {
        return Vec::new();
    };
    let Some(runtimes) = root.get("devices").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut devices = Vec::new();
    for (runtime_id, entries) in runtimes {
        let Some(entries) = entries.as_array() else {
            continue;
        };
        for entry in entries {
            let Some(udid) = entry.get("udid").and_then(Value::as_str) else {
                continue;
            };
            let name = str_field(entry, "name");
            let device_type = str_field(entry, "deviceTypeIdentifier");
            devices.push(DeviceDescriptor {
                id: udid.to_string(),
                kind: DeviceKind::Simulated,
                power_state: PowerState::from_label(&str_field(entry, "state")),
                os_version: runtime_os_version(runtime_id),
                family: family_from_device_type(&device_type, &name),
                runtime_id: runtime_id.clone(),
                model: device_type,
                reachable: true,
                is_available: entry
                    .get("isAvailable")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
                name,
            });
        }
    }
    devices
}

/// `simctl launch` prints "com.example.App: 4242".
pub fn parse_simctl_launch_pid(output: &str) -> Option<u32> {
    output
        .lines()
        .filter_map(|line| line.rsplit_once(':'))
        .find_map(|(_, pid)| pid.trim().parse::<u32>().ok())
}

/// Parses the old-style plist printed by `simctl listapps`.
pub fn parse_simctl_listapps(output: &str) -> Vec<AppInfo> {
    let Ok(entry_re) = Regex::new(r#"^\s*"?([^"=\s]+)"?\s*=\s*(.*?);?\s*$"#) else {
        return Vec::new();
    };
    let mut apps = Vec::new();
    let mut depth = 0usize;
    let mut current: Option<AppInfo> = None;

    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let opens = trimmed.matches('{').count() + trimmed.matches('(').count();
        let closes = trimmed.matches('}').count() + trimmed.matches(')').count();

        if depth == 1 && opens > 0 {
            if let Some(caps) = entry_re.captures(trimmed) {
                current = Some(AppInfo {
                    bundle_id: caps[1].to_string(),
                    display_name: None,
                    version: None,
                    install_path: None,
                });
            }
        } else if depth == 2 && opens == 0 {
            if let (Some(app), Some(caps)) = (current.as_mut(), entry_re.captures(trimmed)) {
                let value = unquote(&caps[2]);
                match &caps[1] {
                    "CFBundleIdentifier" => app.bundle_id = value,
                    "CFBundleDisplayName" => app.display_name = Some(value),
                    "CFBundleName" if app.display_name.is_none() => {
                        app.display_name = Some(value)
                    }
                    "CFBundleShortVersionString" => app.version = Some(value),
                    "Path" => app.install_path = Some(value),
                    _ => {}
                }
            }
        }

        depth = (depth + opens).saturating_sub(closes);
        if depth <= 1 {
            if let Some(app) = current.take() {
                apps.push(app);
            }
        }
    }
    apps
}

pub fn parse_devicectl_devices(output: &str) -> Vec<DeviceDescriptor> {
    let Ok(root) = serde_json::from_str::<Value>(output) else {
        return Vec::new();
    };
    let Some(entries) = root
        .pointer("/result/devices")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let hardware = entry.get("hardwareProperties").unwrap_or(&Value::Null);
            let properties = entry.get("deviceProperties").unwrap_or(&Value::Null);
            let connection = entry.get("connectionProperties").unwrap_or(&Value::Null);

            let id = hardware
                .get("udid")
                .and_then(Value::as_str)
                .or_else(|| entry.get("identifier").and_then(Value::as_str))?
                .to_string();
            let name = str_field(properties, "name");
            let platform = hardware
                .get("platform")
                .and_then(Value::as_str)
                .unwrap_or("iOS");
            let os_number = str_field(properties, "osVersionNumber");
            let tunnel = str_field(connection, "tunnelState");
            let reachable = !tunnel.eq_ignore_ascii_case("unavailable");
            let paired = connection
                .get("pairingState")
                .and_then(Value::as_str)
                .map_or(true, |state| state == "paired");
            let device_type = str_field(hardware, "deviceType");
            let family = if device_type.is_empty() {
                infer_family(&name).unwrap_or_default().to_string()
            } else {
                device_type
            };

            Some(DeviceDescriptor {
                id,
                kind: DeviceKind::Physical,
                power_state: if reachable {
                    PowerState::Booted
                } else {
                    PowerState::Shutdown
                },
                os_version: if os_number.is_empty() {
                    String::new()
                } else {
                    format!("{platform} {os_number}")
                },
                family,
                runtime_id: str_field(properties, "osBuildUpdate"),
                model: str_field(hardware, "productType"),
                reachable,
                is_available: paired,
                name,
            })
        })
        .collect()
}

pub fn parse_devicectl_launch_pid(output: &str) -> Option<u32> {
    let root = serde_json::from_str::<Value>(output).ok()?;
    root.pointer("/result/process/processIdentifier")
        .and_then(Value::as_u64)
        .map(|pid| pid as u32)
}

pub fn parse_devicectl_apps(output: &str) -> Vec<AppInfo> {
    let Ok(root) = serde_json::from_str::<Value>(output) else {
        return Vec::new();
    };
    let Some(entries) = root.pointer("/result/apps").and_then(Value::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let bundle_id = entry.get("bundleIdentifier").and_then(Value::as_str)?;
            Some(AppInfo {
                bundle_id: bundle_id.to_string(),
                display_name: optional_str(entry, "name"),
                version: optional_str(entry, "version"),
                install_path: optional_str(entry, "url"),
            })
        })
        .collect()
}

/// `(pid, executable url)` pairs from `devicectl device info processes`.
pub fn parse_devicectl_processes(output: &str) -> Vec<(u32, String)> {
    let Ok(root) = serde_json::from_str::<Value>(output) else {
        return Vec::new();
    };
    let Some(entries) = root
        .pointer("/result/runningProcesses")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let pid = entry.get("processIdentifier").and_then(Value::as_u64)?;
            let executable = entry.get("executable").and_then(Value::as_str)?;
            Some((pid as u32, executable.to_string()))
        })
        .collect()
}

pub fn parse_idevice_ids(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.split_whitespace().next().unwrap_or(line).to_string())
        .collect()
}

pub fn parse_ideviceinfo_map(output: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if !key.is_empty() && !key.contains(' ') {
            map.insert(key.to_string(), value.trim().to_string());
        }
    }
    map
}

pub fn build_usb_descriptor(udid: &str, info: &HashMap<String, String>) -> DeviceDescriptor {
    let name = info
        .get("DeviceName")
        .cloned()
        .unwrap_or_else(|| udid.to_string());
    let model = info.get("ProductType").cloned().unwrap_or_default();
    let family = info
        .get("DeviceClass")
        .cloned()
        .or_else(|| infer_family(&model).map(str::to_string))
        .or_else(|| infer_family(&name).map(str::to_string))
        .unwrap_or_default();
    DeviceDescriptor {
        id: udid.to_string(),
        kind: DeviceKind::Physical,
        power_state: PowerState::Booted,
        os_version: info
            .get("ProductVersion")
            .map(|version| format!("iOS {version}"))
            .unwrap_or_default(),
        family,
        runtime_id: info.get("BuildVersion").cloned().unwrap_or_default(),
        model,
        reachable: true,
        is_available: true,
        name,
    }
}

/// Handles both the CSV listing of newer `ideviceinstaller` releases and the
/// older "bundle - Name version" lines.
pub fn parse_ideviceinstaller_list(output: &str) -> Vec<AppInfo> {
    let mut apps = Vec::new();
    for raw in output.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("CFBundleIdentifier") || line.starts_with("Total:") {
            continue;
        }
        if let Some((bundle_id, rest)) = line.split_once(',') {
            let mut fields = rest.splitn(2, ',').map(|field| unquote(field.trim()));
            let version = fields.next().filter(|value| !value.is_empty());
            let display_name = fields.next().filter(|value| !value.is_empty());
            apps.push(AppInfo {
                bundle_id: bundle_id.trim().to_string(),
                display_name,
                version,
                install_path: None,
            });
        } else if let Some((bundle_id, rest)) = line.split_once(" - ") {
            let (display_name, version) = match rest.rsplit_once(' ') {
                Some((name, version)) => (Some(name.to_string()), Some(version.to_string())),
                None => (Some(rest.to_string()), None),
            };
            apps.push(AppInfo {
                bundle_id: bundle_id.trim().to_string(),
                display_name,
                version,
                install_path: None,
            });
        }
    }
    apps
}

/// idb prints either one JSON array or one JSON object per line.
pub fn parse_idb_elements(output: &str) -> Vec<Value> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => items,
        Ok(value @ Value::Object(_)) => vec![value],
        _ => trimmed
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
            .flat_map(|value| match value {
                Value::Array(items) => items,
                other => vec![other],
            })
            .collect(),
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn optional_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn unquote(value: &str) -> String {
    value.trim().trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMCTL_JSON: &str = r#"{
      "devices": {
        "com.apple.CoreSimulator.SimRuntime.iOS-18-2": [
          {"udid": "A1", "name": "iPhone 16", "state": "Booted", "isAvailable": true,
           "deviceTypeIdentifier": "com.apple.CoreSimulator.SimDeviceType.iPhone-16"},
          {"udid": "A2", "name": "iPad Air (M2)", "state": "Shutdown", "isAvailable": false,
           "deviceTypeIdentifier": "com.apple.CoreSimulator.SimDeviceType.iPad-Air-11-inch-M2"}
        ],
        "com.apple.CoreSimulator.SimRuntime.watchOS-11-0": [
          {"udid": "W1", "name": "Apple Watch Series 10", "state": "Shutdown",
           "deviceTypeIdentifier": "com.apple.CoreSimulator.SimDeviceType.Apple-Watch-Series-10-46mm"}
        ]
      }
    }"#;

    #[test]
    fn parses_simctl_device_listing() {
        let devices = parse_simctl_devices(SIMCTL_JSON);
        assert_eq!(devices.len(), 3);
        let phone = devices.iter().find(|d| d.id == "A1").expect("A1");
        assert_eq!(phone.os_version, "iOS 18.2");
        assert_eq!(phone.family, "iPhone");
        assert_eq!(phone.power_state, PowerState::Booted);
        let ipad = devices.iter().find(|d| d.id == "A2").expect("A2");
        assert_eq!(ipad.family, "iPad");
        assert!(!ipad.is_available);
        let watch = devices.iter().find(|d| d.id == "W1").expect("W1");
        assert_eq!(watch.os_version, "watchOS 11.0");
        assert_eq!(watch.family, "Apple Watch");
    }

    #[test]
    fn simctl_garbage_yields_no_devices() {
        assert!(parse_simctl_devices("xcrun: error: unable to find utility").is_empty());
    }

    #[test]
    fn parses_launch_pid() {
        assert_eq!(parse_simctl_launch_pid("com.example.App: 4242\n"), Some(4242));
        assert_eq!(parse_simctl_launch_pid("error"), None);
    }

    #[test]
    fn parses_listapps_plist() {
        let output = r#"{
    "com.apple.Maps" =     {
        ApplicationType = System;
        CFBundleDisplayName = Maps;
        CFBundleIdentifier = "com.apple.Maps";
        CFBundleShortVersionString = "1.0";
        GroupContainers =         {
            "group.com.apple.Maps" = "/tmp/group";
        };
        Path = "/Applications/Maps.app";
    };
    "com.example.App" =     {
        CFBundleIdentifier = "com.example.App";
        CFBundleName = Example;
        UIDeviceFamily =         (
            1
        );
    };
}"#;
        let apps = parse_simctl_listapps(output);
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].bundle_id, "com.apple.Maps");
        assert_eq!(apps[0].display_name.as_deref(), Some("Maps"));
        assert_eq!(apps[0].version.as_deref(), Some("1.0"));
        assert_eq!(apps[0].install_path.as_deref(), Some("/Applications/Maps.app"));
        assert_eq!(apps[1].display_name.as_deref(), Some("Example"));
    }

    #[test]
    fn parses_devicectl_listing() {
        let output = r#"{"result": {"devices": [
            {"identifier": "UUID-1",
             "deviceProperties": {"name": "QA iPhone", "osVersionNumber": "17.5"},
             "hardwareProperties": {"udid": "00008110-AAA", "deviceType": "iPhone",
                                    "productType": "iPhone15,2", "platform": "iOS"},
             "connectionProperties": {"tunnelState": "disconnected", "pairingState": "paired"}},
            {"identifier": "UUID-2",
             "deviceProperties": {"name": "Old iPad"},
             "hardwareProperties": {"productType": "iPad7,5"},
             "connectionProperties": {"tunnelState": "unavailable"}}
        ]}}"#;
        let devices = parse_devicectl_devices(output);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "00008110-AAA");
        assert_eq!(devices[0].os_version, "iOS 17.5");
        assert!(devices[0].reachable);
        assert_eq!(devices[0].power_state, PowerState::Booted);
        assert_eq!(devices[1].id, "UUID-2");
        assert_eq!(devices[1].family, "iPad");
        assert!(!devices[1].reachable);
        assert_eq!(devices[1].power_state, PowerState::Shutdown);
    }

    #[test]
    fn parses_devicectl_process_and_apps() {
        let launch = r#"{"result": {"process": {"processIdentifier": 812}}}"#;
        assert_eq!(parse_devicectl_launch_pid(launch), Some(812));
        let apps = r#"{"result": {"apps": [{"bundleIdentifier": "com.example.App", "name": "Example",
            "version": "2.1", "url": "file:///private/var/containers/Bundle/Application/X/Example.app/"}]}}"#;
        let parsed = parse_devicectl_apps(apps);
        assert_eq!(parsed[0].bundle_id, "com.example.App");
        let processes = r#"{"result": {"runningProcesses": [{"processIdentifier": 812,
            "executable": "file:///private/var/containers/Bundle/Application/X/Example.app/Example"}]}}"#;
        assert_eq!(parse_devicectl_processes(processes)[0].0, 812);
    }

    #[test]
    fn parses_usb_info_into_descriptor() {
        let ids = parse_idevice_ids("00008020-111 (USB)\n\n00008020-222\n");
        assert_eq!(ids, vec!["00008020-111", "00008020-222"]);
        let info = parse_ideviceinfo_map(
            "DeviceName: Bob's iPhone\nProductVersion: 16.7.2\nProductType: iPhone12,1\nDeviceClass: iPhone\n",
        );
        let device = build_usb_descriptor("00008020-111", &info);
        assert_eq!(device.name, "Bob's iPhone");
        assert_eq!(device.os_version, "iOS 16.7.2");
        assert_eq!(device.family, "iPhone");
        assert_eq!(device.kind, DeviceKind::Physical);
    }

    #[test]
    fn parses_both_installer_listing_styles() {
        let csv = "CFBundleIdentifier, CFBundleVersion, CFBundleDisplayName\ncom.example.App, \"12\", \"Example\"\n";
        let apps = parse_ideviceinstaller_list(csv);
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].version.as_deref(), Some("12"));
        assert_eq!(apps[0].display_name.as_deref(), Some("Example"));

        let legacy = "Total: 1 apps\ncom.example.Old - Old App 3.0\n";
        let apps = parse_ideviceinstaller_list(legacy);
        assert_eq!(apps[0].bundle_id, "com.example.Old");
        assert_eq!(apps[0].display_name.as_deref(), Some("Old App"));
        assert_eq!(apps[0].version.as_deref(), Some("3.0"));
    }

    #[test]
    fn parses_idb_array_and_line_output() {
        let array = r#"[{"type": "Button", "AXLabel": "OK"}, {"type": "Other"}]"#;
        assert_eq!(parse_idb_elements(array).len(), 2);
        let lines = "{\"type\": \"Button\"}\n{\"type\": \"Cell\"}\n";
        assert_eq!(parse_idb_elements(lines).len(), 2);
        assert!(parse_idb_elements("  ").is_empty());
    }

    #[test]
    fn infers_family_from_names() {
        assert_eq!(infer_family("iPad Pro 13-inch"), Some("iPad"));
        assert_eq!(infer_family("My IPHONE"), Some("iPhone"));
        assert_eq!(infer_family("Build box"), None);
    }
}
