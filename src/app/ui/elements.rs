use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::app::models::{Element, ElementFilters, Frame};

/// Switches are toggled by their knob, which sits at the trailing edge.
const SWITCH_KNOB_INSET: f64 = 30.0;

fn ax_frame_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*(-?[\d.]+)\s*,\s*(-?[\d.]+)\s*\}\s*,\s*\{\s*([\d.]+)\s*,\s*([\d.]+)\s*\}\}").ok()
    })
    .as_ref()
}

fn text(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| raw.get(*key))
        .find_map(|value| match value {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        })
        .filter(|text| !text.is_empty())
}

fn parse_frame(raw: &Value) -> Option<Frame> {
    if let Some(frame) = raw.get("frame") {
        if let Ok(frame) = serde_json::from_value::<Frame>(frame.clone()) {
            return Some(frame);
        }
    }
    let ax = raw.get("AXFrame").and_then(Value::as_str)?;
    let caps = ax_frame_regex()?.captures(ax)?;
    let number = |index: usize| caps.get(index)?.as_str().parse::<f64>().ok();
    Some(Frame {
        x: number(1)?,
        y: number(2)?,
        w: number(3)?,
        h: number(4)?,
    })
}

/// Backend-native accessibility node to [`Element`]. Missing fields take
/// neutral defaults, so parsing never drops a node.
pub fn parse_element(raw: &Value) -> Element {
    Element {
        element_type: text(raw, &["type", "elementType"]).unwrap_or_default(),
        label: text(raw, &["AXLabel", "label", "title"]).unwrap_or_default(),
        identifier: text(raw, &["AXUniqueId", "identifier", "AXIdentifier"]),
        value: text(raw, &["AXValue", "value"]),
        frame: parse_frame(raw),
        enabled: raw.get("enabled").and_then(Value::as_bool).unwrap_or(true),
        role: text(raw, &["role", "AXRole"]).unwrap_or_default(),
        role_description: text(raw, &["role_description", "AXRoleDescription"]).unwrap_or_default(),
        child_count: raw
            .get("child_count")
            .and_then(Value::as_u64)
            .and_then(|count| usize::try_from(count).ok()),
    }
}

pub fn parse_elements(raw: &[Value]) -> Vec<Element> {
    raw.iter().map(parse_element).collect()
}

/// Parses only the nodes that satisfy `filters`.
pub fn parse_filtered(raw: &[Value], filters: &ElementFilters) -> Vec<Element> {
    raw.iter()
        .map(parse_element)
        .filter(|element| matches_filters(element, filters))
        .collect()
}

fn normalize_type(value: &str) -> String {
    let trimmed = value.trim();
    trimmed
        .strip_prefix("XCUIElementType")
        .unwrap_or(trimmed)
        .to_lowercase()
}

/// Label: case-insensitive substring. Identifier: exact. Type:
/// case-insensitive, with or without the `XCUIElementType` prefix.
pub fn matches_filters(element: &Element, filters: &ElementFilters) -> bool {
    if let Some(label) = filters.label.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        if !element.label.to_lowercase().contains(&label.to_lowercase()) {
            return false;
        }
    }
    if let Some(identifier) = filters
        .identifier
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        if element.identifier.as_deref() != Some(identifier) {
            return false;
        }
    }
    if let Some(element_type) = filters
        .element_type
        .as_deref()
        .filter(|v| !v.trim().is_empty())
    {
        if normalize_type(&element.element_type) != normalize_type(element_type) {
            return false;
        }
    }
    true
}

pub fn filter_elements(elements: &[Element], filters: &ElementFilters) -> Vec<Element> {
    elements
        .iter()
        .filter(|element| matches_filters(element, filters))
        .cloned()
        .collect()
}

pub fn is_type(element: &Element, element_type: &str) -> bool {
    normalize_type(&element.element_type) == normalize_type(element_type)
}

/// Where a tap on this element should land.
pub fn tap_point(element: &Element) -> Option<(f64, f64)> {
    let frame = element.frame?;
    if is_type(element, "Switch") || is_type(element, "Toggle") {
        let inset = SWITCH_KNOB_INSET.min(frame.w / 2.0);
        return Some((frame.x + frame.w - inset, frame.y + frame.h / 2.0));
    }
    Some(frame.center())
}

/// The element in `candidates` most likely to be `previous` after a re-fetch.
pub fn pick_same(previous: &Element, candidates: &[Element]) -> Option<Element> {
    if candidates.len() == 1 {
        return candidates.first().cloned();
    }
    if let Some(identifier) = previous.identifier.as_deref() {
        if let Some(found) = candidates
            .iter()
            .find(|candidate| candidate.identifier.as_deref() == Some(identifier))
        {
            return Some(found.clone());
        }
    }
    let (px, py) = previous.center()?;
    candidates
        .iter()
        .filter(|candidate| {
            candidate.label == previous.label && candidate.element_type == previous.element_type
        })
        .filter_map(|candidate| {
            let (cx, cy) = candidate.center()?;
            Some((((cx - px).powi(2) + (cy - py).powi(2)), candidate))
        })
        .min_by(|left, right| left.0.total_cmp(&right.0))
        .map(|(_, candidate)| candidate.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn element(element_type: &str, label: &str, identifier: Option<&str>, frame: Frame) -> Element {
        Element {
            element_type: element_type.to_string(),
            label: label.to_string(),
            identifier: identifier.map(str::to_string),
            value: None,
            frame: Some(frame),
            enabled: true,
            role: String::new(),
            role_description: String::new(),
            child_count: None,
        }
    }

    #[test]
    fn parses_idb_node_shapes() {
        let parsed = parse_element(&json!({
            "type": "Button",
            "AXLabel": "Continue",
            "AXUniqueId": "continue-button",
            "AXValue": null,
            "frame": {"x": 20, "y": 700, "width": 353, "height": 50},
            "enabled": false,
            "role": "AXButton",
            "role_description": "button"
        }));
        assert_eq!(parsed.element_type, "Button");
        assert_eq!(parsed.identifier.as_deref(), Some("continue-button"));
        assert_eq!(parsed.value, None);
        assert!(!parsed.enabled);
        assert_eq!(parsed.center(), Some((196.5, 725.0)));

        let from_ax = parse_element(&json!({
            "type": "StaticText",
            "AXLabel": "Hello",
            "AXFrame": "{{16, 120.5}, {200, 21}}"
        }));
        assert_eq!(
            from_ax.frame,
            Some(Frame { x: 16.0, y: 120.5, w: 200.0, h: 21.0 })
        );
        assert!(from_ax.enabled);
    }

    #[test]
    fn filter_rules() {
        let button = element(
            "Button",
            "Open Calendar",
            Some("calendar.open"),
            Frame { x: 0.0, y: 0.0, w: 10.0, h: 10.0 },
        );
        assert!(matches_filters(&button, &ElementFilters::by_label("calendar")));
        assert!(!matches_filters(&button, &ElementFilters::by_identifier("calendar")));
        assert!(matches_filters(&button, &ElementFilters::by_identifier("calendar.open")));
        let typed = ElementFilters {
            element_type: Some("XCUIElementTypeButton".to_string()),
            ..ElementFilters::default()
        };
        assert!(matches_filters(&button, &typed));
        let wrong_type = ElementFilters {
            element_type: Some("cell".to_string()),
            ..ElementFilters::default()
        };
        assert!(!matches_filters(&button, &wrong_type));
    }

    #[test]
    fn switches_tap_near_trailing_edge() {
        let toggle = element(
            "Switch",
            "Wi-Fi",
            None,
            Frame { x: 0.0, y: 100.0, w: 390.0, h: 44.0 },
        );
        assert_eq!(tap_point(&toggle), Some((360.0, 122.0)));
        let button = element("Button", "OK", None, Frame { x: 0.0, y: 0.0, w: 100.0, h: 40.0 });
        assert_eq!(tap_point(&button), Some((50.0, 20.0)));
    }

    #[test]
    fn pick_same_prefers_identifier_then_proximity() {
        let previous = element("Cell", "Row", None, Frame { x: 0.0, y: 100.0, w: 100.0, h: 40.0 });
        let near = element("Cell", "Row", None, Frame { x: 0.0, y: 90.0, w: 100.0, h: 40.0 });
        let far = element("Cell", "Row", None, Frame { x: 0.0, y: 500.0, w: 100.0, h: 40.0 });
        let picked = pick_same(&previous, &[far.clone(), near.clone()]).expect("picked");
        assert_eq!(picked, near);
        assert_eq!(pick_same(&previous, &[far.clone()]), Some(far));
        assert_eq!(pick_same(&previous, &[]), None);
    }
}
