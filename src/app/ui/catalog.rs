//! Known screen geometry and fixed-position elements.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::app::models::{DeviceDescriptor, Frame};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScreenSize {
    pub width: f64,
    pub height: f64,
    /// Height of the home-indicator zone at the bottom edge.
    #[serde(default)]
    pub bottom_inset: f64,
}

impl ScreenSize {
    pub const fn new(width: f64, height: f64, bottom_inset: f64) -> Self {
        Self {
            width,
            height,
            bottom_inset,
        }
    }

    /// Screen taken from a root Application/Window frame; devices taller than
    /// the classic 16:9 phones carry a home indicator.
    pub fn from_root_frame(frame: &Frame) -> Self {
        let tall = frame.h / frame.w.max(1.0) > 2.0 || frame.h >= 812.0;
        let inset = if tall && frame.w < 700.0 {
            34.0
        } else if frame.w >= 700.0 {
            20.0
        } else {
            0.0
        };
        Self::new(frame.w, frame.h, inset)
    }

    pub fn is_occluded(&self, y: f64) -> bool {
        self.bottom_inset > 0.0 && y >= self.height - self.bottom_inset
    }

    /// Positive-area frame that overlaps the screen.
    pub fn shows(&self, frame: &Frame) -> bool {
        frame.has_area()
            && frame.x < self.width
            && frame.y < self.height
            && frame.x + frame.w > 0.0
            && frame.y + frame.h > 0.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Offset {
    /// Points from the left/top edge.
    Start(f64),
    /// Points from the right/bottom edge.
    End(f64),
    /// Fraction of the screen extent.
    Fraction(f64),
}

impl Offset {
    pub fn resolve(self, extent: f64) -> f64 {
        match self {
            Offset::Start(points) => points,
            Offset::End(points) => extent - points,
            Offset::Fraction(fraction) => extent * fraction,
        }
    }
}

/// An element that always sits at the same place relative to the screen
/// edges, such as a tab bar button.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaticElement {
    pub identifier: String,
    pub x: Offset,
    pub y: Offset,
    /// Tap the computed point without confirming the element first.
    #[serde(default)]
    pub tap_direct: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScreenCatalog {
    screens: Vec<(String, ScreenSize)>,
    statics: HashMap<String, StaticElement>,
}

const BUILTIN_SCREENS: &[(&str, ScreenSize)] = &[
    ("iPhone SE", ScreenSize::new(375.0, 667.0, 0.0)),
    ("iPhone 8 Plus", ScreenSize::new(414.0, 736.0, 0.0)),
    ("iPhone 8", ScreenSize::new(375.0, 667.0, 0.0)),
    ("iPhone 13 mini", ScreenSize::new(375.0, 812.0, 34.0)),
    ("iPhone 13", ScreenSize::new(390.0, 844.0, 34.0)),
    ("iPhone 14", ScreenSize::new(390.0, 844.0, 34.0)),
    ("iPhone 14 Plus", ScreenSize::new(428.0, 926.0, 34.0)),
    ("iPhone 14 Pro", ScreenSize::new(393.0, 852.0, 34.0)),
    ("iPhone 14 Pro Max", ScreenSize::new(430.0, 932.0, 34.0)),
    ("iPhone 15", ScreenSize::new(393.0, 852.0, 34.0)),
    ("iPhone 15 Plus", ScreenSize::new(430.0, 932.0, 34.0)),
    ("iPhone 15 Pro", ScreenSize::new(393.0, 852.0, 34.0)),
    ("iPhone 15 Pro Max", ScreenSize::new(430.0, 932.0, 34.0)),
    ("iPhone 16", ScreenSize::new(393.0, 852.0, 34.0)),
    ("iPhone 16 Plus", ScreenSize::new(430.0, 932.0, 34.0)),
    ("iPhone 16 Pro", ScreenSize::new(402.0, 874.0, 34.0)),
    ("iPhone 16 Pro Max", ScreenSize::new(440.0, 956.0, 34.0)),
    ("iPad mini", ScreenSize::new(744.0, 1133.0, 20.0)),
    ("iPad Air", ScreenSize::new(820.0, 1180.0, 20.0)),
    ("iPad Pro 11", ScreenSize::new(834.0, 1194.0, 20.0)),
    ("iPad Pro 13", ScreenSize::new(1032.0, 1376.0, 20.0)),
    ("iPad", ScreenSize::new(820.0, 1180.0, 20.0)),
];

impl ScreenCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for (pattern, size) in BUILTIN_SCREENS {
            catalog = catalog.with_screen(*pattern, *size);
        }
        catalog
    }

    pub fn with_screen(mut self, pattern: impl Into<String>, size: ScreenSize) -> Self {
        self.screens.push((pattern.into(), size));
        self
    }

    pub fn with_static(mut self, element: StaticElement) -> Self {
        self.statics.insert(element.identifier.clone(), element);
        self
    }

    /// Longest pattern contained in the device model or name wins, so
    /// "iPhone 15 Pro Max" is not sized as an "iPhone 15".
    pub fn screen_for(&self, device: &DeviceDescriptor) -> Option<ScreenSize> {
        let haystacks = [device.model.to_lowercase(), device.name.to_lowercase()];
        haystacks.iter().find_map(|haystack| {
            self.screens
                .iter()
                .filter(|(pattern, _)| !pattern.is_empty() && haystack.contains(&pattern.to_lowercase()))
                .max_by_key(|(pattern, _)| pattern.len())
                .map(|(_, size)| *size)
        })
    }

    pub fn static_element(&self, identifier: &str) -> Option<&StaticElement> {
        self.statics.get(identifier)
    }

    pub fn is_static(&self, identifier: Option<&str>) -> bool {
        identifier.is_some_and(|identifier| self.statics.contains_key(identifier))
    }

    pub fn locate(&self, identifier: &str, screen: &ScreenSize) -> Option<(f64, f64)> {
        let element = self.static_element(identifier)?;
        Some((
            element.x.resolve(screen.width),
            element.y.resolve(screen.height),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::backend::fake::device;
    use crate::app::models::PowerState;

    #[test]
    fn longest_pattern_wins() {
        let catalog = ScreenCatalog::builtin();
        let max = device("A", "iPhone 15 Pro Max", "iOS 18.2", PowerState::Booted);
        assert_eq!(catalog.screen_for(&max).map(|s| s.width), Some(430.0));
        let base = device("B", "iPhone 15", "iOS 18.2", PowerState::Booted);
        assert_eq!(catalog.screen_for(&base).map(|s| s.width), Some(393.0));
        let se = device("C", "iPhone SE (3rd generation)", "iOS 18.2", PowerState::Booted);
        assert_eq!(catalog.screen_for(&se).map(|s| s.bottom_inset), Some(0.0));
        let unknown = device("D", "Lab Phone", "iOS 18.2", PowerState::Booted);
        assert_eq!(catalog.screen_for(&unknown), None);
    }

    #[test]
    fn static_elements_resolve_against_screen_edges() {
        let catalog = ScreenCatalog::empty().with_static(StaticElement {
            identifier: "tab.settings".to_string(),
            x: Offset::End(48.0),
            y: Offset::End(58.0),
            tap_direct: false,
        });
        let screen = ScreenSize::new(393.0, 852.0, 34.0);
        assert_eq!(catalog.locate("tab.settings", &screen), Some((345.0, 794.0)));
        assert!(catalog.is_static(Some("tab.settings")));
        assert!(!catalog.is_static(Some("tab.home")));
        assert!(!catalog.is_static(None));
    }

    #[test]
    fn home_indicator_zone_and_visibility() {
        let screen = ScreenSize::new(393.0, 852.0, 34.0);
        assert!(screen.is_occluded(830.0));
        assert!(!screen.is_occluded(700.0));
        assert!(!ScreenSize::new(375.0, 667.0, 0.0).is_occluded(660.0));

        let offscreen = Frame { x: 0.0, y: 900.0, w: 100.0, h: 40.0 };
        let onscreen = Frame { x: 10.0, y: 100.0, w: 100.0, h: 40.0 };
        assert!(!screen.shows(&offscreen));
        assert!(screen.shows(&onscreen));
        assert!(!screen.shows(&Frame { x: 10.0, y: 10.0, w: 0.0, h: 40.0 }));
    }

    #[test]
    fn root_frame_infers_inset() {
        let phone = ScreenSize::from_root_frame(&Frame { x: 0.0, y: 0.0, w: 393.0, h: 852.0 });
        assert_eq!(phone.bottom_inset, 34.0);
        let classic = ScreenSize::from_root_frame(&Frame { x: 0.0, y: 0.0, w: 375.0, h: 667.0 });
        assert_eq!(classic.bottom_inset, 0.0);
    }
}
