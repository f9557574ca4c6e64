use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::backend::parse::infer_family;
use crate::app::error::FleetError;
use crate::app::models::{DeviceKind, PowerState};
use crate::app::pool::store::PoolEntry;

fn default_auto_boot() -> bool {
    true
}

/// Loose description of the device a caller wants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolveCriteria {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default)]
    pub kind: Option<DeviceKind>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default = "default_auto_boot")]
    pub auto_boot: bool,
    /// Claim owner; when set, chosen devices are leased to this session.
    #[serde(default)]
    pub session: Option<String>,
}

impl Default for ResolveCriteria {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            os_version: None,
            kind: None,
            family: None,
            auto_boot: true,
            session: None,
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

impl ResolveCriteria {
    pub fn has_selectors(&self) -> bool {
        present(&self.id).is_some()
            || present(&self.name).is_some()
            || present(&self.os_version).is_some()
            || present(&self.family).is_some()
            || self.kind.is_some()
    }

    pub fn id(&self) -> Option<&str> {
        present(&self.id)
    }

    pub fn name(&self) -> Option<&str> {
        present(&self.name)
    }

    pub fn os_version(&self) -> Option<&str> {
        present(&self.os_version)
    }

    pub fn session(&self) -> Option<&str> {
        present(&self.session)
    }

    /// Explicit family, else one implied by the name, else the default.
    pub fn effective_family(&self, default_family: &str) -> FamilyFilter {
        if let Some(family) = present(&self.family) {
            return FamilyFilter {
                family: family.to_string(),
                explicit: true,
            };
        }
        if let Some(family) = self.name().and_then(infer_family) {
            return FamilyFilter {
                family: family.to_string(),
                explicit: true,
            };
        }
        FamilyFilter {
            family: default_family.trim().to_string(),
            explicit: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyFilter {
    pub family: String,
    /// Requested or implied by name, as opposed to the configured default.
    pub explicit: bool,
}

impl FamilyFilter {
    pub fn matches(&self, entry: &PoolEntry) -> bool {
        if self.family.is_empty() {
            return true;
        }
        let device_family = if entry.device.family.trim().is_empty() {
            infer_family(&entry.device.name).unwrap_or_default()
        } else {
            entry.device.family.trim()
        };
        if device_family.is_empty() {
            // Unknown hardware only slips past the configured default.
            return !self.explicit;
        }
        device_family.eq_ignore_ascii_case(&self.family)
    }
}

/// Leading dotted number of a version string ("iOS 18.2 (22C150)" -> "18.2").
fn numeric_version(value: &str) -> &str {
    let Some(start) = value.find(|ch: char| ch.is_ascii_digit()) else {
        return "";
    };
    let tail = &value[start..];
    let end = tail
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
        .unwrap_or(tail.len());
    tail[..end].trim_end_matches('.')
}

/// Component-wise prefix match: "18" matches "18.2", "1" does not.
pub fn os_version_matches(device_version: &str, requested: &str) -> bool {
    let wanted = numeric_version(requested);
    if wanted.is_empty() {
        return device_version
            .to_lowercase()
            .contains(requested.trim().to_lowercase().as_str());
    }
    let actual = numeric_version(device_version);
    actual == wanted || actual.starts_with(&format!("{wanted}."))
}

/// Everything but the name filter.
pub fn passes_filters(
    entry: &PoolEntry,
    criteria: &ResolveCriteria,
    family: &FamilyFilter,
) -> bool {
    entry.device.is_available
        && entry.device.reachable
        && criteria
            .os_version()
            .map_or(true, |requested| os_version_matches(&entry.device.os_version, requested))
        && criteria.kind.map_or(true, |kind| entry.device.kind == kind)
        && family.matches(entry)
}

/// Exact (case-insensitive) name matches win; substring matches are used only
/// when nothing matches exactly.
pub fn filter_by_name<'a>(candidates: Vec<&'a PoolEntry>, name: Option<&str>) -> Vec<&'a PoolEntry> {
    let Some(name) = name else {
        return candidates;
    };
    let wanted = name.to_lowercase();
    let exact = candidates
        .iter()
        .copied()
        .filter(|entry| entry.device.name.to_lowercase() == wanted)
        .collect::<Vec<_>>();
    if !exact.is_empty() {
        return exact;
    }
    candidates
        .into_iter()
        .filter(|entry| entry.device.name.to_lowercase().contains(&wanted))
        .collect()
}

fn power_rank(state: PowerState) -> u8 {
    match state {
        PowerState::Booted => 0,
        PowerState::Booting => 1,
        PowerState::Shutdown => 2,
    }
}

/// Booted first, then most recently used, then by name.
pub fn rank(candidates: &mut [&PoolEntry]) {
    candidates.sort_by(|left, right| {
        power_rank(left.device.power_state)
            .cmp(&power_rank(right.device.power_state))
            .then_with(|| right.last_used_at.cmp(&left.last_used_at))
            .then_with(|| left.device.name.cmp(&right.device.name))
            .then_with(|| left.device.id.cmp(&right.device.id))
    });
}

/// Ranked candidates for `criteria`, skipping devices leased to other sessions.
pub fn select<'a>(
    entries: impl Iterator<Item = &'a PoolEntry>,
    criteria: &ResolveCriteria,
    default_family: &str,
    now: DateTime<Utc>,
) -> Selection<'a> {
    let family = criteria.effective_family(default_family);
    let mut claimed = 0;
    let filtered = entries
        .filter(|entry| passes_filters(entry, criteria, &family))
        .filter(|entry| {
            let taken = entry.claimed_by_other(criteria.session(), now);
            if taken {
                claimed += 1;
            }
            !taken
        })
        .collect::<Vec<_>>();
    let mut candidates = filter_by_name(filtered, criteria.name());
    rank(&mut candidates);
    Selection {
        candidates,
        claimed_elsewhere: claimed,
    }
}

pub struct Selection<'a> {
    pub candidates: Vec<&'a PoolEntry>,
    /// Devices that passed every filter but are leased to another session.
    pub claimed_elsewhere: usize,
}

impl<'a> Selection<'a> {
    pub fn booted(&self) -> impl Iterator<Item = &'a PoolEntry> + '_ {
        self.candidates
            .iter()
            .copied()
            .filter(|entry| entry.device.is_booted())
    }

    pub fn bootable(&self) -> impl Iterator<Item = &'a PoolEntry> + '_ {
        self.candidates
            .iter()
            .copied()
            .filter(|entry| !entry.device.is_booted())
    }
}

fn describe_criteria(criteria: &ResolveCriteria, family: &FamilyFilter) -> String {
    let mut parts = Vec::new();
    if let Some(name) = criteria.name() {
        parts.push(format!("name={name:?}"));
    }
    if let Some(os) = criteria.os_version() {
        parts.push(format!("os={os:?}"));
    }
    if let Some(kind) = criteria.kind {
        parts.push(format!("kind={kind}"));
    }
    if !family.family.is_empty() {
        parts.push(format!("family={:?}", family.family));
    }
    if parts.is_empty() {
        "any device".to_string()
    } else {
        parts.join(", ")
    }
}

fn joined(values: BTreeSet<String>) -> String {
    if values.is_empty() {
        "none".to_string()
    } else {
        values.into_iter().collect::<Vec<_>>().join(", ")
    }
}

/// Explains why nothing matched, naming which criterion excluded everything
/// and what is available instead.
pub fn explain_no_match<'a>(
    entries: impl Iterator<Item = &'a PoolEntry> + Clone,
    criteria: &ResolveCriteria,
    default_family: &str,
    claimed_elsewhere: usize,
) -> FleetError {
    let family = criteria.effective_family(default_family);
    let usable = entries
        .clone()
        .filter(|entry| entry.device.is_available && entry.device.reachable);
    let names = usable
        .clone()
        .map(|entry| entry.device.name.clone())
        .collect::<BTreeSet<_>>();
    let versions = usable
        .clone()
        .map(|entry| entry.device.os_version.clone())
        .filter(|version| !version.is_empty())
        .collect::<BTreeSet<_>>();
    let wanted = describe_criteria(criteria, &family);

    if claimed_elsewhere > 0 {
        return FleetError::unavailable(format!(
            "{claimed_elsewhere} device(s) matching {wanted} are claimed by other sessions"
        ));
    }
    if names.is_empty() {
        return FleetError::not_found(format!(
            "no usable devices are known (wanted {wanted})"
        ));
    }

    let name_hits = usable
        .clone()
        .filter(|entry| {
            criteria.name().map_or(true, |name| {
                entry.device.name.to_lowercase().contains(&name.to_lowercase())
            })
        })
        .count();
    let os_hits = usable
        .clone()
        .filter(|entry| {
            criteria
                .os_version()
                .map_or(true, |os| os_version_matches(&entry.device.os_version, os))
        })
        .count();

    let explanation = if let (Some(name), 0) = (criteria.name(), name_hits) {
        format!(
            "no device is named like {name:?}; available names: {}",
            joined(names)
        )
    } else if let (Some(os), 0) = (criteria.os_version(), os_hits) {
        format!(
            "no device runs OS {os:?}; available versions: {}",
            joined(versions)
        )
    } else {
        let partial = usable
            .filter(|entry| {
                criteria.name().map_or(true, |name| {
                    entry.device.name.to_lowercase().contains(&name.to_lowercase())
                })
            })
            .map(|entry| {
                let family_label = if entry.device.family.is_empty() {
                    "unknown family"
                } else {
                    entry.device.family.as_str()
                };
                format!(
                    "{} ({}, {}, {})",
                    entry.device.name, entry.device.os_version, entry.device.kind, family_label
                )
            })
            .collect::<BTreeSet<_>>();
        format!(
            "nothing satisfies {wanted} together; partial matches: {}; available versions: {}",
            joined(partial),
            joined(versions)
        )
    };
    FleetError::not_found(explanation)
}

pub fn explain_all_shutdown(selection: &Selection<'_>) -> FleetError {
    let names = selection
        .candidates
        .iter()
        .map(|entry| entry.device.name.clone())
        .collect::<BTreeSet<_>>();
    FleetError::unavailable(format!(
        "{} matching device(s) are shut down ({}); enable auto_boot to boot one",
        selection.candidates.len(),
        joined(names)
    ))
}

pub fn explain_shortfall(requested: usize, selection: &Selection<'_>, auto_boot: bool) -> FleetError {
    let booted = selection.booted().count();
    let bootable = selection.bootable().count();
    if !auto_boot && booted + bootable >= requested {
        return FleetError::unavailable(format!(
            "requested {requested} device(s) but only {booted} are booted and {bootable} more are shut down; enable auto_boot to use them"
        ));
    }
    let available = if auto_boot { booted + bootable } else { booted };
    let mut explanation = format!(
        "requested {requested} device(s) but only {available} match ({booted} booted, {bootable} shut down)"
    );
    if selection.claimed_elsewhere > 0 {
        explanation.push_str(&format!(
            "; {} more are claimed by other sessions",
            selection.claimed_elsewhere
        ));
    }
    FleetError::not_found(explanation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::backend::fake::device;
    use crate::app::backend::BackendKind;

    fn entry(id: &str, name: &str, os: &str, power: PowerState, minutes_ago: i64) -> PoolEntry {
        PoolEntry {
            device: device(id, name, os, power),
            backend: BackendKind::Simulator,
            last_used_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
            claim: None,
        }
    }

    #[test]
    fn os_version_matching_is_component_wise() {
        assert!(os_version_matches("iOS 18.2", "18"));
        assert!(!os_version_matches("iOS 18.2", "1"));
        assert!(!os_version_matches("iOS 18.2", "18.6"));
        assert!(os_version_matches("iOS 18.2", "iOS 18"));
        assert!(os_version_matches("iOS 18.2", "18.2"));
        assert!(os_version_matches("iOS 18.2.1", "18.2"));
        assert!(!os_version_matches("iOS 8.4", "18"));
    }

    #[test]
    fn exact_name_beats_substring() {
        let entries = [
            entry("A", "iPhone 15", "iOS 18.2", PowerState::Shutdown, 60),
            entry("B", "iPhone 15 Pro Max", "iOS 18.2", PowerState::Booted, 0),
        ];
        let criteria = ResolveCriteria {
            name: Some("iphone 15".to_string()),
            ..ResolveCriteria::default()
        };
        let selection = select(entries.iter(), &criteria, "iPhone", Utc::now());
        let ids = selection
            .candidates
            .iter()
            .map(|entry| entry.device.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["A"]);
    }

    #[test]
    fn substring_used_when_no_exact_match() {
        let entries = [
            entry("A", "iPhone 15", "iOS 18.2", PowerState::Booted, 0),
            entry("B", "iPhone 15 Pro Max", "iOS 18.2", PowerState::Booted, 0),
        ];
        let criteria = ResolveCriteria {
            name: Some("Pro".to_string()),
            ..ResolveCriteria::default()
        };
        let selection = select(entries.iter(), &criteria, "iPhone", Utc::now());
        assert_eq!(selection.candidates.len(), 1);
        assert_eq!(selection.candidates[0].device.id, "B");
    }

    #[test]
    fn booted_ranks_before_recently_used_shutdown() {
        let fresh = entry("NEW", "iPhone 16", "iOS 18.2", PowerState::Shutdown, 0);
        let booted = entry("OLD", "iPhone 15", "iOS 18.2", PowerState::Booted, 600);
        let recent = entry("MID", "iPhone 14", "iOS 18.2", PowerState::Booted, 1);
        let mut ranked = vec![&fresh, &booted, &recent];
        rank(&mut ranked);
        let ids = ranked.iter().map(|entry| entry.device.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["MID", "OLD", "NEW"]);

        let a = entry("A", "Alpha", "iOS 18.2", PowerState::Booted, 5);
        let mut b = entry("B", "Beta", "iOS 18.2", PowerState::Booted, 5);
        b.last_used_at = a.last_used_at;
        let mut tied = vec![&b, &a];
        rank(&mut tied);
        assert_eq!(tied[0].device.id, "A");
    }

    #[test]
    fn family_is_inferred_from_name_or_defaulted() {
        let entries = [
            entry("P", "iPhone 15", "iOS 18.2", PowerState::Booted, 0),
            entry("T", "iPad Air", "iOS 18.2", PowerState::Booted, 0),
        ];
        let by_name = ResolveCriteria {
            name: Some("iPad".to_string()),
            ..ResolveCriteria::default()
        };
        let selection = select(entries.iter(), &by_name, "iPhone", Utc::now());
        assert_eq!(selection.candidates.len(), 1);
        assert_eq!(selection.candidates[0].device.id, "T");

        let defaulted = select(entries.iter(), &ResolveCriteria::default(), "iPhone", Utc::now());
        assert_eq!(defaulted.candidates.len(), 1);
        assert_eq!(defaulted.candidates[0].device.id, "P");
    }

    #[test]
    fn unavailable_devices_never_match() {
        let mut broken = entry("X", "iPhone 15", "iOS 18.2", PowerState::Booted, 0);
        broken.device.is_available = false;
        let mut unplugged = entry("Y", "iPhone 15", "iOS 18.2", PowerState::Booted, 0);
        unplugged.device.reachable = false;
        let entries = [broken, unplugged];
        let selection = select(entries.iter(), &ResolveCriteria::default(), "iPhone", Utc::now());
        assert!(selection.candidates.is_empty());
    }

    #[test]
    fn no_match_explanations_name_the_failing_criterion() {
        let entries = [
            entry("A", "iPhone 15", "iOS 18.2", PowerState::Booted, 0),
            entry("B", "iPhone 16", "iOS 17.5", PowerState::Booted, 0),
        ];
        let by_name = ResolveCriteria {
            name: Some("Galaxy".to_string()),
            ..ResolveCriteria::default()
        };
        let message = explain_no_match(entries.iter(), &by_name, "iPhone", 0).to_string();
        assert!(message.contains("available names: iPhone 15, iPhone 16"));

        let by_os = ResolveCriteria {
            os_version: Some("16".to_string()),
            ..ResolveCriteria::default()
        };
        let err = explain_no_match(entries.iter(), &by_os, "iPhone", 0);
        assert!(matches!(err, FleetError::NotFound { .. }));
        assert!(err.to_string().contains("available versions: iOS 17.5, iOS 18.2"));

        let crossed = ResolveCriteria {
            name: Some("iPhone 15".to_string()),
            os_version: Some("17".to_string()),
            ..ResolveCriteria::default()
        };
        let message = explain_no_match(entries.iter(), &crossed, "iPhone", 0).to_string();
        assert!(message.contains("partial matches: iPhone 15 (iOS 18.2"));
    }

    #[test]
    fn shortfall_suggests_auto_boot_when_it_would_help() {
        let entries = [
            entry("A", "iPhone 15", "iOS 18.2", PowerState::Booted, 0),
            entry("B", "iPhone 16", "iOS 18.2", PowerState::Shutdown, 0),
        ];
        let selection = select(entries.iter(), &ResolveCriteria::default(), "iPhone", Utc::now());
        let err = explain_shortfall(2, &selection, false);
        assert!(matches!(err, FleetError::Unavailable { .. }));
        assert!(err.to_string().contains("enable auto_boot"));

        let err = explain_shortfall(3, &selection, true);
        assert!(matches!(err, FleetError::NotFound { .. }));
        assert!(err.to_string().contains("requested 3"));
    }
}
