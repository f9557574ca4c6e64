use std::collections::HashSet;

use futures_util::future::join_all;
use tracing::debug;

use crate::app::models::{Element, Frame};
use crate::app::ui::elements::{is_type, parse_element};
use crate::app::ui::{UiEngine, UiTarget};

/// Containers whose children some accessibility stacks omit from the tree.
const PROBED_CONTAINERS: [&str; 3] = ["NavigationBar", "TabBar", "Toolbar"];

impl UiEngine {
    /// Point-probes empty bar containers and appends the elements found
    /// inside them. Probe failures only cost the missing elements.
    pub(crate) async fn probe_hidden(&self, target: &UiTarget, elements: &mut Vec<Element>) {
        let containers = empty_containers(elements);
        if containers.is_empty() {
            return;
        }
        let mut seen: HashSet<(i64, i64, i64, i64)> = elements
            .iter()
            .filter_map(|element| element.frame.map(|frame| frame.rounded()))
            .collect();
        let mut discovered = Vec::new();

        for container in containers {
            let points = grid_points(&container, self.settings.probe_grid_points);
            let probes = join_all(points.into_iter().map(|(x, y)| async move {
                let _permit = self.scheduler.acquire_probe().await;
                target.backend.probe_point(&target.udid, x, y).await
            }))
            .await;

            for probe in probes {
                let raw = match probe {
                    Ok(Some(raw)) => raw,
                    Ok(None) => continue,
                    Err(err) => {
                        debug!(udid = %target.udid, error = %err, "probe failed");
                        continue;
                    }
                };
                let element = parse_element(&raw);
                let Some(frame) = element.frame else {
                    continue;
                };
                if frame.same_as(&container) || !seen.insert(frame.rounded()) {
                    continue;
                }
                discovered.push(element);
            }
        }

        if !discovered.is_empty() {
            debug!(udid = %target.udid, count = discovered.len(), "probed hidden elements");
        }
        elements.extend(discovered);
    }
}

/// Bar containers with area and no children. A reported child count decides;
/// flat trees fall back to "no smaller element sits inside".
fn empty_containers(elements: &[Element]) -> Vec<Frame> {
    elements
        .iter()
        .enumerate()
        .filter(|(_, element)| PROBED_CONTAINERS.iter().any(|kind| is_type(element, kind)))
        .filter_map(|(index, element)| {
            let frame = element.frame.filter(Frame::has_area)?;
            let empty = match element.child_count {
                Some(count) => count == 0,
                None => !encloses_smaller(elements, index, &frame),
            };
            empty.then_some(frame)
        })
        .collect()
}

fn encloses_smaller(elements: &[Element], index: usize, container: &Frame) -> bool {
    elements.iter().enumerate().any(|(other_index, other)| {
        let Some(other_frame) = other.frame else {
            return false;
        };
        other_index != index
            && other_frame.w * other_frame.h < container.w * container.h
            && other
                .center()
                .is_some_and(|(x, y)| container.contains(x, y))
    })
}

/// Evenly spaced points across the container at its vertical center.
fn grid_points(frame: &Frame, count: u32) -> Vec<(f64, f64)> {
    let count = count.max(1);
    let y = frame.y + frame.h / 2.0;
    (0..count)
        .map(|step| {
            let x = frame.x + frame.w * (f64::from(step) + 0.5) / f64::from(count);
            (x, y)
        })
        .collect()
}
