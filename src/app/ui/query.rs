use tracing::debug;

use crate::app::error::FleetResult;
use crate::app::models::{Element, ElementFilters};
use crate::app::ui::elements::{filter_elements, parse_element, parse_elements, parse_filtered};
use crate::app::ui::{UiEngine, UiTarget};

impl UiEngine {
    /// Elements matching `filters`. Identifier-only searches for catalogued
    /// static elements are answered by a single point probe when possible.
    pub async fn query(
        &self,
        target: &UiTarget,
        filters: &ElementFilters,
        fresh: bool,
    ) -> FleetResult<Vec<Element>> {
        if let Some(element) = self.fast_path_lookup(target, filters).await {
            return Ok(vec![element]);
        }
        self.lookup(target, filters, fresh).await
    }

    /// Tree-based search. A cached query filters the full cached tree; a
    /// fresh one bypasses the cache and only stores the result when it is
    /// the unfiltered tree.
    pub(crate) async fn lookup(
        &self,
        target: &UiTarget,
        filters: &ElementFilters,
        fresh: bool,
    ) -> FleetResult<Vec<Element>> {
        if !fresh {
            if let Some(tree) = self.cache.get(&target.udid) {
                return Ok(filter_elements(&tree, filters));
            }
            let tree = self.fetch_tree(target).await?;
            let tree = self.cache.put(&target.udid, tree);
            return Ok(filter_elements(&tree, filters));
        }

        if filters.is_empty() {
            let tree = self.fetch_tree(target).await?;
            return Ok(self.cache.put(&target.udid, tree).as_ref().clone());
        }
        if target.backend.supports_point_probe() {
            // Probed elements only exist in the full tree, so filter after.
            let tree = self.fetch_tree(target).await?;
            return Ok(filter_elements(&tree, filters));
        }
        let raw = target.backend.describe_ui_tree(&target.udid, None).await?;
        Ok(parse_filtered(&raw, filters))
    }

    async fn fetch_tree(&self, target: &UiTarget) -> FleetResult<Vec<Element>> {
        let raw = target.backend.describe_ui_tree(&target.udid, None).await?;
        let mut elements = parse_elements(&raw);
        if target.backend.supports_point_probe() {
            self.probe_hidden(target, &mut elements).await;
        }
        self.remember_screen(target, &elements);
        Ok(elements)
    }

    /// Catalogued point for an identifier-only search on an eligible device.
    pub(crate) fn fast_path_point(
        &self,
        target: &UiTarget,
        filters: &ElementFilters,
    ) -> Option<(f64, f64)> {
        let identifier = filters.identifier_only()?;
        if !self.fast_path_eligible(target) {
            return None;
        }
        let screen = self.known_screen(target)?;
        self.catalog.locate(identifier, &screen)
    }

    /// Probes the catalogued point and confirms the element found there.
    pub(crate) async fn fast_path_lookup(
        &self,
        target: &UiTarget,
        filters: &ElementFilters,
    ) -> Option<Element> {
        let (x, y) = self.fast_path_point(target, filters)?;
        let identifier = filters.identifier_only()?;
        match target.backend.probe_point(&target.udid, x, y).await {
            Ok(Some(raw)) => {
                let element = parse_element(&raw);
                if element.identifier.as_deref() == Some(identifier) {
                    debug!(udid = %target.udid, identifier = %identifier, "fast path hit");
                    Some(element)
                } else {
                    None
                }
            }
            Ok(None) => None,
            Err(err) => {
                debug!(udid = %target.udid, error = %err, "fast path probe failed; using tree");
                None
            }
        }
    }
}
