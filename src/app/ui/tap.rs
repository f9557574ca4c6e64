use tracing::{debug, info, warn};

use crate::app::error::{FleetError, FleetResult};
use crate::app::models::{Element, ElementFilters, ElementMatch, TapOutcome};
use crate::app::ui::elements::{pick_same, tap_point};
use crate::app::ui::{UiEngine, UiTarget};

/// Corrective scroll, as fractions of the screen height.
const SCROLL_FROM: f64 = 0.6;
const SCROLL_TO: f64 = 0.35;
const SCROLL_SECS: f64 = 0.3;

impl UiEngine {
    /// Taps the single element matching `filters`. Several matches are
    /// reported back instead of guessing.
    pub async fn tap(&self, target: &UiTarget, filters: &ElementFilters) -> FleetResult<TapOutcome> {
        if filters.is_empty() {
            return Err(FleetError::validation(
                "tap requires a label, identifier or type filter",
            ));
        }
        let _device = self.scheduler.lock_device(&target.udid).await;

        if let Some(outcome) = self.tap_fast_path(target, filters).await? {
            return Ok(outcome);
        }

        let mut matches = self.lookup(target, filters, false).await?;
        let element = match matches.len() {
            0 => {
                return Err(FleetError::not_found(format!(
                    "no element matches {filters}"
                )))
            }
            1 => matches.remove(0),
            count => {
                debug!(udid = %target.udid, count, "ambiguous tap");
                return Ok(TapOutcome::Ambiguous {
                    message: format!(
                        "{count} elements match {filters}; add an identifier or type to narrow it down"
                    ),
                    matches: matches
                        .into_iter()
                        .map(|element| ElementMatch {
                            center: element.center(),
                            element,
                        })
                        .collect(),
                });
            }
        };

        let is_static = self.catalog.is_static(element.identifier.as_deref());
        let (element, corrected) = self.avoid_occlusion(target, filters, element).await?;
        let element = if is_static {
            element
        } else {
            self.settle(target, filters, element).await?
        };
        let Some((x, y)) = tap_point(&element) else {
            return Err(FleetError::validation(format!(
                "element matching {filters} has no frame to tap"
            )));
        };

        let tapped = target.backend.tap(&target.udid, x, y).await;
        self.cache.invalidate(&target.udid);
        tapped?;
        info!(udid = %target.udid, x, y, corrected, "tapped element");
        Ok(TapOutcome::Tapped {
            x,
            y,
            element: Some(element),
            fast_path: false,
            corrected,
        })
    }

    async fn tap_fast_path(
        &self,
        target: &UiTarget,
        filters: &ElementFilters,
    ) -> FleetResult<Option<TapOutcome>> {
        let Some((x, y)) = self.fast_path_point(target, filters) else {
            return Ok(None);
        };
        let direct = filters
            .identifier_only()
            .and_then(|identifier| self.catalog.static_element(identifier))
            .is_some_and(|element| element.tap_direct);

        let element = if direct {
            None
        } else {
            match self.fast_path_lookup(target, filters).await {
                Some(element) => Some(element),
                None => return Ok(None),
            }
        };
        let (x, y) = element.as_ref().and_then(tap_point).unwrap_or((x, y));

        let tapped = target.backend.tap(&target.udid, x, y).await;
        self.cache.invalidate(&target.udid);
        tapped?;
        info!(udid = %target.udid, x, y, direct, "tapped via fast path");
        Ok(Some(TapOutcome::Tapped {
            x,
            y,
            element,
            fast_path: true,
            corrected: false,
        }))
    }

    /// Scrolls content out from under the home indicator. Returns the
    /// element to tap and whether any scroll moved it.
    async fn avoid_occlusion(
        &self,
        target: &UiTarget,
        filters: &ElementFilters,
        element: Element,
    ) -> FleetResult<(Element, bool)> {
        let Some(screen) = self.screen_size(target).await? else {
            return Ok((element, false));
        };
        let attempts = self.settings.occlusion_max_attempts;
        let mut current = element;

        for attempt in 0..attempts {
            let occluded = tap_point(&current).is_some_and(|(_, y)| screen.is_occluded(y));
            if !occluded {
                return Ok((current, attempt > 0));
            }
            debug!(udid = %target.udid, attempt, "tap point under home indicator; scrolling");
            let x = screen.width / 2.0;
            target
                .backend
                .swipe(
                    &target.udid,
                    (x, screen.height * SCROLL_FROM),
                    (x, screen.height * SCROLL_TO),
                    SCROLL_SECS,
                )
                .await?;
            self.cache.invalidate(&target.udid);
            tokio::time::sleep(self.stability_delay()).await;

            let refetched = self.lookup(target, filters, true).await?;
            let Some(moved) = pick_same(&current, &refetched) else {
                return Err(FleetError::not_found(format!(
                    "element matching {filters} disappeared after scrolling"
                )));
            };
            let unchanged = match (current.frame, moved.frame) {
                (Some(before), Some(after)) => before.same_as(&after),
                _ => false,
            };
            if unchanged {
                warn!(
                    udid = %target.udid,
                    "element is fixed in the home indicator zone; tapping it in place"
                );
                return Ok((current, false));
            }
            current = moved;
        }

        let still_occluded = tap_point(&current).is_some_and(|(_, y)| screen.is_occluded(y));
        if still_occluded {
            warn!(udid = %target.udid, attempts, "element still under home indicator");
        }
        Ok((current, attempts > 0 && !still_occluded))
    }

    /// Re-samples the element after a short delay and waits once more if it
    /// is still moving.
    async fn settle(
        &self,
        target: &UiTarget,
        filters: &ElementFilters,
        element: Element,
    ) -> FleetResult<Element> {
        let Some(before) = element.frame else {
            return Ok(element);
        };
        tokio::time::sleep(self.stability_delay()).await;
        let resample = self.lookup(target, filters, true).await?;
        let Some(now) = pick_same(&element, &resample) else {
            return Ok(element);
        };
        if now.frame.is_some_and(|frame| frame.same_as(&before)) {
            return Ok(now);
        }

        debug!(udid = %target.udid, "element moving; waiting for it to settle");
        tokio::time::sleep(self.settle_delay()).await;
        let resample = self.lookup(target, filters, true).await?;
        Ok(pick_same(&now, &resample).unwrap_or(now))
    }
}
