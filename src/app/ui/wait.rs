use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::app::error::{FleetError, FleetResult};
use crate::app::models::{Element, ElementFilters, WaitCondition, WaitResult};
use crate::app::ui::catalog::ScreenSize;
use crate::app::ui::{UiEngine, UiTarget};

/// Longest wait a single call may ask for.
pub const MAX_WAIT: Duration = Duration::from_secs(60);
const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct WaitRequest {
    pub condition: WaitCondition,
    pub filters: ElementFilters,
    pub value: Option<String>,
    pub timeout: Duration,
    pub interval: Option<Duration>,
}

impl WaitRequest {
    fn validate(&self) -> FleetResult<()> {
        if self.filters.is_empty() {
            return Err(FleetError::validation(
                "wait requires a label, identifier or type filter",
            ));
        }
        if self.condition.needs_value() && self.value.is_none() {
            return Err(FleetError::validation(format!(
                "{:?} requires an expected value",
                self.condition
            )));
        }
        if self.timeout > MAX_WAIT {
            return Err(FleetError::validation(format!(
                "timeout must be at most {}s",
                MAX_WAIT.as_secs()
            )));
        }
        Ok(())
    }
}

impl UiEngine {
    /// Polls until the condition holds or the timeout passes. Running out of
    /// time is a normal result, not an error.
    pub async fn wait_for(&self, target: &UiTarget, request: &WaitRequest) -> FleetResult<WaitResult> {
        request.validate()?;
        let interval = request
            .interval
            .unwrap_or(Duration::from_millis(self.settings.wait_interval_ms))
            .max(MIN_INTERVAL);
        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            polls += 1;
            let observed = match self.fast_path_lookup(target, &request.filters).await {
                Some(element) => vec![element],
                None => self.lookup(target, &request.filters, true).await?,
            };
            let screen = self.known_screen(target);
            let elapsed = started.elapsed();

            if let Some(element) = evaluate(
                request.condition,
                &observed,
                request.value.as_deref(),
                screen.as_ref(),
            ) {
                info!(
                    udid = %target.udid,
                    condition = ?request.condition,
                    polls,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "wait condition met"
                );
                return Ok(WaitResult {
                    matched: true,
                    condition: request.condition,
                    elapsed_ms: elapsed.as_millis() as u64,
                    polls,
                    element,
                    last_observed: Vec::new(),
                });
            }

            if elapsed >= request.timeout {
                debug!(udid = %target.udid, condition = ?request.condition, polls, "wait timed out");
                return Ok(WaitResult {
                    matched: false,
                    condition: request.condition,
                    elapsed_ms: elapsed.as_millis() as u64,
                    polls,
                    element: None,
                    last_observed: observed,
                });
            }
            tokio::time::sleep(interval.min(request.timeout - elapsed)).await;
        }
    }
}

/// `Some(matched element)` when the condition holds; `not_exists` holds
/// with no element.
fn evaluate(
    condition: WaitCondition,
    observed: &[Element],
    value: Option<&str>,
    screen: Option<&ScreenSize>,
) -> Option<Option<Element>> {
    let first = |predicate: &dyn Fn(&Element) -> bool| {
        observed
            .iter()
            .find(|element| predicate(element))
            .cloned()
            .map(Some)
    };
    match condition {
        WaitCondition::Exists => first(&|_| true),
        WaitCondition::NotExists => observed.is_empty().then_some(None),
        WaitCondition::Visible => first(&|element| {
            element.frame.is_some_and(|frame| match screen {
                Some(screen) => screen.shows(&frame),
                None => frame.has_area(),
            })
        }),
        WaitCondition::Enabled => first(&|element| element.enabled),
        WaitCondition::Disabled => first(&|element| !element.enabled),
        WaitCondition::ValueEquals => {
            let expected = value?;
            first(&|element| element.value.as_deref() == Some(expected))
        }
        WaitCondition::ValueContains => {
            let expected = value?;
            first(&|element| {
                element
                    .value
                    .as_deref()
                    .is_some_and(|actual| actual.contains(expected))
            })
        }
    }
}
