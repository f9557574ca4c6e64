use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::app::config::{config_path, load_config, save_config_to_path, AppConfig};
use crate::app::error::{AppError, FleetError};
use crate::app::models::{
    AppInfo, CacheStats, CommandResponse, DeviceDescriptor, Element, ElementFilters, EnsureResult,
    ResolvedDevice, TapOutcome, WaitCondition, WaitResult,
};
use crate::app::pool::ResolveCriteria;
use crate::app::state::AppState;
use crate::app::ui::WaitRequest;

fn resolve_trace_id(input: Option<String>) -> String {
    input
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn ensure_non_empty(value: &str, field: &str, trace_id: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(
            format!("{field} is required"),
            trace_id,
        ));
    }
    Ok(())
}

fn respond<T>(result: Result<T, FleetError>, trace_id: String) -> Result<CommandResponse<T>, AppError> {
    match result {
        Ok(data) => Ok(CommandResponse { trace_id, data }),
        Err(err) => Err(AppError::from_fleet(err, trace_id)),
    }
}

fn optional_udid(udid: &Option<String>) -> Option<&str> {
    udid.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

pub fn get_config(trace_id: Option<String>) -> Result<CommandResponse<AppConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = load_config(&trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: config,
    })
}

pub fn save_app_config(
    config: AppConfig,
    trace_id: Option<String>,
) -> Result<CommandResponse<AppConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let path = config_path();
    save_config_to_path(&config, &path, &trace_id)?;
    // Read back so the caller sees clamped values.
    let config = crate::app::config::load_config_from_path(&path, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: config,
    })
}

pub async fn list_devices(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<DeviceDescriptor>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, "list_devices");
    let devices = state.controller.list_devices().await;
    Ok(CommandResponse {
        trace_id,
        data: devices,
    })
}

pub async fn resolve_device(
    state: &AppState,
    criteria: ResolveCriteria,
    trace_id: Option<String>,
) -> Result<CommandResponse<ResolvedDevice>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, criteria = ?criteria, "resolve_device");
    let result = state.controller.resolve_device(&criteria).await;
    respond(result, trace_id)
}

pub async fn ensure_devices(
    state: &AppState,
    count: usize,
    criteria: ResolveCriteria,
    trace_id: Option<String>,
) -> Result<CommandResponse<EnsureResult>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, count, criteria = ?criteria, "ensure_devices");
    let result = state.controller.ensure_devices(count, &criteria).await;
    respond(result, trace_id)
}

pub async fn release_devices(
    state: &AppState,
    session: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<usize>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&session, "session", &trace_id)?;
    info!(trace_id = %trace_id, session = %session, "release_devices");
    let result = state.controller.release_session(session.trim()).await;
    respond(result, trace_id)
}

pub async fn boot_device(
    state: &AppState,
    udid: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<u64>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&udid, "udid", &trace_id)?;
    info!(trace_id = %trace_id, udid = %udid, "boot_device");
    let result = state.controller.boot_device(udid.trim()).await;
    respond(result, trace_id)
}

pub async fn shutdown_device(
    state: &AppState,
    udid: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&udid, "udid", &trace_id)?;
    info!(trace_id = %trace_id, udid = %udid, "shutdown_device");
    let result = state.controller.shutdown_device(udid.trim()).await;
    respond(result.map(|()| true), trace_id)
}

pub async fn install_app(
    state: &AppState,
    udid: Option<String>,
    app_path: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<String>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&app_path, "app_path", &trace_id)?;
    info!(trace_id = %trace_id, app_path = %app_path, "install_app");
    let result = state
        .controller
        .install_app(optional_udid(&udid), app_path.trim())
        .await;
    respond(result, trace_id)
}

pub async fn launch_app(
    state: &AppState,
    udid: Option<String>,
    bundle_id: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<Option<u32>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&bundle_id, "bundle_id", &trace_id)?;
    info!(trace_id = %trace_id, bundle_id = %bundle_id, "launch_app");
    let result = state
        .controller
        .launch_app(optional_udid(&udid), bundle_id.trim())
        .await;
    respond(result, trace_id)
}

pub async fn terminate_app(
    state: &AppState,
    udid: Option<String>,
    bundle_id: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&bundle_id, "bundle_id", &trace_id)?;
    info!(trace_id = %trace_id, bundle_id = %bundle_id, "terminate_app");
    let result = state
        .controller
        .terminate_app(optional_udid(&udid), bundle_id.trim())
        .await;
    respond(result.map(|()| true), trace_id)
}

pub async fn uninstall_app(
    state: &AppState,
    udid: Option<String>,
    bundle_id: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&bundle_id, "bundle_id", &trace_id)?;
    info!(trace_id = %trace_id, bundle_id = %bundle_id, "uninstall_app");
    let result = state
        .controller
        .uninstall_app(optional_udid(&udid), bundle_id.trim())
        .await;
    respond(result.map(|()| true), trace_id)
}

pub async fn list_apps(
    state: &AppState,
    udid: Option<String>,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<AppInfo>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, "list_apps");
    let result = state.controller.list_apps(optional_udid(&udid)).await;
    respond(result, trace_id)
}

pub async fn swipe(
    state: &AppState,
    udid: Option<String>,
    from: (f64, f64),
    to: (f64, f64),
    duration_secs: Option<f64>,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let duration_secs = duration_secs.unwrap_or(0.3);
    if !(0.0..=10.0).contains(&duration_secs) {
        return Err(AppError::validation(
            "duration_secs must be between 0 and 10",
            trace_id,
        ));
    }
    info!(trace_id = %trace_id, ?from, ?to, "swipe");
    let result = state
        .controller
        .swipe(optional_udid(&udid), from, to, duration_secs)
        .await;
    respond(result.map(|()| true), trace_id)
}

pub async fn type_text(
    state: &AppState,
    udid: Option<String>,
    text: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    if text.is_empty() {
        return Err(AppError::validation("text is required", trace_id));
    }
    info!(trace_id = %trace_id, chars = text.chars().count(), "type_text");
    let result = state.controller.type_text(optional_udid(&udid), &text).await;
    respond(result.map(|()| true), trace_id)
}

pub async fn press_button(
    state: &AppState,
    udid: Option<String>,
    button: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&button, "button", &trace_id)?;
    info!(trace_id = %trace_id, button = %button, "press_button");
    let result = state
        .controller
        .press_button(optional_udid(&udid), button.trim())
        .await;
    respond(result.map(|()| true), trace_id)
}

pub async fn set_location(
    state: &AppState,
    udid: Option<String>,
    latitude: f64,
    longitude: f64,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, latitude, longitude, "set_location");
    let result = state
        .controller
        .set_location(optional_udid(&udid), latitude, longitude)
        .await;
    respond(result.map(|()| true), trace_id)
}

pub async fn get_ui_elements(
    state: &AppState,
    udid: Option<String>,
    filters: Option<ElementFilters>,
    fresh: bool,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<Element>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let filters = filters.unwrap_or_default();
    info!(trace_id = %trace_id, filters = %filters, fresh, "get_ui_elements");
    let result = state
        .controller
        .get_ui_elements(optional_udid(&udid), &filters, fresh)
        .await;
    respond(result, trace_id)
}

pub async fn tap_element(
    state: &AppState,
    udid: Option<String>,
    filters: ElementFilters,
    trace_id: Option<String>,
) -> Result<CommandResponse<TapOutcome>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    if filters.is_empty() {
        return Err(AppError::validation(
            "label, identifier or type is required",
            trace_id,
        ));
    }
    info!(trace_id = %trace_id, filters = %filters, "tap_element");
    let result = state
        .controller
        .tap_element(optional_udid(&udid), &filters)
        .await;
    respond(result, trace_id)
}

#[allow(clippy::too_many_arguments)]
pub async fn wait_for_element(
    state: &AppState,
    udid: Option<String>,
    condition: WaitCondition,
    filters: ElementFilters,
    value: Option<String>,
    timeout_ms: u64,
    interval_ms: Option<u64>,
    trace_id: Option<String>,
) -> Result<CommandResponse<WaitResult>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(
        trace_id = %trace_id,
        condition = ?condition,
        filters = %filters,
        timeout_ms,
        "wait_for_element"
    );
    let request = WaitRequest {
        condition,
        filters,
        value,
        timeout: Duration::from_millis(timeout_ms),
        interval: interval_ms.map(Duration::from_millis),
    };
    let result = state
        .controller
        .wait_for_element(optional_udid(&udid), &request)
        .await;
    respond(result, trace_id)
}

pub fn cache_stats(state: &AppState, trace_id: Option<String>) -> CommandResponse<CacheStats> {
    CommandResponse {
        trace_id: resolve_trace_id(trace_id),
        data: state.controller.cache_stats(),
    }
}

pub fn clear_ui_cache(state: &AppState, trace_id: Option<String>) -> CommandResponse<bool> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, "clear_ui_cache");
    state.controller.clear_ui_cache();
    CommandResponse {
        trace_id,
        data: true,
    }
}
