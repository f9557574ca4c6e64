use std::time::Instant;

use serde::Serialize;
use simfleet_lib::app::commands::{
    cache_stats, get_ui_elements, list_devices, resolve_device,
};
use simfleet_lib::app::config::load_config;
use simfleet_lib::app::logging::init_logging;
use simfleet_lib::app::pool::ResolveCriteria;
use simfleet_lib::app::state::AppState;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct Args {
    udid: Option<String>,
    name: Option<String>,
    os_version: Option<String>,
    json: bool,
    with_ui: bool,
}

#[derive(Serialize)]
struct SmokeSummary {
    tool: &'static str,
    status: &'static str,
    trace_id: String,
    udid: Option<String>,
    checks: Vec<SmokeCheck>,
}

#[derive(Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: &'static str, // pass|fail|skip
    duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn take_value(it: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    it.next()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        udid: std::env::var("SIMFLEET_UDID")
            .ok()
            .filter(|value| !value.trim().is_empty()),
        ..Args::default()
    };

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--udid" => args.udid = Some(take_value(&mut it, "--udid")?),
            "--name" => args.name = Some(take_value(&mut it, "--name")?),
            "--os" => args.os_version = Some(take_value(&mut it, "--os")?),
            "--json" => args.json = true,
            "--ui" => args.with_ui = true,
            "-h" | "--help" => {
                return Err(
                    "Usage: cargo run --bin smoke -- [--udid ID] [--name NAME] [--os VERSION] [--json] [--ui]\n"
                        .to_string(),
                );
            }
            other => return Err(format!("Unknown arg: {other}")),
        }
    }
    Ok(args)
}

fn record(
    checks: &mut Vec<SmokeCheck>,
    name: &'static str,
    start: Instant,
    outcome: Result<String, (String, String)>,
) -> bool {
    let passed = outcome.is_ok();
    let (detail, error_code, error) = match outcome {
        Ok(detail) => (Some(detail), None, None),
        Err((code, error)) => (None, Some(code), Some(error)),
    };
    checks.push(SmokeCheck {
        name,
        status: if passed { "pass" } else { "fail" },
        duration_ms: start.elapsed().as_millis(),
        detail,
        error_code,
        error,
    });
    passed
}

fn skip(checks: &mut Vec<SmokeCheck>, name: &'static str, reason: &str) {
    checks.push(SmokeCheck {
        name,
        status: "skip",
        duration_ms: 0,
        detail: Some(reason.to_string()),
        error_code: None,
        error: None,
    });
}

#[tokio::main]
async fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let trace_id = Uuid::new_v4().to_string();
    let config = match load_config(&trace_id) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    init_logging(&config.logging.log_level);

    let state = AppState::new(config);
    let mut checks = Vec::new();

    let start = Instant::now();
    let listed = list_devices(&state, Some(trace_id.clone())).await;
    let device_count = listed.as_ref().map(|resp| resp.data.len()).unwrap_or(0);
    record(
        &mut checks,
        "list_devices",
        start,
        listed
            .map(|resp| format!("{} device(s)", resp.data.len()))
            .map_err(|err| (err.code, err.error)),
    );

    let mut udid = args.udid.clone();
    if device_count == 0 && udid.is_none() {
        skip(&mut checks, "resolve_device", "no devices reported by any backend");
    } else {
        let criteria = ResolveCriteria {
            id: args.udid.clone(),
            name: args.name.clone(),
            os_version: args.os_version.clone(),
            ..ResolveCriteria::default()
        };
        let start = Instant::now();
        let resolved = resolve_device(&state, criteria, Some(trace_id.clone())).await;
        if let Ok(resp) = &resolved {
            udid = Some(resp.data.id.clone());
        }
        record(
            &mut checks,
            "resolve_device",
            start,
            resolved
                .map(|resp| {
                    format!(
                        "{} ({}) {} after {}s",
                        resp.data.name, resp.data.id, resp.data.state, resp.data.waited_seconds
                    )
                })
                .map_err(|err| (err.code, err.error)),
        );
    }

    if !args.with_ui {
        skip(&mut checks, "get_ui_elements", "pass --ui to fetch the UI tree");
    } else if udid.is_none() {
        skip(&mut checks, "get_ui_elements", "no device resolved");
    } else {
        for (name, fresh) in [("get_ui_elements", true), ("get_ui_elements_cached", false)] {
            let start = Instant::now();
            let elements = get_ui_elements(&state, udid.clone(), None, fresh, Some(trace_id.clone())).await;
            record(
                &mut checks,
                name,
                start,
                elements
                    .map(|resp| format!("{} element(s)", resp.data.len()))
                    .map_err(|err| (err.code, err.error)),
            );
        }
        let stats = cache_stats(&state, Some(trace_id.clone())).data;
        skip(
            &mut checks,
            "cache_stats",
            &format!("hits={} misses={}", stats.hits, stats.misses),
        );
    }

    let status = if checks.iter().any(|check| check.status == "fail") {
        "fail"
    } else {
        "pass"
    };
    let summary = SmokeSummary {
        tool: "simfleet_smoke",
        status,
        trace_id,
        udid,
        checks,
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).unwrap_or_default()
        );
    } else {
        for check in &summary.checks {
            let note = check
                .detail
                .as_deref()
                .or(check.error.as_deref())
                .unwrap_or_default();
            println!("[{}] {} ({}ms) {}", check.status, check.name, check.duration_ms, note);
        }
        println!("overall: {}", summary.status);
    }
    if status == "fail" {
        std::process::exit(1);
    }
}
