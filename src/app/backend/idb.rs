use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::app::backend::locator::program_exists;
use crate::app::backend::parse::parse_idb_elements;
use crate::app::backend::runner::{args, run_command_with_timeout, CommandOutput};
use crate::app::error::{BackendError, FleetResult};

/// Accessibility and input driver shared by the simulator and device
/// backends (`idb ui ...`).
#[derive(Debug, Clone)]
pub struct IdbUi {
    program: String,
    backend: &'static str,
    timeout: Duration,
}

impl IdbUi {
    pub fn new(program: impl Into<String>, backend: &'static str, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            backend,
            timeout,
        }
    }

    pub fn is_available(&self) -> bool {
        program_exists(&self.program)
    }

    async fn run(&self, udid: &str, action: &str, mut extra: Vec<String>) -> FleetResult<CommandOutput> {
        let mut command = args(["ui"]);
        command.append(&mut extra);
        command.push("--udid".to_string());
        command.push(udid.to_string());
        let output = run_command_with_timeout(&self.program, &command, self.timeout, udid)
            .await
            .map_err(|err| err.into_backend(self.backend))?;
        Ok(output.ensure_success(self.backend, action)?)
    }

    pub async fn describe_all(&self, udid: &str) -> FleetResult<Vec<Value>> {
        let output = self
            .run(udid, "describe-all", args(["describe-all", "--json", "--nested"]))
            .await?;
        let elements = parse_idb_elements(&output.stdout);
        if elements.is_empty() && !output.stdout.trim().is_empty() {
            warn!(udid = %udid, backend = self.backend, "idb describe-all returned unparseable output");
            return Err(BackendError::new(self.backend, "describe-all returned unparseable output").into());
        }
        Ok(flatten_nested(elements))
    }

    pub async fn describe_point(&self, udid: &str, x: f64, y: f64) -> FleetResult<Option<Value>> {
        let output = self
            .run(
                udid,
                "describe-point",
                vec![
                    "describe-point".to_string(),
                    "--json".to_string(),
                    format_coord(x),
                    format_coord(y),
                ],
            )
            .await?;
        Ok(parse_idb_elements(&output.stdout).into_iter().next())
    }

    pub async fn tap(&self, udid: &str, x: f64, y: f64) -> FleetResult<()> {
        self.run(udid, "tap", vec!["tap".to_string(), format_coord(x), format_coord(y)])
            .await
            .map(|_| ())
    }

    pub async fn swipe(
        &self,
        udid: &str,
        from: (f64, f64),
        to: (f64, f64),
        duration_secs: f64,
    ) -> FleetResult<()> {
        self.run(
            udid,
            "swipe",
            vec![
                "swipe".to_string(),
                format_coord(from.0),
                format_coord(from.1),
                format_coord(to.0),
                format_coord(to.1),
                "--duration".to_string(),
                format!("{duration_secs:.2}"),
            ],
        )
        .await
        .map(|_| ())
    }

    pub async fn type_text(&self, udid: &str, text: &str) -> FleetResult<()> {
        self.run(udid, "text", vec!["text".to_string(), text.to_string()])
            .await
            .map(|_| ())
    }

    pub async fn press_button(&self, udid: &str, button: &str) -> FleetResult<()> {
        self.run(
            udid,
            "button",
            vec!["button".to_string(), button.trim().to_uppercase()],
        )
        .await
        .map(|_| ())
    }
}

fn format_coord(value: f64) -> String {
    format!("{}", value.round() as i64)
}

/// `--nested` output carries children inline; the engine works on a flat list.
fn flatten_nested(elements: Vec<Value>) -> Vec<Value> {
    let mut flat = Vec::with_capacity(elements.len());
    let mut stack = elements;
    stack.reverse();
    while let Some(mut element) = stack.pop() {
        let mut children = Vec::new();
        if let Some(object) = element.as_object_mut() {
            if let Some(value) = object.remove("children") {
                if let Value::Array(items) = value {
                    children = items;
                }
                object.insert("child_count".to_string(), Value::from(children.len()));
            }
        }
        flat.push(element);
        stack.extend(children.into_iter().rev());
    }
    flat
}
