use serde_json::Value;

const APP_KEY: &str = "devwatch";

/// One status line: `devwatch <kind>[ <json>]\n`.
pub fn msg(kind: &str, payload: Option<&Value>) -> String {
    match payload {
        Some(value) => format!("{APP_KEY} {kind} {value}\n"),
        None => format!("{APP_KEY} {kind}\n"),
    }
}
