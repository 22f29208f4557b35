//! Single-line renderings of case parts for log output.

use serde::Serialize;

use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::PathValue;

pub trait LogView {
    fn log_view(&self) -> String;
}

/// Compact JSON, or the `Debug` text when serialization fails.
pub fn json_or_text<T: Serialize + Debug + ?Sized>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(s) => s,
        Err(err) => {
            tracing::debug!("log view fell back to text: {err}");
            format!("{value:?}")
        }
    }
}

impl LogView for BTreeMap<String, PathValue> {
    fn log_view(&self) -> String {
        json_or_text(self)
    }
}

impl LogView for BTreeMap<String, serde_json::Value> {
    fn log_view(&self) -> String {
        json_or_text(self)
    }
}

impl LogView for BTreeMap<String, String> {
    fn log_view(&self) -> String {
        json_or_text(self)
    }
}

/// Structured bodies render as JSON; scalars render as bare text; absence is `null`.
impl LogView for Option<serde_json::Value> {
    fn log_view(&self) -> String {
        match self {
            None | Some(serde_json::Value::Null) => "null".to_string(),
            Some(v @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => json_or_text(v),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}
