//! Generated cases, the operations they map to, and observed responses.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fmt;

use crate::{FuzzStateError, FuzzStateResult};

pub const USERS_PATH: &str = "/api/v1/users";
pub const USER_BY_ID_PATH: &str = "/api/v1/users/{user_id}";
pub const USER_ID_PARAM: &str = "user_id";

/// Substituted for non-numeric ids so the service answers with its structured
/// error body rather than a routing failure.
pub const INVALID_ID_PLACEHOLDER: &str = "invalid-id";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteKey {
    pub method: String,
    pub path: String,
}

impl RouteKey {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Closed set of operations the shaper and reconciler know about, chosen once
/// per case from `(method, path template)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    List,
    Read,
    Update,
    Delete,
    /// Any other method on the by-id route.
    OtherById,
    Other,
}

impl Operation {
    pub fn classify(method: &str, path: &str) -> Self {
        let method = method.to_ascii_uppercase();
        match (method.as_str(), path) {
            ("POST", USERS_PATH) => Self::Create,
            ("GET", USERS_PATH) => Self::List,
            ("GET", USER_BY_ID_PATH) => Self::Read,
            ("PUT", USER_BY_ID_PATH) => Self::Update,
            ("DELETE", USER_BY_ID_PATH) => Self::Delete,
            (_, USER_BY_ID_PATH) => Self::OtherById,
            _ => Self::Other,
        }
    }

    pub fn route_key(self) -> Option<RouteKey> {
        let (method, path) = match self {
            Self::Create => ("POST", USERS_PATH),
            Self::List => ("GET", USERS_PATH),
            Self::Read => ("GET", USER_BY_ID_PATH),
            Self::Update => ("PUT", USER_BY_ID_PATH),
            Self::Delete => ("DELETE", USER_BY_ID_PATH),
            Self::OtherById | Self::Other => return None,
        };
        Some(RouteKey::new(method, path))
    }

    pub fn is_by_id(self) -> bool {
        matches!(self, Self::Read | Self::Update | Self::Delete | Self::OtherById)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathValue {
    Int(i64),
    Text(String),
    Other(serde_json::Value),
}

impl PathValue {
    /// Integer id, accepting all-digit strings.
    pub fn as_id(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Text(s) if is_ascii_digits(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn is_non_numeric_text(&self) -> bool {
        matches!(self, Self::Text(s) if !is_ascii_digits(s))
    }
}

impl fmt::Display for PathValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
            Self::Other(v) => write!(f, "{v}"),
        }
    }
}

fn is_ascii_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// One generated request. `method` and `path` are fixed by the generator; the
/// rest is open to shaping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    method: String,
    path: String,
    #[serde(default)]
    pub path_parameters: BTreeMap<String, PathValue>,
    #[serde(default)]
    pub query: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

impl Case {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            path_parameters: BTreeMap::new(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn with_path_param(mut self, name: &str, value: PathValue) -> Self {
        self.path_parameters.insert(name.to_string(), value);
        self
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn operation(&self) -> Operation {
        Operation::classify(&self.method, &self.path)
    }

    pub fn user_id(&self) -> Option<&PathValue> {
        self.path_parameters.get(USER_ID_PARAM)
    }

    pub fn set_user_id(&mut self, id: i64) {
        self.path_parameters.insert(USER_ID_PARAM.to_string(), PathValue::Int(id));
    }

    /// `name` of an object body, if it is a string.
    pub fn body_name(&self) -> Option<&str> {
        self.body.as_ref()?.get("name")?.as_str()
    }

    /// Inserts the header unless one with the same name (any case) exists.
    pub fn set_header_default(&mut self, name: &str, value: &str) {
        if !self.headers.keys().any(|k| k.eq_ignore_ascii_case(name)) {
            self.headers.insert(name.to_string(), value.to_string());
        }
    }

    /// Path template with parameters substituted; unknown placeholders stay verbatim.
    pub fn formatted_path(&self) -> String {
        let mut out = String::with_capacity(self.path.len());
        let mut rest = self.path.as_str();
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}') else {
                break;
            };
            let name = &rest[open + 1..open + close];
            out.push_str(&rest[..open]);
            match self.path_parameters.get(name) {
                Some(value) => out.push_str(&percent_encode(&value.to_string())),
                None => out.push_str(&rest[open..=open + close]),
            }
            rest = &rest[open + close + 1..];
        }
        out.push_str(rest);
        out
    }

    pub fn query_string(&self) -> String {
        let mut pairs = Vec::new();
        for (k, v) in &self.query {
            match v {
                serde_json::Value::Array(items) => {
                    for item in items {
                        pairs.push(format!("{}={}", percent_encode(k), percent_encode(&query_text(item))));
                    }
                }
                other => pairs.push(format!("{}={}", percent_encode(k), percent_encode(&query_text(other)))),
            }
        }
        pairs.join("&")
    }

    pub fn url(&self, base_url: &str) -> String {
        let mut url = format!("{}{}", base_url.trim_end_matches('/'), self.formatted_path());
        let query = self.query_string();
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }
        url
    }

    /// Equivalent `curl` invocation. Fails on headers that cannot be replayed.
    pub fn as_curl_command(&self, base_url: &str) -> FuzzStateResult<String> {
        let mut parts = vec!["curl".to_string(), "-X".to_string(), self.method.clone()];
        for (k, v) in &self.headers {
            if k.trim().is_empty() {
                return Err(FuzzStateError::Render("header name cannot be empty".to_string()));
            }
            if k.contains(['\n', '\r']) || v.contains(['\n', '\r']) {
                return Err(FuzzStateError::Render(format!("header contains forbidden newline: {k:?}")));
            }
            parts.push("-H".to_string());
            parts.push(shell_quote(&format!("{k}: {v}")));
        }
        if let Some(body) = &self.body {
            parts.push("-d".to_string());
            parts.push(shell_quote(&serde_json::to_string(body)?));
        }
        parts.push(shell_quote(&self.url(base_url)));
        Ok(parts.join(" "))
    }

    /// Replay line that never fails; degrades to a bare command annotated with the reason.
    pub fn reproduce(&self, base_url: &str) -> String {
        match self.as_curl_command(base_url) {
            Ok(cmd) => cmd,
            Err(err) => format!(
                "curl -X {} {}{} # failed to render: {err}",
                self.method,
                base_url.trim_end_matches('/'),
                self.formatted_path()
            ),
        }
    }
}

fn query_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn percent_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResponse {
    pub status: u16,
    /// Lower-cased header names.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl CaseResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get("location").map(String::as_str)
    }
}

/// Numeric id from the last segment of a location reference, absolute or relative.
pub fn extract_id(location: Option<&str>) -> Option<i64> {
    let trimmed = location?.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    trimmed.rsplit('/').next()?.parse().ok()
}
