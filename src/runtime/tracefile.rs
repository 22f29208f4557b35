//! Ordered case trace and its optional JSON export.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::path::Path;

use crate::{FuzzStateError, FuzzStateResult, PolicyState, StatsReport, VersionInfo};

pub const TRACE_FORMAT: &str = "fuzzstate-trace";
pub const CURRENT_TRACE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub time_ms: u64,
    pub name: String,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Append-only event list in the order things happened.
#[derive(Debug, Clone, Default)]
pub struct CaseTrace {
    events: Vec<TraceEvent>,
}

impl CaseTrace {
    pub fn push(&mut self, time_ms: u64, name: &str, fields: serde_json::Value) {
        let fields = match fields {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        self.events.push(TraceEvent {
            time_ms,
            name: name.to_string(),
            fields,
        });
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a TraceEvent> + 'a {
        self.events.iter().filter(move |e| e.name == name)
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceFile {
    pub format: String,
    pub version: u32,
    pub engine: VersionInfo,
    pub base_url: String,
    pub policy: BTreeMap<String, PolicyState>,
    pub events: Vec<TraceEvent>,
    pub stats: StatsReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl TraceFile {
    pub fn new(
        base_url: &str,
        policy: BTreeMap<String, PolicyState>,
        events: Vec<TraceEvent>,
        stats: StatsReport,
    ) -> Self {
        Self {
            format: TRACE_FORMAT.to_string(),
            version: CURRENT_TRACE_VERSION,
            engine: crate::version_info(),
            base_url: base_url.to_string(),
            policy,
            events,
            stats,
            checksum: None,
        }
    }

    pub fn write_json(&self, path: &Path) -> FuzzStateResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut with_checksum = self.clone();
        with_checksum.checksum = None;
        let canonical = serde_json::to_vec(&with_checksum)?;
        with_checksum.checksum = Some(blake3::hash(&canonical).to_hex().to_string());
        let bytes = serde_json::to_vec_pretty(&with_checksum)?;

        // Write-then-rename so readers never see a partial trace.
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = path.file_name().and_then(|s| s.to_str()).unwrap_or("trace.json");
        let tmp_path = parent.join(format!(".{file_name}.{}.{}.tmp", std::process::id(), uuid::Uuid::new_v4()));
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn read_json(path: &Path) -> FuzzStateResult<Self> {
        let bytes = std::fs::read(path)?;
        let trace: TraceFile = serde_json::from_slice(&bytes)
            .map_err(|e| FuzzStateError::Trace(format!("failed to parse trace {}: {e}", path.display())))?;
        if trace.format != TRACE_FORMAT {
            return Err(FuzzStateError::Trace(format!(
                "unexpected trace format {:?} in {}",
                trace.format,
                path.display()
            )));
        }
        verify_checksum(&trace, path)?;
        Ok(trace)
    }
}

fn verify_checksum(trace: &TraceFile, path: &Path) -> FuzzStateResult<()> {
    let Some(expected) = trace.checksum.as_ref() else {
        return Ok(());
    };
    let mut canonical = trace.clone();
    canonical.checksum = None;
    let got = blake3::hash(&serde_json::to_vec(&canonical)?).to_hex().to_string();
    if &got != expected {
        return Err(FuzzStateError::Trace(format!(
            "trace checksum mismatch for {} (expected {expected}, got {got})",
            path.display()
        )));
    }
    Ok(())
}
