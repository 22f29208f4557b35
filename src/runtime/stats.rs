//! Run statistics: total cases and a status-code histogram, reported once.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct RunStats {
    total: u64,
    statuses: BTreeMap<u16, u64>,
    flushed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsReport {
    pub total: u64,
    /// Ascending by status code.
    pub statuses: Vec<StatusCount>,
    #[serde(rename = "startedAt")]
    pub started_at: String,
    #[serde(rename = "finishedAt")]
    pub finished_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: u16,
    pub count: u64,
}

impl RunStats {
    /// Counts a dispatched case and returns its 1-based sequence number.
    pub fn record_case(&mut self) -> u64 {
        self.total = self.total.saturating_add(1);
        self.total
    }

    pub fn record_status(&mut self, status: u16) {
        let slot = self.statuses.entry(status).or_insert(0);
        *slot = slot.saturating_add(1);
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn status_count(&self, status: u16) -> u64 {
        self.statuses.get(&status).copied().unwrap_or(0)
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// The report the first time; `None` on every later call.
    pub fn flush(&mut self, started_at: &str, finished_at: &str) -> Option<StatsReport> {
        if self.flushed {
            return None;
        }
        self.flushed = true;
        Some(self.report(started_at, finished_at))
    }

    /// Current counters without marking anything as flushed.
    pub fn report(&self, started_at: &str, finished_at: &str) -> StatsReport {
        StatsReport {
            total: self.total,
            statuses: self
                .statuses
                .iter()
                .map(|(status, count)| StatusCount {
                    status: *status,
                    count: *count,
                })
                .collect(),
            started_at: started_at.to_string(),
            finished_at: finished_at.to_string(),
        }
    }
}

impl StatsReport {
    pub fn pretty(&self) -> String {
        let mut out = String::from("[fuzzstate] run statistics\n");
        out.push_str(&format!("  total cases: {}\n", self.total));
        for s in &self.statuses {
            out.push_str(&format!("  status {}: {}\n", s.status, s.count));
        }
        out
    }
}
