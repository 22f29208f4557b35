//! Entity mirror: best-effort local cache of users known to exist on the service.

use serde::{Deserialize, Serialize};

use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: i64,
    pub name: String,
}

/// Loose view of a user as returned by the list endpoint. Anything beyond
/// `id`/`name` is ignored; entries missing either are not mirrored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserSummary {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub name: Option<serde_json::Value>,
}

impl UserSummary {
    pub fn into_record(self) -> Option<EntityRecord> {
        let id = self.id?.as_i64()?;
        let name = match self.name? {
            serde_json::Value::String(s) => s,
            _ => return None,
        };
        Some(EntityRecord { id, name })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserListPage {
    #[serde(default)]
    pub users: Vec<UserSummary>,
}

/// Records are kept in discovery order. `names` always covers every mirrored
/// name, and may additionally hold names reserved ahead of server confirmation.
#[derive(Debug, Clone, Default)]
pub struct EntityMirror {
    records: Vec<EntityRecord>,
    names: BTreeSet<String>,
}

impl EntityMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[EntityRecord] {
        &self.records
    }

    pub fn names(&self) -> &BTreeSet<String> {
        &self.names
    }

    pub fn knows_name(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn contains_id(&self, id: i64) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    pub fn first_id(&self) -> Option<i64> {
        self.records.first().map(|r| r.id)
    }

    /// Replaces the whole mirror with a freshly fetched page.
    pub fn replace_all(&mut self, records: Vec<EntityRecord>) {
        self.records = records;
        self.rebuild_names();
    }

    /// Marks a name as taken before the service has confirmed it.
    pub fn reserve_name(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }

    /// Returns false when the id was already mirrored; the name is registered either way.
    pub fn insert(&mut self, record: EntityRecord) -> bool {
        self.names.insert(record.name.clone());
        if self.contains_id(record.id) {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Drops every record with `id` and rebuilds the name set from survivors.
    /// Reserved names that never got a record are dropped too.
    pub fn remove(&mut self, id: i64) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        let removed = self.records.len() != before;
        self.rebuild_names();
        removed
    }

    fn rebuild_names(&mut self) {
        self.names = self.records.iter().map(|r| r.name.clone()).collect();
    }
}
