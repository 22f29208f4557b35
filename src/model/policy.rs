//! Force-valid policy: one-shot per route, per session.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use crate::{Operation, RouteKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyState {
    /// The next case on this route is coerced into a valid operation.
    Armed,
    /// Already coerced once; cases pass through untouched by the policy.
    Spent,
    /// Route never participates in the policy.
    Inapplicable,
}

#[derive(Debug, Clone)]
pub struct ForceValidPolicy {
    routes: BTreeMap<RouteKey, PolicyState>,
}

impl Default for ForceValidPolicy {
    fn default() -> Self {
        Self::armed_for_user_routes()
    }
}

impl ForceValidPolicy {
    /// Create, update, read and delete on the user resource start armed.
    pub fn armed_for_user_routes() -> Self {
        let routes = [Operation::Create, Operation::Update, Operation::Read, Operation::Delete]
            .into_iter()
            .filter_map(|op| op.route_key())
            .map(|key| (key, PolicyState::Armed))
            .collect();
        Self { routes }
    }

    pub fn state(&self, key: &RouteKey) -> PolicyState {
        self.routes.get(key).copied().unwrap_or(PolicyState::Inapplicable)
    }

    pub fn is_armed(&self, key: &RouteKey) -> bool {
        self.state(key) == PolicyState::Armed
    }

    /// `Armed -> Spent`. Returns whether the route was armed; other states are left alone.
    pub fn consume(&mut self, key: &RouteKey) -> bool {
        match self.routes.get_mut(key) {
            Some(state @ PolicyState::Armed) => {
                *state = PolicyState::Spent;
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, PolicyState> {
        self.routes.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }
}
