//! Stateful bridge between generated cases and the live service.
//!
//! `before_call` shapes a case before dispatch, `after_call` reconciles the
//! entity mirror with what the service answered. Both run on one logical
//! mutation lane; see [`crate::SharedSession`] for multi-worker harnesses.

use serde::Serialize;

use std::collections::BTreeSet;
use std::fmt;

use crate::{
    extract_id, name_source_for, Case, CaseResponse, CaseTrace, Clock, Config, EntityMirror, EntityRecord,
    ForceValidPolicy, FuzzStateResult, LogView, NameAllocator, NameSource, Operation, PathValue, PayloadTemplate,
    RouteKey, RunStats, SystemClock, UserPayload, UserService, INVALID_ID_PLACEHOLDER, USER_ID_PARAM,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CaseId(pub u64);

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the shaper did to a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shaping {
    NameRerolled { from: String, to: String },
    ForcedValidBody,
    DisposableTarget { id: i64 },
    ForcedExistingId { id: i64 },
    NoEntityAvailable,
    IdPlaceholder { from: String },
}

pub struct StatefulBridge<S: UserService> {
    service: S,
    base_url: String,
    warm_page_limit: u32,
    mirror: EntityMirror,
    names: NameAllocator,
    payloads: PayloadTemplate,
    policy: ForceValidPolicy,
    in_flight: BTreeSet<CaseId>,
    stats: RunStats,
    clock: Box<dyn Clock>,
    trace: CaseTrace,
    created_here: Vec<i64>,
}

impl<S: UserService> fmt::Debug for StatefulBridge<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatefulBridge")
            .field("base_url", &self.base_url)
            .field("mirror", &self.mirror)
            .field("policy", &self.policy)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<S: UserService> StatefulBridge<S> {
    pub fn new(service: S, config: &Config) -> Self {
        Self {
            service,
            base_url: config.base_url_trimmed().to_string(),
            warm_page_limit: config.warm_page_limit,
            mirror: EntityMirror::new(),
            names: NameAllocator::new(config.name_prefix.clone(), name_source_for(config.seed)),
            payloads: PayloadTemplate::default(),
            policy: ForceValidPolicy::default(),
            in_flight: BTreeSet::new(),
            stats: RunStats::default(),
            clock: Box::new(SystemClock::default()),
            trace: CaseTrace::default(),
            created_here: Vec::new(),
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_name_source(mut self, prefix: &str, source: Box<dyn NameSource>) -> Self {
        self.names = NameAllocator::new(prefix, source);
        self
    }

    pub fn with_policy(mut self, policy: ForceValidPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn mirror(&self) -> &EntityMirror {
        &self.mirror
    }

    pub fn policy(&self) -> &ForceValidPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut RunStats {
        &mut self.stats
    }

    pub fn trace(&self) -> &CaseTrace {
        &self.trace
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut S {
        &mut self.service
    }

    /// Cases handed to `before_call` whose response has not been observed yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn note(&mut self, name: &str, fields: serde_json::Value) {
        let now = self.clock.now_ms();
        self.trace.push(now, name, fields);
    }

    /// Fetches one page of users when nothing is mirrored. Failures leave the mirror empty.
    pub fn ensure_warm(&mut self) {
        if !self.mirror.is_empty() {
            return;
        }
        match self.service.list_users(self.warm_page_limit, 0) {
            Ok(records) => {
                tracing::debug!(count = records.len(), "entity mirror warmed");
                let count = records.len();
                self.mirror.replace_all(records);
                self.note("mirror_warmed", serde_json::json!({ "count": count }));
            }
            Err(err) => {
                tracing::warn!("entity mirror warm-up failed; continuing with no known entities: {err}");
                self.mirror.replace_all(Vec::new());
                self.note("mirror_warm_failed", serde_json::json!({ "error": err.to_string() }));
            }
        }
    }

    /// A name absent from the mirror's name set at the time of the call.
    pub fn generate_unique_name(&mut self) -> String {
        self.names.allocate(self.mirror.names())
    }

    pub fn build_payload(&mut self, include_career: bool) -> UserPayload {
        let name = self.generate_unique_name();
        self.payloads.build(name, include_career)
    }

    /// Creates a real user and mirrors it. `None` when the call fails or no id comes back.
    pub fn create_entity(&mut self) -> Option<i64> {
        let payload = self.build_payload(true);
        let response = match self.service.create_user(&payload) {
            Ok(resp) => resp,
            Err(err) => {
                tracing::warn!("entity creation failed: {err}");
                self.note("entity_create_failed", serde_json::json!({ "error": err.to_string() }));
                return None;
            }
        };
        if !response.is_success() {
            tracing::warn!(status = response.status, "entity creation rejected");
            self.note("entity_create_failed", serde_json::json!({ "status": response.status }));
            return None;
        }
        let id = extract_id(response.location())?;
        self.record_created(id, &payload.name);
        self.created_here.push(id);
        self.note("entity_created", serde_json::json!({ "id": id, "name": payload.name }));
        Some(id)
    }

    /// Some mirrored id, creating an entity when none is known.
    pub fn pick_existing_id(&mut self) -> Option<i64> {
        self.ensure_warm();
        match self.mirror.first_id() {
            Some(id) => Some(id),
            None => self.create_entity(),
        }
    }

    pub fn record_created(&mut self, id: i64, name: &str) {
        let inserted = self.mirror.insert(EntityRecord {
            id,
            name: name.to_string(),
        });
        tracing::debug!(id, name, inserted, "mirror insert");
    }

    pub fn record_deleted(&mut self, id: i64) {
        let removed = self.mirror.remove(id);
        tracing::debug!(id, removed, "mirror remove");
    }

    /// Pre-dispatch hook. Logs the case as generated, then shapes it in place.
    pub fn before_call(&mut self, case: &mut Case) -> CaseId {
        self.ensure_warm();

        let operation = case.operation();
        let key = RouteKey::new(case.method(), case.path());
        let armed = self.policy.is_armed(&key);

        let id = CaseId(self.stats.record_case());
        self.in_flight.insert(id);

        let path_params = case.path_parameters.log_view();
        let query = case.query.log_view();
        let headers = case.headers.log_view();
        let body = case.body.log_view();
        let reproduce = case.reproduce(&self.base_url);
        tracing::info!(
            case = %id,
            method = %key.method,
            path = %key.path,
            path_params = %path_params,
            query = %query,
            headers = %headers,
            body = %body,
            reproduce = %reproduce,
            "case generated"
        );
        self.note(
            "case_generated",
            serde_json::json!({
                "case_id": id.0,
                "method": key.method,
                "path": key.path,
                "path_params": path_params,
                "query": query,
                "headers": headers,
                "body": body,
                "reproduce": reproduce,
            }),
        );

        let actions = self.shape(case, operation, &key, armed);
        if !actions.is_empty() {
            let reproduce = case.reproduce(&self.base_url);
            tracing::debug!(case = %id, actions = ?actions, reproduce = %reproduce, "case shaped");
            self.note(
                "case_shaped",
                serde_json::json!({ "case_id": id.0, "actions": actions, "reproduce": reproduce }),
            );
        }
        id
    }

    fn shape(&mut self, case: &mut Case, operation: Operation, key: &RouteKey, armed: bool) -> Vec<Shaping> {
        let mut actions = Vec::new();
        match operation {
            Operation::Create => {
                let colliding = case
                    .body_name()
                    .filter(|name| self.mirror.knows_name(name))
                    .map(str::to_string);
                if let Some(from) = colliding {
                    let to = self.generate_unique_name();
                    if let Some(obj) = case.body.as_mut().and_then(serde_json::Value::as_object_mut) {
                        obj.insert("name".to_string(), serde_json::Value::String(to.clone()));
                    }
                    self.mirror.reserve_name(to.clone());
                    actions.push(Shaping::NameRerolled { from, to });
                }
                if armed {
                    case.set_header_default("Content-Type", "application/json");
                    case.body = Some(self.build_payload(true).to_json());
                    self.spend(key);
                    actions.push(Shaping::ForcedValidBody);
                }
            }
            Operation::Delete if armed => {
                match self.create_entity() {
                    Some(id) => {
                        case.set_user_id(id);
                        actions.push(Shaping::DisposableTarget { id });
                    }
                    None => actions.push(Shaping::NoEntityAvailable),
                }
                self.spend(key);
            }
            Operation::Update if armed => {
                self.force_existing_id(case, &mut actions);
                case.set_header_default("Content-Type", "application/json");
                case.body = Some(self.build_payload(false).to_json());
                self.spend(key);
                actions.push(Shaping::ForcedValidBody);
            }
            Operation::Read if armed => {
                self.force_existing_id(case, &mut actions);
                self.spend(key);
            }
            op if op.is_by_id() => {
                if let Some(value) = case.user_id().filter(|v| v.is_non_numeric_text()) {
                    let from = value.to_string();
                    case.path_parameters
                        .insert(USER_ID_PARAM.to_string(), PathValue::Text(INVALID_ID_PLACEHOLDER.to_string()));
                    actions.push(Shaping::IdPlaceholder { from });
                }
            }
            _ => {}
        }
        actions
    }

    fn force_existing_id(&mut self, case: &mut Case, actions: &mut Vec<Shaping>) {
        match self.pick_existing_id() {
            Some(id) => {
                case.set_user_id(id);
                actions.push(Shaping::ForcedExistingId { id });
            }
            None => actions.push(Shaping::NoEntityAvailable),
        }
    }

    fn spend(&mut self, key: &RouteKey) {
        if self.policy.consume(key) {
            tracing::debug!(route = %key, "force-valid policy spent");
            self.note("policy_spent", serde_json::json!({ "route": key.to_string() }));
        }
    }

    /// Post-dispatch hook.
    pub fn after_call(&mut self, id: CaseId, case: &Case, response: &CaseResponse) {
        self.stats.record_status(response.status);
        if self.in_flight.remove(&id) {
            tracing::info!(case = %id, status = response.status, "case completed");
        }
        self.note("case_outcome", serde_json::json!({ "case_id": id.0, "status": response.status }));

        match case.operation() {
            Operation::Create if response.status == 201 => {
                let new_id = extract_id(response.location());
                match (new_id, case.body_name()) {
                    (Some(new_id), Some(name)) => {
                        let name = name.to_string();
                        self.record_created(new_id, &name);
                        self.note("mirror_insert", serde_json::json!({ "id": new_id, "name": name }));
                    }
                    _ => tracing::debug!(case = %id, "created entity not mirrored: missing id or name"),
                }
            }
            Operation::Delete if response.status == 204 => {
                if let Some(removed) = case.user_id().and_then(PathValue::as_id) {
                    self.record_deleted(removed);
                    self.note("mirror_remove", serde_json::json!({ "id": removed }));
                }
            }
            _ => {}
        }
    }

    /// Releases a case whose response will never be observed.
    pub fn abandon(&mut self, id: CaseId, reason: &str) {
        if self.in_flight.remove(&id) {
            tracing::warn!(case = %id, "case abandoned: {reason}");
            self.note("case_abandoned", serde_json::json!({ "case_id": id.0, "reason": reason }));
        }
    }

    pub fn dispatch(&mut self, case: &Case) -> FuzzStateResult<CaseResponse> {
        self.service.dispatch(case)
    }

    /// Best-effort delete of every entity this bridge created that is still mirrored.
    pub fn cleanup_created(&mut self) -> usize {
        let targets: Vec<i64> = std::mem::take(&mut self.created_here)
            .into_iter()
            .filter(|id| self.mirror.contains_id(*id))
            .collect();
        let mut deleted = 0usize;
        for id in targets {
            match self.service.delete_user(id) {
                Ok(resp) if resp.is_success() => {
                    self.record_deleted(id);
                    deleted += 1;
                }
                Ok(resp) => tracing::warn!(id, status = resp.status, "cleanup delete rejected"),
                Err(err) => tracing::warn!(id, "cleanup delete failed: {err}"),
            }
        }
        self.note("cleanup", serde_json::json!({ "deleted": deleted }));
        deleted
    }
}
