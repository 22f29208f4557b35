//! Access to the user service: live over HTTP, or a scripted in-memory double.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::{
    Case, CaseResponse, EntityRecord, FuzzStateError, FuzzStateResult, UserListPage, UserPayload, UserSummary,
    USERS_PATH,
};

pub trait UserService: Send {
    /// One page of existing users. Non-2xx answers are errors.
    fn list_users(&mut self, limit: u32, offset: u32) -> FuzzStateResult<Vec<EntityRecord>>;

    /// Issues a create call; the caller inspects status and `Location`.
    fn create_user(&mut self, payload: &UserPayload) -> FuzzStateResult<CaseResponse>;

    fn delete_user(&mut self, id: i64) -> FuzzStateResult<CaseResponse>;

    /// Sends a shaped case as-is. Any status, including errors, is a response.
    fn dispatch(&mut self, case: &Case) -> FuzzStateResult<CaseResponse>;
}

fn parse_page(body: &str) -> FuzzStateResult<Vec<EntityRecord>> {
    let page: UserListPage = serde_json::from_str(body)?;
    Ok(page.users.into_iter().filter_map(UserSummary::into_record).collect())
}

#[derive(Debug, Clone)]
pub struct HostUserService {
    base_url: String,
    agent: ureq::Agent,
}

impl HostUserService {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn send(
        &self,
        method: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Option<&str>,
    ) -> FuzzStateResult<CaseResponse> {
        let mut req = self.agent.request(method, url);
        for (k, v) in headers {
            req = req.set(k, v);
        }
        let result = match body {
            Some(payload) => req.send_string(payload),
            None => req.call(),
        };
        let response = match result {
            Ok(resp) => resp,
            Err(ureq::Error::Status(_, resp)) => resp,
            Err(err) => {
                return Err(FuzzStateError::Transport(format!("{method} {url}: {err}")));
            }
        };
        let mut out_headers = BTreeMap::new();
        for name in response.headers_names() {
            if let Some(val) = response.header(&name) {
                out_headers.insert(name.to_ascii_lowercase(), val.to_string());
            }
        }
        let status = response.status();
        let body = response
            .into_string()
            .map_err(|e| FuzzStateError::Transport(format!("{method} {url}: body read failed: {e}")))?;
        Ok(CaseResponse {
            status,
            headers: out_headers,
            body,
        })
    }

    fn json_headers() -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("Accept".to_string(), "application/json".to_string());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers
    }
}

impl UserService for HostUserService {
    fn list_users(&mut self, limit: u32, offset: u32) -> FuzzStateResult<Vec<EntityRecord>> {
        let url = format!("{}{USERS_PATH}?limit={limit}&offset={offset}", self.base_url);
        let resp = self.send("GET", &url, &Self::json_headers(), None)?;
        if !resp.is_success() {
            return Err(FuzzStateError::Status {
                status: resp.status,
                context: format!("GET {url}"),
            });
        }
        parse_page(&resp.body)
    }

    fn create_user(&mut self, payload: &UserPayload) -> FuzzStateResult<CaseResponse> {
        let url = format!("{}{USERS_PATH}", self.base_url);
        let body = serde_json::to_string(payload)?;
        self.send("POST", &url, &Self::json_headers(), Some(&body))
    }

    fn delete_user(&mut self, id: i64) -> FuzzStateResult<CaseResponse> {
        let url = format!("{}{USERS_PATH}/{id}", self.base_url);
        self.send("DELETE", &url, &Self::json_headers(), None)
    }

    fn dispatch(&mut self, case: &Case) -> FuzzStateResult<CaseResponse> {
        let url = case.url(&self.base_url);
        let body = case.body.as_ref().map(serde_json::to_string).transpose()?;
        self.send(case.method(), &url, &case.headers, body.as_deref())
    }
}

/// In-memory stand-in for the user service with the same status-code contract.
#[derive(Debug, Clone)]
pub struct ScriptedUserService {
    users: BTreeMap<i64, serde_json::Value>,
    next_id: i64,
    unreachable: bool,
    calls: Vec<String>,
}

impl Default for ScriptedUserService {
    fn default() -> Self {
        Self {
            users: BTreeMap::new(),
            next_id: 1,
            unreachable: false,
            calls: Vec::new(),
        }
    }
}

impl ScriptedUserService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, id: i64, name: &str) -> Self {
        self.users.insert(id, serde_json::json!({ "id": id, "name": name }));
        self.next_id = self.next_id.max(id + 1);
        self
    }

    /// While set, every call fails as a transport error.
    pub fn set_unreachable(&mut self, unreachable: bool) {
        self.unreachable = unreachable;
    }

    /// `"METHOD path"` for every call received, in order.
    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    pub fn user_ids(&self) -> Vec<i64> {
        self.users.keys().copied().collect()
    }

    pub fn user_name(&self, id: i64) -> Option<&str> {
        self.users.get(&id)?.get("name")?.as_str()
    }

    fn handle(
        &mut self,
        method: &str,
        path: &str,
        query: &BTreeMap<String, serde_json::Value>,
        body: Option<&serde_json::Value>,
    ) -> FuzzStateResult<CaseResponse> {
        let method = method.to_ascii_uppercase();
        self.calls.push(format!("{method} {path}"));
        if self.unreachable {
            return Err(FuzzStateError::Transport(format!("{method} {path}: scripted service unreachable")));
        }

        if path == USERS_PATH {
            return Ok(match method.as_str() {
                "GET" => self.list(query),
                "POST" => self.create(body),
                _ => error_response(405, "method_not_allowed", "method not allowed"),
            });
        }

        let Some(raw_id) = path.strip_prefix(USERS_PATH).and_then(|p| p.strip_prefix('/')) else {
            return Ok(error_response(404, "not_found", "no such route"));
        };
        let Ok(id) = raw_id.parse::<i64>() else {
            return Ok(error_response(400, "invalid_id", "user_id must be numeric"));
        };
        Ok(match method.as_str() {
            "GET" => match self.users.get(&id) {
                Some(user) => CaseResponse::new(200).with_body(user.to_string()),
                None => error_response(404, "not_found", "user not found"),
            },
            "PUT" => self.update(id, body),
            "DELETE" => match self.users.remove(&id) {
                Some(_) => CaseResponse::new(204),
                None => error_response(404, "not_found", "user not found"),
            },
            _ => error_response(405, "method_not_allowed", "method not allowed"),
        })
    }

    fn list(&self, query: &BTreeMap<String, serde_json::Value>) -> CaseResponse {
        let limit = query_u64(query, "limit").unwrap_or(Some(10));
        let offset = query_u64(query, "offset").unwrap_or(Some(0));
        let (Some(limit), Some(offset)) = (limit, offset) else {
            return error_response(400, "invalid_query", "limit/offset must be integers");
        };
        if limit > 100 {
            return error_response(400, "invalid_query", "limit must be at most 100");
        }
        let users: Vec<&serde_json::Value> = self
            .users
            .values()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        let body = serde_json::json!({ "count": users.len(), "users": users });
        CaseResponse::new(200).with_body(body.to_string())
    }

    fn create(&mut self, body: Option<&serde_json::Value>) -> CaseResponse {
        let name = match validate_user(body) {
            Ok(name) => name,
            Err(resp) => return resp,
        };
        if self.name_taken(&name, None) {
            return error_response(409, "conflict", "name already exists");
        }
        let id = self.next_id;
        self.next_id += 1;
        let mut user = body.cloned().unwrap_or_default();
        if let Some(obj) = user.as_object_mut() {
            obj.insert("id".to_string(), serde_json::json!(id));
        }
        self.users.insert(id, user);
        CaseResponse::new(201).with_header("Location", &format!("{USERS_PATH}/{id}"))
    }

    fn update(&mut self, id: i64, body: Option<&serde_json::Value>) -> CaseResponse {
        if !self.users.contains_key(&id) {
            return error_response(404, "not_found", "user not found");
        }
        let name = match validate_user(body) {
            Ok(name) => name,
            Err(resp) => return resp,
        };
        if self.name_taken(&name, Some(id)) {
            return error_response(409, "conflict", "name already exists");
        }
        let mut user = body.cloned().unwrap_or_default();
        if let Some(obj) = user.as_object_mut() {
            obj.insert("id".to_string(), serde_json::json!(id));
        }
        self.users.insert(id, user);
        CaseResponse::new(204)
    }

    fn name_taken(&self, name: &str, except: Option<i64>) -> bool {
        self.users
            .iter()
            .any(|(id, u)| Some(*id) != except && u.get("name").and_then(|n| n.as_str()) == Some(name))
    }
}

fn query_u64(query: &BTreeMap<String, serde_json::Value>, key: &str) -> Option<Option<u64>> {
    let v = query.get(key)?;
    Some(match v {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    })
}

fn validate_user(body: Option<&serde_json::Value>) -> Result<String, CaseResponse> {
    let Some(obj) = body.and_then(|b| b.as_object()) else {
        return Err(error_response(400, "invalid_body", "body must be a JSON object"));
    };
    let name = match obj.get("name").and_then(|n| n.as_str()) {
        Some(n) if !n.trim().is_empty() && n.chars().count() <= 200 => n,
        _ => return Err(error_response(400, "invalid_name", "name must be 1-200 characters")),
    };
    if name.chars().all(|c| c.is_ascii_digit()) {
        return Err(error_response(400, "invalid_name", "name must not be numeric only"));
    }
    match obj.get("age").and_then(|a| a.as_u64()) {
        Some(age) if age <= 150 => {}
        _ => return Err(error_response(400, "invalid_age", "age must be 0-150")),
    }
    if !obj.get("birthday").is_some_and(|b| b.is_string()) {
        return Err(error_response(400, "invalid_birthday", "birthday is required"));
    }
    Ok(name.to_string())
}

fn error_response(status: u16, code: &str, message: &str) -> CaseResponse {
    let body = serde_json::json!({ "code": code, "message": message });
    CaseResponse::new(status)
        .with_header("Content-Type", "application/json")
        .with_body(body.to_string())
}

impl UserService for ScriptedUserService {
    fn list_users(&mut self, limit: u32, offset: u32) -> FuzzStateResult<Vec<EntityRecord>> {
        let mut query = BTreeMap::new();
        query.insert("limit".to_string(), serde_json::json!(limit));
        query.insert("offset".to_string(), serde_json::json!(offset));
        let resp = self.handle("GET", USERS_PATH, &query, None)?;
        if !resp.is_success() {
            return Err(FuzzStateError::Status {
                status: resp.status,
                context: format!("GET {USERS_PATH}"),
            });
        }
        parse_page(&resp.body)
    }

    fn create_user(&mut self, payload: &UserPayload) -> FuzzStateResult<CaseResponse> {
        let body = payload.to_json();
        self.handle("POST", USERS_PATH, &BTreeMap::new(), Some(&body))
    }

    fn delete_user(&mut self, id: i64) -> FuzzStateResult<CaseResponse> {
        self.handle("DELETE", &format!("{USERS_PATH}/{id}"), &BTreeMap::new(), None)
    }

    fn dispatch(&mut self, case: &Case) -> FuzzStateResult<CaseResponse> {
        let path = case.formatted_path();
        self.handle(case.method(), &path, &case.query, case.body.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PathValue, PayloadTemplate, USER_BY_ID_PATH, USER_ID_PARAM};

    #[test]
    fn scripted_create_then_read_and_delete() {
        let mut svc = ScriptedUserService::new().with_user(4, "existing");
        let payload = PayloadTemplate::default().build("fresh".to_string(), true);
        let created = svc.create_user(&payload).expect("create");
        assert_eq!(created.status, 201);
        assert_eq!(created.location(), Some("/api/v1/users/5"));

        let dup = svc.create_user(&payload).expect("create dup");
        assert_eq!(dup.status, 409);

        let read = Case::new("GET", USER_BY_ID_PATH).with_path_param(USER_ID_PARAM, PathValue::Int(5));
        assert_eq!(svc.dispatch(&read).expect("read").status, 200);

        assert_eq!(svc.delete_user(5).expect("delete").status, 204);
        assert_eq!(svc.dispatch(&read).expect("read again").status, 404);
        assert_eq!(svc.user_ids(), vec![4]);
    }

    #[test]
    fn scripted_rejects_bad_ids_and_bodies() {
        let mut svc = ScriptedUserService::new();
        let bad_id = Case::new("GET", USER_BY_ID_PATH)
            .with_path_param(USER_ID_PARAM, PathValue::Text("invalid-id".into()));
        let resp = svc.dispatch(&bad_id).expect("dispatch");
        assert_eq!(resp.status, 400);
        assert!(resp.body.contains("invalid_id"));

        let numeric_name = Case::new("POST", USERS_PATH).with_body(serde_json::json!({
            "name": "123", "age": 3, "birthday": "2000/01/01"
        }));
        assert_eq!(svc.dispatch(&numeric_name).expect("dispatch").status, 400);
    }

    #[test]
    fn scripted_list_pages_and_unreachable_mode() {
        let mut svc = ScriptedUserService::new().with_user(1, "a").with_user(2, "b").with_user(3, "c");
        let page = svc.list_users(2, 1).expect("list");
        assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2, 3]);

        svc.set_unreachable(true);
        assert!(matches!(svc.list_users(10, 0), Err(FuzzStateError::Transport(_))));
        assert_eq!(svc.calls().len(), 2);
    }
}
