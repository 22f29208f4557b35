//! Typed user payloads and the canned career-history sub-resource.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CareerHistory {
    pub title: String,
    pub period: Period,
}

impl Default for CareerHistory {
    fn default() -> Self {
        Self {
            title: "Software Engineer".to_string(),
            period: Period {
                from: "2018/04/01".to_string(),
                to: "2021/03/31".to_string(),
            },
        }
    }
}

/// Body accepted by both create and update on the user resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPayload {
    pub name: String,
    pub age: u32,
    pub birthday: String,
    pub height: f64,
    pub zip_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub career_histories: Option<Vec<CareerHistory>>,
}

impl UserPayload {
    /// JSON body as sent on the wire. A struct of plain fields cannot fail to serialize.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Fixed field values for every built payload. The name is always supplied by the caller.
#[derive(Debug, Clone)]
pub struct PayloadTemplate {
    pub age: u32,
    pub birthday: String,
    pub height: f64,
    pub zip_code: String,
    pub career: CareerHistory,
}

impl Default for PayloadTemplate {
    fn default() -> Self {
        Self {
            age: 30,
            birthday: "1994/04/01".to_string(),
            height: 170.5,
            zip_code: "123-4567".to_string(),
            career: CareerHistory::default(),
        }
    }
}

impl PayloadTemplate {
    /// Each call gets its own copy of the career entry; callers may mutate freely.
    pub fn build(&self, name: String, include_career: bool) -> UserPayload {
        UserPayload {
            name,
            age: self.age,
            birthday: self.birthday.clone(),
            height: self.height,
            zip_code: self.zip_code.clone(),
            career_histories: include_career.then(|| vec![self.career.clone()]),
        }
    }
}
