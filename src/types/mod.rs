use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declared type of a flag's variation, as sent by the server in
/// `variation_data_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagType {
    Boolean,
    String,
    Number,
    Json,
}

impl FlagType {
    /// Parses a server type tag. Matching is case-insensitive.
    pub fn parse(tag: &str) -> Option<FlagType> {
        match tag.to_ascii_lowercase().as_str() {
            "boolean" | "bool" => Some(FlagType::Boolean),
            "string" | "text" => Some(FlagType::String),
            "number" | "numeric" => Some(FlagType::Number),
            "json" | "object" => Some(FlagType::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    String(String),
    Number(f64),
    Json(serde_json::Value),
}

impl FlagValue {
    /// Converts a raw variation into the declared type.
    ///
    /// Returns `None` when the raw value cannot represent that type; callers
    /// then keep the raw value as-is.
    pub fn from_typed(raw: &serde_json::Value, flag_type: FlagType) -> Option<FlagValue> {
        use serde_json::Value;

        match (flag_type, raw) {
            (FlagType::Boolean, Value::Bool(b)) => Some(FlagValue::Bool(*b)),
            (FlagType::Boolean, Value::String(s)) => s.parse::<bool>().ok().map(FlagValue::Bool),
            (FlagType::String, Value::String(s)) => Some(FlagValue::String(s.clone())),
            (FlagType::Number, Value::Number(n)) => n.as_f64().map(FlagValue::Number),
            (FlagType::Number, Value::String(s)) => s.trim().parse::<f64>().ok().map(FlagValue::Number),
            (FlagType::Json, Value::Object(_)) | (FlagType::Json, Value::Array(_)) => {
                Some(FlagValue::Json(raw.clone()))
            }
            (FlagType::Json, Value::String(s)) => match serde_json::from_str::<Value>(s) {
                Ok(parsed @ Value::Object(_)) | Ok(parsed @ Value::Array(_)) => {
                    Some(FlagValue::Json(parsed))
                }
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            FlagValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FlagValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            FlagValue::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn flag_type(&self) -> FlagType {
        match self {
            FlagValue::Bool(_) => FlagType::Boolean,
            FlagValue::String(_) => FlagType::String,
            FlagValue::Number(_) => FlagType::Number,
            FlagValue::Json(_) => FlagType::Json,
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Bool(value)
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        FlagValue::String(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::String(value.to_string())
    }
}

impl From<f64> for FlagValue {
    fn from(value: f64) -> Self {
        FlagValue::Number(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        FlagValue::Number(value as f64)
    }
}

impl From<serde_json::Value> for FlagValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(b) => FlagValue::Bool(b),
            serde_json::Value::String(s) => FlagValue::String(s),
            serde_json::Value::Number(n) => FlagValue::Number(n.as_f64().unwrap_or(0.0)),
            other => FlagValue::Json(other),
        }
    }
}

/// Experiment metadata attached to a flag; its presence makes flag reads
/// produce summary records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceInfo {
    pub config_id: String,
    pub variation_id: String,
    pub experience_id: String,
    pub behaviour_id: Option<String>,
    pub rule_id: Option<String>,
    #[serde(default)]
    pub is_template_config: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlagEntry {
    pub value: FlagValue,
    pub experience: Option<ExperienceInfo>,
}

impl FlagEntry {
    pub fn new(value: FlagValue) -> Self {
        Self {
            value,
            experience: None,
        }
    }

    pub fn with_experience(mut self, experience: ExperienceInfo) -> Self {
        self.experience = Some(experience);
        self
    }
}

/// Immutable view of the remote configuration at one point in time.
///
/// A snapshot is never mutated after construction; a newer fetch produces a
/// new snapshot that replaces this one wholesale.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    flags: HashMap<String, FlagEntry>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl ConfigSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(
        flags: HashMap<String, FlagEntry>,
        etag: Option<String>,
        last_modified: Option<String>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            flags,
            etag,
            last_modified,
            fetched_at: Some(fetched_at),
        }
    }

    pub fn get(&self, key: &str) -> Option<&FlagValue> {
        self.flags.get(key).map(|entry| &entry.value)
    }

    pub fn entry(&self, key: &str) -> Option<&FlagEntry> {
        self.flags.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.flags.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.flags.keys().cloned().collect()
    }

    /// All flag values, detached from the snapshot.
    pub fn values(&self) -> HashMap<String, FlagValue> {
        self.flags
            .iter()
            .map(|(k, entry)| (k.clone(), entry.value.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// A user event waiting for delivery. `session_id` is the session that was
/// active when the event was tracked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_customer_id: String,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    pub event_timestamp: DateTime<Utc>,
    pub session_id: String,
    pub insert_id: String,
}

/// One record per experience that a flag read exposed the user to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub config_id: String,
    pub variation_id: String,
    pub experience_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub behaviour_id: Option<String>,
    pub user_id: Option<String>,
    pub session_id: String,
    pub requested_time: DateTime<Utc>,
    #[serde(default)]
    pub is_template_config: bool,
}

impl SummaryRecord {
    /// Builds a summary for `experience` as seen by `user` in `session_id`.
    pub fn from_experience(
        experience: &ExperienceInfo,
        user: &CFUser,
        session_id: impl Into<String>,
        requested_time: DateTime<Utc>,
    ) -> Self {
        Self {
            config_id: experience.config_id.clone(),
            variation_id: experience.variation_id.clone(),
            experience_id: experience.experience_id.clone(),
            rule_id: experience.rule_id.clone(),
            behaviour_id: experience.behaviour_id.clone(),
            user_id: user.user_customer_id.clone(),
            session_id: session_id.into(),
            requested_time,
            is_template_config: experience.is_template_config,
        }
    }
}

/// The user context sent with every config fetch and delivery payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CFUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_customer_id: Option<String>,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

impl CFUser {
    pub fn new(user_customer_id: impl Into<String>) -> Self {
        Self {
            user_customer_id: Some(user_customer_id.into()),
            anonymous: false,
            properties: HashMap::new(),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            user_customer_id: None,
            anonymous: true,
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}
