use serde::{Deserialize, Serialize};

/// Maximum number of entries kept in the system log ring.
pub const MAX_SYSTEM_LOG_ENTRIES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Mac,
    Ios,
    Android,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Mac => "mac",
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }
}

/// One configured identity the engine signs in and acts on behalf of.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub uid: i64,
    pub uuid: String,
    pub flow_id: String,
    pub access_key: String,
    #[serde(default)]
    pub token: Option<String>,
    pub machine_id: String,
    pub platform: Platform,
    #[serde(default)]
    pub phone: Option<String>,
    pub is_active: bool,
    /// Millisecond timestamp of the last successful token refresh.
    #[serde(default)]
    pub token_updated_at: Option<i64>,
}

/// Wire task type. Unrecognized values are preserved for the warning log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    SignIn,
    Progress,
    Ignored,
    Unknown(i64),
}

impl TaskType {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => TaskType::SignIn,
            2 => TaskType::Progress,
            3 => TaskType::Ignored,
            other => TaskType::Unknown(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            TaskType::SignIn => 1,
            TaskType::Progress => 2,
            TaskType::Ignored => 3,
            TaskType::Unknown(code) => *code,
        }
    }
}

impl Serialize for TaskType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for TaskType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(TaskType::from_code(i64::deserialize(d)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    InProgress,
    Completed,
    Unknown(i64),
}

impl TaskState {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => TaskState::Ready,
            1 => TaskState::InProgress,
            2 => TaskState::Completed,
            other => TaskState::Unknown(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            TaskState::Ready => 0,
            TaskState::InProgress => 1,
            TaskState::Completed => 2,
            TaskState::Unknown(code) => *code,
        }
    }
}

impl Serialize for TaskState {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for TaskState {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(TaskState::from_code(i64::deserialize(d)?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub target: i64,
    pub state: TaskState,
}

/// Task list as persisted: replaced wholesale on each fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListSnapshot {
    pub tasks: Vec<Task>,
    pub fetched_at: i64,
}

/// Written once per successful completion call; keyed by (uid, task_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    pub uid: i64,
    pub task_id: i64,
    pub completed_at: i64,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemLogEntry {
    pub id: i64,
    pub message: String,
    #[serde(rename = "type")]
    pub level: LogLevel,
    pub timestamp: i64,
}

// ---- Remote API payloads ----

/// Generic response envelope: `code == 0` is success, a distinguished code
/// means the credential expired, anything else is an application error.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: serde::Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub token: String,
    pub access_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub lottery_tickets: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskListData {
    #[serde(default)]
    pub tasks: Vec<Task>,
}
