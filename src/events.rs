use log::{error, info, warn};
use serde::Serialize;

use crate::models::{LogLevel, Task, UserInfo};

/// Fire-and-forget notifications pushed towards the dashboard transport.
/// Losing one must never affect engine correctness.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Event {
    #[serde(rename_all = "camelCase")]
    TasksUpdated { uid: i64, count: usize },
    #[serde(rename_all = "camelCase")]
    TaskCompleted { uid: i64, task_id: i64, name: String },
    /// A progress task below target, deferred to the next scheduled run.
    #[serde(rename_all = "camelCase")]
    TaskWaiting { uid: i64, task: Task },
    #[serde(rename_all = "camelCase")]
    UserInfoUpdated { uid: i64, info: UserInfo },
    #[serde(rename_all = "camelCase")]
    SystemLog { level: LogLevel, message: String },
    #[serde(rename_all = "camelCase")]
    Error { uid: Option<i64>, message: String },
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: Event);
}

/// Default sink: mirrors every event into the process log.
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: Event) {
        match &event {
            Event::SystemLog { level: LogLevel::Error, message } => error!("{message}"),
            Event::SystemLog { level: LogLevel::Warning, message } => warn!("{message}"),
            Event::SystemLog { message, .. } => info!("{message}"),
            Event::Error { uid, message } => match uid {
                Some(uid) => error!("account {uid}: {message}"),
                None => error!("{message}"),
            },
            other => info!("event: {}", serde_json::to_string(other).unwrap_or_default()),
        }
    }
}

/// Sink that drops everything; useful when a caller only wants return values.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: Event) {}
}
