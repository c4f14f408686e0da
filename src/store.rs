use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;

use crate::error::{Error, Result};
use crate::models::{
    Account, CompletionRecord, LogLevel, SystemLogEntry, TaskListSnapshot,
    MAX_SYSTEM_LOG_ENTRIES,
};

/// Minimal persisted key-value contract the engine depends on.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

pub mod keys {
    pub const ACCOUNT_LIST: &str = "accounts";
    pub const SYSTEM_LOG: &str = "syslog";

    pub fn account(uid: i64) -> String {
        format!("account:{uid}")
    }

    pub fn tasks(uid: i64) -> String {
        format!("tasks:{uid}")
    }

    pub fn completion(uid: i64, task_id: i64) -> String {
        format!("completion:{uid}:{task_id}")
    }
}

/// One JSON file per key under a root directory.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys use ':' as a namespace separator; flatten for the filesystem.
        self.root.join(format!("{}.json", key.replace(':', "_")))
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::Store(format!("read {key}: {err}"))),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|err| Error::Store(format!("create store dir: {err}")))?;
        fs::write(self.path_for(key), value)
            .await
            .map_err(|err| Error::Store(format!("write {key}: {err}")))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::Store(format!("delete {key}: {err}"))),
        }
    }
}

/// In-memory store used by tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

// ---- Typed helpers ----

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: &str,
) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(bytes) => {
            let value = serde_json::from_slice(&bytes)
                .map_err(|err| Error::Store(format!("decode {key}: {err}")))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize>(store: &dyn StateStore, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)
        .map_err(|err| Error::Store(format!("encode {key}: {err}")))?;
    store.set(key, bytes).await
}

pub async fn load_account(store: &dyn StateStore, uid: i64) -> Result<Account> {
    get_json(store, &keys::account(uid))
        .await?
        .ok_or(Error::AccountNotFound(uid))
}

pub async fn save_account(store: &dyn StateStore, account: &Account) -> Result<()> {
    set_json(store, &keys::account(account.uid), account).await?;

    let mut list: Vec<i64> = get_json(store, keys::ACCOUNT_LIST).await?.unwrap_or_default();
    if !list.contains(&account.uid) {
        list.push(account.uid);
        set_json(store, keys::ACCOUNT_LIST, &list).await?;
    }
    Ok(())
}

/// Removes the account and its dependent task/completion-adjacent keys.
pub async fn delete_account(store: &dyn StateStore, uid: i64) -> Result<()> {
    // Completion markers are enumerated via the last task list, since the
    // kv contract has no scan.
    if let Some(snapshot) = load_task_list(store, uid).await? {
        for task in &snapshot.tasks {
            store.delete(&keys::completion(uid, task.task_id)).await?;
        }
    }
    store.delete(&keys::tasks(uid)).await?;
    store.delete(&keys::account(uid)).await?;

    let mut list: Vec<i64> = get_json(store, keys::ACCOUNT_LIST).await?.unwrap_or_default();
    list.retain(|existing| *existing != uid);
    set_json(store, keys::ACCOUNT_LIST, &list).await
}

pub async fn load_active_accounts(store: &dyn StateStore) -> Result<Vec<Account>> {
    let uids: Vec<i64> = get_json(store, keys::ACCOUNT_LIST).await?.unwrap_or_default();
    let mut accounts = Vec::with_capacity(uids.len());
    for uid in uids {
        match get_json::<Account>(store, &keys::account(uid)).await? {
            Some(account) if account.is_active => accounts.push(account),
            Some(_) => debug!("account {uid} inactive, skipping"),
            None => debug!("account {uid} listed but missing, skipping"),
        }
    }
    Ok(accounts)
}

pub async fn save_task_list(
    store: &dyn StateStore,
    uid: i64,
    snapshot: &TaskListSnapshot,
) -> Result<()> {
    set_json(store, &keys::tasks(uid), snapshot).await
}

pub async fn load_task_list(
    store: &dyn StateStore,
    uid: i64,
) -> Result<Option<TaskListSnapshot>> {
    get_json(store, &keys::tasks(uid)).await
}

pub async fn record_completion(
    store: &dyn StateStore,
    record: &CompletionRecord,
) -> Result<()> {
    set_json(store, &keys::completion(record.uid, record.task_id), record).await
}

/// Appends to the newest-first system log ring, capped at 100 entries.
pub async fn push_system_log(
    store: &dyn StateStore,
    level: LogLevel,
    message: impl Into<String>,
) -> Result<()> {
    let mut entries: Vec<SystemLogEntry> =
        get_json(store, keys::SYSTEM_LOG).await?.unwrap_or_default();

    let now = Utc::now().timestamp_millis();
    let next_id = entries.first().map(|entry| entry.id + 1).unwrap_or(1);
    entries.insert(
        0,
        SystemLogEntry {
            id: next_id,
            message: message.into(),
            level,
            timestamp: now,
        },
    );
    entries.truncate(MAX_SYSTEM_LOG_ENTRIES);

    set_json(store, keys::SYSTEM_LOG, &entries).await
}

pub async fn system_log(store: &dyn StateStore) -> Result<Vec<SystemLogEntry>> {
    Ok(get_json(store, keys::SYSTEM_LOG).await?.unwrap_or_default())
}
