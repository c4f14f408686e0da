use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use serde_json::Value;

use crate::api_client::ApiClient;
use crate::error::{Error, Result};
use crate::events::{Event, EventSink};
use crate::models::{Account, CompletionRecord, LogLevel, Task, TaskListSnapshot};
use crate::policy::{self, Action};
use crate::store::{self, StateStore};
use crate::token::TokenManager;

/// Per-account pipeline: token, task list, lottery draws, completions,
/// final state refresh. One invocation per account per scheduled run.
#[derive(Clone)]
pub struct AccountRunner {
    api: ApiClient,
    tokens: TokenManager,
    store: Arc<dyn StateStore>,
    events: Arc<dyn EventSink>,
}

impl AccountRunner {
    pub fn new(
        api: ApiClient,
        tokens: TokenManager,
        store: Arc<dyn StateStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            api,
            tokens,
            store,
            events,
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Single-retry-on-expiry: invoke the operation; on `AuthExpired`,
    /// refresh once and retry exactly once with the new credential. Any
    /// other failure, including a second `AuthExpired`, propagates
    /// unmodified.
    async fn call_with_refresh<T, F, Fut>(&self, account: &mut Account, op: F) -> Result<T>
    where
        F: Fn(ApiClient, Account) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match op(self.api.clone(), account.clone()).await {
            Err(Error::AuthExpired) => {
                info!("uid {}: credential expired, refreshing once", account.uid);
                *account = self.tokens.refresh(account.uid).await?;
                op(self.api.clone(), account.clone()).await
            }
            other => other,
        }
    }

    /// Best-effort structured log entry; a store failure must not fail a run.
    async fn syslog(&self, level: LogLevel, message: String) {
        if let Err(err) = store::push_system_log(self.store.as_ref(), level, message.as_str()).await {
            warn!("failed to persist system log entry: {err}");
        }
        self.events.publish(Event::SystemLog { level, message });
    }

    /// Loads the account and runs the full pipeline; the manual-trigger
    /// entry point used by operator controls.
    pub async fn run_by_uid(&self, uid: i64) -> Result<()> {
        let account = store::load_account(self.store.as_ref(), uid).await?;
        self.run(&account).await
    }

    pub async fn run(&self, account: &Account) -> Result<()> {
        let uid = account.uid;
        info!("uid {uid}: account run started");

        // 1. Ensure a credential exists; a missing token forces a refresh.
        let mut account = self.tokens.ensure_token(account).await?;

        // 2. Fetch the task list exactly once and replace persisted state.
        let tasks = self
            .call_with_refresh(&mut account, |api, acct| async move {
                api.fetch_task_list(&acct).await
            })
            .await?;
        self.persist_tasks(uid, &tasks).await?;

        // 3. Drain available lottery draws, one per ticket, sequentially.
        let user_info = self
            .call_with_refresh(&mut account, |api, acct| async move {
                api.fetch_user_info(&acct).await
            })
            .await?;
        self.events.publish(Event::UserInfoUpdated {
            uid,
            info: user_info.clone(),
        });
        if user_info.lottery_tickets > 0 {
            self.drain_lottery(&mut account, user_info.lottery_tickets).await?;
        }

        // 4. Classify and complete; one task's failure never aborts the rest.
        for task in &tasks {
            match policy::classify(task) {
                Action::CompleteNow => {
                    if let Err(err) = self.complete_one(&mut account, task).await {
                        if err.is_fatal_for_run() {
                            return Err(err);
                        }
                        warn!("uid {uid}: task {} failed: {err}", task.task_id);
                        self.syslog(
                            LogLevel::Error,
                            format!("task '{}' failed for uid {uid}: {err}", task.name),
                        )
                        .await;
                        self.events.publish(Event::Error {
                            uid: Some(uid),
                            message: err.to_string(),
                        });
                    }
                }
                Action::Defer => {
                    info!(
                        "uid {uid}: task {} waiting ({}/{})",
                        task.task_id, task.value, task.target
                    );
                    self.events.publish(Event::TaskWaiting {
                        uid,
                        task: task.clone(),
                    });
                }
                Action::Skip => {}
                Action::Unknown => {
                    warn!(
                        "uid {uid}: task {} has unknown type {}, skipping",
                        task.task_id,
                        task.task_type.code()
                    );
                    self.syslog(
                        LogLevel::Warning,
                        format!(
                            "unknown task type {} for '{}', skipped",
                            task.task_type.code(),
                            task.name
                        ),
                    )
                    .await;
                }
            }
        }

        // 5. Refresh externally-visible state once more; failure here is a
        // warning, not a failed run.
        if let Err(err) = self.refresh_visible_state(&mut account).await {
            warn!("uid {uid}: final state refresh failed: {err}");
            self.syslog(
                LogLevel::Warning,
                format!("final state refresh failed for uid {uid}: {err}"),
            )
            .await;
        }

        info!("uid {uid}: account run finished");
        Ok(())
    }

    async fn persist_tasks(&self, uid: i64, tasks: &[Task]) -> Result<()> {
        let snapshot = TaskListSnapshot {
            tasks: tasks.to_vec(),
            fetched_at: Utc::now().timestamp_millis(),
        };
        store::save_task_list(self.store.as_ref(), uid, &snapshot).await?;
        self.events.publish(Event::TasksUpdated {
            uid,
            count: tasks.len(),
        });
        Ok(())
    }

    /// One draw per ticket, sequentially. A draw that still reports
    /// `AuthExpired` after its own retry aborts the remaining draws for this
    /// run; any other per-draw failure is logged and the loop continues.
    async fn drain_lottery(&self, account: &mut Account, tickets: i64) -> Result<()> {
        let uid = account.uid;
        info!("uid {uid}: drawing {tickets} lottery ticket(s)");

        for n in 1..=tickets {
            match self
                .call_with_refresh(account, |api, acct| async move {
                    api.draw_lottery(&acct).await
                })
                .await
            {
                Ok(prize) => {
                    info!("uid {uid}: draw {n}/{tickets} succeeded");
                    self.syslog(
                        LogLevel::Success,
                        format!("uid {uid} lottery draw {n}/{tickets}: {prize}"),
                    )
                    .await;
                }
                Err(Error::AuthExpired) => {
                    warn!(
                        "uid {uid}: draw {n}/{tickets} expired again after refresh, \
                         deferring remaining draws to the next run"
                    );
                    break;
                }
                Err(err) if err.is_fatal_for_run() => return Err(err),
                Err(err) => {
                    warn!("uid {uid}: draw {n}/{tickets} failed: {err}");
                    self.events.publish(Event::Error {
                        uid: Some(uid),
                        message: format!("lottery draw failed: {err}"),
                    });
                }
            }
        }
        Ok(())
    }

    async fn complete_one(&self, account: &mut Account, task: &Task) -> Result<()> {
        let uid = account.uid;
        let task_id = task.task_id;

        let result = self
            .call_with_refresh(account, move |api, acct| async move {
                api.complete_task(&acct, task_id).await
            })
            .await?;

        let record = CompletionRecord {
            uid,
            task_id,
            completed_at: Utc::now().timestamp_millis(),
            result,
        };
        store::record_completion(self.store.as_ref(), &record).await?;

        info!("uid {uid}: task {task_id} '{}' completed", task.name);
        self.syslog(
            LogLevel::Success,
            format!("task '{}' completed for uid {uid}", task.name),
        )
        .await;
        self.events.publish(Event::TaskCompleted {
            uid,
            task_id,
            name: task.name.clone(),
        });
        Ok(())
    }

    /// Post-run re-fetch of user info and task list, purely so persisted
    /// state and dashboard views reflect the completions just made.
    async fn refresh_visible_state(&self, account: &mut Account) -> Result<()> {
        let uid = account.uid;

        let tasks = self
            .call_with_refresh(account, |api, acct| async move {
                api.fetch_task_list(&acct).await
            })
            .await?;
        self.persist_tasks(uid, &tasks).await?;

        let user_info = self
            .call_with_refresh(account, |api, acct| async move {
                api.fetch_user_info(&acct).await
            })
            .await?;
        self.events.publish(Event::UserInfoUpdated {
            uid,
            info: user_info,
        });
        Ok(())
    }

    /// Manual single-task completion, used by operator controls. Issues the
    /// completion call without consulting prior CompletionRecords
    /// (at-least-once, see DESIGN.md).
    pub async fn complete_task(&self, uid: i64, task_id: i64) -> Result<Value> {
        let account = store::load_account(self.store.as_ref(), uid).await?;
        let mut account = self.tokens.ensure_token(&account).await?;

        let result = self
            .call_with_refresh(&mut account, move |api, acct| async move {
                api.complete_task(&acct, task_id).await
            })
            .await?;

        let record = CompletionRecord {
            uid,
            task_id,
            completed_at: Utc::now().timestamp_millis(),
            result: result.clone(),
        };
        store::record_completion(self.store.as_ref(), &record).await?;
        self.events.publish(Event::TaskCompleted {
            uid,
            task_id,
            name: format!("task {task_id}"),
        });
        Ok(result)
    }
}
