use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, TimeZone, Utc};
use log::{debug, error, info, warn};
use rand::Rng;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::config::AppConfig;
use crate::error::Error;
use crate::events::{Event, EventSink};
use crate::models::LogLevel;
use crate::runner::AccountRunner;
use crate::store;

const TIMER_DAILY: &str = "daily";
const TIMER_FOLLOWUP: &str = "follow-up";
const TIMER_TOKEN_WARM: &str = "token-warm";

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub daily_hour: u32,
    pub utc_offset_hours: i32,
    pub jitter_max_minutes: u64,
    pub followup_delay_hours: u64,
    pub token_warm_interval_minutes: u64,
}

impl From<&AppConfig> for ScheduleConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            daily_hour: cfg.daily_hour,
            utc_offset_hours: cfg.utc_offset_hours,
            jitter_max_minutes: cfg.jitter_max_minutes,
            followup_delay_hours: cfg.followup_delay_hours,
            token_warm_interval_minutes: cfg.token_warm_interval_minutes,
        }
    }
}

struct Inner {
    timers: HashMap<String, JoinHandle<()>>,
    stop_tx: Option<watch::Sender<bool>>,
}

/// Owns the named, cancellable timers and the running flag; fires the daily
/// run (with jitter) plus a follow-up run, and processes accounts
/// sequentially within a batch.
#[derive(Clone)]
pub struct Scheduler {
    runner: AccountRunner,
    cfg: ScheduleConfig,
    events: Arc<dyn EventSink>,
    running: Arc<AtomicBool>,
    inner: Arc<Mutex<Inner>>,
}

impl Scheduler {
    pub fn new(runner: AccountRunner, cfg: ScheduleConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            runner,
            cfg,
            events,
            running: Arc::new(AtomicBool::new(false)),
            inner: Arc::new(Mutex::new(Inner {
                timers: HashMap::new(),
                stop_tx: None,
            })),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn runner(&self) -> &AccountRunner {
        &self.runner
    }

    /// Idempotent: logs a warning and returns if already running.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("scheduler already running, start ignored");
            return;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        {
            let mut inner = self.inner.lock().await;
            inner.stop_tx = Some(stop_tx);
            inner.timers.insert(
                TIMER_DAILY.to_string(),
                tokio::spawn(self.clone().daily_timer(stop_rx.clone())),
            );
            if self.cfg.token_warm_interval_minutes > 0 {
                inner.timers.insert(
                    TIMER_TOKEN_WARM.to_string(),
                    tokio::spawn(self.clone().token_warm_timer(stop_rx)),
                );
            }
        }

        info!("scheduler started (daily at {:02}:00, offset {:+}h)",
            self.cfg.daily_hour, self.cfg.utc_offset_hours);
        self.syslog(LogLevel::Info, "scheduler started".to_string()).await;
    }

    /// Signals every named timer, waits for each to exit, clears the timer
    /// set, flips the flag. Calling stop on a stopped scheduler is a no-op.
    /// An already-started account pipeline is not interrupted; pending
    /// timers exit at their next stop check, a mid-batch timer finishes the
    /// current account first.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("scheduler already stopped");
            return;
        }

        let drained: Vec<(String, JoinHandle<()>)> = {
            let mut inner = self.inner.lock().await;
            if let Some(stop_tx) = inner.stop_tx.take() {
                let _ = stop_tx.send(true);
            }
            inner.timers.drain().collect()
        };
        for (name, handle) in drained {
            let _ = handle.await;
            debug!("timer '{name}' stopped");
        }

        info!("scheduler stopped");
        self.syslog(LogLevel::Info, "scheduler stopped".to_string()).await;
    }

    /// Manual trigger of one account's pipeline.
    pub async fn run_account(&self, uid: i64) -> crate::error::Result<()> {
        self.runner.run_by_uid(uid).await
    }

    /// Manual trigger of one task's completion.
    pub async fn complete_task(&self, uid: i64, task_id: i64) -> crate::error::Result<serde_json::Value> {
        self.runner.complete_task(uid, task_id).await
    }

    /// Manual token refresh for one account.
    pub async fn refresh_token(&self, uid: i64) -> crate::error::Result<()> {
        self.runner.tokens().refresh(uid).await.map(|_| ())
    }

    async fn syslog(&self, level: LogLevel, message: String) {
        if let Err(err) =
            store::push_system_log(self.runner.store().as_ref(), level, message.as_str()).await
        {
            warn!("failed to persist system log entry: {err}");
        }
        self.events.publish(Event::SystemLog { level, message });
    }

    /// Daily timer: sleeps until the configured hour in the configured
    /// offset, defers by a uniform random delay, runs the batch, then arms
    /// the follow-up timer. Firing while stopped is a silent no-op.
    async fn daily_timer(self, mut stop_rx: watch::Receiver<bool>) {
        let offset = FixedOffset::east_opt(self.cfg.utc_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"));

        loop {
            let now = Utc::now().with_timezone(&offset);
            let wait = next_daily_wait(now, self.cfg.daily_hour);
            info!("next daily run in {}s", wait.as_secs());

            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
                _ = sleep(wait) => {}
            }

            if !self.is_running() {
                continue;
            }

            // Uniform random delay so runs never land at a fixed minute.
            let jitter_secs = if self.cfg.jitter_max_minutes > 0 {
                rand::thread_rng().gen_range(0..=self.cfg.jitter_max_minutes * 60)
            } else {
                0
            };
            info!("daily trigger fired, deferring {jitter_secs}s");

            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
                _ = sleep(Duration::from_secs(jitter_secs)) => {}
            }

            if !self.is_running() {
                continue;
            }

            self.run_batch().await;
            self.arm_followup(stop_rx.clone()).await;
        }

        debug!("daily timer exited");
    }

    /// One-shot follow-up run a fixed number of hours after a completed
    /// batch, independent of that batch's own random offset. The running
    /// check happens under the timer lock so a concurrent stop cannot leave
    /// an orphaned handle behind.
    async fn arm_followup(&self, mut stop_rx: watch::Receiver<bool>) {
        let delay = Duration::from_secs(self.cfg.followup_delay_hours * 3600);
        let scheduler = self.clone();

        let mut inner = self.inner.lock().await;
        if !self.is_running() {
            debug!("follow-up not armed, scheduler stopped");
            return;
        }

        let handle = tokio::spawn(async move {
            info!("follow-up run in {}h", scheduler.cfg.followup_delay_hours);
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        return;
                    }
                }
                _ = sleep(delay) => {}
            }
            if scheduler.is_running() {
                scheduler.run_batch().await;
            }
        });
        if let Some(previous) = inner.timers.insert(TIMER_FOLLOWUP.to_string(), handle) {
            previous.abort();
        }
    }

    /// Low-frequency token refresh keeping credentials warm without any
    /// task-visible activity.
    async fn token_warm_timer(self, mut stop_rx: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.cfg.token_warm_interval_minutes * 60);

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
                _ = sleep(interval) => {}
            }

            if !self.is_running() {
                continue;
            }

            let accounts = match store::load_active_accounts(self.runner.store().as_ref()).await {
                Ok(accounts) => accounts,
                Err(err) => {
                    error!("token warm: failed to load accounts: {err}");
                    continue;
                }
            };
            for account in accounts {
                if let Err(err) = self.runner.tokens().refresh(account.uid).await {
                    warn!("token warm: uid {} refresh failed: {err}", account.uid);
                }
            }
        }

        debug!("token warm timer exited");
    }

    /// Sequential batch over active accounts; deliberate, to bound request
    /// burst rate against the remote API. One account's failure never aborts
    /// the others.
    pub async fn run_batch(&self) {
        let accounts = match store::load_active_accounts(self.runner.store().as_ref()).await {
            Ok(accounts) => accounts,
            Err(err) => {
                error!("batch aborted, failed to load accounts: {err}");
                self.events.publish(Event::Error {
                    uid: None,
                    message: format!("failed to load accounts: {err}"),
                });
                return;
            }
        };

        info!("batch starting for {} account(s)", accounts.len());
        for account in accounts {
            if !self.is_running() {
                info!("scheduler stopped mid-batch, remaining accounts skipped");
                break;
            }
            let uid = account.uid;
            match self.runner.run(&account).await {
                Ok(()) => {}
                Err(err @ (Error::AuthExpired | Error::RefreshExhausted { .. })) => {
                    warn!("uid {uid}: run ended early: {err}");
                    self.syslog(
                        LogLevel::Warning,
                        format!("uid {uid} run ended early: {err}"),
                    )
                    .await;
                }
                Err(err) => {
                    error!("uid {uid}: run failed: {err}");
                    self.syslog(LogLevel::Error, format!("uid {uid} run failed: {err}"))
                        .await;
                    self.events.publish(Event::Error {
                        uid: Some(uid),
                        message: err.to_string(),
                    });
                }
            }
        }
        info!("batch finished");
    }
}

/// Time until the next occurrence of `hour:00:00` strictly after `now`.
fn next_daily_wait(now: DateTime<FixedOffset>, hour: u32) -> std::time::Duration {
    let candidate = now
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .expect("valid hour");
    let target = match now.timezone().from_local_datetime(&candidate).single() {
        Some(target) if target > now => target,
        _ => now
            .timezone()
            .from_local_datetime(&(candidate + ChronoDuration::days(1)))
            .single()
            .unwrap_or(now + ChronoDuration::days(1)),
    };
    (target - now).to_std().unwrap_or_default()
}
