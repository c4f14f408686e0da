use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use tokio::time::{sleep, Duration};

use crate::api_client::ApiClient;
use crate::error::{Error, Result};
use crate::models::Account;
use crate::store::{self, StateStore};

/// Ensures a valid bearer credential exists for an account before use.
///
/// A refreshed token is persisted before any dependent call proceeds. Each
/// attempt reloads the latest persisted record so a concurrent update is not
/// clobbered with stale in-memory data (last write still wins, see DESIGN.md).
#[derive(Clone)]
pub struct TokenManager {
    api: ApiClient,
    store: Arc<dyn StateStore>,
    max_attempts: u32,
    backoff_secs: u64,
}

impl TokenManager {
    pub fn new(
        api: ApiClient,
        store: Arc<dyn StateStore>,
        max_attempts: u32,
        backoff_secs: u64,
    ) -> Self {
        Self {
            api,
            store,
            max_attempts,
            backoff_secs,
        }
    }

    /// Returns an account guaranteed to carry a token, forcing a refresh
    /// when none is present.
    pub async fn ensure_token(&self, account: &Account) -> Result<Account> {
        if account.token.is_some() {
            return Ok(account.clone());
        }
        info!("uid {}: no token present, forcing refresh", account.uid);
        self.refresh(account.uid).await
    }

    /// Refreshes the credential with bounded linear backoff, persisting the
    /// result immediately on success. Fails with `RefreshExhausted` after
    /// the configured number of attempts.
    pub async fn refresh(&self, uid: i64) -> Result<Account> {
        let mut last_err: Option<Error> = None;

        for attempt in 1..=self.max_attempts {
            let mut account = store::load_account(self.store.as_ref(), uid).await?;

            match self.api.check_login(&account).await {
                Ok(login) => {
                    account.token = Some(login.token);
                    account.access_key = login.access_key;
                    account.token_updated_at = Some(Utc::now().timestamp_millis());
                    store::save_account(self.store.as_ref(), &account).await?;
                    info!("uid {uid}: token refreshed (attempt {attempt})");
                    return Ok(account);
                }
                Err(err) => {
                    warn!(
                        "uid {uid}: token refresh attempt {attempt}/{} failed: {err}",
                        self.max_attempts
                    );
                    last_err = Some(err);
                    if attempt < self.max_attempts {
                        sleep(Duration::from_secs(attempt as u64 * self.backoff_secs)).await;
                    }
                }
            }
        }

        Err(Error::RefreshExhausted {
            attempts: self.max_attempts,
            last: Box::new(
                last_err.unwrap_or_else(|| Error::Transport("no refresh attempts made".into())),
            ),
        })
    }
}
