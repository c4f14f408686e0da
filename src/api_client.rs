use std::time::Duration;

use log::debug;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::models::{Account, ApiEnvelope, LoginData, Task, TaskListData, UserInfo};

pub const CODE_OK: i64 = 0;
/// The remote service's distinguished expired-credential code.
pub const CODE_AUTH_EXPIRED: i64 = 10401;

const PATH_LOGIN: &str = "/api/user/login";
const PATH_USER_INFO: &str = "/api/user/info";
const PATH_TASK_LIST: &str = "/api/task/list";
const PATH_TASK_COMPLETE: &str = "/api/task/complete";
const PATH_LOTTERY_DRAW: &str = "/api/lottery/draw";

/// Stateless wrapper over the remote task/rewards service. Classifies every
/// response into success / auth-expired / other-failure; never retries.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: String, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|err| Error::Transport(format!("failed to create HTTP client: {err}")))?;

        Ok(Self { client, base_url })
    }

    fn auth_header(token: &str) -> String {
        if token.trim_start().starts_with("Bearer ") {
            token.trim().to_string()
        } else {
            format!("Bearer {}", token.trim())
        }
    }

    fn identity_body(account: &Account) -> Value {
        json!({
            "uid": account.uid,
            "uuid": account.uuid,
            "flowId": account.flow_id,
            "accessKey": account.access_key,
        })
    }

    async fn post<T: DeserializeOwned>(
        &self,
        account: &Account,
        path: &str,
        mut body: Value,
    ) -> Result<ApiEnvelope<T>> {
        let url = format!("{}{}", self.base_url, path);
        debug!("uid {}: POST {}", account.uid, url);

        // Merge account identity into whatever op-specific fields were given.
        if let (Value::Object(target), Value::Object(identity)) =
            (&mut body, Self::identity_body(account))
        {
            for (key, value) in identity {
                target.entry(key).or_insert(value);
            }
        }

        let response = self
            .client
            .post(&url)
            .header(
                AUTHORIZATION,
                Self::auth_header(account.token.as_deref().unwrap_or_default()),
            )
            .header(CONTENT_TYPE, "application/json")
            .header("X-Machine-Id", &account.machine_id)
            .header("X-Platform", account.platform.as_str())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!("{path} HTTP error: {status}")));
        }

        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|err| Error::Transport(format!("{path} invalid JSON response: {err}")))?;

        match envelope.code {
            CODE_OK => Ok(envelope),
            CODE_AUTH_EXPIRED => Err(Error::AuthExpired),
            code => Err(Error::Api {
                code,
                message: envelope.msg.unwrap_or_else(|| "unknown error".to_string()),
            }),
        }
    }

    fn require_data<T>(path: &str, envelope: ApiEnvelope<T>) -> Result<T> {
        envelope
            .data
            .ok_or_else(|| Error::Transport(format!("{path} response missing data")))
    }

    /// Login-check: validates/renews the credential. The current token rides
    /// along in the body as a continuity hint.
    pub async fn check_login(&self, account: &Account) -> Result<LoginData> {
        let body = json!({ "token": account.token.as_deref().unwrap_or_default() });
        let envelope = self.post(account, PATH_LOGIN, body).await?;
        Self::require_data(PATH_LOGIN, envelope)
    }

    pub async fn fetch_user_info(&self, account: &Account) -> Result<UserInfo> {
        let envelope = self.post(account, PATH_USER_INFO, json!({})).await?;
        Self::require_data(PATH_USER_INFO, envelope)
    }

    pub async fn fetch_task_list(&self, account: &Account) -> Result<Vec<Task>> {
        let envelope: ApiEnvelope<TaskListData> =
            self.post(account, PATH_TASK_LIST, json!({})).await?;
        Ok(Self::require_data(PATH_TASK_LIST, envelope)?.tasks)
    }

    pub async fn complete_task(&self, account: &Account, task_id: i64) -> Result<Value> {
        let body = json!({ "taskId": task_id });
        let envelope: ApiEnvelope<Value> = self.post(account, PATH_TASK_COMPLETE, body).await?;
        Ok(envelope.data.unwrap_or(Value::Null))
    }

    pub async fn draw_lottery(&self, account: &Account) -> Result<Value> {
        let envelope: ApiEnvelope<Value> =
            self.post(account, PATH_LOTTERY_DRAW, json!({})).await?;
        Ok(envelope.data.unwrap_or(Value::Null))
    }
}
