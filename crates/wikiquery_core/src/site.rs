use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{ApiError, ApiErrorKind, Result, WikiError};
use crate::params::QueryParameters;
use crate::partition::SiteLimits;
use crate::transport::{ApiTransport, send_read, send_write};

const MAX_LOGIN_RETRIES: usize = 3;
const MAX_THROTTLE_WAIT_SECS: u64 = 60;
const DEFAULT_THROTTLE_WAIT_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AccountInfo {
    pub id: i64,
    pub name: String,
    pub anonymous: bool,
    pub rights: Vec<String>,
    pub groups: Vec<String>,
}

impl AccountInfo {
    pub fn site_limits(&self) -> SiteLimits {
        SiteLimits::from_rights(self.rights.as_slice())
    }

    pub fn has_right(&self, right: &str) -> bool {
        self.rights.iter().any(|item| item == right)
    }
}

/// Log in, retrying a bounded number of times when the server throttles.
pub fn login<A: ApiTransport + ?Sized>(api: &mut A, username: &str, password: &str) -> Result<String> {
    login_with_wait(api, username, password, sleep)
}

pub(crate) fn login_with_wait<A: ApiTransport + ?Sized>(
    api: &mut A,
    username: &str,
    password: &str,
    mut wait: impl FnMut(Duration),
) -> Result<String> {
    for attempt in 0..=MAX_LOGIN_RETRIES {
        let token = fetch_token(api, "login")?;
        let response = send_write(
            api,
            &QueryParameters::new()
                .with("action", "login")
                .with("lgname", username)
                .with("lgpassword", password)
                .with("lgtoken", token),
        );
        let payload = match response {
            Ok(payload) => payload,
            Err(WikiError::Api(error))
                if error.kind == ApiErrorKind::Throttled && attempt < MAX_LOGIN_RETRIES =>
            {
                warn!(attempt, code = %error.code, "login throttled, retrying");
                wait(throttle_delay(None));
                continue;
            }
            Err(error) => return Err(error),
        };

        let parsed: LoginResponse = serde_json::from_value(payload)?;
        match parsed.login.result.as_deref() {
            Some("Success") => {
                let name = parsed.login.lgusername.unwrap_or_else(|| username.to_string());
                info!(user = %name, "logged in");
                return Ok(name);
            }
            Some("Throttled") if attempt < MAX_LOGIN_RETRIES => {
                let delay = throttle_delay(parsed.login.wait);
                warn!(attempt, delay_secs = delay.as_secs(), "login throttled, waiting");
                wait(delay);
            }
            Some("Throttled") => {
                return Err(ApiError::with_kind(
                    ApiErrorKind::Throttled,
                    "throttled",
                    reason_text(parsed.login.reason.as_ref(), "login throttled"),
                )
                .into());
            }
            other => {
                let code = other.unwrap_or("unknown").to_ascii_lowercase();
                return Err(ApiError::with_kind(
                    ApiErrorKind::Unauthorized,
                    code,
                    reason_text(parsed.login.reason.as_ref(), "login failed"),
                )
                .into());
            }
        }
    }
    Err(ApiError::with_kind(
        ApiErrorKind::Throttled,
        "throttled",
        format!("login still throttled after {MAX_LOGIN_RETRIES} retries"),
    )
    .into())
}

fn throttle_delay(wait_secs: Option<u64>) -> Duration {
    Duration::from_secs(
        wait_secs
            .unwrap_or(DEFAULT_THROTTLE_WAIT_SECS)
            .min(MAX_THROTTLE_WAIT_SECS),
    )
}

fn reason_text(reason: Option<&Value>, fallback: &str) -> String {
    match reason {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => fallback.to_string(),
    }
}

/// Fetch a token of the given type (`csrf`, `login`, ...).
pub fn fetch_token<A: ApiTransport + ?Sized>(api: &mut A, token_type: &str) -> Result<String> {
    let response = send_read(
        api,
        &QueryParameters::query()
            .with("meta", "tokens")
            .with("type", token_type),
    )?;
    let key = format!("{token_type}token");
    response
        .get("query")
        .and_then(|query| query.get("tokens"))
        .and_then(|tokens| tokens.get(&key))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| WikiError::unexpected(format!("token response carried no {key}")))
}

pub fn fetch_csrf_token<A: ApiTransport + ?Sized>(api: &mut A) -> Result<String> {
    fetch_token(api, "csrf")
}

pub fn fetch_account_info<A: ApiTransport + ?Sized>(api: &mut A) -> Result<AccountInfo> {
    let response = send_read(
        api,
        &QueryParameters::query()
            .with("meta", "userinfo")
            .with("uiprop", vec!["rights", "groups"]),
    )?;
    let parsed: UserInfoResponse = serde_json::from_value(response)?;
    let info = parsed
        .query
        .userinfo
        .ok_or_else(|| WikiError::unexpected("userinfo response carried no userinfo node"))?;
    Ok(AccountInfo {
        id: info.id,
        name: info.name,
        anonymous: info.anon.is_some_and(|value| !matches!(value, Value::Bool(false))),
        rights: info.rights,
        groups: info.groups,
    })
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<Value>,
    lgusername: Option<String>,
    wait: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct UserInfoResponse {
    #[serde(default)]
    query: UserInfoQuery,
}

#[derive(Debug, Deserialize, Default)]
struct UserInfoQuery {
    userinfo: Option<UserInfoPayload>,
}

#[derive(Debug, Deserialize)]
struct UserInfoPayload {
    #[serde(default)]
    id: i64,
    name: String,
    anon: Option<Value>,
    #[serde(default)]
    rights: Vec<String>,
    #[serde(default)]
    groups: Vec<String>,
}
