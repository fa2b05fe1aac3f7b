use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ApiError, Result, WikiError};
use crate::params::QueryParameters;

/// Encoded requests longer than this are sent as a form body instead of a URL.
pub const MAX_GET_LENGTH: usize = 2_000;

/// The single seam between the query core and the network.
///
/// Implementations add `format=json`, perform the round trip and return the
/// decoded body. A top-level `error` node must be surfaced as `WikiError::Api`.
pub trait ApiTransport {
    fn get(&mut self, params: &[(String, String)]) -> Result<Value>;
    fn post(&mut self, params: &[(String, String)], is_write: bool) -> Result<Value>;
    fn request_count(&self) -> usize;
}

impl<T: ApiTransport + ?Sized> ApiTransport for &mut T {
    fn get(&mut self, params: &[(String, String)]) -> Result<Value> {
        (**self).get(params)
    }

    fn post(&mut self, params: &[(String, String)], is_write: bool) -> Result<Value> {
        (**self).post(params, is_write)
    }

    fn request_count(&self) -> usize {
        (**self).request_count()
    }
}

/// Send a read request, switching to POST when the URL would get too long.
pub fn send_read<A: ApiTransport + ?Sized>(api: &mut A, params: &QueryParameters) -> Result<Value> {
    let pairs = params.to_wire_pairs()?;
    let encoded_len = pairs
        .iter()
        .map(|(key, value)| key.len() + value.len() + 2)
        .sum::<usize>();
    if encoded_len > MAX_GET_LENGTH {
        api.post(&pairs, false)
    } else {
        api.get(&pairs)
    }
}

/// Send a write request (edit, move, delete, purge, login).
pub fn send_write<A: ApiTransport + ?Sized>(api: &mut A, params: &QueryParameters) -> Result<Value> {
    let pairs = params.to_wire_pairs()?;
    api.post(&pairs, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
}

/// Blocking `reqwest` transport with rate limiting and bounded retries.
pub struct HttpTransport {
    client: Client,
    api_url: Url,
    config: ClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let api_url = Url::parse(&config.api_url).map_err(|error| {
            WikiError::config(format!("invalid WIKI_API_URL {:?}: {error}", config.api_url))
        })?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            api_url,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn send(&mut self, method: Method, params: &[(String, String)], is_write: bool) -> Result<Value> {
        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };
        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        pairs.extend(params.iter().cloned());

        for attempt in 0..=max_retries {
            self.apply_rate_limit(is_write);
            debug!(
                method = ?method,
                attempt,
                action = params
                    .iter()
                    .find(|(key, _)| key == "action")
                    .map(|(_, value)| value.as_str())
                    .unwrap_or(""),
                "sending MediaWiki API request"
            );
            let request = match method {
                Method::Get => self.client.get(self.api_url.clone()).query(&pairs),
                Method::Post => self.client.post(self.api_url.clone()).form(&pairs),
            };

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            warn!(%status, attempt, "retrying MediaWiki API request");
                            self.wait_before_retry(attempt, is_write);
                            continue;
                        }
                        return Err(WikiError::Http { status });
                    }

                    let payload: Value = response.json()?;
                    if let Some(error) = ApiError::from_response(&payload) {
                        return Err(error.into());
                    }
                    return Ok(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        warn!(%error, attempt, "retrying MediaWiki API request");
                        self.wait_before_retry(attempt, is_write);
                        continue;
                    }
                    return Err(error.into());
                }
            }
        }

        Err(WikiError::unexpected(
            "MediaWiki API request exhausted retry budget",
        ))
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        sleep(Duration::from_millis(
            base.saturating_mul(multiplier).saturating_add(jitter),
        ));
    }
}

impl ApiTransport for HttpTransport {
    fn get(&mut self, params: &[(String, String)]) -> Result<Value> {
        self.send(Method::Get, params, false)
    }

    fn post(&mut self, params: &[(String, String)], is_write: bool) -> Result<Value> {
        self.send(Method::Post, params, is_write)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;

    use serde_json::Value;

    use super::ApiTransport;
    use crate::error::{ApiError, Result, WikiError};

    /// Replays scripted responses and records every request it receives.
    #[derive(Debug, Default)]
    pub(crate) struct MockTransport {
        responses: VecDeque<Value>,
        pub(crate) requests: Vec<Vec<(String, String)>>,
        pub(crate) writes: Vec<bool>,
        pub(crate) posts: Vec<bool>,
    }

    impl MockTransport {
        pub(crate) fn new(responses: Vec<Value>) -> Self {
            Self {
                responses: responses.into(),
                ..Self::default()
            }
        }

        pub(crate) fn push(&mut self, response: Value) {
            self.responses.push_back(response);
        }

        /// Value of `key` in the `index`-th request.
        pub(crate) fn param(&self, index: usize, key: &str) -> Option<&str> {
            self.requests
                .get(index)?
                .iter()
                .find(|(existing, _)| existing == key)
                .map(|(_, value)| value.as_str())
        }

        fn respond(
            &mut self,
            params: &[(String, String)],
            is_post: bool,
            is_write: bool,
        ) -> Result<Value> {
            self.requests.push(params.to_vec());
            self.posts.push(is_post);
            self.writes.push(is_write);
            let response = self.responses.pop_front().ok_or_else(|| {
                WikiError::unexpected(format!(
                    "mock transport has no response for request #{}",
                    self.requests.len()
                ))
            })?;
            if let Some(error) = ApiError::from_response(&response) {
                return Err(error.into());
            }
            Ok(response)
        }
    }

    impl ApiTransport for MockTransport {
        fn get(&mut self, params: &[(String, String)]) -> Result<Value> {
            self.respond(params, false, false)
        }

        fn post(&mut self, params: &[(String, String)], is_write: bool) -> Result<Value> {
            self.respond(params, true, is_write)
        }

        fn request_count(&self) -> usize {
            self.requests.len()
        }
    }
}
