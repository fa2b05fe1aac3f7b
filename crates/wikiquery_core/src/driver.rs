use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::continuation::{ContinuationState, ContinuationStep, parse_continuation};
use crate::error::{Result, WikiError};
use crate::params::QueryParameters;
use crate::transport::{ApiTransport, send_read};

const PAGES_KEY: &str = "pages";

#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    /// Fragment keys whose entities are dropped once their page id was
    /// already emitted by this driver. Empty disables dedup.
    pub distinct_keys: Vec<String>,
    pub cancel: CancellationToken,
}

impl DriverOptions {
    /// Dedup the `pages` node.
    pub fn distinct() -> Self {
        Self::default().distinct_in(PAGES_KEY)
    }

    /// Also dedup the entities listed under `key` (a list module's node).
    pub fn distinct_in(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.distinct_keys.contains(&key) {
            self.distinct_keys.push(key);
        }
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    Running,
    Finished,
}

/// Lazy iterator over the `query` fragments of one `action=query` request
/// and its continuations.
///
/// Every call to `next` performs at most the round trips needed to produce
/// one fragment. Each request is the untouched base parameters plus only the
/// continuation returned by the previous response.
pub struct QueryPages<'a, A: ApiTransport + ?Sized> {
    api: &'a mut A,
    base: QueryParameters,
    continuation: ContinuationState,
    options: DriverOptions,
    seen: HashSet<i64>,
    state: DriverState,
    requests: usize,
}

impl<'a, A: ApiTransport + ?Sized> QueryPages<'a, A> {
    pub fn new(api: &'a mut A, base: QueryParameters, options: DriverOptions) -> Result<Self> {
        match base.wire_value("action")?.as_deref() {
            Some("query") => {}
            other => {
                return Err(WikiError::config(format!(
                    "paginated queries require action=query, got action={}",
                    other.unwrap_or("<none>")
                )));
            }
        }
        Ok(Self {
            api,
            base,
            continuation: ContinuationState::default(),
            options,
            seen: HashSet::new(),
            state: DriverState::Running,
            requests: 0,
        })
    }

    /// Parameters the next request will be sent with.
    pub fn params(&self) -> QueryParameters {
        let mut params = self.base.clone();
        self.continuation.apply_to(&mut params);
        params
    }

    pub fn request_count(&self) -> usize {
        self.requests
    }

    /// Drain the driver, merging every fragment into one `query` node.
    pub fn collect_merged(self) -> Result<Value> {
        let mut merged = Value::Object(Map::new());
        for fragment in self {
            merge_fragment(&mut merged, fragment?);
        }
        Ok(merged)
    }

    fn finish_with<T>(&mut self, error: WikiError) -> Option<Result<T>> {
        self.state = DriverState::Finished;
        Some(Err(error))
    }

    fn step(&mut self) -> Option<Result<Value>> {
        loop {
            if self.state == DriverState::Finished {
                return None;
            }
            if self.options.cancel.is_cancelled() {
                debug!(requests = self.requests, "query cancelled");
                return self.finish_with(WikiError::Cancelled);
            }

            self.requests += 1;
            let sent = self.params();
            let response = match send_read(&mut *self.api, &sent) {
                Ok(response) => response,
                Err(error) => return self.finish_with(error),
            };
            let step = match parse_continuation(&response, &sent) {
                Ok(step) => step,
                Err(error) => return self.finish_with(error),
            };
            let fragment = response.get("query").cloned();

            match step {
                ContinuationStep::Loop(state) => {
                    warn!(
                        keys = ?state.keys(),
                        params = %sent,
                        "server repeated the continuation that was just sent"
                    );
                    return self.finish_with(WikiError::ContinuationLoop { keys: state.keys() });
                }
                ContinuationStep::Done => self.state = DriverState::Finished,
                ContinuationStep::Advance(state) => {
                    debug!(keys = ?state.keys(), "advancing query continuation");
                    self.continuation = state;
                }
            }

            match fragment {
                Some(mut fragment) => {
                    if !self.options.distinct_keys.is_empty() {
                        let removed =
                            strip_seen(&mut fragment, &self.options.distinct_keys, &mut self.seen);
                        if removed > 0 {
                            debug!(removed, "dropped entities already emitted by this query");
                        }
                    }
                    return Some(Ok(fragment));
                }
                None if self.state == DriverState::Running => {
                    warn!(
                        request = self.requests,
                        "query response carried no results, continuing"
                    );
                }
                None => return None,
            }
        }
    }
}

impl<A: ApiTransport + ?Sized> Iterator for QueryPages<'_, A> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.step()
    }
}

/// Remove entries under `keys` whose `pageid` was already seen. Returns how
/// many went.
fn strip_seen(fragment: &mut Value, keys: &[String], seen: &mut HashSet<i64>) -> usize {
    let Some(object) = fragment.as_object_mut() else {
        return 0;
    };
    let mut removed = 0;
    for key in keys {
        let Some(value) = object.get_mut(key) else {
            continue;
        };
        match value {
            Value::Array(items) => {
                let before = items.len();
                items.retain(|item| keep_unseen(item, seen));
                removed += before - items.len();
            }
            Value::Object(map) if map.values().all(Value::is_object) => {
                let before = map.len();
                map.retain(|_, item| keep_unseen(item, seen));
                removed += before - map.len();
            }
            _ => {}
        }
    }
    removed
}

fn keep_unseen(item: &Value, seen: &mut HashSet<i64>) -> bool {
    match item.get("pageid").and_then(Value::as_i64) {
        Some(id) if id > 0 => seen.insert(id),
        _ => true,
    }
}

/// Merge a later `query` fragment into an accumulated one.
///
/// Page entries are matched by `pageid` (or `title` when there is no id) and
/// merged field by field; other arrays are concatenated; scalars are replaced.
pub fn merge_fragment(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(target), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match target.get_mut(&key) {
                    Some(existing) if key == PAGES_KEY => merge_pages(existing, value),
                    Some(existing) => merge_fragment(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(incoming)) => target.extend(incoming),
        (target, incoming) => *target = incoming,
    }
}

fn merge_pages(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Array(target), Value::Array(incoming)) => {
            for page in incoming {
                let key = page_key(&page);
                let position = key.as_ref().and_then(|key| {
                    target
                        .iter()
                        .position(|item| page_key(item).as_ref() == Some(key))
                });
                match position {
                    Some(index) => merge_fragment(&mut target[index], page),
                    None => target.push(page),
                }
            }
        }
        (target, incoming) => merge_fragment(target, incoming),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PageKey {
    Id(i64),
    Title(String),
}

fn page_key(page: &Value) -> Option<PageKey> {
    if let Some(id) = page.get("pageid").and_then(Value::as_i64)
        && id > 0
    {
        return Some(PageKey::Id(id));
    }
    page.get("title")
        .and_then(Value::as_str)
        .map(|title| PageKey::Title(title.to_string()))
}
