use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ApiError, ApiErrorKind, Result, WikiError};
use crate::page::flag;
use crate::params::QueryParameters;
use crate::partition::{SiteLimits, partition};
use crate::transport::{ApiTransport, send_write};

#[derive(Debug, Clone, Default)]
pub struct EditRequest {
    pub title: String,
    pub text: String,
    pub summary: String,
    pub minor: bool,
    pub bot: bool,
    /// Timestamp of the revision the edit is based on; enables conflict detection.
    pub base_timestamp: Option<DateTime<Utc>>,
    pub create_only: bool,
}

impl EditRequest {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    fn to_params(&self, token: &str) -> QueryParameters {
        QueryParameters::new()
            .with("action", "edit")
            .with("title", self.title.as_str())
            .with("text", self.text.as_str())
            .with("summary", self.summary.as_str())
            .with("minor", self.minor)
            .with("bot", self.bot)
            .with("basetimestamp", self.base_timestamp)
            .with("createonly", self.create_only)
            .with("token", token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditOutcome {
    pub result: String,
    pub page_id: Option<i64>,
    pub new_revision_id: Option<i64>,
    pub no_change: bool,
}

pub fn edit_page<A: ApiTransport + ?Sized>(
    api: &mut A,
    token: &str,
    request: &EditRequest,
) -> Result<EditOutcome> {
    let response = send_write(api, &request.to_params(token))?;
    let payload: EditResponse = serde_json::from_value(response)?;
    let edit = payload
        .edit
        .ok_or_else(|| WikiError::unexpected("missing edit payload in API response"))?;
    let result = edit.result.unwrap_or_else(|| "unknown".to_string());
    if result != "Success" {
        return Err(ApiError::with_kind(
            ApiErrorKind::Generic,
            "editfailed",
            format!("edit of {} returned {result}", request.title),
        )
        .into());
    }

    let no_change = edit.nochange.as_ref().is_some_and(|value| !matches!(value, Value::Bool(false)));
    info!(title = %request.title, revision = ?edit.newrevid, no_change, "page edited");
    Ok(EditOutcome {
        result,
        page_id: edit.pageid,
        new_revision_id: edit.newrevid,
        no_change,
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MoveOptions {
    pub move_talk: bool,
    pub no_redirect: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveOutcome {
    pub from: String,
    pub to: String,
    pub talk_from: Option<String>,
    pub talk_to: Option<String>,
    pub redirect_created: bool,
}

pub fn move_page<A: ApiTransport + ?Sized>(
    api: &mut A,
    token: &str,
    from: &str,
    to: &str,
    reason: &str,
    options: MoveOptions,
) -> Result<MoveOutcome> {
    let response = send_write(
        api,
        &QueryParameters::new()
            .with("action", "move")
            .with("from", from)
            .with("to", to)
            .with("reason", reason)
            .with("movetalk", options.move_talk)
            .with("noredirect", options.no_redirect)
            .with("token", token),
    )?;
    let node = response
        .get("move")
        .ok_or_else(|| WikiError::unexpected("missing move payload in API response"))?;
    let text = |key: &str| node.get(key).and_then(Value::as_str).map(ToString::to_string);
    let outcome = MoveOutcome {
        from: text("from").unwrap_or_else(|| from.to_string()),
        to: text("to").unwrap_or_else(|| to.to_string()),
        talk_from: text("talkfrom"),
        talk_to: text("talkto"),
        redirect_created: flag(node, "redirectcreated"),
    };
    info!(from = %outcome.from, to = %outcome.to, "page moved");
    Ok(outcome)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted { log_id: Option<i64> },
    AlreadyMissing,
}

pub fn delete_page<A: ApiTransport + ?Sized>(
    api: &mut A,
    token: &str,
    title: &str,
    reason: &str,
) -> Result<DeleteOutcome> {
    let response = send_write(
        api,
        &QueryParameters::new()
            .with("action", "delete")
            .with("title", title)
            .with("reason", reason)
            .with("token", token),
    );

    match response {
        Ok(payload) => Ok(DeleteOutcome::Deleted {
            log_id: payload
                .get("delete")
                .and_then(|node| node.get("logid"))
                .and_then(Value::as_i64),
        }),
        Err(WikiError::Api(error)) if error.code == "missingtitle" => {
            debug!(title, "delete target already missing");
            Ok(DeleteOutcome::AlreadyMissing)
        }
        Err(error) => Err(error),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeResult {
    pub title: String,
    pub purged: bool,
    pub missing: bool,
}

/// Purge the parser cache of `titles`, one request per partition.
pub fn purge_pages<A: ApiTransport + ?Sized, S: AsRef<str>>(
    api: &mut A,
    titles: &[S],
    limits: SiteLimits,
) -> Result<Vec<PurgeResult>> {
    let mut results = Vec::with_capacity(titles.len());
    for chunk in partition(titles, limits.batch_size(false))? {
        let response = send_write(
            api,
            &QueryParameters::new().with("action", "purge").with(
                "titles",
                chunk.iter().map(|title| title.as_ref()).collect::<Vec<_>>(),
            ),
        )?;
        let entries = response
            .get("purge")
            .and_then(Value::as_array)
            .ok_or_else(|| WikiError::unexpected("missing purge payload in API response"))?;
        for entry in entries {
            let title = entry
                .get("title")
                .and_then(Value::as_str)
                .ok_or_else(|| WikiError::unexpected(format!("purge entry without title: {entry}")))?;
            results.push(PurgeResult {
                title: title.to_string(),
                purged: flag(entry, "purged"),
                missing: flag(entry, "missing"),
            });
        }
    }
    Ok(results)
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
    pageid: Option<i64>,
    newrevid: Option<i64>,
    nochange: Option<Value>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::transport::mock::MockTransport;

    #[test]
    fn edit_sends_only_set_flags() {
        let mut api = MockTransport::new(vec![json!({
            "edit": {"result": "Success", "pageid": 9, "title": "Alpha", "oldrevid": 10, "newrevid": 11}
        })]);
        let request = EditRequest {
            summary: "tidy".to_string(),
            bot: true,
            base_timestamp: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
            ..EditRequest::new("Alpha", "body")
        };
        let outcome = edit_page(&mut api, "tok", &request).expect("edit");
        assert_eq!(outcome.new_revision_id, Some(11));
        assert_eq!(outcome.page_id, Some(9));
        assert!(!outcome.no_change);
        assert!(api.writes[0]);
        assert_eq!(api.param(0, "bot"), Some(""));
        assert_eq!(api.param(0, "minor"), None);
        assert_eq!(api.param(0, "createonly"), None);
        assert_eq!(api.param(0, "basetimestamp"), Some("2024-03-01T12:00:00Z"));
        assert_eq!(api.param(0, "token"), Some("tok"));
    }

    #[test]
    fn edit_reports_no_change() {
        let mut api = MockTransport::new(vec![json!({
            "edit": {"result": "Success", "pageid": 9, "nochange": true}
        })]);
        let outcome = edit_page(&mut api, "tok", &EditRequest::new("Alpha", "same")).expect("edit");
        assert!(outcome.no_change);
        assert_eq!(outcome.new_revision_id, None);
    }

    #[test]
    fn unsuccessful_edit_is_an_api_error() {
        let mut api = MockTransport::new(vec![json!({"edit": {"result": "Failure", "captcha": {}}})]);
        let error = edit_page(&mut api, "tok", &EditRequest::new("Alpha", "x")).expect_err("must fail");
        assert_eq!(error.api_kind(), Some(ApiErrorKind::Generic));
        assert!(error.to_string().contains("Failure"));
    }

    #[test]
    fn edit_conflict_keeps_server_code() {
        let mut api = MockTransport::new(vec![json!({
            "error": {"code": "editconflict", "info": "Edit conflict detected."}
        })]);
        let error = edit_page(&mut api, "tok", &EditRequest::new("Alpha", "x")).expect_err("must fail");
        assert_eq!(error.api_kind(), Some(ApiErrorKind::Conflict));
    }

    #[test]
    fn move_reports_talk_and_redirect() {
        let mut api = MockTransport::new(vec![json!({
            "move": {"from": "Old", "to": "New", "reason": "rename",
                     "redirectcreated": true, "talkfrom": "Talk:Old", "talkto": "Talk:New"}
        })]);
        let outcome = move_page(
            &mut api,
            "tok",
            "Old",
            "New",
            "rename",
            MoveOptions {
                move_talk: true,
                no_redirect: false,
            },
        )
        .expect("move");
        assert_eq!(outcome.to, "New");
        assert_eq!(outcome.talk_to.as_deref(), Some("Talk:New"));
        assert!(outcome.redirect_created);
        assert_eq!(api.param(0, "movetalk"), Some(""));
        assert_eq!(api.param(0, "noredirect"), None);
    }

    #[test]
    fn deleting_a_missing_page_is_not_an_error() {
        let mut api = MockTransport::new(vec![json!({
            "error": {"code": "missingtitle", "info": "The page you specified doesn't exist."}
        })]);
        let outcome = delete_page(&mut api, "tok", "Ghost", "cleanup").expect("delete");
        assert_eq!(outcome, DeleteOutcome::AlreadyMissing);
    }

    #[test]
    fn delete_returns_log_id() {
        let mut api = MockTransport::new(vec![json!({
            "delete": {"title": "Alpha", "reason": "cleanup", "logid": 321}
        })]);
        let outcome = delete_page(&mut api, "tok", "Alpha", "cleanup").expect("delete");
        assert_eq!(outcome, DeleteOutcome::Deleted { log_id: Some(321) });
    }

    #[test]
    fn delete_propagates_permission_errors() {
        let mut api = MockTransport::new(vec![json!({
            "error": {"code": "permissiondenied", "info": "You don't have permission."}
        })]);
        let error = delete_page(&mut api, "tok", "Alpha", "cleanup").expect_err("must fail");
        assert_eq!(error.api_kind(), Some(ApiErrorKind::Unauthorized));
    }

    #[test]
    fn purge_is_partitioned() {
        let titles = (0..60).map(|index| format!("Page {index}")).collect::<Vec<_>>();
        let first = (0..50)
            .map(|index| json!({"ns": 0, "title": format!("Page {index}"), "purged": true}))
            .collect::<Vec<_>>();
        let second = (50..60)
            .map(|index| {
                if index == 59 {
                    json!({"ns": 0, "title": "Page 59", "missing": true})
                } else {
                    json!({"ns": 0, "title": format!("Page {index}"), "purged": true})
                }
            })
            .collect::<Vec<_>>();
        let mut api = MockTransport::new(vec![json!({"purge": first}), json!({"purge": second})]);
        let results = purge_pages(&mut api, &titles, SiteLimits::default()).expect("purge");
        assert_eq!(api.request_count(), 2);
        assert_eq!(results.len(), 60);
        assert!(results[0].purged);
        assert!(results[59].missing);
        assert!(!results[59].purged);
    }
}
