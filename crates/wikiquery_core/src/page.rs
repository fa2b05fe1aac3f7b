use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, WikiError};
use crate::params::parse_timestamp;

pub const NS_MAIN: i32 = 0;
pub const NS_TEMPLATE: i32 = 10;
pub const NS_CATEGORY: i32 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

#[derive(Debug, Clone, Default)]
pub struct PageQueryOptions {
    pub fetch_content: bool,
    pub follow_redirects: bool,
    pub order: RevisionOrder,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RevisionEntity {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub page_id: Option<i64>,
    pub title: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub user: Option<String>,
    pub comment: Option<String>,
    pub minor: bool,
    pub size: Option<u64>,
    pub sha1: Option<String>,
    pub content_model: Option<String>,
    pub content: Option<String>,
}

impl RevisionEntity {
    pub fn from_fragment(revision: &Value) -> Result<Self> {
        let id = revision
            .get("revid")
            .and_then(Value::as_i64)
            .ok_or_else(|| WikiError::unexpected(format!("revision without revid: {revision}")))?;
        let main_slot = revision.get("slots").and_then(|slots| slots.get("main"));
        let content = main_slot
            .and_then(|slot| slot.get("content"))
            .or_else(|| revision.get("content"))
            .or_else(|| revision.get("*"))
            .and_then(Value::as_str)
            .map(ToString::to_string);
        let content_model = main_slot
            .and_then(|slot| slot.get("contentmodel"))
            .or_else(|| revision.get("contentmodel"))
            .and_then(Value::as_str)
            .map(ToString::to_string);

        Ok(Self {
            id,
            parent_id: revision.get("parentid").and_then(Value::as_i64),
            page_id: None,
            title: None,
            timestamp: text(revision, "timestamp").and_then(|value| parse_timestamp(&value)),
            user: text(revision, "user"),
            comment: text(revision, "comment"),
            minor: flag(revision, "minor"),
            size: revision.get("size").and_then(Value::as_u64),
            sha1: text(revision, "sha1"),
            content_model,
            content,
        })
    }
}

/// A wiki page owned by the caller and refreshed in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PageEntity {
    pub title: String,
    pub page_id: i64,
    pub namespace: i32,
    pub exists: bool,
    pub is_redirect: bool,
    pub content_model: Option<String>,
    pub last_revision_id: Option<i64>,
    pub length: Option<u64>,
    pub touched: Option<DateTime<Utc>>,
    pub revision: Option<RevisionEntity>,
    /// Titles passed through when the last refresh followed redirects.
    pub redirect_trace: Vec<String>,
}

impl PageEntity {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn from_id(page_id: i64) -> Self {
        Self {
            page_id,
            ..Self::default()
        }
    }

    pub fn content(&self) -> Option<&str> {
        self.revision.as_ref()?.content.as_deref()
    }

    fn clear_content_state(&mut self) {
        self.exists = false;
        self.is_redirect = false;
        self.content_model = None;
        self.last_revision_id = None;
        self.length = None;
        self.touched = None;
        self.revision = None;
    }
}

/// Fill `entity` from one resolved page fragment.
pub fn populate(entity: &mut PageEntity, fragment: &Value, options: &PageQueryOptions) -> Result<()> {
    if flag(fragment, "invalid") {
        return Err(WikiError::InvalidTitle {
            title: text(fragment, "title").unwrap_or_else(|| entity.title.clone()),
            reason: text(fragment, "invalidreason").unwrap_or_else(|| "no reason given".to_string()),
        });
    }

    if let Some(title) = text(fragment, "title") {
        entity.title = title;
    }
    if let Some(namespace) = fragment.get("ns").and_then(Value::as_i64) {
        entity.namespace = i32::try_from(namespace).unwrap_or_default();
    }
    if let Some(page_id) = fragment.get("pageid").and_then(Value::as_i64)
        && page_id > 0
    {
        entity.page_id = page_id;
    }

    if flag(fragment, "missing") {
        entity.clear_content_state();
        return Ok(());
    }

    entity.exists = true;
    entity.is_redirect = flag(fragment, "redirect");
    entity.content_model = text(fragment, "contentmodel");
    entity.last_revision_id = fragment.get("lastrevid").and_then(Value::as_i64);
    entity.length = fragment.get("length").and_then(Value::as_u64);
    entity.touched = text(fragment, "touched").and_then(|value| parse_timestamp(&value));

    if let Some(revision) = select_revision(fragment, options.order)? {
        let mut revision = RevisionEntity::from_fragment(revision)?;
        if options.fetch_content && revision.content.is_none() {
            debug!(
                title = %entity.title,
                revision = revision.id,
                "requested revision content is hidden or unavailable"
            );
        }
        if !options.fetch_content {
            revision.content = None;
        }
        revision.page_id = Some(entity.page_id);
        revision.title = Some(entity.title.clone());
        entity.revision = Some(revision);
    }
    Ok(())
}

fn select_revision(fragment: &Value, order: RevisionOrder) -> Result<Option<&Value>> {
    let Some(node) = fragment.get("revisions") else {
        return Ok(None);
    };
    let revisions = node
        .as_array()
        .ok_or_else(|| WikiError::unexpected(format!("`revisions` is not a list: {node}")))?;
    let by_id = |revision: &&Value| revision.get("revid").and_then(Value::as_i64).unwrap_or(0);
    Ok(match order {
        RevisionOrder::NewestFirst => revisions.iter().max_by_key(by_id),
        RevisionOrder::OldestFirst => revisions.iter().min_by_key(by_id),
    })
}

/// Boolean in either response format: `true` (formatversion=2) or `""` (legacy).
pub(crate) fn flag(node: &Value, key: &str) -> bool {
    match node.get(key) {
        Some(Value::Bool(value)) => *value,
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

pub(crate) fn text(node: &Value, key: &str) -> Option<String> {
    node.get(key).and_then(Value::as_str).map(ToString::to_string)
}
