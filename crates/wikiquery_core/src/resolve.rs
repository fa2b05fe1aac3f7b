use std::collections::HashMap;

use serde_json::{Value, json};

use crate::error::{Result, WikiError};
use crate::params::QueryParameters;
use crate::partition::uniform_kind;
use crate::subject::{Subject, SubjectKind};

/// Generators for which the server rejects `redirects`.
pub const REDIRECT_INCOMPATIBLE_GENERATORS: &[&str] = &[
    "allpages",
    "allredirects",
    "allrevisions",
    "alldeletedrevisions",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSubject {
    pub subject: Subject,
    /// Canonical title the fragment was found under (title batches only).
    pub resolved_title: Option<String>,
    /// Titles passed through while following redirects, excluding the target.
    pub trace: Vec<String>,
    pub fragment: Value,
}

/// Title tables of one response.
#[derive(Debug, Clone, Default)]
pub struct TitleMaps {
    pub normalized: HashMap<String, String>,
    pub redirects: HashMap<String, String>,
}

impl TitleMaps {
    pub fn from_query(query: &Value) -> Result<Self> {
        Ok(Self {
            normalized: from_to_table(query, "normalized")?,
            redirects: from_to_table(query, "redirects")?,
        })
    }

    /// Final title for `title` and the redirect trace that led there.
    pub fn resolve(&self, title: &str, follow_redirects: bool) -> Result<(String, Vec<String>)> {
        let mut current = self
            .normalized
            .get(title)
            .cloned()
            .unwrap_or_else(|| title.to_string());
        let mut trace: Vec<String> = Vec::new();
        if !follow_redirects {
            return Ok((current, trace));
        }
        while let Some(next) = self.redirects.get(&current) {
            trace.push(current);
            if trace.iter().any(|visited| visited == next) {
                trace.push(next.clone());
                return Err(WikiError::CircularRedirect { trace });
            }
            current = next.clone();
        }
        Ok((current, trace))
    }
}

fn from_to_table(query: &Value, key: &str) -> Result<HashMap<String, String>> {
    let mut table = HashMap::new();
    let Some(node) = query.get(key) else {
        return Ok(table);
    };
    let entries = node
        .as_array()
        .ok_or_else(|| WikiError::unexpected(format!("`{key}` is not a list: {node}")))?;
    for entry in entries {
        let from = entry.get("from").and_then(Value::as_str);
        let to = entry.get("to").and_then(Value::as_str);
        match (from, to) {
            (Some(from), Some(to)) => {
                table.insert(from.to_string(), to.to_string());
            }
            _ => {
                return Err(WikiError::unexpected(format!(
                    "malformed `{key}` entry: {entry}"
                )));
            }
        }
    }
    Ok(table)
}

/// Page entries of a `query` node, accepting both the list form and the
/// id-keyed map form of `pages`.
pub fn page_entries(query: &Value) -> Vec<&Value> {
    match query.get("pages") {
        Some(Value::Array(pages)) => pages.iter().collect(),
        Some(Value::Object(pages)) => pages.values().collect(),
        _ => Vec::new(),
    }
}

/// Reject `redirects` combined with a generator the server refuses it for,
/// before anything is sent.
pub fn check_redirect_compatibility(params: &QueryParameters, follow_redirects: bool) -> Result<()> {
    if !follow_redirects {
        return Ok(());
    }
    let generator = params.wire_value("generator")?;
    if let Some(generator) = generator
        && REDIRECT_INCOMPATIBLE_GENERATORS.contains(&generator.as_str())
    {
        return Err(WikiError::config(format!(
            "redirect resolution cannot be combined with generator={generator}"
        )));
    }
    Ok(())
}

/// Resolve every requested subject of one partition, in request order.
///
/// The server answers in its own order and under canonical titles. Each
/// requested title is normalized (one hop), then walked through the redirect
/// table when redirects were requested, and finally matched to its page entry.
pub fn resolve_batch(
    subjects: &[Subject],
    query: &Value,
    follow_redirects: bool,
) -> Result<Vec<ResolvedSubject>> {
    let Some(kind) = uniform_kind(subjects)? else {
        return Ok(Vec::new());
    };
    let pages = page_entries(query);
    match kind {
        SubjectKind::Title => resolve_titles(subjects, query, &pages, follow_redirects),
        SubjectKind::PageId => subjects
            .iter()
            .map(|subject| resolve_page_id(subject, &pages))
            .collect(),
        SubjectKind::RevisionId => {
            let bad_revids = bad_revision_ids(query);
            subjects
                .iter()
                .map(|subject| resolve_revision_id(subject, &pages, &bad_revids))
                .collect()
        }
    }
}

fn resolve_titles(
    subjects: &[Subject],
    query: &Value,
    pages: &[&Value],
    follow_redirects: bool,
) -> Result<Vec<ResolvedSubject>> {
    let maps = TitleMaps::from_query(query)?;
    let by_title = pages
        .iter()
        .filter_map(|page| {
            page.get("title")
                .and_then(Value::as_str)
                .map(|title| (title, *page))
        })
        .collect::<HashMap<_, _>>();

    let mut resolved = Vec::with_capacity(subjects.len());
    for subject in subjects {
        let Subject::Title(title) = subject else {
            continue;
        };
        let (target, trace) = maps.resolve(title, follow_redirects)?;
        let fragment = by_title.get(target.as_str()).ok_or_else(|| {
            WikiError::unexpected(format!(
                "no page entry returned for requested title {title:?} (resolved to {target:?})"
            ))
        })?;
        resolved.push(ResolvedSubject {
            subject: subject.clone(),
            resolved_title: Some(target),
            trace,
            fragment: (*fragment).clone(),
        });
    }
    Ok(resolved)
}

fn resolve_page_id(subject: &Subject, pages: &[&Value]) -> Result<ResolvedSubject> {
    let id = subject.id().unwrap_or_default();
    let fragment = pages
        .iter()
        .find(|page| page.get("pageid").and_then(Value::as_i64) == Some(id))
        .ok_or_else(|| {
            WikiError::unexpected(format!("no page entry returned for requested page id {id}"))
        })?;
    Ok(ResolvedSubject {
        subject: subject.clone(),
        resolved_title: None,
        trace: Vec::new(),
        fragment: (*fragment).clone(),
    })
}

fn bad_revision_ids(query: &Value) -> Vec<i64> {
    match query.get("badrevids") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("revid").and_then(Value::as_i64))
            .collect(),
        Some(Value::Object(items)) => items
            .values()
            .filter_map(|item| item.get("revid").and_then(Value::as_i64))
            .collect(),
        _ => Vec::new(),
    }
}

fn resolve_revision_id(
    subject: &Subject,
    pages: &[&Value],
    bad_revids: &[i64],
) -> Result<ResolvedSubject> {
    let id = subject.id().unwrap_or_default();
    let owner = pages.iter().find(|page| {
        page.get("revisions")
            .and_then(Value::as_array)
            .is_some_and(|revisions| {
                revisions
                    .iter()
                    .any(|revision| revision.get("revid").and_then(Value::as_i64) == Some(id))
            })
    });
    let fragment = match owner {
        Some(page) => (*page).clone(),
        None if bad_revids.contains(&id) => json!({"revid": id, "missing": true}),
        None => {
            return Err(WikiError::unexpected(format!(
                "no page entry returned for requested revision id {id}"
            )));
        }
    };
    Ok(ResolvedSubject {
        subject: subject.clone(),
        resolved_title: None,
        trace: Vec::new(),
        fragment,
    })
}
