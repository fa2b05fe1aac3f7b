use serde_json::{Map, Value};
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::driver::{DriverOptions, QueryPages};
use crate::error::{Result, WikiError};
use crate::page::{PageEntity, PageQueryOptions, RevisionEntity, RevisionOrder, populate};
use crate::params::QueryParameters;
use crate::partition::{SiteLimits, partition_subjects};
use crate::resolve::{ResolvedSubject, check_redirect_compatibility, resolve_batch};
use crate::subject::{Subject, SubjectKind};
use crate::transport::ApiTransport;

const REVISION_PROPS: &[&str] = &["ids", "timestamp", "flags", "comment", "user", "size", "sha1"];

/// Run `base` once per partition of `subjects` and resolve every subject.
///
/// Partitions run strictly one after another, each driven to completion. The
/// subject list parameter (`titles`, `pageids` or `revids`) is added per
/// partition; `redirects` is added only for title batches when requested.
pub fn query_subjects<A: ApiTransport + ?Sized>(
    api: &mut A,
    base: &QueryParameters,
    subjects: &[Subject],
    batch_size: usize,
    follow_redirects: bool,
    cancel: &CancellationToken,
) -> Result<Vec<ResolvedSubject>> {
    query_partitions(api, base, subjects, batch_size, follow_redirects, cancel, false)
}

fn query_partitions<A: ApiTransport + ?Sized>(
    api: &mut A,
    base: &QueryParameters,
    subjects: &[Subject],
    batch_size: usize,
    follow_redirects: bool,
    cancel: &CancellationToken,
    first_response_only: bool,
) -> Result<Vec<ResolvedSubject>> {
    let (kind, partitions) = partition_subjects(subjects, batch_size)?;
    let Some(kind) = kind else {
        return Ok(Vec::new());
    };
    let follow_redirects = follow_redirects && kind == SubjectKind::Title;
    check_redirect_compatibility(base, follow_redirects)?;

    let mut resolved = Vec::with_capacity(subjects.len());
    for (index, chunk) in partitions.iter().enumerate() {
        cancel.check()?;
        let mut params = base.clone();
        params.set(
            kind.param_name(),
            chunk.iter().map(Subject::wire_value).collect::<Vec<_>>(),
        );
        if follow_redirects {
            params.set("redirects", true);
        }
        debug!(
            partition = index + 1,
            partitions = partitions.len(),
            size = chunk.len(),
            "querying subject partition"
        );
        let mut pages = QueryPages::new(
            &mut *api,
            params,
            DriverOptions::default().with_cancel(cancel.clone()),
        )?;
        let merged = if first_response_only {
            match pages.next() {
                Some(fragment) => fragment?,
                None => Value::Object(Map::new()),
            }
        } else {
            pages.collect_merged()?
        };
        resolved.extend(resolve_batch(chunk, &merged, follow_redirects)?);
    }
    Ok(resolved)
}

fn page_params(options: &PageQueryOptions) -> QueryParameters {
    let mut rvprop = REVISION_PROPS.to_vec();
    if options.fetch_content {
        rvprop.push("content");
    }
    let params = QueryParameters::query()
        .with("prop", vec!["info", "revisions"])
        .with("rvprop", rvprop);
    if options.fetch_content {
        params.with("rvslots", "main")
    } else {
        params
    }
}

/// Refresh `pages` in place.
///
/// Pages with a title are looked up by title; pages without one by page id.
/// Title lookups go first, then id lookups, each in caller order.
///
/// [`RevisionOrder::OldestFirst`] asks the server for `rvdir=newer&rvlimit=1`,
/// which MediaWiki only accepts for a single page.
pub fn refresh_pages<A: ApiTransport + ?Sized>(
    api: &mut A,
    pages: &mut [PageEntity],
    options: &PageQueryOptions,
    limits: SiteLimits,
    cancel: &CancellationToken,
) -> Result<()> {
    let oldest_first = options.order == RevisionOrder::OldestFirst;
    if oldest_first && pages.len() > 1 {
        return Err(WikiError::config(format!(
            "oldest-first revisions need one page per request, got {} pages",
            pages.len()
        )));
    }
    let mut base = page_params(options);
    if oldest_first {
        base.set("rvdir", "newer");
        base.set("rvlimit", 1usize);
    }
    let batch_size = limits.batch_size(options.fetch_content);

    let mut by_title = Vec::new();
    let mut by_id = Vec::new();
    for (index, page) in pages.iter().enumerate() {
        if !page.title.trim().is_empty() {
            by_title.push((index, Subject::Title(page.title.clone())));
        } else if page.page_id > 0 {
            by_id.push((index, Subject::PageId(page.page_id)));
        } else {
            return Err(WikiError::config(format!(
                "page at position {index} has neither a title nor a page id"
            )));
        }
    }

    for group in [by_title, by_id] {
        if group.is_empty() {
            continue;
        }
        let (indices, subjects): (Vec<usize>, Vec<Subject>) = group.into_iter().unzip();
        let resolved = query_partitions(
            api,
            &base,
            &subjects,
            batch_size,
            options.follow_redirects,
            cancel,
            oldest_first,
        )?;
        for (index, item) in indices.into_iter().zip(resolved) {
            let page = &mut pages[index];
            populate(page, &item.fragment, options)?;
            page.redirect_trace = item.trace;
        }
    }
    Ok(())
}

/// Fetch revisions by id. Ids the server does not know map to `None`.
pub fn fetch_revisions<A: ApiTransport + ?Sized>(
    api: &mut A,
    revision_ids: &[i64],
    options: &PageQueryOptions,
    limits: SiteLimits,
    cancel: &CancellationToken,
) -> Result<Vec<Option<RevisionEntity>>> {
    let base = page_params(options);
    let subjects = revision_ids
        .iter()
        .map(|id| Subject::RevisionId(*id))
        .collect::<Vec<_>>();
    let resolved = query_subjects(
        api,
        &base,
        &subjects,
        limits.batch_size(options.fetch_content),
        false,
        cancel,
    )?;

    resolved
        .iter()
        .map(|item| revision_from_resolved(item, options))
        .collect()
}

fn revision_from_resolved(
    item: &ResolvedSubject,
    options: &PageQueryOptions,
) -> Result<Option<RevisionEntity>> {
    let Some(revision_id) = item.subject.id() else {
        return Ok(None);
    };
    let revisions = item
        .fragment
        .get("revisions")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let Some(node) = revisions
        .iter()
        .find(|revision| revision.get("revid").and_then(Value::as_i64) == Some(revision_id))
    else {
        return Ok(None);
    };
    let mut revision = RevisionEntity::from_fragment(node)?;
    revision.page_id = item.fragment.get("pageid").and_then(Value::as_i64);
    revision.title = item
        .fragment
        .get("title")
        .and_then(Value::as_str)
        .map(ToString::to_string);
    if !options.fetch_content {
        revision.content = None;
    }
    Ok(Some(revision))
}
