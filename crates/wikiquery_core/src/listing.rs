use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::cancel::CancellationToken;
use crate::driver::{DriverOptions, QueryPages};
use crate::error::{Result, WikiError};
use crate::page::{PageEntity, PageQueryOptions, populate};
use crate::params::{ParamValue, QueryParameters, parse_timestamp};
use crate::partition::SiteLimits;
use crate::resolve::{check_redirect_compatibility, page_entries};
use crate::transport::ApiTransport;

/// A list module (`list=...`) that can also run as `generator=...`.
///
/// A listing only describes its parameters. Paging, dedup and cancellation
/// come from [`QueryPages`].
pub trait Listing {
    /// Module name, e.g. `allpages`.
    fn list_name(&self) -> &'static str;
    /// Parameter prefix of the module, e.g. `ap`.
    fn prefix(&self) -> &'static str;
    /// Module parameters without their prefix.
    fn module_params(&self) -> Vec<(&'static str, ParamValue)>;

    fn params(&self, limit: usize) -> QueryParameters {
        prefixed(
            QueryParameters::query().with("list", self.list_name()),
            self.prefix(),
            self.module_params(),
            limit,
        )
    }

    fn as_generator_params(&self, limit: usize) -> QueryParameters {
        prefixed(
            QueryParameters::query().with("generator", self.list_name()),
            &format!("g{}", self.prefix()),
            self.module_params(),
            limit,
        )
    }
}

fn prefixed(
    mut params: QueryParameters,
    prefix: &str,
    module_params: Vec<(&'static str, ParamValue)>,
    limit: usize,
) -> QueryParameters {
    for (name, value) in module_params {
        params.set(format!("{prefix}{name}"), value);
    }
    params.set(format!("{prefix}limit"), limit);
    params
}

#[derive(Debug, Clone, Default)]
pub struct AllPages {
    pub namespace: i32,
    pub prefix: Option<String>,
}

impl Listing for AllPages {
    fn list_name(&self) -> &'static str {
        "allpages"
    }

    fn prefix(&self) -> &'static str {
        "ap"
    }

    fn module_params(&self) -> Vec<(&'static str, ParamValue)> {
        vec![
            ("namespace", self.namespace.into()),
            ("prefix", self.prefix.clone().into()),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberType {
    Page,
    Subcat,
    File,
}

impl MemberType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Subcat => "subcat",
            Self::File => "file",
        }
    }
}

impl From<MemberType> for ParamValue {
    fn from(value: MemberType) -> Self {
        Self::Text(value.as_str().to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CategoryMembers {
    pub title: String,
    pub member_types: Vec<MemberType>,
}

impl CategoryMembers {
    pub fn new(category: &str) -> Self {
        let title = if category.starts_with("Category:") {
            category.to_string()
        } else {
            format!("Category:{category}")
        };
        Self {
            title,
            member_types: Vec::new(),
        }
    }
}

impl Listing for CategoryMembers {
    fn list_name(&self) -> &'static str {
        "categorymembers"
    }

    fn prefix(&self) -> &'static str {
        "cm"
    }

    fn module_params(&self) -> Vec<(&'static str, ParamValue)> {
        vec![
            ("title", self.title.clone().into()),
            ("type", self.member_types.clone().into()),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct RecentChanges {
    pub since: DateTime<Utc>,
    pub namespaces: Vec<i32>,
    pub types: Vec<String>,
}

impl Listing for RecentChanges {
    fn list_name(&self) -> &'static str {
        "recentchanges"
    }

    fn prefix(&self) -> &'static str {
        "rc"
    }

    fn module_params(&self) -> Vec<(&'static str, ParamValue)> {
        vec![
            ("start", self.since.into()),
            ("dir", "newer".into()),
            ("namespace", self.namespaces.clone().into()),
            ("type", self.types.clone().into()),
            ("prop", vec!["title", "ids", "timestamp"].into()),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct Backlinks {
    pub title: String,
    pub namespace: Option<i32>,
    /// Also list pages linking through a redirect to `title`.
    pub through_redirects: bool,
}

impl Listing for Backlinks {
    fn list_name(&self) -> &'static str {
        "backlinks"
    }

    fn prefix(&self) -> &'static str {
        "bl"
    }

    fn module_params(&self) -> Vec<(&'static str, ParamValue)> {
        vec![
            ("title", self.title.clone().into()),
            ("namespace", self.namespace.into()),
            ("redirect", self.through_redirects.into()),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct Search {
    pub query: String,
    pub namespaces: Vec<i32>,
}

impl Listing for Search {
    fn list_name(&self) -> &'static str {
        "search"
    }

    fn prefix(&self) -> &'static str {
        "sr"
    }

    fn module_params(&self) -> Vec<(&'static str, ParamValue)> {
        vec![
            ("search", self.query.clone().into()),
            ("namespace", self.namespaces.clone().into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListItem {
    pub title: String,
    pub namespace: i32,
    pub page_id: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ListItem {
    fn from_value(item: &Value) -> Result<Self> {
        let title = item
            .get("title")
            .and_then(Value::as_str)
            .ok_or_else(|| WikiError::unexpected(format!("list item without title: {item}")))?;
        Ok(Self {
            title: title.to_string(),
            namespace: item
                .get("ns")
                .and_then(Value::as_i64)
                .and_then(|ns| i32::try_from(ns).ok())
                .unwrap_or_default(),
            page_id: item.get("pageid").and_then(Value::as_i64),
            timestamp: item
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(parse_timestamp),
        })
    }
}

/// Walk a listing, stopping early once `max_items` have been collected.
pub fn enumerate<A: ApiTransport + ?Sized, L: Listing + ?Sized>(
    api: &mut A,
    listing: &L,
    limits: SiteLimits,
    max_items: Option<usize>,
    cancel: &CancellationToken,
) -> Result<Vec<ListItem>> {
    if max_items == Some(0) {
        return Ok(Vec::new());
    }
    let batch = max_items
        .map_or(limits.listing_limit(), |max| max.min(limits.listing_limit()));
    let pages = QueryPages::new(
        api,
        listing.params(batch),
        DriverOptions::default().with_cancel(cancel.clone()),
    )?;

    let mut items = Vec::new();
    for fragment in pages {
        let fragment = fragment?;
        if let Some(entries) = fragment.get(listing.list_name()).and_then(Value::as_array) {
            for entry in entries {
                items.push(ListItem::from_value(entry)?);
            }
        }
        if let Some(max) = max_items
            && items.len() >= max
        {
            items.truncate(max);
            break;
        }
    }
    Ok(items)
}

/// Use a listing as a generator and materialize the pages it yields.
pub fn enumerate_generated<A: ApiTransport + ?Sized, L: Listing + ?Sized>(
    api: &mut A,
    listing: &L,
    limits: SiteLimits,
    follow_redirects: bool,
    cancel: &CancellationToken,
) -> Result<Vec<PageEntity>> {
    let mut params = listing
        .as_generator_params(limits.listing_limit())
        .with("prop", "info");
    check_redirect_compatibility(&params, follow_redirects)?;
    if follow_redirects {
        params.set("redirects", true);
    }

    let options = PageQueryOptions::default();
    let mut pages = Vec::new();
    for fragment in QueryPages::new(api, params, DriverOptions::distinct().with_cancel(cancel.clone()))? {
        let fragment = fragment?;
        for entry in page_entries(&fragment) {
            let mut page = PageEntity::default();
            populate(&mut page, entry, &options)?;
            pages.push(page);
        }
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::transport::mock::MockTransport;

    #[test]
    fn listing_params_are_prefixed() {
        let listing = CategoryMembers {
            member_types: vec![MemberType::Page, MemberType::Subcat],
            ..CategoryMembers::new("Birds")
        };
        let wire = listing.params(50).to_wire_pairs().expect("pairs");
        assert!(wire.contains(&("list".to_string(), "categorymembers".to_string())));
        assert!(wire.contains(&("cmtitle".to_string(), "Category:Birds".to_string())));
        assert!(wire.contains(&("cmtype".to_string(), "page|subcat".to_string())));
        assert!(wire.contains(&("cmlimit".to_string(), "50".to_string())));

        let generator = listing.as_generator_params(50).to_wire_pairs().expect("pairs");
        assert!(generator.contains(&("generator".to_string(), "categorymembers".to_string())));
        assert!(generator.contains(&("gcmtitle".to_string(), "Category:Birds".to_string())));
    }

    #[test]
    fn recent_changes_encode_start_as_utc() {
        let listing = RecentChanges {
            since: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).single().expect("ts"),
            namespaces: vec![0, 10],
            types: vec!["edit".to_string(), "new".to_string()],
        };
        let params = listing.params(500);
        assert_eq!(
            params.wire_value("rcstart").expect("wire").as_deref(),
            Some("2024-02-01T00:00:00Z")
        );
        assert_eq!(params.wire_value("rcnamespace").expect("wire").as_deref(), Some("0|10"));
    }

    #[test]
    fn enumerate_collects_across_continuations() {
        let mut api = MockTransport::new(vec![
            json!({
                "continue": {"apcontinue": "Beta", "continue": "-||"},
                "query": {"allpages": [{"pageid": 1, "ns": 0, "title": "Alpha"}]}
            }),
            json!({
                "query": {"allpages": [{"pageid": 2, "ns": 0, "title": "Beta"}]}
            }),
        ]);
        let items = enumerate(
            &mut api,
            &AllPages::default(),
            SiteLimits::default(),
            None,
            &CancellationToken::new(),
        )
        .expect("enumerate");
        let titles = items.iter().map(|item| item.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, vec!["Alpha", "Beta"]);
        assert_eq!(api.param(0, "aplimit"), Some("50"));
        assert_eq!(api.param(0, "apprefix"), None);
    }

    #[test]
    fn enumerate_stops_requesting_at_max_items() {
        let mut api = MockTransport::new(vec![
            json!({
                "continue": {"sroffset": 2, "continue": "-||"},
                "query": {"search": [
                    {"ns": 0, "title": "One", "pageid": 1},
                    {"ns": 0, "title": "Two", "pageid": 2}
                ]}
            }),
            json!({"query": {"search": [{"ns": 0, "title": "Three", "pageid": 3}]}}),
        ]);
        let listing = Search {
            query: "bird".to_string(),
            namespaces: vec![0],
        };
        let items = enumerate(
            &mut api,
            &listing,
            SiteLimits::default(),
            Some(2),
            &CancellationToken::new(),
        )
        .expect("enumerate");
        assert_eq!(items.len(), 2);
        assert_eq!(api.request_count(), 1);
        assert_eq!(api.param(0, "srlimit"), Some("2"));
    }

    #[test]
    fn zero_max_items_sends_nothing() {
        let mut api = MockTransport::default();
        let listing = Search {
            query: "bird".to_string(),
            namespaces: vec![0],
        };
        let items = enumerate(
            &mut api,
            &listing,
            SiteLimits::default(),
            Some(0),
            &CancellationToken::new(),
        )
        .expect("enumerate");
        assert!(items.is_empty());
        assert_eq!(api.request_count(), 0);
    }

    #[test]
    fn generated_pages_are_distinct() {
        let mut api = MockTransport::new(vec![
            json!({
                "continue": {"gcmcontinue": "page|2", "continue": "gcmcontinue||"},
                "query": {"pages": [{"pageid": 42, "ns": 0, "title": "Answer"}]}
            }),
            json!({
                "query": {"pages": [
                    {"pageid": 42, "ns": 0, "title": "Answer"},
                    {"pageid": 43, "ns": 0, "title": "Question"}
                ]}
            }),
        ]);
        let pages = enumerate_generated(
            &mut api,
            &CategoryMembers::new("Things"),
            SiteLimits::default(),
            true,
            &CancellationToken::new(),
        )
        .expect("generate");
        let ids = pages.iter().map(|page| page.page_id).collect::<Vec<_>>();
        assert_eq!(ids, vec![42, 43]);
        assert_eq!(api.param(0, "redirects"), Some(""));
    }

    #[test]
    fn allpages_generator_rejects_redirects_before_any_request() {
        let mut api = MockTransport::default();
        let error = enumerate_generated(
            &mut api,
            &AllPages::default(),
            SiteLimits::default(),
            true,
            &CancellationToken::new(),
        )
        .expect_err("must fail");
        assert!(matches!(error, WikiError::Config { .. }));
        assert_eq!(api.request_count(), 0);
    }
}
