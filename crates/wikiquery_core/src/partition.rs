use crate::error::{Result, WikiError};
use crate::subject::{Subject, SubjectKind};

/// Per-request subject limit for ordinary accounts.
pub const DEFAULT_BATCH_LIMIT: usize = 50;
/// Per-request subject limit for accounts holding `apihighlimits`.
pub const HIGH_BATCH_LIMIT: usize = 500;
/// Content-bearing requests carry larger items, so their batches shrink by this factor.
pub const CONTENT_DIVISOR: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrivilegeTier {
    #[default]
    Standard,
    Elevated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SiteLimits {
    pub tier: PrivilegeTier,
}

impl SiteLimits {
    pub fn new(tier: PrivilegeTier) -> Self {
        Self { tier }
    }

    pub fn from_rights<S: AsRef<str>>(rights: &[S]) -> Self {
        let elevated = rights.iter().any(|right| right.as_ref() == "apihighlimits");
        Self::new(if elevated {
            PrivilegeTier::Elevated
        } else {
            PrivilegeTier::Standard
        })
    }

    /// Maximum subjects (or list items) per request.
    pub fn listing_limit(&self) -> usize {
        match self.tier {
            PrivilegeTier::Standard => DEFAULT_BATCH_LIMIT,
            PrivilegeTier::Elevated => HIGH_BATCH_LIMIT,
        }
    }

    pub fn batch_size(&self, fetch_content: bool) -> usize {
        let limit = self.listing_limit();
        if fetch_content {
            (limit / CONTENT_DIVISOR).max(1)
        } else {
            limit
        }
    }
}

/// Split `items` into ordered chunks of at most `max_size` elements.
pub fn partition<T>(items: &[T], max_size: usize) -> Result<Vec<&[T]>> {
    if max_size == 0 {
        return Err(WikiError::config(format!(
            "partition size must be at least 1 (got {max_size} for {} items)",
            items.len()
        )));
    }
    Ok(items.chunks(max_size).collect())
}

/// Partition a subject batch, rejecting batches that mix titles and ids.
pub fn partition_subjects(
    subjects: &[Subject],
    max_size: usize,
) -> Result<(Option<SubjectKind>, Vec<&[Subject]>)> {
    let kind = uniform_kind(subjects)?;
    Ok((kind, partition(subjects, max_size)?))
}

pub fn uniform_kind(subjects: &[Subject]) -> Result<Option<SubjectKind>> {
    let Some(first) = subjects.first() else {
        return Ok(None);
    };
    let kind = first.kind();
    if let Some(other) = subjects.iter().find(|subject| subject.kind() != kind) {
        return Err(WikiError::config(format!(
            "cannot mix subject kinds in one batch: {first} and {other}"
        )));
    }
    Ok(Some(kind))
}
