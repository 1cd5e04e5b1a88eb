use crate::governance::error::GovernanceError;
use crate::governance::filter::{AgeRange, ExtensionClass, ItemFilter, SizeRange};
use crate::governance::model::{ReviewItem, ReviewStatus};
use crate::governance::store::{load_request, RequestStore};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacetCounts {
    pub not_reviewed: u64,
    pub accepted: u64,
    pub declined: u64,
    pub total: u64,
}

impl FacetCounts {
    pub fn record(&mut self, status: ReviewStatus) {
        self.add(status, 1);
    }

    fn add(&mut self, status: ReviewStatus, count: u64) {
        match status {
            ReviewStatus::NotReviewed => self.not_reviewed += count,
            ReviewStatus::Accepted => self.accepted += count,
            ReviewStatus::Declined => self.declined += count,
        }
        self.total += count;
    }

    pub fn reviewed(&self) -> u64 {
        self.accepted + self.declined
    }

    pub fn is_fully_reviewed(&self) -> bool {
        self.not_reviewed == 0
    }
}

/// Result of comparing a filtered accepted count against a count obtained
/// out of band. Mismatches are reported, never corrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountCheck {
    pub expected: u64,
    pub actual: u64,
}

impl CountCheck {
    pub fn matches(&self) -> bool {
        self.expected == self.actual
    }

    pub fn difference(&self) -> i64 {
        self.actual as i64 - self.expected as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacetDimension {
    Size,
    Extension,
    ModifiedTime,
    AccessTime,
    CreatedTime,
}

const UNKNOWN_BUCKET: &str = "Unknown";

impl FacetDimension {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "size" => Ok(Self::Size),
            "extension" => Ok(Self::Extension),
            "modified_time" | "modified" => Ok(Self::ModifiedTime),
            "access_time" | "accessed" => Ok(Self::AccessTime),
            "created_time" | "created" => Ok(Self::CreatedTime),
            other => Err(format!(
                "facet must be one of: size, extension, modified_time, access_time, created_time (got `{other}`)"
            )),
        }
    }

    fn bucket(self, item: &ReviewItem, now: i64) -> &'static str {
        let attrs = &item.attributes;
        match self {
            FacetDimension::Size => attrs
                .size_bytes
                .map(SizeRange::classify)
                .map(SizeRange::label)
                .unwrap_or(UNKNOWN_BUCKET),
            FacetDimension::Extension => {
                ExtensionClass::classify(attrs.extension.as_deref()).label()
            }
            FacetDimension::ModifiedTime => age_bucket(attrs.modified_at, now),
            FacetDimension::AccessTime => age_bucket(attrs.accessed_at, now),
            FacetDimension::CreatedTime => age_bucket(attrs.created_at, now),
        }
    }
}

fn age_bucket(timestamp: Option<i64>, now: i64) -> &'static str {
    timestamp
        .map(|ts| AgeRange::classify(ts, now).label())
        .unwrap_or(UNKNOWN_BUCKET)
}

/// Counts are always recomputed from the item rows; nothing is cached
/// between calls, so a gate decision never sees a stale total.
#[derive(Debug, Clone)]
pub struct FacetCounter {
    store: RequestStore,
}

impl FacetCounter {
    pub fn new(store: RequestStore) -> Self {
        Self { store }
    }

    pub fn counts(&self, request_id: &str) -> Result<FacetCounts, GovernanceError> {
        let connection = self.store.connect()?;
        counts_in(&connection, request_id)
    }

    pub fn counts_by_predicate(
        &self,
        request_id: &str,
        filter: &ItemFilter,
    ) -> Result<FacetCounts, GovernanceError> {
        let mut counts = FacetCounts::default();
        for item in self.store.items(request_id)? {
            if filter.matches(&item) {
                counts.record(item.review_status);
            }
        }
        Ok(counts)
    }

    pub fn verify_accepted_count(
        &self,
        request_id: &str,
        filter: &ItemFilter,
        expected: u64,
    ) -> Result<CountCheck, GovernanceError> {
        let counts = self.counts_by_predicate(request_id, filter)?;
        Ok(CountCheck {
            expected,
            actual: counts.accepted,
        })
    }

    pub fn facets(
        &self,
        request_id: &str,
        dimension: FacetDimension,
        now: i64,
    ) -> Result<BTreeMap<String, FacetCounts>, GovernanceError> {
        let mut out: BTreeMap<String, FacetCounts> = BTreeMap::new();
        for item in self.store.items(request_id)? {
            out.entry(dimension.bucket(&item, now).to_string())
                .or_default()
                .record(item.review_status);
        }
        Ok(out)
    }
}

pub(crate) fn counts_in(
    connection: &rusqlite::Connection,
    request_id: &str,
) -> Result<FacetCounts, GovernanceError> {
    load_request(connection, request_id)?;
    let mut statement = connection.prepare(
        "
        SELECT review_status, COUNT(*) FROM review_items
        WHERE request_id = ?1
        GROUP BY review_status
        ",
    )?;
    let rows = statement.query_map(params![request_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut counts = FacetCounts::default();
    for row in rows {
        let (raw, count) = row?;
        let status = ReviewStatus::parse(&raw).map_err(|_| GovernanceError::CorruptRecord {
            kind: "review status",
            value: raw,
        })?;
        counts.add(status, count as u64);
    }
    Ok(counts)
}
