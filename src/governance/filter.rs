use crate::governance::model::{ReviewItem, ReviewStatus};
use crate::shared::time::now_secs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;
const YEAR_SECS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeRange {
    UpTo1Mb,
    From1MbTo50Mb,
    From50MbTo1Gb,
    From1GbTo50Gb,
    From50GbTo500Gb,
    Over500Gb,
}

impl SizeRange {
    pub const ALL: [SizeRange; 6] = [
        SizeRange::UpTo1Mb,
        SizeRange::From1MbTo50Mb,
        SizeRange::From50MbTo1Gb,
        SizeRange::From1GbTo50Gb,
        SizeRange::From50GbTo500Gb,
        SizeRange::Over500Gb,
    ];

    /// `(exclusive lower, inclusive upper)` in bytes. The first bucket
    /// also holds empty files; the last one is open-ended.
    pub fn bounds(self) -> (u64, u64) {
        match self {
            SizeRange::UpTo1Mb => (0, MIB),
            SizeRange::From1MbTo50Mb => (MIB, 50 * MIB),
            SizeRange::From50MbTo1Gb => (50 * MIB, GIB),
            SizeRange::From1GbTo50Gb => (GIB, 50 * GIB),
            SizeRange::From50GbTo500Gb => (50 * GIB, 500 * GIB),
            SizeRange::Over500Gb => (500 * GIB, u64::MAX),
        }
    }

    pub fn contains(self, size: u64) -> bool {
        let (lower, upper) = self.bounds();
        let above_lower = if lower == 0 { true } else { size > lower };
        above_lower && size <= upper
    }

    pub fn classify(size: u64) -> Self {
        Self::ALL
            .into_iter()
            .find(|range| range.contains(size))
            .unwrap_or(SizeRange::Over500Gb)
    }

    pub fn label(self) -> &'static str {
        match self {
            SizeRange::UpTo1Mb => "0KB to 1MB",
            SizeRange::From1MbTo50Mb => "1MB to 50MB",
            SizeRange::From50MbTo1Gb => "50MB to 1GB",
            SizeRange::From1GbTo50Gb => "1GB to 50GB",
            SizeRange::From50GbTo500Gb => "50GB to 500GB",
            SizeRange::Over500Gb => "500GB+",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionClass {
    Media,
    WebPages,
    Archives,
    Documents,
    Others,
}

const MEDIA_EXTENSIONS: &[&str] = &[
    "avi", "bmp", "gif", "jpeg", "jpg", "mid", "mp3", "mp4", "mpeg", "mpg", "png", "qt", "wav",
    "wmv", "mov",
];
const WEB_PAGE_EXTENSIONS: &[&str] = &[
    "asp", "aspx", "htm", "html", "jsp", "mht", "js", "css", "php", "json",
];
const ARCHIVE_EXTENSIONS: &[&str] = &[
    "arj", "bz2", "cab", "cpio", "gz", "jar", "rar", "tar", "tgz", "z", "zip",
];
const DOCUMENT_EXTENSIONS: &[&str] = &[
    "csv", "doc", "docx", "dot", "mpp", "pdf", "ppt", "pptx", "ps", "rtf", "txt", "xls", "xlsx",
    "xlsm", "pptm", "docm", "pdax", "xml", "xhtml", "xps", "rpt", "oxps",
];

impl ExtensionClass {
    pub const ALL: [ExtensionClass; 5] = [
        ExtensionClass::Media,
        ExtensionClass::WebPages,
        ExtensionClass::Archives,
        ExtensionClass::Documents,
        ExtensionClass::Others,
    ];

    /// Items without an extension fall into `Others`.
    pub fn classify(extension: Option<&str>) -> Self {
        let Some(raw) = extension else {
            return ExtensionClass::Others;
        };
        let ext = raw.trim_start_matches('.').to_ascii_lowercase();
        if MEDIA_EXTENSIONS.contains(&ext.as_str()) {
            ExtensionClass::Media
        } else if WEB_PAGE_EXTENSIONS.contains(&ext.as_str()) {
            ExtensionClass::WebPages
        } else if ARCHIVE_EXTENSIONS.contains(&ext.as_str()) {
            ExtensionClass::Archives
        } else if DOCUMENT_EXTENSIONS.contains(&ext.as_str()) {
            ExtensionClass::Documents
        } else {
            ExtensionClass::Others
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ExtensionClass::Media => "Media",
            ExtensionClass::WebPages => "Web Pages",
            ExtensionClass::Archives => "Archives",
            ExtensionClass::Documents => "Documents",
            ExtensionClass::Others => "Others",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeRange {
    UpTo1Year,
    From1To2Years,
    From2To3Years,
    From3To4Years,
    From4To5Years,
    Over5Years,
}

impl AgeRange {
    pub const ALL: [AgeRange; 6] = [
        AgeRange::UpTo1Year,
        AgeRange::From1To2Years,
        AgeRange::From2To3Years,
        AgeRange::From3To4Years,
        AgeRange::From4To5Years,
        AgeRange::Over5Years,
    ];

    /// Half-open `[lower, upper)` age window in seconds.
    pub fn bounds(self) -> (i64, i64) {
        match self {
            AgeRange::UpTo1Year => (0, YEAR_SECS),
            AgeRange::From1To2Years => (YEAR_SECS, 2 * YEAR_SECS),
            AgeRange::From2To3Years => (2 * YEAR_SECS, 3 * YEAR_SECS),
            AgeRange::From3To4Years => (3 * YEAR_SECS, 4 * YEAR_SECS),
            AgeRange::From4To5Years => (4 * YEAR_SECS, 5 * YEAR_SECS),
            AgeRange::Over5Years => (5 * YEAR_SECS, i64::MAX),
        }
    }

    /// Timestamps in the future count as age zero.
    pub fn contains(self, timestamp: i64, now: i64) -> bool {
        let age = now.saturating_sub(timestamp).max(0);
        let (lower, upper) = self.bounds();
        age >= lower && age < upper
    }

    pub fn classify(timestamp: i64, now: i64) -> Self {
        Self::ALL
            .into_iter()
            .find(|range| range.contains(timestamp, now))
            .unwrap_or(AgeRange::Over5Years)
    }

    pub fn label(self) -> &'static str {
        match self {
            AgeRange::UpTo1Year => "0 to 1 Year",
            AgeRange::From1To2Years => "1 to 2 Years",
            AgeRange::From2To3Years => "2 to 3 Years",
            AgeRange::From3To4Years => "3 to 4 Years",
            AgeRange::From4To5Years => "4 to 5 Years",
            AgeRange::Over5Years => "5 Years+",
        }
    }
}

/// Narrowing predicate over review items.
///
/// Values inside one dimension are alternatives; dimensions combine with
/// AND. An empty dimension does not constrain. An item missing the
/// attribute a non-empty dimension needs never matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ItemFilter {
    pub size_ranges: BTreeSet<SizeRange>,
    pub extensions: BTreeSet<ExtensionClass>,
    pub modified: BTreeSet<AgeRange>,
    pub accessed: BTreeSet<AgeRange>,
    pub created: BTreeSet<AgeRange>,
    pub review_statuses: BTreeSet<ReviewStatus>,
    pub key_contains: Option<String>,
    /// Reference instant for the age dimensions, seconds since epoch.
    /// Unset means the clock at match time.
    pub now: Option<i64>,
}

impl ItemFilter {
    /// Matches everything. Age ranges added later are measured from the
    /// current clock; use [`ItemFilter::at`] to pin the reference instant.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn at(now: i64) -> Self {
        Self {
            now: Some(now),
            ..Self::default()
        }
    }

    pub fn reference_time(&self) -> i64 {
        self.now.unwrap_or_else(now_secs)
    }

    pub fn size(mut self, range: SizeRange) -> Self {
        self.size_ranges.insert(range);
        self
    }

    pub fn extension(mut self, class: ExtensionClass) -> Self {
        self.extensions.insert(class);
        self
    }

    pub fn modified_within(mut self, range: AgeRange) -> Self {
        self.modified.insert(range);
        self
    }

    pub fn accessed_within(mut self, range: AgeRange) -> Self {
        self.accessed.insert(range);
        self
    }

    pub fn created_within(mut self, range: AgeRange) -> Self {
        self.created.insert(range);
        self
    }

    pub fn status(mut self, status: ReviewStatus) -> Self {
        self.review_statuses.insert(status);
        self
    }

    pub fn key_contains(mut self, needle: impl Into<String>) -> Self {
        self.key_contains = Some(needle.into());
        self
    }

    pub fn is_unconstrained(&self) -> bool {
        self.size_ranges.is_empty()
            && self.extensions.is_empty()
            && self.modified.is_empty()
            && self.accessed.is_empty()
            && self.created.is_empty()
            && self.review_statuses.is_empty()
            && self.key_contains.is_none()
    }

    pub fn matches(&self, item: &ReviewItem) -> bool {
        let attrs = &item.attributes;

        if !self.review_statuses.is_empty() && !self.review_statuses.contains(&item.review_status)
        {
            return false;
        }
        if let Some(needle) = self.key_contains.as_deref() {
            if !item.item_key.contains(needle) {
                return false;
            }
        }
        if !self.size_ranges.is_empty() {
            let Some(size) = attrs.size_bytes else {
                return false;
            };
            if !self.size_ranges.iter().any(|range| range.contains(size)) {
                return false;
            }
        }
        if !self.extensions.is_empty() {
            let class = ExtensionClass::classify(attrs.extension.as_deref());
            if !self.extensions.contains(&class) {
                return false;
            }
        }
        if self.modified.is_empty() && self.accessed.is_empty() && self.created.is_empty() {
            return true;
        }
        let now = self.reference_time();
        age_matches(&self.modified, attrs.modified_at, now)
            && age_matches(&self.accessed, attrs.accessed_at, now)
            && age_matches(&self.created, attrs.created_at, now)
    }
}

fn age_matches(ranges: &BTreeSet<AgeRange>, timestamp: Option<i64>, now: i64) -> bool {
    if ranges.is_empty() {
        return true;
    }
    let Some(timestamp) = timestamp else {
        return false;
    };
    ranges.iter().any(|range| range.contains(timestamp, now))
}
