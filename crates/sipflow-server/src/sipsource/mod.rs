//! SIP sources
//!
//! A SIP source is a bucket operators drop packages into. Listing is paged
//! with opaque cursors; the cursor encodes the sort position (key and
//! modification time) of the last object of the previous page, so a page
//! resumes correctly even when that object has since been removed.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::bucket::{BucketConfig, BucketError, SharedBucket};

pub const DEFAULT_LIMIT: usize = 100;

/// Objects requested from the bucket per listing call.
const SCAN_PAGE_SIZE: usize = 1000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SipSourceError {
    #[error("invalid SIP source")]
    InvalidSource,

    #[error("invalid token")]
    InvalidToken,

    #[error("SIP source: missing bucket")]
    MissingBucket,

    #[error("SIP bucket source: list objects: {0}")]
    Bucket(#[from] BucketError),
}

pub type Result<T, E = SipSourceError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortAttr {
    Key,
    ModTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    attr: SortAttr,
    desc: bool,
}

impl Sort {
    pub fn by_key() -> Self {
        Self {
            attr: SortAttr::Key,
            desc: false,
        }
    }

    pub fn by_mod_time() -> Self {
        Self {
            attr: SortAttr::ModTime,
            desc: false,
        }
    }

    pub fn desc(mut self) -> Self {
        self.desc = true;
        self
    }

    pub fn asc(mut self) -> Self {
        self.desc = false;
        self
    }

    pub fn compare(&self, a: &Object, b: &Object) -> Ordering {
        self.compare_position(&a.key, a.mod_time, &b.key, b.mod_time)
    }

    /// Total order used for paging: the sort attribute first, then the key
    /// ascending.
    fn compare_position(
        &self,
        a_key: &str,
        a_time: Option<DateTime<Utc>>,
        b_key: &str,
        b_time: Option<DateTime<Utc>>,
    ) -> Ordering {
        let ord = match self.attr {
            SortAttr::Key => a_key.cmp(b_key),
            SortAttr::ModTime => a_time.cmp(&b_time),
        };
        let ord = if self.desc { ord.reverse() } else { ord };
        ord.then_with(|| a_key.cmp(b_key))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Cursor returned as [`Page::next_token`]; `None` starts at the first page.
    pub token: Option<String>,
    /// Values of zero fall back to [`DEFAULT_LIMIT`].
    pub limit: usize,
    /// `None` sorts by key ascending, the bucket's native order.
    pub sort: Option<Sort>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Object {
    pub key: String,
    pub mod_time: Option<DateTime<Utc>>,
    pub size: i64,
    pub is_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Page {
    pub objects: Vec<Object>,
    pub limit: usize,
    /// `None` when there are no further pages.
    pub next_token: Option<String>,
}

/// How long SIPs stay in the source after a successful ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionPeriod {
    #[default]
    Forever,
    After(Duration),
}

impl RetentionPeriod {
    /// Negative values retain forever; zero deletes immediately.
    pub fn from_secs(secs: i64) -> Self {
        match u64::try_from(secs) {
            Ok(secs) => RetentionPeriod::After(Duration::from_secs(secs)),
            Err(_) => RetentionPeriod::Forever,
        }
    }

    /// Seconds with the negative-means-forever convention.
    pub fn as_secs(&self) -> i64 {
        match self {
            RetentionPeriod::Forever => -1,
            RetentionPeriod::After(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        }
    }
}

#[async_trait]
pub trait SipSource: Send + Sync {
    async fn list_objects(&self, opts: ListOptions) -> Result<Page>;

    fn retention_period(&self) -> RetentionPeriod;
}

/// Sort position of the last object returned on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub key: String,
    pub mod_time: Option<DateTime<Utc>>,
}

impl Cursor {
    fn of(object: &Object) -> Self {
        Self {
            key: object.key.clone(),
            mod_time: object.mod_time,
        }
    }

    /// Whether `object` sorts strictly after this cursor under `sort`.
    fn is_before(&self, sort: &Sort, object: &Object) -> bool {
        sort.compare_position(&self.key, self.mod_time, &object.key, object.mod_time)
            == Ordering::Less
    }
}

/// Encode as `<rfc3339 mod time>\n<key>`, base64url without padding.
pub fn encode_token(cursor: &Cursor) -> String {
    let time = cursor
        .mod_time
        .map(|t| t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .unwrap_or_default();
    URL_SAFE_NO_PAD.encode(format!("{time}\n{}", cursor.key))
}

pub fn decode_token(token: &str) -> Result<Cursor> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| SipSourceError::InvalidToken)?;
    let text = String::from_utf8(bytes).map_err(|_| SipSourceError::InvalidToken)?;
    let (time, key) = text.split_once('\n').ok_or(SipSourceError::InvalidToken)?;
    let mod_time = match time {
        "" => None,
        t => Some(
            DateTime::parse_from_rfc3339(t)
                .map_err(|_| SipSourceError::InvalidToken)?
                .with_timezone(&Utc),
        ),
    };
    Ok(Cursor {
        key: key.to_string(),
        mod_time,
    })
}

#[derive(Debug, Clone, Default)]
pub struct SipSourceConfig {
    pub id: Option<Uuid>,
    pub name: Option<String>,
    pub bucket: Option<BucketConfig>,
    pub retention_period: RetentionPeriod,
}

impl SipSourceConfig {
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.name.is_none() && self.bucket.is_none()
    }

    /// Empty configurations are valid for installations without a source.
    pub fn validate(&self) -> Vec<String> {
        if self.is_empty() {
            return Vec::new();
        }
        let mut errs = Vec::new();
        if self.id.map_or(true, |id| id.is_nil()) {
            errs.push("SIP source: missing ID".to_string());
        }
        if self.name.as_deref().map_or(true, str::is_empty) {
            errs.push("SIP source: missing name".to_string());
        }
        if self.bucket.is_none() {
            errs.push(SipSourceError::MissingBucket.to_string());
        }
        errs
    }
}

/// SIP source over an object bucket.
///
/// Listing scans the whole bucket, then sorts and pages in memory, so every
/// page costs a full listing of the bucket. Sources are drop folders holding
/// packages awaiting ingest, not archives.
#[derive(Clone, Default)]
pub struct BucketSource {
    pub id: Uuid,
    pub name: String,
    bucket: Option<SharedBucket>,
    retention_period: RetentionPeriod,
}

impl std::fmt::Debug for BucketSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketSource")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("configured", &self.bucket.is_some())
            .field("retention_period", &self.retention_period)
            .finish()
    }
}

impl BucketSource {
    pub fn new(
        id: Uuid,
        name: impl Into<String>,
        bucket: SharedBucket,
        retention_period: RetentionPeriod,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            bucket: Some(bucket),
            retention_period,
        }
    }

    /// Source without a bucket; every listing fails with `InvalidSource`.
    pub fn unconfigured() -> Self {
        Self::default()
    }

    pub async fn from_config(config: &SipSourceConfig) -> Result<Self> {
        if config.is_empty() {
            return Ok(Self::unconfigured());
        }
        let bucket = config.bucket.as_ref().ok_or(SipSourceError::MissingBucket)?;
        Ok(Self::new(
            config.id.unwrap_or_default(),
            config.name.clone().unwrap_or_default(),
            bucket.open().await,
            config.retention_period,
        ))
    }

    pub fn is_configured(&self) -> bool {
        self.bucket.is_some()
    }

    async fn all_objects(&self, bucket: &SharedBucket) -> Result<Vec<Object>> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = bucket.list_page(token.as_deref(), SCAN_PAGE_SIZE).await?;
            objects.extend(page.objects.into_iter().map(|o| Object {
                key: o.key,
                mod_time: o.mod_time,
                size: o.size,
                is_dir: o.is_dir,
            }));
            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok(objects),
            }
        }
    }
}

#[async_trait]
impl SipSource for BucketSource {
    #[tracing::instrument(skip(self), fields(source = %self.id))]
    async fn list_objects(&self, opts: ListOptions) -> Result<Page> {
        let bucket = self.bucket.as_ref().ok_or(SipSourceError::InvalidSource)?;
        let limit = if opts.limit == 0 {
            DEFAULT_LIMIT
        } else {
            opts.limit
        };

        let sort = opts.sort.unwrap_or_else(Sort::by_key);
        let mut objects = self.all_objects(bucket).await?;
        objects.sort_by(|a, b| sort.compare(a, b));

        let first = match &opts.token {
            None => 0,
            Some(token) => {
                let cursor = decode_token(token)?;
                objects.partition_point(|o| !cursor.is_before(&sort, o))
            },
        };

        let page: Vec<Object> = objects.iter().skip(first).take(limit).cloned().collect();
        let next_token = match page.last() {
            Some(last) if first + page.len() < objects.len() => {
                Some(encode_token(&Cursor::of(last)))
            },
            _ => None,
        };

        Ok(Page {
            objects: page,
            limit,
            next_token,
        })
    }

    fn retention_period(&self) -> RetentionPeriod {
        self.retention_period
    }
}
