//! Half-open timestamp ranges used by list filters

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("time range: end cannot be before start")]
    EndBeforeStart,

    #[error("time range: invalid {field} time: {source}")]
    Parse {
        field: &'static str,
        #[source]
        source: chrono::ParseError,
    },
}

/// A `[start, end)` interval; `start == end` denotes an exact instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Range {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Lower bound used when a range is parsed without a start.
pub fn beginning_of_time() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl Range {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, RangeError> {
        if end < start {
            return Err(RangeError::EndBeforeStart);
        }
        Ok(Self { start, end })
    }

    pub fn instant(t: DateTime<Utc>) -> Self {
        Self { start: t, end: t }
    }

    /// Parse optional RFC3339 bounds.
    ///
    /// Returns `Ok(None)` when both bounds are absent. A missing start defaults
    /// to year 1 UTC and a missing end to now.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Option<Self>, RangeError> {
        Self::parse_at(start, end, Utc::now())
    }

    pub(crate) fn parse_at(
        start: Option<&str>,
        end: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, RangeError> {
        if start.is_none() && end.is_none() {
            return Ok(None);
        }

        let start = match start {
            Some(s) => parse_bound("start", s)?,
            None => beginning_of_time(),
        };
        let end = match end {
            Some(s) => parse_bound("end", s)?,
            None => now,
        };

        Self::new(start, end).map(Some)
    }

    pub fn is_zero(&self) -> bool {
        let zero = DateTime::<Utc>::default();
        self.start == zero && self.end == zero
    }

    pub fn is_instant(&self) -> bool {
        self.start == self.end
    }

    /// Whether `t` falls inside the range, honoring instant semantics.
    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        if self.is_instant() {
            return *t == self.start;
        }
        self.start <= *t && *t < self.end
    }
}

fn parse_bound(field: &'static str, value: &str) -> Result<DateTime<Utc>, RangeError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|source| RangeError::Parse { field, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_new_rejects_inverted_range() {
        let err = Range::new(t(2024, 9, 1), t(2024, 8, 1)).unwrap_err();
        assert_eq!(err.to_string(), "time range: end cannot be before start");
    }

    #[test]
    fn test_instant() {
        let r = Range::instant(t(2024, 8, 1));
        assert!(r.is_instant());
        assert!(!r.is_zero());
        assert!(r.contains(&t(2024, 8, 1)));
        assert!(!r.contains(&t(2024, 8, 2)));
    }

    #[test]
    fn test_zero_range() {
        assert!(Range::default().is_zero());
        assert!(Range::default().is_instant());
    }

    #[test]
    fn test_parse_none() {
        assert_eq!(Range::parse(None, None).unwrap(), None);
    }

    #[test]
    fn test_parse_defaults() {
        let now = t(2024, 10, 1);
        let r = Range::parse_at(Some("2024-08-01T00:00:00Z"), None, now)
            .unwrap()
            .unwrap();
        assert_eq!(r.start, t(2024, 8, 1));
        assert_eq!(r.end, now);

        let r = Range::parse_at(None, Some("2024-08-01T00:00:00Z"), now)
            .unwrap()
            .unwrap();
        assert_eq!(r.start, beginning_of_time());
        assert_eq!(r.start.format("%Y").to_string(), "0001");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Range::parse(Some("yesterday"), None),
            Err(RangeError::Parse { field: "start", .. })
        ));
        assert_eq!(
            Range::parse(Some("2024-09-01T00:00:00Z"), Some("2024-08-01T00:00:00Z")),
            Err(RangeError::EndBeforeStart)
        );
    }

    #[test]
    fn test_half_open() {
        let r = Range::new(t(2024, 8, 1), t(2024, 9, 1)).unwrap();
        assert!(r.contains(&t(2024, 8, 1)));
        assert!(!r.contains(&t(2024, 9, 1)));
    }
}
