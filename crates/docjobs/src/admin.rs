//! Cross-kind job listing for administrators.
//!
//! [`AdminJobAggregator`] is read-only. [`parse_admin_query`] is the thin
//! layer that turns query-string pairs into a [`JobListFilter`], rejecting
//! malformed values before any storage is touched.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::error::JobError;
use crate::job::{JobKind, JobStatus};
use crate::storage::JobStore;

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 200;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobListFilter {
    pub kind: Option<JobKind>,
    pub status: Option<JobStatus>,
    pub owner: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub created_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    pub created_to: Option<DateTime<Utc>>,
    pub id_prefix: Option<String>,
    pub limit: Option<u32>,
    pub offset: u64,
}

impl JobListFilter {
    /// Page size actually used: unset, zero or above the maximum means the
    /// default.
    pub fn effective_limit(&self) -> u32 {
        match self.limit {
            Some(n) if n > 0 && n <= MAX_LIMIT => n,
            _ => DEFAULT_LIMIT,
        }
    }
}

/// Kind-tagged projection of a job for listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub owner: Option<String>,
    /// Output file id; only populated for single-output kinds.
    pub primary_output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPage {
    pub jobs: Vec<JobSummary>,
    pub total: u64,
    pub limit: u32,
    pub offset: u64,
}

/// How many jobs one user has submitted, per kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserJobStats {
    pub owner: String,
    pub total: u64,
    /// Every kind is present, zero when the user never ran it.
    pub by_kind: BTreeMap<JobKind, u64>,
}

impl UserJobStats {
    pub fn count(&self, kind: JobKind) -> u64 {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}

pub struct AdminJobAggregator {
    jobs: Arc<dyn JobStore>,
}

impl AdminJobAggregator {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    /// Lists jobs of every kind, newest first.
    pub fn list(&self, filter: &JobListFilter) -> Result<JobPage, JobError> {
        if let (Some(from), Some(to)) = (filter.created_from, filter.created_to) {
            if from > to {
                return Err(JobError::InvalidFilter(format!(
                    "'from' ({}) is after 'to' ({})",
                    from, to
                )));
            }
        }

        let (jobs, total) = self.jobs.list(filter)?;
        tracing::debug!(total, returned = jobs.len(), "Listed jobs");

        Ok(JobPage {
            jobs,
            total,
            limit: filter.effective_limit(),
            offset: filter.offset,
        })
    }

    /// Counts one user's jobs of every kind, whatever their status.
    pub fn user_stats(&self, owner: &str) -> Result<UserJobStats, JobError> {
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(JobError::InvalidFilter("owner must not be empty".to_string()));
        }

        let counts = self.jobs.count_by_kind(owner)?;
        let by_kind: BTreeMap<JobKind, u64> = JobKind::ALL
            .iter()
            .map(|kind| (*kind, counts.get(kind).copied().unwrap_or(0)))
            .collect();
        let total = by_kind.values().sum();
        tracing::debug!(total, "Counted user jobs");

        Ok(UserJobStats {
            owner: owner.to_string(),
            total,
            by_kind,
        })
    }
}

/// Which end of a day a bare date stands for.
#[derive(Clone, Copy)]
enum Bound {
    Start,
    End,
}

fn parse_timestamp(key: &str, value: &str, bound: Bound) -> Result<DateTime<Utc>, JobError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        JobError::InvalidFilter(format!(
            "'{}' must be an RFC 3339 timestamp or YYYY-MM-DD date, got '{}'",
            key, value
        ))
    })?;
    let time = match bound {
        Bound::Start => NaiveTime::from_hms_opt(0, 0, 0),
        Bound::End => NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999),
    }
    .ok_or_else(|| JobError::InvalidFilter(format!("cannot resolve '{}' bound", key)))?;
    Ok(date.and_time(time).and_utc())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, JobError> {
    value
        .parse()
        .map_err(|_| JobError::InvalidFilter(format!("'{}' must be an integer, got '{}'", key, value)))
}

/// Builds a filter from query-string pairs.
///
/// Recognized keys: `kind` (alias `type`), `status`, `owner` (alias
/// `user_id`), `from`, `to`, `search`, `limit`, `offset`. Unknown keys and
/// empty values are ignored.
pub fn parse_admin_query<'a, I>(pairs: I) -> Result<JobListFilter, JobError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut filter = JobListFilter::default();

    for (key, raw) in pairs {
        let value = raw.trim();
        if value.is_empty() {
            continue;
        }
        match key {
            "kind" | "type" => filter.kind = Some(value.parse()?),
            "status" => {
                filter.status = Some(value.parse().map_err(JobError::InvalidFilter)?);
            }
            "owner" | "user_id" => filter.owner = Some(value.to_string()),
            "from" => filter.created_from = Some(parse_timestamp(key, value, Bound::Start)?),
            "to" => filter.created_to = Some(parse_timestamp(key, value, Bound::End)?),
            "search" => filter.id_prefix = Some(value.to_ascii_lowercase()),
            "limit" => {
                let limit: i64 = parse_number(key, value)?;
                filter.limit = if limit > 0 && limit <= i64::from(MAX_LIMIT) {
                    Some(limit as u32)
                } else {
                    None
                };
            }
            "offset" => {
                let offset: i64 = parse_number(key, value)?;
                filter.offset = offset.max(0) as u64;
            }
            _ => {}
        }
    }

    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_limit() {
        let mut filter = JobListFilter::default();
        assert_eq!(filter.effective_limit(), 50);
        filter.limit = Some(0);
        assert_eq!(filter.effective_limit(), 50);
        filter.limit = Some(10);
        assert_eq!(filter.effective_limit(), 10);
        filter.limit = Some(200);
        assert_eq!(filter.effective_limit(), 200);
        filter.limit = Some(201);
        assert_eq!(filter.effective_limit(), 50);
    }

    #[test]
    fn test_parse_full_query() {
        let filter = parse_admin_query(vec![
            ("type", "pdf-to-jpg"),
            ("status", "done"),
            ("user_id", "u-42"),
            ("from", "2026-01-01"),
            ("to", "2026-01-31T12:00:00Z"),
            ("search", "ABC"),
            ("limit", "20"),
            ("offset", "40"),
            ("utm_source", "x"),
        ])
        .unwrap();

        assert_eq!(filter.kind, Some(JobKind::PdfToJpg));
        assert_eq!(filter.status, Some(JobStatus::Done));
        assert_eq!(filter.owner.as_deref(), Some("u-42"));
        assert_eq!(
            filter.created_from.unwrap().to_rfc3339(),
            "2026-01-01T00:00:00+00:00"
        );
        assert_eq!(
            filter.created_to.unwrap().to_rfc3339(),
            "2026-01-31T12:00:00+00:00"
        );
        assert_eq!(filter.id_prefix.as_deref(), Some("abc"));
        assert_eq!(filter.limit, Some(20));
        assert_eq!(filter.offset, 40);
    }

    #[test]
    fn test_bare_to_date_covers_whole_day() {
        let filter = parse_admin_query(vec![("to", "2026-01-31")]).unwrap();
        let to = filter.created_to.unwrap();
        assert_eq!(to.date_naive(), NaiveDate::from_ymd_opt(2026, 1, 31).unwrap());
        assert_eq!(to.time(), NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap());
    }

    #[test]
    fn test_invalid_timestamp_fails_early() {
        for (key, value) in [("from", "yesterday"), ("to", "2026-13-01"), ("from", "2026/01/01")] {
            match parse_admin_query(vec![(key, value)]) {
                Err(JobError::InvalidFilter(msg)) => assert!(msg.contains(key)),
                other => panic!("Expected InvalidFilter for {}={}, got {:?}", key, value, other),
            }
        }
    }

    #[test]
    fn test_unknown_kind_and_status() {
        assert!(matches!(
            parse_admin_query(vec![("kind", "fax-to-pdf")]),
            Err(JobError::UnsupportedJobKind(_))
        ));
        assert!(matches!(
            parse_admin_query(vec![("status", "completed")]),
            Err(JobError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_limit_and_offset_normalization() {
        let filter = parse_admin_query(vec![("limit", "-5"), ("offset", "-10")]).unwrap();
        assert_eq!(filter.limit, None);
        assert_eq!(filter.effective_limit(), DEFAULT_LIMIT);
        assert_eq!(filter.offset, 0);

        let filter = parse_admin_query(vec![("limit", "500")]).unwrap();
        assert_eq!(filter.limit, None);
        assert_eq!(filter.effective_limit(), DEFAULT_LIMIT);

        let filter = parse_admin_query(vec![("limit", "200")]).unwrap();
        assert_eq!(filter.effective_limit(), MAX_LIMIT);

        assert!(matches!(
            parse_admin_query(vec![("limit", "ten")]),
            Err(JobError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_empty_values_ignored() {
        let filter = parse_admin_query(vec![("status", ""), ("from", "  ")]).unwrap();
        assert_eq!(filter, JobListFilter::default());
    }
}
