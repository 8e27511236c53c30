//! Job repository: queries over the generic `jobs` table.
//!
//! Every kind shares one table. Kind-specific layout lives in the JSON
//! `inputs`/`parameters` columns and in which output columns are used.

use rusqlite::types::ToSql;
use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub kind: String,
    pub owner: Option<String>,
    /// JSON array of input file ids.
    pub inputs: String,
    /// JSON object of stored parameters.
    pub parameters: String,
    pub status: String,
    pub output_file_id: Option<String>,
    /// JSON array of output file ids, for multi-output kinds.
    pub output_file_ids: Option<String>,
    pub bundle_file_id: Option<String>,
    pub error_code: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            kind: row.get("kind")?,
            owner: row.get("owner")?,
            inputs: row.get("inputs")?,
            parameters: row.get("parameters")?,
            status: row.get("status")?,
            output_file_id: row.get("output_file_id")?,
            output_file_ids: row.get("output_file_ids")?,
            bundle_file_id: row.get("bundle_file_id")?,
            error_code: row.get("error_code")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Query filter for job listing. Timestamps are stored-format strings.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub kind: Option<String>,
    pub status: Option<String>,
    pub owner: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub id_prefix: Option<String>,
    pub limit: u64,
    pub offset: u64,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, kind, owner, inputs, parameters, status, output_file_id,
             output_file_ids, bundle_file_id, error_code, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                job.id,
                job.kind,
                job.owner,
                job.inputs,
                job.parameters,
                job.status,
                job.output_file_id,
                job.output_file_ids,
                job.bundle_file_id,
                job.error_code,
                job.error,
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Writes status, outputs and error of a job, but only while its current
/// status is one of `expected`. Returns whether the row was updated.
///
/// Identity, inputs, parameters and `created_at` are never rewritten.
pub fn transition(
    db: &Database,
    job: &JobRow,
    expected: &[&str],
) -> Result<bool, DatabaseError> {
    if expected.is_empty() {
        return Ok(false);
    }
    db.with_conn(|conn| {
        let placeholders: Vec<String> = (0..expected.len())
            .map(|i| format!("?{}", i + 9))
            .collect();
        let sql = format!(
            "UPDATE jobs SET status=?2, output_file_id=?3, output_file_ids=?4,
             bundle_file_id=?5, error_code=?6, error=?7, updated_at=?8
             WHERE id=?1 AND status IN ({})",
            placeholders.join(", ")
        );

        let mut values: Vec<&dyn ToSql> = vec![
            &job.id,
            &job.status,
            &job.output_file_id,
            &job.output_file_ids,
            &job.bundle_file_id,
            &job.error_code,
            &job.error,
            &job.updated_at,
        ];
        for status in expected {
            values.push(status);
        }

        let changed = conn.execute(&sql, values.as_slice())?;
        Ok(changed == 1)
    })
}

/// Finds a job by its ID, whatever its kind.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Finds a job by kind and ID. A job of another kind is not found.
pub fn find_by_kind_and_id(
    db: &Database,
    kind: &str,
    id: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE kind = ?1 AND id = ?2")?;
        let mut rows = stmt.query_map(params![kind, id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Escapes `%`, `_` and `\` so they match literally in a LIKE pattern.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Queries jobs with filters, returning (rows, total_count).
///
/// Newest first; rows created in the same instant come back in reverse
/// insertion order.
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(ref kind) = filter.kind {
            conditions.push(format!("kind = ?{}", param_values.len() + 1));
            param_values.push(Box::new(kind.clone()));
        }
        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if let Some(ref owner) = filter.owner {
            conditions.push(format!("owner = ?{}", param_values.len() + 1));
            param_values.push(Box::new(owner.clone()));
        }
        if let Some(ref from_date) = filter.from_date {
            conditions.push(format!("created_at >= ?{}", param_values.len() + 1));
            param_values.push(Box::new(from_date.clone()));
        }
        if let Some(ref to_date) = filter.to_date {
            conditions.push(format!("created_at <= ?{}", param_values.len() + 1));
            param_values.push(Box::new(to_date.clone()));
        }
        if let Some(ref prefix) = filter.id_prefix {
            conditions.push(format!(
                "id LIKE ?{} ESCAPE '\\'",
                param_values.len() + 1
            ));
            param_values.push(Box::new(format!("{}%", escape_like(prefix))));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        param_values.push(Box::new(filter.limit as i64));
        param_values.push(Box::new(filter.offset as i64));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC, seq DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn ToSql> = param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Number of jobs per kind slug for one owner. Kinds without jobs are
/// absent.
pub fn count_by_kind(db: &Database, owner: &str) -> Result<Vec<(String, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT kind, COUNT(*) FROM jobs WHERE owner = ?1 GROUP BY kind ORDER BY kind",
        )?;
        let counts = stmt
            .query_map(params![owner], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    })
}
