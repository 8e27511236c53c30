//! File repository: metadata rows for stored file content.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw file row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRow {
    pub id: String,
    pub owner: Option<String>,
    /// Logical name shown to users, not the on-disk name.
    pub name: String,
    pub path: String,
    pub content_type: String,
    pub size: i64,
    pub created_at: String,
}

impl FileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner: row.get("owner")?,
            name: row.get("name")?,
            path: row.get("path")?,
            content_type: row.get("content_type")?,
            size: row.get("size")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub fn insert(db: &Database, file: &FileRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO files (id, owner, name, path, content_type, size, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                file.id,
                file.owner,
                file.name,
                file.path,
                file.content_type,
                file.size,
                file.created_at,
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<FileRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM files WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], FileRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Deletes a file row. Returns whether a row existed.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM files WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}

/// Files created strictly before `cutoff` (stored timestamp format).
pub fn find_created_before(db: &Database, cutoff: &str) -> Result<Vec<FileRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM files WHERE created_at < ?1 ORDER BY created_at")?;
        let rows = stmt
            .query_map(params![cutoff], FileRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
