//! Writing and querying `connection_log` rows.

use rusqlite::types::ToSql;
use rusqlite::{params, Connection};
use s2s_types::{ConnectionRecord, Direction};
use serde::Serialize;

use crate::error::ObserveError;

/// Appends one accounting record and returns its row id.
///
/// # Errors
///
/// Returns `ObserveError::Database` on SQL failure.
pub fn record_connection(conn: &Connection, record: &ConnectionRecord) -> Result<i64, ObserveError> {
    let stanza_count = i64::try_from(record.stanza_count).unwrap_or(i64::MAX);
    let duration_secs = i64::try_from(record.duration.as_secs()).unwrap_or(i64::MAX);
    conn.execute(
        "INSERT INTO connection_log (peer_domain, direction, stanza_count, peer_ip, duration_secs)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.peer_domain,
            record.direction.as_str(),
            stanza_count,
            record.peer_ip,
            duration_secs,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Filter criteria for [`query_records`].
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub peer_domain: Option<String>,
    pub direction: Option<Direction>,
    /// Only rows closed at or after this `YYYY-MM-DD HH:MM:SS` UTC timestamp.
    pub since: Option<String>,
    /// Maximum number of rows to return (default: 100).
    pub limit: Option<i64>,
}

/// One stored accounting row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionLogEntry {
    pub id: i64,
    pub peer_domain: String,
    pub direction: Direction,
    pub stanza_count: i64,
    pub peer_ip: Option<String>,
    pub duration_secs: i64,
    pub closed_at: String,
}

/// Queries the accounting log, most recent first.
///
/// # Errors
///
/// Returns `ObserveError::Database` on SQL failure and
/// `ObserveError::CorruptRow` if a stored direction cannot be parsed.
pub fn query_records(
    conn: &Connection,
    filter: &RecordFilter,
) -> Result<Vec<ConnectionLogEntry>, ObserveError> {
    // Clauses and bind parameters are collected separately so nothing is
    // interpolated into the SQL text.
    let mut clauses = vec!["1 = 1".to_string()];
    let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();
    let mut idx = 1u32;

    if let Some(ref domain) = filter.peer_domain {
        clauses.push(format!("peer_domain = ?{idx}"));
        param_values.push(Box::new(domain.to_lowercase()));
        idx += 1;
    }

    if let Some(direction) = filter.direction {
        clauses.push(format!("direction = ?{idx}"));
        param_values.push(Box::new(direction.as_str()));
        idx += 1;
    }

    if let Some(ref since) = filter.since {
        clauses.push(format!("closed_at >= ?{idx}"));
        param_values.push(Box::new(since.clone()));
        idx += 1;
    }

    let limit = filter.limit.unwrap_or(100);
    let where_clause = clauses.join(" AND ");
    let sql = format!(
        "SELECT id, peer_domain, direction, stanza_count, peer_ip, duration_secs, closed_at
         FROM connection_log
         WHERE {where_clause}
         ORDER BY id DESC
         LIMIT ?{idx}"
    );
    param_values.push(Box::new(limit));

    let params_refs: Vec<&dyn ToSql> = param_values.iter().map(|p| &**p).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, i64>(5)?,
            row.get::<_, String>(6)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (id, peer_domain, direction, stanza_count, peer_ip, duration_secs, closed_at) = row?;
        let direction = direction
            .parse()
            .map_err(|source| ObserveError::CorruptRow { id, source })?;
        entries.push(ConnectionLogEntry {
            id,
            peer_domain,
            direction,
            stanza_count,
            peer_ip,
            duration_secs,
            closed_at,
        });
    }

    Ok(entries)
}
