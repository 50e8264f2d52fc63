use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use crate::db::{Database, DbError, format_datetime, get_datetime};
use crate::db::models::IdempotencyRecord;

impl Database {
    /// Live record for `(actor_id, key)`; expired rows are treated as absent.
    pub fn get_idempotency_record(
        &self,
        actor_id: &str,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IdempotencyRecord>, DbError> {
        self.with_conn(|conn| {
            conn.query_row(
                r#"SELECT actor_id, idempotency_key, status_code, body, created_at, expires_at
                   FROM idempotency_records
                   WHERE actor_id = ? AND idempotency_key = ? AND expires_at > ?"#,
                rusqlite::params![actor_id, key, format_datetime(&now)],
                |row| {
                    Ok(IdempotencyRecord {
                        actor_id: row.get(0)?,
                        idempotency_key: row.get(1)?,
                        status_code: row.get(2)?,
                        body: row.get(3)?,
                        created_at: get_datetime(row, 4)?,
                        expires_at: get_datetime(row, 5)?,
                    })
                },
            )
            .optional()
            .map_err(DbError::from)
        })
    }

    /// Store a response. An existing live record wins; an expired one is replaced.
    /// Returns true if this call's record was written.
    pub fn insert_idempotency_record(&self, record: &IdempotencyRecord) -> Result<bool, DbError> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                r#"INSERT INTO idempotency_records
                   (actor_id, idempotency_key, status_code, body, created_at, expires_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                   ON CONFLICT(actor_id, idempotency_key) DO UPDATE SET
                       status_code = excluded.status_code,
                       body = excluded.body,
                       created_at = excluded.created_at,
                       expires_at = excluded.expires_at
                   WHERE idempotency_records.expires_at <= excluded.created_at"#,
                rusqlite::params![
                    record.actor_id,
                    record.idempotency_key,
                    record.status_code,
                    record.body,
                    format_datetime(&record.created_at),
                    format_datetime(&record.expires_at),
                ],
            )?;
            Ok(affected > 0)
        })
    }

    pub fn purge_idempotency_records(&self, now: DateTime<Utc>) -> Result<usize, DbError> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM idempotency_records WHERE expires_at <= ?",
                [format_datetime(&now)],
            )?;
            Ok(deleted)
        })
    }
}
