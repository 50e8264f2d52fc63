use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::OptionalExtension;
use crate::db::{Database, DbError, format_datetime, get_datetime, get_opt_datetime};
use crate::db::models::{
    Category, DashboardStats, Priority, Sla, SortOrder, Status, Ticket, TicketFilter, TicketPage,
    TicketSort,
};
use crate::db::schema::PRIORITY_RANK_SQL;

const TICKET_COLUMNS: &str = r#"id, title, description, status, priority, category,
       created_by, assigned_to, tags_json,
       response_time_hours, resolution_time_hours, response_deadline, resolution_deadline,
       is_response_breached, is_resolution_breached,
       first_response_at, resolved_at, closed_at,
       version, created_at, updated_at"#;

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

impl Database {
    pub fn get_ticket(&self, ticket_id: &str) -> Result<Ticket, DbError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM tickets WHERE id = ?", TICKET_COLUMNS),
                [ticket_id],
                Self::map_ticket_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    DbError::NotFound(format!("Ticket {}", ticket_id))
                }
                other => DbError::Sqlite(other),
            })
        })
    }

    pub fn insert_ticket(&self, ticket: &Ticket) -> Result<Ticket, DbError> {
        self.with_conn(|conn| {
            let tags_json = serde_json::to_string(&ticket.tags).unwrap_or_else(|_| "[]".to_string());

            conn.execute(
                r#"INSERT INTO tickets
                   (id, title, description, status, priority, category, created_by, assigned_to,
                    tags_json, response_time_hours, resolution_time_hours, response_deadline,
                    resolution_deadline, is_response_breached, is_resolution_breached,
                    first_response_at, resolved_at, closed_at, version, created_at, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
                rusqlite::params![
                    ticket.id,
                    ticket.title,
                    ticket.description,
                    ticket.status.as_str(),
                    ticket.priority.as_str(),
                    ticket.category.as_str(),
                    ticket.created_by,
                    ticket.assigned_to,
                    tags_json,
                    ticket.sla.response_time_hours,
                    ticket.sla.resolution_time_hours,
                    format_datetime(&ticket.sla.response_deadline),
                    format_datetime(&ticket.sla.resolution_deadline),
                    ticket.sla.is_response_breached,
                    ticket.sla.is_resolution_breached,
                    ticket.first_response_at.as_ref().map(format_datetime),
                    ticket.resolved_at.as_ref().map(format_datetime),
                    ticket.closed_at.as_ref().map(format_datetime),
                    ticket.version,
                    format_datetime(&ticket.created_at),
                    format_datetime(&ticket.updated_at),
                ],
            )?;

            conn.query_row(
                &format!("SELECT {} FROM tickets WHERE id = ?", TICKET_COLUMNS),
                [&ticket.id],
                Self::map_ticket_row,
            )
            .map_err(DbError::Sqlite)
        })
    }

    /// Compare-and-swap write of a ticket's mutable state.
    ///
    /// The row is only written if its stored version still equals `expected_version`,
    /// and the version is bumped by one in the same statement. Returns
    /// `VersionConflict` when another writer got there first.
    pub fn update_ticket_if_version(
        &self,
        ticket: &Ticket,
        expected_version: i64,
    ) -> Result<Ticket, DbError> {
        self.with_conn(|conn| {
            let tags_json = serde_json::to_string(&ticket.tags).unwrap_or_else(|_| "[]".to_string());

            let affected = conn.execute(
                r#"UPDATE tickets
                   SET title = ?1, description = ?2, status = ?3, priority = ?4, category = ?5,
                       assigned_to = ?6, tags_json = ?7,
                       response_time_hours = ?8, resolution_time_hours = ?9,
                       response_deadline = ?10, resolution_deadline = ?11,
                       is_response_breached = ?12, is_resolution_breached = ?13,
                       first_response_at = ?14, resolved_at = ?15, closed_at = ?16,
                       updated_at = ?17, version = version + 1
                   WHERE id = ?18 AND version = ?19"#,
                rusqlite::params![
                    ticket.title,
                    ticket.description,
                    ticket.status.as_str(),
                    ticket.priority.as_str(),
                    ticket.category.as_str(),
                    ticket.assigned_to,
                    tags_json,
                    ticket.sla.response_time_hours,
                    ticket.sla.resolution_time_hours,
                    format_datetime(&ticket.sla.response_deadline),
                    format_datetime(&ticket.sla.resolution_deadline),
                    ticket.sla.is_response_breached,
                    ticket.sla.is_resolution_breached,
                    ticket.first_response_at.as_ref().map(format_datetime),
                    ticket.resolved_at.as_ref().map(format_datetime),
                    ticket.closed_at.as_ref().map(format_datetime),
                    format_datetime(&ticket.updated_at),
                    ticket.id,
                    expected_version,
                ],
            )?;

            if affected == 0 {
                let actual: Option<i64> = conn
                    .query_row("SELECT version FROM tickets WHERE id = ?", [&ticket.id], |row| row.get(0))
                    .optional()?;

                return match actual {
                    None => Err(DbError::NotFound(format!("Ticket {}", ticket.id))),
                    Some(actual) => Err(DbError::VersionConflict {
                        ticket_id: ticket.id.clone(),
                        expected: expected_version,
                        actual,
                    }),
                };
            }

            conn.query_row(
                &format!("SELECT {} FROM tickets WHERE id = ?", TICKET_COLUMNS),
                [&ticket.id],
                Self::map_ticket_row,
            )
            .map_err(DbError::Sqlite)
        })
    }

    /// Persist recomputed breach flags. Derived data only: the version is left alone.
    /// Returns true if the stored flags actually changed.
    pub fn store_breach_flags(
        &self,
        ticket_id: &str,
        is_response_breached: bool,
        is_resolution_breached: bool,
    ) -> Result<bool, DbError> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                r#"UPDATE tickets
                   SET is_response_breached = ?1, is_resolution_breached = ?2
                   WHERE id = ?3
                     AND (is_response_breached != ?1 OR is_resolution_breached != ?2)"#,
                rusqlite::params![is_response_breached, is_resolution_breached, ticket_id],
            )?;
            Ok(affected > 0)
        })
    }

    /// Tickets whose deadlines have passed without the stored breach flag reflecting it.
    pub fn get_unflagged_breaches(&self, now: DateTime<Utc>) -> Result<Vec<Ticket>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                r#"SELECT {} FROM tickets
                   WHERE (first_response_at IS NULL AND response_deadline < ?1 AND is_response_breached = 0)
                      OR (resolved_at IS NULL AND resolution_deadline < ?1 AND is_resolution_breached = 0)
                   ORDER BY created_at"#,
                TICKET_COLUMNS
            ))?;

            let rows = stmt.query_map([format_datetime(&now)], Self::map_ticket_row)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
        })
    }

    pub fn list_tickets(&self, filter: &TicketFilter) -> Result<TicketPage, DbError> {
        let limit = match filter.limit {
            0 => DEFAULT_PAGE_LIMIT,
            n => n.min(MAX_PAGE_LIMIT),
        };
        let page = filter.page.max(1);
        let offset = (u64::from(page) - 1)
            .saturating_mul(u64::from(limit))
            .min(i64::MAX as u64) as i64;

        let mut clauses: Vec<&str> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        if let Some(status) = filter.status {
            clauses.push("status = ?");
            params.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(priority) = filter.priority {
            clauses.push("priority = ?");
            params.push(Value::Text(priority.as_str().to_string()));
        }
        if let Some(category) = filter.category {
            clauses.push("category = ?");
            params.push(Value::Text(category.as_str().to_string()));
        }
        if let Some(ref assigned_to) = filter.assigned_to {
            clauses.push("assigned_to = ?");
            params.push(Value::Text(assigned_to.clone()));
        }
        if let Some(ref created_by) = filter.created_by {
            clauses.push("created_by = ?");
            params.push(Value::Text(created_by.clone()));
        }
        if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            clauses.push(r"(title LIKE ? ESCAPE '\' OR description LIKE ? ESCAPE '\')");
            let pattern = format!("%{}%", escape_like(term));
            params.push(Value::Text(pattern.clone()));
            params.push(Value::Text(pattern));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let sort_sql = match filter.sort {
            TicketSort::CreatedAt => "created_at",
            TicketSort::UpdatedAt => "updated_at",
            TicketSort::Priority => PRIORITY_RANK_SQL,
        };
        let order_sql = match filter.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };

        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM tickets {}", where_sql),
                rusqlite::params_from_iter(params.iter()),
                |row| row.get(0),
            )?;

            let mut page_params = params.clone();
            page_params.push(Value::Integer(limit as i64));
            page_params.push(Value::Integer(offset));

            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM tickets {} ORDER BY {} {}, id ASC LIMIT ? OFFSET ?",
                TICKET_COLUMNS, where_sql, sort_sql, order_sql
            ))?;
            let tickets = stmt
                .query_map(rusqlite::params_from_iter(page_params.iter()), Self::map_ticket_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(TicketPage {
                tickets,
                total: total as u64,
                page,
                limit,
            })
        })
    }

    pub fn dashboard_stats(&self, now: DateTime<Utc>) -> Result<DashboardStats, DbError> {
        self.with_conn(|conn| {
            conn.query_row(
                r#"SELECT COUNT(*),
                          COALESCE(SUM(status = 'open'), 0),
                          COALESCE(SUM(status = 'in_progress'), 0),
                          COALESCE(SUM(status = 'pending'), 0),
                          COALESCE(SUM(status = 'resolved'), 0),
                          COALESCE(SUM(status = 'closed'), 0),
                          COALESCE(SUM(assigned_to IS NULL), 0),
                          COALESCE(SUM(first_response_at IS NULL AND response_deadline < ?1), 0),
                          COALESCE(SUM(resolved_at IS NULL AND resolution_deadline < ?1), 0)
                   FROM tickets"#,
                [format_datetime(&now)],
                |row| {
                    Ok(DashboardStats {
                        total: row.get::<_, i64>(0)? as u64,
                        open: row.get::<_, i64>(1)? as u64,
                        in_progress: row.get::<_, i64>(2)? as u64,
                        pending: row.get::<_, i64>(3)? as u64,
                        resolved: row.get::<_, i64>(4)? as u64,
                        closed: row.get::<_, i64>(5)? as u64,
                        unassigned: row.get::<_, i64>(6)? as u64,
                        response_breached: row.get::<_, i64>(7)? as u64,
                        resolution_breached: row.get::<_, i64>(8)? as u64,
                    })
                },
            )
            .map_err(DbError::from)
        })
    }

    pub(crate) fn map_ticket_row(row: &rusqlite::Row) -> rusqlite::Result<Ticket> {
        let status_str: String = row.get(3)?;
        let priority_str: String = row.get(4)?;
        let category_str: String = row.get(5)?;
        let tags_json: String = row.get(8)?;

        Ok(Ticket {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            status: Status::parse(&status_str).unwrap_or(Status::Open),
            priority: Priority::parse(&priority_str).unwrap_or_default(),
            category: Category::parse(&category_str).unwrap_or_default(),
            created_by: row.get(6)?,
            assigned_to: row.get(7)?,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            sla: Sla {
                response_time_hours: row.get(9)?,
                resolution_time_hours: row.get(10)?,
                response_deadline: get_datetime(row, 11)?,
                resolution_deadline: get_datetime(row, 12)?,
                is_response_breached: row.get::<_, i32>(13)? != 0,
                is_resolution_breached: row.get::<_, i32>(14)? != 0,
            },
            first_response_at: get_opt_datetime(row, 15)?,
            resolved_at: get_opt_datetime(row, 16)?,
            closed_at: get_opt_datetime(row, 17)?,
            version: row.get(18)?,
            created_at: get_datetime(row, 19)?,
            updated_at: get_datetime(row, 20)?,
        })
    }
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
