use crate::db::{Database, DbError, format_datetime, get_datetime, stored_datetime};
use crate::db::models::{NewTimelineEvent, TimelineAction, TimelineEvent};

impl Database {
    /// Append a batch of events. The batch lands atomically; rows are never updated afterwards.
    pub fn append_timeline_events(&self, events: &[NewTimelineEvent]) -> Result<Vec<TimelineEvent>, DbError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut appended = Vec::with_capacity(events.len());

            for event in events {
                let event_id = uuid::Uuid::new_v4().to_string();
                let details_json = serde_json::to_string(&event.details)
                    .unwrap_or_else(|_| "{}".to_string());
                let created_at = format_datetime(&event.created_at);

                tx.execute(
                    r#"INSERT INTO timeline_events
                       (id, ticket_id, actor_id, action, details_json, description, created_at)
                       VALUES (?, ?, ?, ?, ?, ?, ?)"#,
                    rusqlite::params![
                        event_id,
                        event.ticket_id,
                        event.actor_id,
                        event.action.as_str(),
                        details_json,
                        event.description,
                        created_at,
                    ],
                )?;

                appended.push(TimelineEvent {
                    id: event_id,
                    ticket_id: event.ticket_id.clone(),
                    actor_id: event.actor_id.clone(),
                    action: event.action,
                    details: event.details.clone(),
                    description: event.description.clone(),
                    created_at: stored_datetime(&event.created_at),
                });
            }

            tx.commit()?;
            Ok(appended)
        })
    }

    /// Events for a ticket in the order they were appended.
    pub fn get_timeline(&self, ticket_id: &str) -> Result<Vec<TimelineEvent>, DbError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"SELECT id, ticket_id, actor_id, action, details_json, description, created_at
                   FROM timeline_events WHERE ticket_id = ? ORDER BY rowid"#
            )?;

            let events = stmt.query_map([ticket_id], |row| {
                let action_str: String = row.get(3)?;
                let details_json: String = row.get(4)?;

                Ok(TimelineEvent {
                    id: row.get(0)?,
                    ticket_id: row.get(1)?,
                    actor_id: row.get(2)?,
                    action: TimelineAction::parse(&action_str).unwrap_or(TimelineAction::Updated),
                    details: serde_json::from_str(&details_json).unwrap_or(serde_json::Value::Null),
                    description: row.get(5)?,
                    created_at: get_datetime(row, 6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

            Ok(events)
        })
    }
}
