//! Audit trail writer. Writes follow a successful ticket write and are
//! best-effort: a failure leaves a gap in the trail but never fails the mutation.

use std::sync::Arc;

use crate::db::{Database, NewTimelineEvent, TimelineEvent};

#[derive(Clone)]
pub struct AuditLog {
    db: Arc<Database>,
}

impl AuditLog {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append `events` for a mutation that has already been committed.
    /// Returns how many events were written.
    pub fn record(&self, events: Vec<NewTimelineEvent>) -> usize {
        if events.is_empty() {
            return 0;
        }

        match self.db.append_timeline_events(&events) {
            Ok(written) => {
                tracing::debug!(
                    "Recorded {} timeline event(s) for ticket {}",
                    written.len(),
                    events[0].ticket_id
                );
                written.len()
            }
            Err(e) => {
                let actions: Vec<&str> = events.iter().map(|ev| ev.action.as_str()).collect();
                tracing::error!(
                    "Audit gap: failed to record {:?} for ticket {}: {}",
                    actions,
                    events[0].ticket_id,
                    e
                );
                0
            }
        }
    }

    pub fn timeline(&self, ticket_id: &str) -> Result<Vec<TimelineEvent>, crate::db::DbError> {
        self.db.get_timeline(ticket_id)
    }
}
