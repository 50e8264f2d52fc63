//! SLA policy: deadlines derived from priority, breach status derived from time.

use chrono::{DateTime, Duration, Utc};
use crate::db::models::{Priority, Sla, Ticket};

pub fn response_hours(priority: Priority) -> i64 {
    match priority {
        Priority::Low => 48,
        Priority::Medium => 24,
        Priority::High => 8,
        Priority::Urgent => 2,
    }
}

pub fn resolution_hours(priority: Priority) -> i64 {
    match priority {
        Priority::Low => 168,
        Priority::Medium => 72,
        Priority::High => 24,
        Priority::Urgent => 8,
    }
}

/// Fresh SLA for `priority` with deadlines counted from `from`. Breach flags start clear.
pub fn derive_sla(priority: Priority, from: DateTime<Utc>) -> Sla {
    let response_time_hours = response_hours(priority);
    let resolution_time_hours = resolution_hours(priority);

    Sla {
        response_time_hours,
        resolution_time_hours,
        response_deadline: from + Duration::hours(response_time_hours),
        resolution_deadline: from + Duration::hours(resolution_time_hours),
        is_response_breached: false,
        is_resolution_breached: false,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreachStatus {
    pub response: bool,
    pub resolution: bool,
}

impl BreachStatus {
    pub fn of(sla: &Sla) -> Self {
        Self {
            response: sla.is_response_breached,
            resolution: sla.is_resolution_breached,
        }
    }

    /// Flags that are set here but not in `previous`.
    pub fn newly_breached(&self, previous: &BreachStatus) -> BreachStatus {
        BreachStatus {
            response: self.response && !previous.response,
            resolution: self.resolution && !previous.resolution,
        }
    }

    pub fn any(&self) -> bool {
        self.response || self.resolution
    }
}

pub fn check_breach(ticket: &Ticket, now: DateTime<Utc>) -> BreachStatus {
    BreachStatus {
        response: ticket.first_response_at.is_none() && now > ticket.sla.response_deadline,
        resolution: ticket.resolved_at.is_none() && now > ticket.sla.resolution_deadline,
    }
}

/// Overwrite the stored flags with ones derived at `now`.
pub fn refresh_breach_flags(ticket: &mut Ticket, now: DateTime<Utc>) -> BreachStatus {
    let status = check_breach(ticket, now);
    ticket.sla.is_response_breached = status.response;
    ticket.sla.is_resolution_breached = status.resolution;
    status
}
