//! Read paths. Breach flags are always re-derived here before a ticket is returned.

use crate::db::{Actor, Comment, DashboardStats, Ticket, TicketFilter, TicketPage, TimelineEvent};
use crate::lifecycle::{refresh_breach_flags, standing, BreachStatus, Standing};

use super::{breach_events, EngineError, TicketEngine};

impl TicketEngine {
    pub fn get_ticket(&self, actor: &Actor, ticket_id: &str) -> Result<Ticket, EngineError> {
        let ticket = self.db.get_ticket(ticket_id)?;
        if standing(actor, &ticket) == Standing::Outsider {
            return Err(EngineError::Forbidden("You do not have access to this ticket".to_string()));
        }
        Ok(self.refresh_breaches(ticket))
    }

    /// Users only ever see their own tickets, whatever filter they send.
    pub fn list_tickets(&self, actor: &Actor, mut filter: TicketFilter) -> Result<TicketPage, EngineError> {
        if !actor.role.is_staff() {
            filter.created_by = Some(actor.id.clone());
        }

        let mut page = self.db.list_tickets(&filter)?;
        page.tickets = page
            .tickets
            .into_iter()
            .map(|ticket| self.refresh_breaches(ticket))
            .collect();
        Ok(page)
    }

    pub fn list_comments(&self, actor: &Actor, ticket_id: &str) -> Result<Vec<Comment>, EngineError> {
        let ticket = self.db.get_ticket(ticket_id)?;
        match standing(actor, &ticket) {
            Standing::Staff => Ok(self.db.get_comments(&ticket.id, true)?),
            Standing::Owner => Ok(self.db.get_comments(&ticket.id, false)?),
            Standing::Outsider => Err(EngineError::Forbidden(
                "You do not have access to this ticket".to_string(),
            )),
        }
    }

    pub fn timeline(&self, actor: &Actor, ticket_id: &str) -> Result<Vec<TimelineEvent>, EngineError> {
        let ticket = self.db.get_ticket(ticket_id)?;
        if standing(actor, &ticket) == Standing::Outsider {
            return Err(EngineError::Forbidden("You do not have access to this ticket".to_string()));
        }
        Ok(self.audit.timeline(&ticket.id)?)
    }

    pub fn dashboard_stats(&self, actor: &Actor) -> Result<DashboardStats, EngineError> {
        super::require_staff(actor, "view dashboard statistics")?;
        Ok(self.db.dashboard_stats(self.clock.now())?)
    }

    /// Refresh every ticket whose deadline passed without its flag being set.
    /// Returns how many tickets were flagged.
    pub fn sweep_breaches(&self) -> Result<usize, EngineError> {
        let candidates = self.db.get_unflagged_breaches(self.clock.now())?;
        let count = candidates.len();
        for ticket in candidates {
            self.refresh_breaches(ticket);
        }
        if count > 0 {
            tracing::info!("SLA sweep flagged {} ticket(s)", count);
        }
        Ok(count)
    }

    /// Re-derive breach flags at the current time. Changed flags are persisted
    /// without a version bump; a flag that flips to breached gets one
    /// `sla_breach` event. Persistence failures are logged and the freshly
    /// derived flags are still returned.
    pub(crate) fn refresh_breaches(&self, mut ticket: Ticket) -> Ticket {
        let now = self.clock.now();
        let previous = BreachStatus::of(&ticket.sla);
        let current = refresh_breach_flags(&mut ticket, now);
        if current == previous {
            return ticket;
        }

        match self.db.store_breach_flags(&ticket.id, current.response, current.resolution) {
            Ok(true) => {
                let newly = current.newly_breached(&previous);
                if newly.any() {
                    tracing::warn!("Ticket {} breached SLA ({:?})", ticket.id, newly);
                    self.audit.record(breach_events(&ticket, newly, now));
                }
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("Failed to persist breach flags for ticket {}: {}", ticket.id, e);
            }
        }
        ticket
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use super::super::NewTicket;
    use super::*;
    use crate::db::{CommentKind, Priority, Status, TimelineAction};
    use chrono::Duration;

    fn urgent(h: &Harness) -> Ticket {
        h.engine.create(&h.user, NewTicket {
            title: Some("Site down".to_string()),
            description: Some("500 everywhere".to_string()),
            priority: Some(Priority::Urgent),
            ..Default::default()
        }).unwrap()
    }

    fn breach_count(h: &Harness, ticket_id: &str) -> usize {
        h.db.get_timeline(ticket_id)
            .unwrap()
            .iter()
            .filter(|e| e.action == TimelineAction::SlaBreach)
            .count()
    }

    #[test]
    fn read_recomputes_and_persists_breach_without_version_bump() {
        let h = Harness::new();
        let ticket = urgent(&h);

        h.clock.advance(Duration::hours(2));
        assert!(!h.engine.get_ticket(&h.agent, &ticket.id).unwrap().sla.is_response_breached);

        h.clock.advance(Duration::minutes(1));
        let read = h.engine.get_ticket(&h.agent, &ticket.id).unwrap();
        assert!(read.sla.is_response_breached);
        assert!(!read.sla.is_resolution_breached);
        assert_eq!(read.version, 0);

        let stored = h.db.get_ticket(&ticket.id).unwrap();
        assert!(stored.sla.is_response_breached);
        assert_eq!(stored.version, 0);
    }

    #[test]
    fn breach_event_is_recorded_once() {
        let h = Harness::new();
        let ticket = urgent(&h);
        h.clock.advance(Duration::hours(3));

        h.engine.get_ticket(&h.agent, &ticket.id).unwrap();
        h.engine.get_ticket(&h.user, &ticket.id).unwrap();
        assert_eq!(breach_count(&h, &ticket.id), 1);

        let event = h.db.get_timeline(&ticket.id).unwrap().pop().unwrap();
        assert!(event.actor_id.is_none());
        assert_eq!(event.details["sla"], "response");
    }

    #[test]
    fn refresh_is_idempotent_for_same_clock_value() {
        let h = Harness::new();
        let ticket = urgent(&h);
        h.clock.advance(Duration::hours(9));

        let first = h.engine.get_ticket(&h.agent, &ticket.id).unwrap();
        let second = h.engine.get_ticket(&h.agent, &ticket.id).unwrap();
        assert_eq!(first.sla, second.sla);
        assert!(second.sla.is_resolution_breached);
        assert_eq!(breach_count(&h, &ticket.id), 2);
    }

    #[test]
    fn sweep_flags_overdue_tickets() {
        let h = Harness::new();
        let overdue = urgent(&h);
        let calm = h.engine.create(&h.user, NewTicket {
            title: Some("Question".to_string()),
            description: Some("How do I".to_string()),
            priority: Some(Priority::Low),
            ..Default::default()
        }).unwrap();

        h.clock.advance(Duration::hours(3));
        assert_eq!(h.engine.sweep_breaches().unwrap(), 1);
        assert_eq!(h.engine.sweep_breaches().unwrap(), 0);

        assert!(h.db.get_ticket(&overdue.id).unwrap().sla.is_response_breached);
        assert!(!h.db.get_ticket(&calm.id).unwrap().sla.is_response_breached);
    }

    #[test]
    fn outsider_cannot_read_ticket() {
        let h = Harness::new();
        let ticket = urgent(&h);
        let result = h.engine.get_ticket(&h.other_user, &ticket.id);
        assert!(matches!(result, Err(EngineError::Forbidden(_))));
    }

    #[test]
    fn users_list_only_their_own_tickets() {
        let h = Harness::new();
        urgent(&h);
        h.engine.create(&h.other_user, NewTicket {
            title: Some("Mine".to_string()),
            description: Some("Other user's".to_string()),
            ..Default::default()
        }).unwrap();

        let own = h.engine.list_tickets(&h.user, TicketFilter::default()).unwrap();
        assert_eq!(own.total, 1);

        let sneaky = h.engine.list_tickets(&h.user, TicketFilter {
            created_by: Some(h.other_user.id.clone()),
            ..Default::default()
        }).unwrap();
        assert!(sneaky.tickets.iter().all(|t| t.created_by == h.user.id));

        let all = h.engine.list_tickets(&h.agent, TicketFilter::default()).unwrap();
        assert_eq!(all.total, 2);
    }

    #[test]
    fn list_filters_by_status() {
        let h = Harness::new();
        let ticket = urgent(&h);
        urgent(&h);
        h.engine.set_status(&h.agent, &ticket.id, Status::Pending).unwrap();

        let pending = h.engine.list_tickets(&h.agent, TicketFilter {
            status: Some(Status::Pending),
            ..Default::default()
        }).unwrap();
        assert_eq!(pending.total, 1);
        assert_eq!(pending.tickets[0].id, ticket.id);
    }

    #[test]
    fn owners_do_not_see_internal_notes() {
        let h = Harness::new();
        let ticket = urgent(&h);
        h.engine.add_comment(&h.agent, &ticket.id, "Public reply", CommentKind::Comment).unwrap();
        h.engine.add_comment(&h.agent, &ticket.id, "Internal", CommentKind::InternalNote).unwrap();

        assert_eq!(h.engine.list_comments(&h.agent, &ticket.id).unwrap().len(), 2);
        assert_eq!(h.engine.list_comments(&h.user, &ticket.id).unwrap().len(), 1);
        assert!(matches!(
            h.engine.list_comments(&h.other_user, &ticket.id),
            Err(EngineError::Forbidden(_))
        ));
    }

    #[test]
    fn timeline_visible_to_owner_and_staff() {
        let h = Harness::new();
        let ticket = urgent(&h);
        assert_eq!(h.engine.timeline(&h.user, &ticket.id).unwrap().len(), 1);
        assert_eq!(h.engine.timeline(&h.admin, &ticket.id).unwrap().len(), 1);
        assert!(h.engine.timeline(&h.other_user, &ticket.id).is_err());
    }

    #[test]
    fn dashboard_counts_breaches_at_now() {
        let h = Harness::new();
        let ticket = urgent(&h);
        urgent(&h);
        h.engine.set_status(&h.agent, &ticket.id, Status::Resolved).unwrap();

        h.clock.advance(Duration::hours(10));
        let stats = h.engine.dashboard_stats(&h.admin).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.open, 1);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.response_breached, 2);
        assert_eq!(stats.resolution_breached, 1);

        assert!(matches!(h.engine.dashboard_stats(&h.user), Err(EngineError::Forbidden(_))));
    }
}
