//! Ticket mutation engine.
//!
//! Every write is a single-row compare-and-swap on the ticket's `version`.
//! Timeline events are appended after the write lands and never roll it back.

mod diff;
mod error;
mod reads;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::audit::AuditLog;
use crate::clock::Clock;
use crate::db::{
    Actor, Category, Comment, CommentKind, Database, DbError, NewTimelineEvent, Priority, Role,
    Status, Ticket, TimelineAction,
};
use crate::directory::UserDirectory;
use crate::idempotency::{CachedResponse, IdempotencyCache};
use crate::lifecycle::{
    authorize, authorize_assignment, can_author, check_assignee, derive_sla, refresh_breach_flags,
    standing, transition_effects, BreachStatus, Standing,
};

pub use diff::{describe_assignment, diff, FieldChange, TicketPatch};
pub use error::EngineError;

pub const MAX_BULK_TICKETS: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct NewTicket {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub category: Option<Category>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct CommentOutcome {
    pub comment: Comment,
    pub ticket: Ticket,
}

pub struct TicketEngine {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    directory: Arc<dyn UserDirectory>,
    audit: AuditLog,
    idempotency: Arc<IdempotencyCache>,
}

impl TicketEngine {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, idempotency: Arc<IdempotencyCache>) -> Self {
        Self {
            directory: db.clone(),
            audit: AuditLog::new(db.clone()),
            db,
            clock,
            idempotency,
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn idempotency(&self) -> &Arc<IdempotencyCache> {
        &self.idempotency
    }

    /// Run a mutation at most once per (actor, key).
    ///
    /// Without a key the mutation always runs. With one, a live cached response
    /// is replayed verbatim; otherwise the mutation runs and its response is
    /// stored. Server errors are not stored so that a retry can succeed.
    pub fn run_idempotent<F>(&self, actor: &Actor, key: Option<&str>, run: F) -> CachedResponse
    where
        F: FnOnce(&Self) -> CachedResponse,
    {
        let Some(key) = key else {
            return run(self);
        };

        match self.idempotency.check_or_reserve(&actor.id, key) {
            Ok(Some(cached)) => {
                tracing::debug!("Replaying idempotent response for {} key {}", actor.id, key);
                return cached;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Idempotency lookup failed for {} key {}: {}", actor.id, key, e);
            }
        }

        let response = run(self);

        if response.status_code < 500 {
            if let Err(e) = self.idempotency.store(&actor.id, key, &response) {
                tracing::warn!("Failed to store idempotent response for {} key {}: {}", actor.id, key, e);
            }
        }
        response
    }

    pub fn create(&self, actor: &Actor, new: NewTicket) -> Result<Ticket, EngineError> {
        let title = validate::title(new.title.as_deref().ok_or(EngineError::FieldRequired { field: "title" })?)?;
        let description = validate::description(
            new.description.as_deref().ok_or(EngineError::FieldRequired { field: "description" })?,
        )?;
        let tags = validate::tags(new.tags.as_deref().unwrap_or_default())?;
        let priority = new.priority.unwrap_or_default();
        let category = new.category.unwrap_or_default();

        let now = self.clock.now();
        let ticket = self.db.insert_ticket(&Ticket {
            id: uuid::Uuid::new_v4().to_string(),
            title,
            description,
            status: Status::Open,
            priority,
            category,
            created_by: actor.id.clone(),
            assigned_to: None,
            tags,
            sla: derive_sla(priority, now),
            first_response_at: None,
            resolved_at: None,
            closed_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })?;

        self.audit.record(vec![NewTimelineEvent {
            ticket_id: ticket.id.clone(),
            actor_id: Some(actor.id.clone()),
            action: TimelineAction::Created,
            details: json!({
                "title": ticket.title,
                "priority": ticket.priority,
                "category": ticket.category,
            }),
            description: format!("{} created the ticket", actor.name),
            created_at: now,
        }]);

        tracing::info!("Ticket {} created by {} ({})", ticket.id, actor.id, priority.as_str());
        Ok(ticket)
    }

    /// Apply a field patch. With `expected_version`, the call fails with
    /// `StaleUpdate` unless it matches the stored version. Fields the actor
    /// may not write are dropped; if nothing is left the call is forbidden.
    pub fn apply_update(
        &self,
        actor: &Actor,
        ticket_id: &str,
        expected_version: Option<i64>,
        patch: TicketPatch,
    ) -> Result<Ticket, EngineError> {
        if patch.is_empty() {
            return Err(EngineError::NoChanges);
        }

        let ticket = self.db.get_ticket(ticket_id)?;

        if let Some(expected) = expected_version {
            if expected != ticket.version {
                return Err(EngineError::StaleUpdate {
                    ticket_id: ticket.id,
                    expected,
                    actual: ticket.version,
                });
            }
        }

        let auth = authorize(actor, &ticket, &patch.requested_fields());
        if auth.is_forbidden() {
            return Err(EngineError::Forbidden(
                "You are not allowed to modify this ticket".to_string(),
            ));
        }
        if !auth.denied.is_empty() {
            tracing::debug!("Dropping fields {:?} from {}'s update of {}", auth.denied, actor.id, ticket.id);
        }

        let patch = validate::patch(patch.retain_allowed(&auth))?;

        if let Some(ref requested) = patch.assigned_to {
            if *requested != ticket.assigned_to {
                self.check_assignment(actor, &ticket, requested.as_deref())?;
            }
        }

        let changes = diff(&ticket, &patch);
        if changes.is_empty() {
            return Ok(self.refresh_breaches(ticket));
        }

        let now = self.clock.now();
        let (updated, follow_ups) = self.write_changes(actor, &ticket, &changes, now)?;

        let mut events: Vec<NewTimelineEvent> = changes
            .iter()
            .map(|change| change.to_event(&ticket.id, actor, self.directory.as_ref(), now))
            .collect();
        events.extend(follow_ups);
        self.audit.record(events);

        tracing::info!(
            "Ticket {} updated by {} ({} field(s), version {})",
            updated.id,
            actor.id,
            changes.len(),
            updated.version
        );
        Ok(updated)
    }

    /// Set or clear the assignee. Agents may only take or release tickets themselves.
    pub fn assign(&self, actor: &Actor, ticket_id: &str, assignee: Option<String>) -> Result<Ticket, EngineError> {
        require_staff(actor, "assign tickets")?;
        let assignee = assignee.map(|id| id.trim().to_string()).filter(|id| !id.is_empty());

        let ticket = self.db.get_ticket(ticket_id)?;
        self.check_assignment(actor, &ticket, assignee.as_deref())?;

        let (ticket, _) = self.reassign(actor, ticket, assignee)?;
        Ok(ticket)
    }

    pub fn set_status(&self, actor: &Actor, ticket_id: &str, status: Status) -> Result<Ticket, EngineError> {
        require_staff(actor, "change ticket status")?;
        self.apply_update(
            actor,
            ticket_id,
            None,
            TicketPatch {
                status: Some(status),
                ..Default::default()
            },
        )
    }

    pub fn set_priority(&self, actor: &Actor, ticket_id: &str, priority: Priority) -> Result<Ticket, EngineError> {
        require_staff(actor, "change ticket priority")?;
        self.apply_update(
            actor,
            ticket_id,
            None,
            TicketPatch {
                priority: Some(priority),
                ..Default::default()
            },
        )
    }

    /// Assign many tickets at once. Each ticket is handled on its own: missing
    /// tickets and lost races are skipped. Returns how many tickets changed.
    pub fn bulk_assign(
        &self,
        actor: &Actor,
        ticket_ids: &[String],
        assignee: Option<String>,
    ) -> Result<usize, EngineError> {
        if actor.role != Role::Admin {
            return Err(EngineError::Forbidden("Only admins can bulk-assign tickets".to_string()));
        }
        if ticket_ids.is_empty() {
            return Err(EngineError::FieldRequired { field: "ticketIds" });
        }
        if ticket_ids.len() > MAX_BULK_TICKETS {
            return Err(EngineError::InvalidField {
                field: "ticketIds",
                message: format!("at most {} tickets can be assigned at once", MAX_BULK_TICKETS),
            });
        }

        let assignee = assignee.map(|id| id.trim().to_string()).filter(|id| !id.is_empty());
        if let Some(ref id) = assignee {
            check_assignee(id, self.directory.find_user(id)?.as_ref())?;
        }

        let mut modified = 0;
        for ticket_id in ticket_ids {
            let ticket = match self.db.get_ticket(ticket_id) {
                Ok(ticket) => ticket,
                Err(DbError::NotFound(_)) => {
                    tracing::warn!("Bulk assign skipping missing ticket {}", ticket_id);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match self.reassign(actor, ticket, assignee.clone()) {
                Ok((_, true)) => modified += 1,
                Ok((_, false)) => {}
                Err(EngineError::StaleUpdate { .. }) | Err(EngineError::NotFound(_)) => {
                    tracing::warn!("Bulk assign skipping ticket {} after concurrent change", ticket_id);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!("Bulk assign by {} modified {} of {} ticket(s)", actor.id, modified, ticket_ids.len());
        Ok(modified)
    }

    pub fn add_comment(
        &self,
        actor: &Actor,
        ticket_id: &str,
        content: &str,
        kind: CommentKind,
    ) -> Result<CommentOutcome, EngineError> {
        let content = validate::comment_content(content)?;

        let ticket = self.db.get_ticket(ticket_id)?;
        if standing(actor, &ticket) == Standing::Outsider {
            return Err(EngineError::Forbidden(
                "You can only comment on your own tickets".to_string(),
            ));
        }
        if !can_author(actor, kind) {
            return Err(EngineError::Forbidden(
                "Only agents and admins can add internal notes".to_string(),
            ));
        }

        let now = self.clock.now();
        let recorded = self.db.create_comment(&ticket.id, &actor.id, &content, kind, now)?;
        let comment = recorded.comment;

        let what = match kind {
            CommentKind::Comment => "a comment",
            CommentKind::InternalNote => "an internal note",
        };
        self.audit.record(vec![NewTimelineEvent {
            ticket_id: ticket.id.clone(),
            actor_id: Some(actor.id.clone()),
            action: TimelineAction::Commented,
            details: json!({
                "commentId": comment.id,
                "type": comment.kind,
                "isFirstResponse": comment.is_first_response,
            }),
            description: format!("{} added {}", actor.name, what),
            created_at: now,
        }]);

        if recorded.first_response_recorded {
            tracing::info!("First response on ticket {} by {}", ticket.id, actor.id);
        }

        let ticket = self.refresh_breaches(self.db.get_ticket(&ticket.id)?);
        Ok(CommentOutcome { comment, ticket })
    }

    fn check_assignment(&self, actor: &Actor, ticket: &Ticket, requested: Option<&str>) -> Result<(), EngineError> {
        if let Some(id) = requested {
            check_assignee(id, self.directory.find_user(id)?.as_ref())?;
        }
        authorize_assignment(actor, ticket.assigned_to.as_deref(), requested)?;
        Ok(())
    }

    /// Write a new assignee and record `assigned`/`unassigned`. Returns false
    /// when the ticket already had that assignee.
    fn reassign(&self, actor: &Actor, ticket: Ticket, assignee: Option<String>) -> Result<(Ticket, bool), EngineError> {
        if ticket.assigned_to == assignee {
            return Ok((ticket, false));
        }

        let change = FieldChange::AssignedTo {
            from: ticket.assigned_to.clone(),
            to: assignee.clone(),
        };
        let now = self.clock.now();
        let (updated, follow_ups) = self.write_changes(actor, &ticket, std::slice::from_ref(&change), now)?;

        let from_name = ticket.assigned_to.as_deref().map(|id| self.directory.display_name(id));
        let to_name = assignee.as_deref().map(|id| self.directory.display_name(id));

        let mut events = vec![NewTimelineEvent {
            ticket_id: ticket.id.clone(),
            actor_id: Some(actor.id.clone()),
            action: if assignee.is_some() {
                TimelineAction::Assigned
            } else {
                TimelineAction::Unassigned
            },
            details: json!({
                "from": ticket.assigned_to,
                "to": assignee,
                "fromName": from_name,
                "toName": to_name,
            }),
            description: describe_assignment(&actor.name, from_name.as_deref(), to_name.as_deref()),
            created_at: now,
        }];
        events.extend(follow_ups);
        self.audit.record(events);

        tracing::info!("Ticket {} assignee {:?} -> {:?} by {}", ticket.id, ticket.assigned_to, assignee, actor.id);
        Ok((updated, true))
    }

    /// Apply `changes` on top of `current` and write them conditionally on
    /// `current.version`. Returns the stored ticket plus the milestone and
    /// breach events the write implies; per-field events are left to the caller.
    fn write_changes(
        &self,
        actor: &Actor,
        current: &Ticket,
        changes: &[FieldChange],
        now: DateTime<Utc>,
    ) -> Result<(Ticket, Vec<NewTimelineEvent>), EngineError> {
        let mut next = current.clone();
        let mut follow_ups = Vec::new();

        for change in changes {
            change.apply(&mut next);
        }
        next.updated_at = now;

        for change in changes {
            match change {
                FieldChange::Priority { .. } => {
                    next.sla = derive_sla(next.priority, now);
                }
                FieldChange::Status { from, to } => {
                    let effects = transition_effects(*from, *to);
                    if effects.resolves && next.resolved_at.is_none() {
                        next.resolved_at = Some(now);
                        follow_ups.push(milestone_event(current, actor, TimelineAction::Resolved, now));
                    }
                    if effects.closes && next.closed_at.is_none() {
                        next.closed_at = Some(now);
                        follow_ups.push(milestone_event(current, actor, TimelineAction::Closed, now));
                    }
                    if effects.reopens {
                        follow_ups.push(milestone_event(current, actor, TimelineAction::Reopened, now));
                    }
                }
                _ => {}
            }
        }

        let breach = refresh_breach_flags(&mut next, now);
        let newly = breach.newly_breached(&BreachStatus::of(&current.sla));

        let updated = self.db.update_ticket_if_version(&next, current.version)?;
        follow_ups.extend(breach_events(&updated, newly, now));

        Ok((updated, follow_ups))
    }
}

fn require_staff(actor: &Actor, what: &str) -> Result<(), EngineError> {
    if actor.role.is_staff() {
        Ok(())
    } else {
        Err(EngineError::Forbidden(format!("Only agents and admins can {}", what)))
    }
}

fn milestone_event(ticket: &Ticket, actor: &Actor, action: TimelineAction, at: DateTime<Utc>) -> NewTimelineEvent {
    let verb = match action {
        TimelineAction::Resolved => "resolved",
        TimelineAction::Closed => "closed",
        _ => "reopened",
    };
    NewTimelineEvent {
        ticket_id: ticket.id.clone(),
        actor_id: Some(actor.id.clone()),
        action,
        details: json!({ "previousStatus": ticket.status }),
        description: format!("{} {} the ticket", actor.name, verb),
        created_at: at,
    }
}

/// System events for flags that just flipped to breached.
fn breach_events(ticket: &Ticket, newly: BreachStatus, at: DateTime<Utc>) -> Vec<NewTimelineEvent> {
    let mut events = Vec::new();
    if newly.response {
        events.push(NewTimelineEvent {
            ticket_id: ticket.id.clone(),
            actor_id: None,
            action: TimelineAction::SlaBreach,
            details: json!({
                "sla": "response",
                "deadline": ticket.sla.response_deadline,
                "priority": ticket.priority,
            }),
            description: format!(
                "Response SLA breached ({}h for {} priority)",
                ticket.sla.response_time_hours,
                ticket.priority.as_str()
            ),
            created_at: at,
        });
    }
    if newly.resolution {
        events.push(NewTimelineEvent {
            ticket_id: ticket.id.clone(),
            actor_id: None,
            action: TimelineAction::SlaBreach,
            details: json!({
                "sla": "resolution",
                "deadline": ticket.sla.resolution_deadline,
                "priority": ticket.priority,
            }),
            description: format!(
                "Resolution SLA breached ({}h for {} priority)",
                ticket.sla.resolution_time_hours,
                ticket.priority.as_str()
            ),
            created_at: at,
        });
    }
    events
}

#[cfg(test)]
mod tests {
    use super::testing::Harness;
    use super::*;
    use chrono::Duration;

    fn new_ticket(title: &str) -> NewTicket {
        NewTicket {
            title: Some(title.to_string()),
            description: Some("Something is broken".to_string()),
            ..Default::default()
        }
    }

    fn actions(h: &Harness, ticket_id: &str) -> Vec<TimelineAction> {
        h.db.get_timeline(ticket_id).unwrap().iter().map(|e| e.action).collect()
    }

    mod create_tests {
        use super::*;

        #[test]
        fn create_sets_initial_state() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, NewTicket {
                priority: Some(Priority::High),
                tags: Some(vec!["vpn".to_string(), " vpn ".to_string()]),
                ..new_ticket("VPN down")
            }).unwrap();

            assert_eq!(ticket.version, 0);
            assert_eq!(ticket.status, Status::Open);
            assert_eq!(ticket.created_by, h.user.id);
            assert_eq!(ticket.tags, vec!["vpn"]);
            assert_eq!(ticket.sla.response_deadline, h.start + Duration::hours(8));
            assert_eq!(ticket.sla.resolution_deadline, h.start + Duration::hours(24));
            assert_eq!(actions(&h, &ticket.id), vec![TimelineAction::Created]);
        }

        #[test]
        fn create_defaults_priority_and_category() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();
            assert_eq!(ticket.priority, Priority::Medium);
            assert_eq!(ticket.category, Category::General);
            assert_eq!(ticket.sla.response_time_hours, 24);
        }

        #[test]
        fn create_requires_title_and_description() {
            let h = Harness::new();
            let missing_title = h.engine.create(&h.user, NewTicket {
                title: None,
                ..new_ticket("x")
            });
            assert!(matches!(missing_title, Err(EngineError::FieldRequired { field: "title" })));

            let blank_description = h.engine.create(&h.user, NewTicket {
                description: Some("   ".to_string()),
                ..new_ticket("x")
            });
            assert!(matches!(blank_description, Err(EngineError::FieldRequired { field: "description" })));
        }
    }

    mod update_tests {
        use super::*;

        #[test]
        fn matching_version_applies_and_bumps() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();
            h.clock.advance(Duration::minutes(10));

            let updated = h.engine.apply_update(&h.agent, &ticket.id, Some(0), TicketPatch {
                status: Some(Status::InProgress),
                title: Some("Printer jammed".to_string()),
                ..Default::default()
            }).unwrap();

            assert_eq!(updated.version, 1);
            assert_eq!(updated.status, Status::InProgress);
            assert_eq!(updated.updated_at, h.start + Duration::minutes(10));
            assert_eq!(actions(&h, &ticket.id), vec![
                TimelineAction::Created,
                TimelineAction::Updated,
                TimelineAction::StatusChanged,
            ]);
        }

        #[test]
        fn stale_version_is_rejected_without_write() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();
            h.engine.apply_update(&h.agent, &ticket.id, Some(0), TicketPatch {
                priority: Some(Priority::High),
                ..Default::default()
            }).unwrap();

            let result = h.engine.apply_update(&h.agent, &ticket.id, Some(0), TicketPatch {
                title: Some("Other".to_string()),
                ..Default::default()
            });
            assert!(matches!(result, Err(EngineError::StaleUpdate { expected: 0, actual: 1, .. })));

            let stored = h.db.get_ticket(&ticket.id).unwrap();
            assert_eq!(stored.title, "Printer");
            assert_eq!(stored.version, 1);
            assert_eq!(actions(&h, &ticket.id).len(), 2);
        }

        #[test]
        fn concurrent_writers_on_same_version_one_wins() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Race")).unwrap();
            let engine = h.engine.clone();

            let handles: Vec<_> = [Priority::High, Priority::Low]
                .into_iter()
                .map(|priority| {
                    let engine = engine.clone();
                    let agent = h.agent.clone();
                    let ticket_id = ticket.id.clone();
                    std::thread::spawn(move || {
                        engine.apply_update(&agent, &ticket_id, Some(0), TicketPatch {
                            priority: Some(priority),
                            ..Default::default()
                        })
                    })
                })
                .collect();

            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            let succeeded = results.iter().filter(|r| r.is_ok()).count();
            let stale = results
                .iter()
                .filter(|r| matches!(r, Err(EngineError::StaleUpdate { .. })))
                .count();

            assert_eq!(succeeded, 1);
            assert_eq!(stale, 1);
            assert_eq!(h.db.get_ticket(&ticket.id).unwrap().version, 1);
        }

        #[test]
        fn owner_status_change_is_dropped_but_title_applies() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();

            let updated = h.engine.apply_update(&h.user, &ticket.id, None, TicketPatch {
                title: Some("Printer smoking".to_string()),
                status: Some(Status::Closed),
                ..Default::default()
            }).unwrap();

            assert_eq!(updated.title, "Printer smoking");
            assert_eq!(updated.status, Status::Open);
            assert_eq!(updated.version, 1);
        }

        #[test]
        fn owner_status_only_is_forbidden() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();

            let result = h.engine.apply_update(&h.user, &ticket.id, None, TicketPatch {
                status: Some(Status::Closed),
                ..Default::default()
            });
            assert!(matches!(result, Err(EngineError::Forbidden(_))));
            assert_eq!(h.db.get_ticket(&ticket.id).unwrap().version, 0);
        }

        #[test]
        fn outsider_is_forbidden() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();
            let result = h.engine.apply_update(&h.other_user, &ticket.id, None, TicketPatch {
                title: Some("Mine now".to_string()),
                ..Default::default()
            });
            assert!(matches!(result, Err(EngineError::Forbidden(_))));
        }

        #[test]
        fn empty_patch_is_invalid_input() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();
            let result = h.engine.apply_update(&h.agent, &ticket.id, None, TicketPatch::default());
            assert!(matches!(result, Err(EngineError::NoChanges)));
        }

        #[test]
        fn unchanged_values_do_not_bump_version() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();

            let same = h.engine.apply_update(&h.agent, &ticket.id, Some(0), TicketPatch {
                title: Some("Printer".to_string()),
                status: Some(Status::Open),
                ..Default::default()
            }).unwrap();
            assert_eq!(same.version, 0);
            assert_eq!(actions(&h, &ticket.id), vec![TimelineAction::Created]);
        }

        #[test]
        fn missing_ticket_is_not_found() {
            let h = Harness::new();
            let result = h.engine.apply_update(&h.agent, "nope", None, TicketPatch {
                title: Some("x".to_string()),
                ..Default::default()
            });
            assert!(matches!(result, Err(EngineError::NotFound(_))));
        }

        #[test]
        fn assignment_in_patch_uses_updated_action_and_names() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();

            let updated = h.engine.apply_update(&h.admin, &ticket.id, None, TicketPatch {
                assigned_to: Some(Some(h.agent.id.clone())),
                ..Default::default()
            }).unwrap();
            assert_eq!(updated.assigned_to.as_deref(), Some(h.agent.id.as_str()));

            let timeline = h.db.get_timeline(&ticket.id).unwrap();
            let last = timeline.last().unwrap();
            assert_eq!(last.action, TimelineAction::Updated);
            assert_eq!(last.description, "Ada Admin assigned the ticket to Alan Agent");
        }

        #[test]
        fn patch_assignment_to_plain_user_is_invalid() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();
            let result = h.engine.apply_update(&h.admin, &ticket.id, None, TicketPatch {
                assigned_to: Some(Some(h.user.id.clone())),
                ..Default::default()
            });
            assert!(matches!(result, Err(EngineError::InvalidAssignee(_))));
        }
    }

    mod status_tests {
        use super::*;

        #[test]
        fn resolving_sets_milestone_once() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();

            h.clock.advance(Duration::hours(1));
            let resolved = h.engine.set_status(&h.agent, &ticket.id, Status::Resolved).unwrap();
            let first_resolution = resolved.resolved_at.unwrap();
            assert_eq!(first_resolution, h.start + Duration::hours(1));

            h.clock.advance(Duration::hours(1));
            h.engine.set_status(&h.agent, &ticket.id, Status::Open).unwrap();
            h.clock.advance(Duration::hours(1));
            let again = h.engine.set_status(&h.agent, &ticket.id, Status::Resolved).unwrap();

            assert_eq!(again.resolved_at, Some(first_resolution));
            assert_eq!(actions(&h, &ticket.id), vec![
                TimelineAction::Created,
                TimelineAction::StatusChanged,
                TimelineAction::Resolved,
                TimelineAction::StatusChanged,
                TimelineAction::Reopened,
                TimelineAction::StatusChanged,
            ]);
        }

        #[test]
        fn closing_sets_closed_at() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();
            let closed = h.engine.set_status(&h.admin, &ticket.id, Status::Closed).unwrap();
            assert_eq!(closed.closed_at, Some(h.start));
            assert!(closed.resolved_at.is_none());
        }

        #[test]
        fn any_transition_is_allowed() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();
            for status in [Status::Closed, Status::Pending, Status::Resolved, Status::InProgress, Status::Open] {
                let updated = h.engine.set_status(&h.agent, &ticket.id, status).unwrap();
                assert_eq!(updated.status, status);
            }
        }

        #[test]
        fn users_cannot_set_status() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();
            let result = h.engine.set_status(&h.user, &ticket.id, Status::Closed);
            assert!(matches!(result, Err(EngineError::Forbidden(_))));
        }
    }

    mod priority_tests {
        use super::*;

        #[test]
        fn priority_change_recomputes_deadlines_from_now() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();

            h.clock.advance(Duration::hours(3));
            let updated = h.engine.set_priority(&h.agent, &ticket.id, Priority::Urgent).unwrap();

            let now = h.start + Duration::hours(3);
            assert_eq!(updated.sla.response_time_hours, 2);
            assert_eq!(updated.sla.response_deadline, now + Duration::hours(2));
            assert_eq!(updated.sla.resolution_deadline, now + Duration::hours(8));
            assert!(!updated.sla.is_response_breached);
            assert_eq!(actions(&h, &ticket.id).last(), Some(&TimelineAction::PriorityChanged));
        }

        #[test]
        fn downgrade_after_breach_rederives_from_new_deadline() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, NewTicket {
                priority: Some(Priority::Urgent),
                ..new_ticket("Outage")
            }).unwrap();

            h.clock.advance(Duration::hours(3));
            assert!(h.engine.get_ticket(&h.agent, &ticket.id).unwrap().sla.is_response_breached);
            h.engine.add_comment(&h.agent, &ticket.id, "Looking into it", CommentKind::Comment).unwrap();

            h.clock.advance(Duration::hours(1));
            let downgraded = h.engine.set_priority(&h.agent, &ticket.id, Priority::Low).unwrap();
            let now = h.start + Duration::hours(4);
            assert!(!downgraded.sla.is_response_breached);
            assert!(!downgraded.sla.is_resolution_breached);
            assert_eq!(downgraded.sla.response_deadline, now + Duration::hours(48));
            assert_eq!(downgraded.sla.resolution_deadline, now + Duration::hours(168));
            assert_eq!(downgraded.first_response_at, Some(h.start + Duration::hours(3)));

            let timeline = h.db.get_timeline(&ticket.id).unwrap();
            assert!(timeline.iter().any(|e| e.action == TimelineAction::SlaBreach));
        }
    }

    mod assign_tests {
        use super::*;

        #[test]
        fn agent_can_self_assign_and_release() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();

            let assigned = h.engine.assign(&h.agent, &ticket.id, Some(h.agent.id.clone())).unwrap();
            assert_eq!(assigned.assigned_to.as_deref(), Some(h.agent.id.as_str()));
            assert_eq!(assigned.version, 1);

            let released = h.engine.assign(&h.agent, &ticket.id, None).unwrap();
            assert!(released.assigned_to.is_none());

            assert_eq!(actions(&h, &ticket.id), vec![
                TimelineAction::Created,
                TimelineAction::Assigned,
                TimelineAction::Unassigned,
            ]);
            let timeline = h.db.get_timeline(&ticket.id).unwrap();
            assert_eq!(timeline[1].details["toName"], "Alan Agent");
        }

        #[test]
        fn agent_cannot_assign_colleague() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();
            let result = h.engine.assign(&h.agent, &ticket.id, Some(h.agent2.id.clone()));
            assert!(matches!(result, Err(EngineError::Forbidden(_))));
        }

        #[test]
        fn admin_assigns_anyone_on_staff() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();
            let assigned = h.engine.assign(&h.admin, &ticket.id, Some(h.agent2.id.clone())).unwrap();
            assert_eq!(assigned.assigned_to.as_deref(), Some(h.agent2.id.as_str()));
        }

        #[test]
        fn assigning_plain_user_is_invalid_for_any_requester() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();

            for requester in [&h.admin, &h.agent] {
                let result = h.engine.assign(requester, &ticket.id, Some(h.user.id.clone()));
                assert!(matches!(result, Err(EngineError::InvalidAssignee(_))));
            }
            let missing = h.engine.assign(&h.admin, &ticket.id, Some("ghost".to_string()));
            assert!(matches!(missing, Err(EngineError::InvalidAssignee(_))));
        }

        #[test]
        fn inactive_agent_cannot_be_assigned() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();
            h.db.set_user_active(&h.agent2.id, false).unwrap();

            let result = h.engine.assign(&h.admin, &ticket.id, Some(h.agent2.id.clone()));
            assert!(matches!(result, Err(EngineError::InvalidAssignee(_))));
        }

        #[test]
        fn users_cannot_assign() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();
            let result = h.engine.assign(&h.user, &ticket.id, Some(h.agent.id.clone()));
            assert!(matches!(result, Err(EngineError::Forbidden(_))));
        }

        #[test]
        fn reassigning_same_assignee_is_a_no_op() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();
            h.engine.assign(&h.admin, &ticket.id, Some(h.agent.id.clone())).unwrap();
            let again = h.engine.assign(&h.admin, &ticket.id, Some(h.agent.id.clone())).unwrap();
            assert_eq!(again.version, 1);
        }
    }

    mod bulk_tests {
        use super::*;

        #[test]
        fn missing_ids_are_skipped() {
            let h = Harness::new();
            let mut ids: Vec<String> = (0..4)
                .map(|i| h.engine.create(&h.user, new_ticket(&format!("T{}", i))).unwrap().id)
                .collect();
            ids.insert(2, "does-not-exist".to_string());

            let modified = h.engine.bulk_assign(&h.admin, &ids, Some(h.agent.id.clone())).unwrap();
            assert_eq!(modified, 4);

            for id in ids.iter().filter(|id| id.as_str() != "does-not-exist") {
                let ticket = h.db.get_ticket(id).unwrap();
                assert_eq!(ticket.assigned_to.as_deref(), Some(h.agent.id.as_str()));
                assert_eq!(actions(&h, id), vec![TimelineAction::Created, TimelineAction::Assigned]);
            }
        }

        #[test]
        fn already_assigned_tickets_are_not_counted() {
            let h = Harness::new();
            let a = h.engine.create(&h.user, new_ticket("A")).unwrap();
            let b = h.engine.create(&h.user, new_ticket("B")).unwrap();
            h.engine.assign(&h.admin, &a.id, Some(h.agent.id.clone())).unwrap();

            let modified = h.engine
                .bulk_assign(&h.admin, &[a.id.clone(), b.id.clone()], Some(h.agent.id.clone()))
                .unwrap();
            assert_eq!(modified, 1);
        }

        #[test]
        fn bulk_unassign() {
            let h = Harness::new();
            let a = h.engine.create(&h.user, new_ticket("A")).unwrap();
            h.engine.assign(&h.admin, &a.id, Some(h.agent.id.clone())).unwrap();

            let modified = h.engine.bulk_assign(&h.admin, &[a.id.clone()], None).unwrap();
            assert_eq!(modified, 1);
            assert!(h.db.get_ticket(&a.id).unwrap().assigned_to.is_none());
        }

        #[test]
        fn agents_cannot_bulk_assign() {
            let h = Harness::new();
            let a = h.engine.create(&h.user, new_ticket("A")).unwrap();
            let result = h.engine.bulk_assign(&h.agent, &[a.id], Some(h.agent.id.clone()));
            assert!(matches!(result, Err(EngineError::Forbidden(_))));
        }

        #[test]
        fn invalid_assignee_fails_whole_batch() {
            let h = Harness::new();
            let a = h.engine.create(&h.user, new_ticket("A")).unwrap();
            let result = h.engine.bulk_assign(&h.admin, &[a.id.clone()], Some(h.user.id.clone()));
            assert!(matches!(result, Err(EngineError::InvalidAssignee(_))));
            assert!(h.db.get_ticket(&a.id).unwrap().assigned_to.is_none());
        }
    }

    mod comment_tests {
        use super::*;

        #[test]
        fn first_comment_sets_first_response() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();
            h.clock.advance(Duration::minutes(30));

            let outcome = h.engine.add_comment(&h.agent, &ticket.id, "Looking now", CommentKind::Comment).unwrap();
            assert!(outcome.comment.is_first_response);
            assert_eq!(outcome.ticket.first_response_at, Some(h.start + Duration::minutes(30)));

            h.clock.advance(Duration::minutes(30));
            let second = h.engine.add_comment(&h.agent, &ticket.id, "Fixed", CommentKind::Comment).unwrap();
            assert!(!second.comment.is_first_response);
            assert_eq!(second.ticket.first_response_at, Some(h.start + Duration::minutes(30)));
            assert_eq!(actions(&h, &ticket.id).last(), Some(&TimelineAction::Commented));
        }

        #[test]
        fn late_first_response_clears_response_breach() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, NewTicket {
                priority: Some(Priority::Urgent),
                ..new_ticket("Outage")
            }).unwrap();

            h.clock.advance(Duration::hours(3));
            assert!(h.engine.get_ticket(&h.agent, &ticket.id).unwrap().sla.is_response_breached);

            let outcome = h.engine.add_comment(&h.agent, &ticket.id, "Sorry for the wait", CommentKind::Comment).unwrap();
            assert!(!outcome.ticket.sla.is_response_breached);
        }

        #[test]
        fn users_cannot_write_internal_notes() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();
            let result = h.engine.add_comment(&h.user, &ticket.id, "psst", CommentKind::InternalNote);
            assert!(matches!(result, Err(EngineError::Forbidden(_))));

            let note = h.engine.add_comment(&h.agent, &ticket.id, "Known issue", CommentKind::InternalNote).unwrap();
            assert!(!note.comment.is_first_response);
            assert!(note.ticket.first_response_at.is_none());
        }

        #[test]
        fn outsiders_cannot_comment() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();
            let result = h.engine.add_comment(&h.other_user, &ticket.id, "me too", CommentKind::Comment);
            assert!(matches!(result, Err(EngineError::Forbidden(_))));
        }

        #[test]
        fn blank_comment_is_required_field() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();
            let result = h.engine.add_comment(&h.user, &ticket.id, "  ", CommentKind::Comment);
            assert!(matches!(result, Err(EngineError::FieldRequired { field: "content" })));
        }
    }

    mod idempotency_tests {
        use super::*;

        fn create_once(h: &Harness, key: Option<&str>) -> CachedResponse {
            h.engine.run_idempotent(&h.user, key, |engine| {
                let ticket = engine.create(&h.user, new_ticket("Printer")).unwrap();
                CachedResponse {
                    status_code: 201,
                    body: serde_json::to_string(&ticket).unwrap(),
                }
            })
        }

        #[test]
        fn replay_returns_identical_response_without_rerunning() {
            let h = Harness::new();
            let first = create_once(&h, Some("req-1"));
            h.clock.advance(Duration::minutes(1));
            let second = create_once(&h, Some("req-1"));

            assert_eq!(first, second);
            let page = h.db.list_tickets(&Default::default()).unwrap();
            assert_eq!(page.total, 1);
        }

        #[test]
        fn without_key_every_call_runs() {
            let h = Harness::new();
            create_once(&h, None);
            create_once(&h, None);
            assert_eq!(h.db.list_tickets(&Default::default()).unwrap().total, 2);
        }

        #[test]
        fn replayed_update_does_not_bump_version_twice() {
            let h = Harness::new();
            let ticket = h.engine.create(&h.user, new_ticket("Printer")).unwrap();

            let run = || {
                h.engine.run_idempotent(&h.agent, Some("bump"), |engine| {
                    let updated = engine
                        .set_priority(&h.agent, &ticket.id, Priority::High)
                        .map(|t| t.version)
                        .unwrap_or(-1);
                    CachedResponse { status_code: 200, body: updated.to_string() }
                })
            };
            assert_eq!(run().body, "1");
            assert_eq!(run().body, "1");
            assert_eq!(h.db.get_ticket(&ticket.id).unwrap().version, 1);
        }

        #[test]
        fn server_errors_are_not_cached() {
            let h = Harness::new();
            let failing = h.engine.run_idempotent(&h.user, Some("k"), |_| CachedResponse {
                status_code: 500,
                body: "{}".to_string(),
            });
            assert_eq!(failing.status_code, 500);
            assert!(h.engine.idempotency().check_or_reserve(&h.user.id, "k").unwrap().is_none());
        }

        #[test]
        fn client_errors_are_cached() {
            let h = Harness::new();
            h.engine.run_idempotent(&h.user, Some("k"), |_| CachedResponse {
                status_code: 409,
                body: "stale".to_string(),
            });
            let cached = h.engine.idempotency().check_or_reserve(&h.user.id, "k").unwrap().unwrap();
            assert_eq!(cached.status_code, 409);
        }
    }
}
