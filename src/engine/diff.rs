//! Typed per-field diff between a stored ticket and a requested patch.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::db::{Actor, Category, NewTimelineEvent, Priority, Status, Ticket, TimelineAction};
use crate::directory::UserDirectory;
use crate::lifecycle::{FieldAuthorization, TicketField};

/// Requested field values. `None` means "leave alone"; for `assigned_to`,
/// `Some(None)` means "unassign".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub category: Option<Category>,
    pub assigned_to: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
}

impl TicketPatch {
    pub fn requested_fields(&self) -> Vec<TicketField> {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push(TicketField::Title);
        }
        if self.description.is_some() {
            fields.push(TicketField::Description);
        }
        if self.status.is_some() {
            fields.push(TicketField::Status);
        }
        if self.priority.is_some() {
            fields.push(TicketField::Priority);
        }
        if self.category.is_some() {
            fields.push(TicketField::Category);
        }
        if self.assigned_to.is_some() {
            fields.push(TicketField::AssignedTo);
        }
        if self.tags.is_some() {
            fields.push(TicketField::Tags);
        }
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.requested_fields().is_empty()
    }

    /// Drop every field the actor is not allowed to write.
    pub fn retain_allowed(mut self, auth: &FieldAuthorization) -> Self {
        if !auth.is_allowed(TicketField::Title) {
            self.title = None;
        }
        if !auth.is_allowed(TicketField::Description) {
            self.description = None;
        }
        if !auth.is_allowed(TicketField::Status) {
            self.status = None;
        }
        if !auth.is_allowed(TicketField::Priority) {
            self.priority = None;
        }
        if !auth.is_allowed(TicketField::Category) {
            self.category = None;
        }
        if !auth.is_allowed(TicketField::AssignedTo) {
            self.assigned_to = None;
        }
        if !auth.is_allowed(TicketField::Tags) {
            self.tags = None;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChange {
    Title { from: String, to: String },
    Description { from: String, to: String },
    Status { from: Status, to: Status },
    Priority { from: Priority, to: Priority },
    Category { from: Category, to: Category },
    AssignedTo { from: Option<String>, to: Option<String> },
    Tags { from: Vec<String>, to: Vec<String> },
}

impl FieldChange {
    pub fn field(&self) -> TicketField {
        match self {
            FieldChange::Title { .. } => TicketField::Title,
            FieldChange::Description { .. } => TicketField::Description,
            FieldChange::Status { .. } => TicketField::Status,
            FieldChange::Priority { .. } => TicketField::Priority,
            FieldChange::Category { .. } => TicketField::Category,
            FieldChange::AssignedTo { .. } => TicketField::AssignedTo,
            FieldChange::Tags { .. } => TicketField::Tags,
        }
    }

    pub fn action(&self) -> TimelineAction {
        match self {
            FieldChange::Status { .. } => TimelineAction::StatusChanged,
            FieldChange::Priority { .. } => TimelineAction::PriorityChanged,
            _ => TimelineAction::Updated,
        }
    }

    pub fn apply(&self, ticket: &mut Ticket) {
        match self {
            FieldChange::Title { to, .. } => ticket.title = to.clone(),
            FieldChange::Description { to, .. } => ticket.description = to.clone(),
            FieldChange::Status { to, .. } => ticket.status = *to,
            FieldChange::Priority { to, .. } => ticket.priority = *to,
            FieldChange::Category { to, .. } => ticket.category = *to,
            FieldChange::AssignedTo { to, .. } => ticket.assigned_to = to.clone(),
            FieldChange::Tags { to, .. } => ticket.tags = to.clone(),
        }
    }

    pub fn to_event(
        &self,
        ticket_id: &str,
        actor: &Actor,
        directory: &dyn UserDirectory,
        at: DateTime<Utc>,
    ) -> NewTimelineEvent {
        let field = self.field().as_str();
        let (details, description) = match self {
            FieldChange::Title { from, to } => (
                json!({ "field": field, "from": from, "to": to }),
                format!("{} changed title from \"{}\" to \"{}\"", actor.name, from, to),
            ),
            FieldChange::Description { .. } => (
                json!({ "field": field }),
                format!("{} updated the description", actor.name),
            ),
            FieldChange::Status { from, to } => (
                json!({ "field": field, "from": from, "to": to }),
                format!("{} changed status from {} to {}", actor.name, from.as_str(), to.as_str()),
            ),
            FieldChange::Priority { from, to } => (
                json!({ "field": field, "from": from, "to": to }),
                format!("{} changed priority from {} to {}", actor.name, from.as_str(), to.as_str()),
            ),
            FieldChange::Category { from, to } => (
                json!({ "field": field, "from": from, "to": to }),
                format!("{} changed category from {} to {}", actor.name, from.as_str(), to.as_str()),
            ),
            FieldChange::AssignedTo { from, to } => {
                let from_name = from.as_deref().map(|id| directory.display_name(id));
                let to_name = to.as_deref().map(|id| directory.display_name(id));
                (
                    json!({
                        "field": field,
                        "from": from,
                        "to": to,
                        "fromName": from_name,
                        "toName": to_name,
                    }),
                    describe_assignment(&actor.name, from_name.as_deref(), to_name.as_deref()),
                )
            }
            FieldChange::Tags { from, to } => {
                let added: Vec<&String> = to.iter().filter(|t| !from.contains(t)).collect();
                let removed: Vec<&String> = from.iter().filter(|t| !to.contains(t)).collect();
                (
                    json!({ "field": field, "from": from, "to": to, "added": added, "removed": removed }),
                    format!("{} updated tags", actor.name),
                )
            }
        };

        NewTimelineEvent {
            ticket_id: ticket_id.to_string(),
            actor_id: Some(actor.id.clone()),
            action: self.action(),
            details,
            description,
            created_at: at,
        }
    }
}

pub fn describe_assignment(actor_name: &str, from: Option<&str>, to: Option<&str>) -> String {
    match (from, to) {
        (None, Some(to)) => format!("{} assigned the ticket to {}", actor_name, to),
        (Some(from), Some(to)) => format!("{} reassigned the ticket from {} to {}", actor_name, from, to),
        (Some(from), None) => format!("{} unassigned {}", actor_name, from),
        (None, None) => format!("{} left the ticket unassigned", actor_name),
    }
}

/// Changes `patch` would make to `ticket`, ignoring fields that already hold the requested value.
pub fn diff(ticket: &Ticket, patch: &TicketPatch) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    if let Some(ref title) = patch.title {
        if *title != ticket.title {
            changes.push(FieldChange::Title { from: ticket.title.clone(), to: title.clone() });
        }
    }
    if let Some(ref description) = patch.description {
        if *description != ticket.description {
            changes.push(FieldChange::Description {
                from: ticket.description.clone(),
                to: description.clone(),
            });
        }
    }
    if let Some(status) = patch.status {
        if status != ticket.status {
            changes.push(FieldChange::Status { from: ticket.status, to: status });
        }
    }
    if let Some(priority) = patch.priority {
        if priority != ticket.priority {
            changes.push(FieldChange::Priority { from: ticket.priority, to: priority });
        }
    }
    if let Some(category) = patch.category {
        if category != ticket.category {
            changes.push(FieldChange::Category { from: ticket.category, to: category });
        }
    }
    if let Some(ref assigned_to) = patch.assigned_to {
        if *assigned_to != ticket.assigned_to {
            changes.push(FieldChange::AssignedTo {
                from: ticket.assigned_to.clone(),
                to: assigned_to.clone(),
            });
        }
    }
    if let Some(ref tags) = patch.tags {
        if *tags != ticket.tags {
            changes.push(FieldChange::Tags { from: ticket.tags.clone(), to: tags.clone() });
        }
    }

    changes
}
