//! Authorization policy. Who may touch which ticket fields, who may be
//! assigned, and who may write internal notes.

use crate::db::models::{Actor, CommentKind, Role, Ticket, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TicketField {
    Title,
    Description,
    Status,
    Priority,
    Category,
    AssignedTo,
    Tags,
}

impl TicketField {
    pub const ALL: [TicketField; 7] = [
        TicketField::Title,
        TicketField::Description,
        TicketField::Status,
        TicketField::Priority,
        TicketField::Category,
        TicketField::AssignedTo,
        TicketField::Tags,
    ];

    /// Wire name, as it appears in request bodies and event details.
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketField::Title => "title",
            TicketField::Description => "description",
            TicketField::Status => "status",
            TicketField::Priority => "priority",
            TicketField::Category => "category",
            TicketField::AssignedTo => "assignedTo",
            TicketField::Tags => "tags",
        }
    }
}

/// How an actor relates to a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Standing {
    Staff,
    Owner,
    Outsider,
}

pub fn standing(actor: &Actor, ticket: &Ticket) -> Standing {
    if actor.role.is_staff() {
        Standing::Staff
    } else if actor.id == ticket.created_by {
        Standing::Owner
    } else {
        Standing::Outsider
    }
}

/// The whole field permission table.
fn writable_fields(standing: Standing) -> &'static [TicketField] {
    match standing {
        Standing::Staff => &TicketField::ALL,
        Standing::Owner => &[TicketField::Title, TicketField::Description],
        Standing::Outsider => &[],
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldAuthorization {
    pub allowed: Vec<TicketField>,
    pub denied: Vec<TicketField>,
}

impl FieldAuthorization {
    pub fn is_allowed(&self, field: TicketField) -> bool {
        self.allowed.contains(&field)
    }

    /// Something was asked for and nothing may be applied.
    pub fn is_forbidden(&self) -> bool {
        self.allowed.is_empty() && !self.denied.is_empty()
    }
}

pub fn authorize(actor: &Actor, ticket: &Ticket, requested: &[TicketField]) -> FieldAuthorization {
    let writable = writable_fields(standing(actor, ticket));
    let (allowed, denied) = requested.iter().copied().partition(|field| writable.contains(field));
    FieldAuthorization { allowed, denied }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentDenial {
    /// Requester may not make this assignment.
    Forbidden(String),
    /// Target cannot hold tickets.
    InvalidAssignee(String),
}

/// Check whether `candidate` may hold tickets. `candidate_id` is what the
/// requester asked for; `candidate` is what the directory returned for it.
pub fn check_assignee(candidate_id: &str, candidate: Option<&User>) -> Result<(), AssignmentDenial> {
    match candidate {
        None => Err(AssignmentDenial::InvalidAssignee(format!(
            "User {} does not exist",
            candidate_id
        ))),
        Some(user) if !user.active => Err(AssignmentDenial::InvalidAssignee(format!(
            "User {} is inactive",
            candidate_id
        ))),
        Some(user) if !user.role.is_staff() => Err(AssignmentDenial::InvalidAssignee(format!(
            "User {} is not an agent or admin",
            candidate_id
        ))),
        Some(_) => Ok(()),
    }
}

/// Check the requester side of an assignment change from `current` to `requested`.
/// Agents may take a ticket or release one they hold; admins may do anything.
pub fn authorize_assignment(
    actor: &Actor,
    current: Option<&str>,
    requested: Option<&str>,
) -> Result<(), AssignmentDenial> {
    match actor.role {
        Role::Admin => Ok(()),
        Role::Agent => match requested {
            Some(id) if id == actor.id => Ok(()),
            Some(_) => Err(AssignmentDenial::Forbidden(
                "Agents can only assign tickets to themselves".to_string(),
            )),
            None if current.map_or(true, |id| id == actor.id) => Ok(()),
            None => Err(AssignmentDenial::Forbidden(
                "Agents can only unassign themselves".to_string(),
            )),
        },
        Role::User => Err(AssignmentDenial::Forbidden(
            "Only agents and admins can assign tickets".to_string(),
        )),
    }
}

pub fn can_author(actor: &Actor, kind: CommentKind) -> bool {
    match kind {
        CommentKind::Comment => true,
        CommentKind::InternalNote => actor.role.is_staff(),
    }
}
