use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ===== Users =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "agent" => Some(Role::Agent),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Agents and admins work tickets; plain users only file them.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Agent | Role::Admin)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    pub name: String,
    pub email: String,
    pub role: Role,
}

/// A freshly created user together with the bearer token issued for it.
#[derive(Debug, Clone)]
pub struct IssuedUser {
    pub user: User,
    pub api_token: String,
}

/// The authenticated caller of an engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub role: Role,
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            role: user.role,
        }
    }
}

// ===== Tickets =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Open,
    InProgress,
    Pending,
    Resolved,
    Closed,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Open,
        Status::InProgress,
        Status::Pending,
        Status::Resolved,
        Status::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::InProgress => "in_progress",
            Status::Pending => "pending",
            Status::Resolved => "resolved",
            Status::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Status::Open),
            "in_progress" => Some(Status::InProgress),
            "pending" => Some(Status::Pending),
            "resolved" => Some(Status::Resolved),
            "closed" => Some(Status::Closed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Resolved | Status::Closed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    General,
    Technical,
    Billing,
    Account,
    FeatureRequest,
    BugReport,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::General => "general",
            Category::Technical => "technical",
            Category::Billing => "billing",
            Category::Account => "account",
            Category::FeatureRequest => "feature_request",
            Category::BugReport => "bug_report",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "general" => Some(Category::General),
            "technical" => Some(Category::Technical),
            "billing" => Some(Category::Billing),
            "account" => Some(Category::Account),
            "feature_request" => Some(Category::FeatureRequest),
            "bug_report" => Some(Category::BugReport),
            _ => None,
        }
    }
}

/// SLA sub-record. Deadlines are absolute; breach flags are derived and
/// must be recomputed before they are shown or acted on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Sla {
    pub response_time_hours: i64,
    pub resolution_time_hours: i64,
    pub response_deadline: DateTime<Utc>,
    pub resolution_deadline: DateTime<Utc>,
    pub is_response_breached: bool,
    pub is_resolution_breached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: Status,
    pub priority: Priority,
    pub category: Category,
    pub created_by: String,
    pub assigned_to: Option<String>,
    pub tags: Vec<String>,
    pub sla: Sla,
    pub first_response_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TicketSort {
    #[default]
    CreatedAt,
    UpdatedAt,
    Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub category: Option<Category>,
    pub assigned_to: Option<String>,
    pub created_by: Option<String>,
    pub search: Option<String>,
    pub sort: TicketSort,
    pub order: SortOrder,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPage {
    pub tickets: Vec<Ticket>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total: u64,
    pub open: u64,
    pub in_progress: u64,
    pub pending: u64,
    pub resolved: u64,
    pub closed: u64,
    pub unassigned: u64,
    pub response_breached: u64,
    pub resolution_breached: u64,
}

// ===== Comments =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommentKind {
    #[default]
    Comment,
    InternalNote,
}

impl CommentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentKind::Comment => "comment",
            CommentKind::InternalNote => "internal_note",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "comment" => Some(CommentKind::Comment),
            "internal_note" => Some(CommentKind::InternalNote),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub ticket_id: String,
    pub author_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: CommentKind,
    pub is_first_response: bool,
    pub created_at: DateTime<Utc>,
}

// ===== Timeline =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimelineAction {
    Created,
    Updated,
    Assigned,
    Unassigned,
    StatusChanged,
    PriorityChanged,
    Commented,
    Resolved,
    Closed,
    Reopened,
    SlaBreach,
}

impl TimelineAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimelineAction::Created => "created",
            TimelineAction::Updated => "updated",
            TimelineAction::Assigned => "assigned",
            TimelineAction::Unassigned => "unassigned",
            TimelineAction::StatusChanged => "status_changed",
            TimelineAction::PriorityChanged => "priority_changed",
            TimelineAction::Commented => "commented",
            TimelineAction::Resolved => "resolved",
            TimelineAction::Closed => "closed",
            TimelineAction::Reopened => "reopened",
            TimelineAction::SlaBreach => "sla_breach",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(TimelineAction::Created),
            "updated" => Some(TimelineAction::Updated),
            "assigned" => Some(TimelineAction::Assigned),
            "unassigned" => Some(TimelineAction::Unassigned),
            "status_changed" => Some(TimelineAction::StatusChanged),
            "priority_changed" => Some(TimelineAction::PriorityChanged),
            "commented" => Some(TimelineAction::Commented),
            "resolved" => Some(TimelineAction::Resolved),
            "closed" => Some(TimelineAction::Closed),
            "reopened" => Some(TimelineAction::Reopened),
            "sla_breach" => Some(TimelineAction::SlaBreach),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub id: String,
    pub ticket_id: String,
    pub actor_id: Option<String>,
    pub action: TimelineAction,
    pub details: serde_json::Value,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTimelineEvent {
    pub ticket_id: String,
    /// `None` for events the service raises on its own, such as SLA breaches.
    pub actor_id: Option<String>,
    pub action: TimelineAction,
    pub details: serde_json::Value,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

// ===== Idempotency =====

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub actor_id: String,
    pub idempotency_key: String,
    pub status_code: u16,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
