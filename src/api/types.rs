use serde::{Deserialize, Deserializer, Serialize};

use crate::db::{
    Category, Comment, CommentKind, DashboardStats, Priority, SortOrder, Status, Ticket,
    TicketFilter, TicketPage, TicketSort, TimelineEvent,
};
use crate::engine::{NewTicket, TicketPatch};

use super::error::{ApiResult, AppError};

/// Tell "absent" apart from "null": absent stays `None`, null becomes `Some(None)`.
fn deserialize_some<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

fn parse_field<T>(field: &str, value: Option<String>, parse: fn(&str) -> Option<T>) -> ApiResult<Option<T>> {
    match value {
        None => Ok(None),
        Some(raw) => parse(&raw)
            .map(Some)
            .ok_or_else(|| AppError::invalid_value(field, format!("'{}' is not a valid {}", raw, field))),
    }
}

fn require<T>(field: &str, value: Option<T>) -> ApiResult<T> {
    value.ok_or_else(|| AppError::field_required(field))
}

// ===== Ticket Types =====

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTicketRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl CreateTicketRequest {
    pub fn into_new_ticket(self) -> ApiResult<NewTicket> {
        Ok(NewTicket {
            title: self.title,
            description: self.description,
            priority: parse_field("priority", self.priority, Priority::parse)?,
            category: parse_field("category", self.category, Category::parse)?,
            tags: self.tags,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTicketRequest {
    pub version: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub assigned_to: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
}

impl UpdateTicketRequest {
    /// Split into the expected version and the requested field changes.
    pub fn into_patch(self) -> ApiResult<(Option<i64>, TicketPatch)> {
        let patch = TicketPatch {
            title: self.title,
            description: self.description,
            status: parse_field("status", self.status, Status::parse)?,
            priority: parse_field("priority", self.priority, Priority::parse)?,
            category: parse_field("category", self.category, Category::parse)?,
            assigned_to: self.assigned_to,
            tags: self.tags,
        };
        Ok((self.version, patch))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    #[serde(default, deserialize_with = "deserialize_some")]
    pub assigned_to: Option<Option<String>>,
}

impl AssignRequest {
    pub fn assignee(self) -> ApiResult<Option<String>> {
        require("assignedTo", self.assigned_to)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusRequest {
    pub status: Option<String>,
}

impl StatusRequest {
    pub fn status(self) -> ApiResult<Status> {
        require("status", parse_field("status", self.status, Status::parse)?)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PriorityRequest {
    pub priority: Option<String>,
}

impl PriorityRequest {
    pub fn priority(self) -> ApiResult<Priority> {
        require("priority", parse_field("priority", self.priority, Priority::parse)?)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkAssignRequest {
    #[serde(default)]
    pub ticket_ids: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub assigned_to: Option<Option<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTicketsQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub assigned_to: Option<String>,
    pub created_by: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListTicketsQuery {
    pub fn into_filter(self) -> ApiResult<TicketFilter> {
        let sort = match self.sort.as_deref() {
            None | Some("createdAt") => TicketSort::CreatedAt,
            Some("updatedAt") => TicketSort::UpdatedAt,
            Some("priority") => TicketSort::Priority,
            Some(other) => {
                return Err(AppError::invalid_value("sort", format!("'{}' is not a valid sort", other)))
            }
        };
        let order = match self.order.as_deref() {
            None | Some("desc") => SortOrder::Desc,
            Some("asc") => SortOrder::Asc,
            Some(other) => {
                return Err(AppError::invalid_value("order", format!("'{}' is not a valid order", other)))
            }
        };

        Ok(TicketFilter {
            status: parse_field("status", self.status, Status::parse)?,
            priority: parse_field("priority", self.priority, Priority::parse)?,
            category: parse_field("category", self.category, Category::parse)?,
            assigned_to: self.assigned_to,
            created_by: self.created_by,
            search: self.search,
            sort,
            order,
            page: self.page.unwrap_or(1),
            limit: self.limit.unwrap_or(0),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub success: bool,
    pub ticket: Ticket,
}

impl TicketResponse {
    pub fn new(ticket: Ticket) -> Self {
        Self { success: true, ticket }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketListResponse {
    pub success: bool,
    pub tickets: Vec<Ticket>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub pages: u64,
}

impl From<TicketPage> for TicketListResponse {
    fn from(page: TicketPage) -> Self {
        let limit = u64::from(page.limit.max(1));
        Self {
            success: true,
            pagination: Pagination {
                total: page.total,
                page: page.page,
                limit: page.limit,
                pages: page.total.div_ceil(limit),
            },
            tickets: page.tickets,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkAssignResponse {
    pub success: bool,
    pub modified_count: usize,
}

// ===== Comment Types =====

#[derive(Debug, Default, Deserialize)]
pub struct CreateCommentRequest {
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl CreateCommentRequest {
    pub fn into_parts(self) -> ApiResult<(String, CommentKind)> {
        let content = require("content", self.content)?;
        let kind = parse_field("type", self.kind, CommentKind::parse)?.unwrap_or_default();
        Ok((content, kind))
    }
}

#[derive(Debug, Serialize)]
pub struct CommentResponse {
    pub success: bool,
    pub comment: Comment,
    pub ticket: Ticket,
}

#[derive(Debug, Serialize)]
pub struct CommentListResponse {
    pub success: bool,
    pub comments: Vec<Comment>,
}

// ===== Timeline / Dashboard =====

#[derive(Debug, Serialize)]
pub struct TimelineResponse {
    pub success: bool,
    pub events: Vec<TimelineEvent>,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub success: bool,
    pub stats: DashboardStats,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}
