//! Database schema definitions and migrations

pub const SCHEMA_VERSION: i32 = 1;

/// Initial schema creation SQL
pub const CREATE_TABLES: &str = r#"
-- Users (directory + bearer credentials)
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    role TEXT NOT NULL DEFAULT 'user' CHECK(role IN ('user', 'agent', 'admin')),
    active INTEGER NOT NULL DEFAULT 1,
    api_token TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_token ON users(api_token);

-- Tickets table
-- version is the optimistic concurrency token: every write is conditional on it.
CREATE TABLE IF NOT EXISTS tickets (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'open' CHECK(status IN ('open', 'in_progress', 'pending', 'resolved', 'closed')),
    priority TEXT NOT NULL DEFAULT 'medium' CHECK(priority IN ('low', 'medium', 'high', 'urgent')),
    category TEXT NOT NULL DEFAULT 'general',
    created_by TEXT NOT NULL REFERENCES users(id),
    assigned_to TEXT REFERENCES users(id),
    tags_json TEXT NOT NULL DEFAULT '[]',

    -- SLA sub-record
    response_time_hours INTEGER NOT NULL,
    resolution_time_hours INTEGER NOT NULL,
    response_deadline TEXT NOT NULL,
    resolution_deadline TEXT NOT NULL,
    is_response_breached INTEGER NOT NULL DEFAULT 0,
    is_resolution_breached INTEGER NOT NULL DEFAULT 0,

    -- Milestones, first write wins
    first_response_at TEXT,
    resolved_at TEXT,
    closed_at TEXT,

    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status);
CREATE INDEX IF NOT EXISTS idx_tickets_created_by ON tickets(created_by);
CREATE INDEX IF NOT EXISTS idx_tickets_assigned ON tickets(assigned_to) WHERE assigned_to IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_tickets_response_deadline ON tickets(response_deadline) WHERE first_response_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_tickets_resolution_deadline ON tickets(resolution_deadline) WHERE resolved_at IS NULL;

-- Comments table
CREATE TABLE IF NOT EXISTS comments (
    id TEXT PRIMARY KEY NOT NULL,
    ticket_id TEXT NOT NULL REFERENCES tickets(id) ON DELETE CASCADE,
    author_id TEXT NOT NULL REFERENCES users(id),
    content TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'comment' CHECK(kind IN ('comment', 'internal_note')),
    is_first_response INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_comments_ticket ON comments(ticket_id, kind);

-- Timeline events (append-only audit trail)
CREATE TABLE IF NOT EXISTS timeline_events (
    id TEXT PRIMARY KEY NOT NULL,
    ticket_id TEXT NOT NULL,
    actor_id TEXT,
    action TEXT NOT NULL,
    details_json TEXT NOT NULL DEFAULT '{}',
    description TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_timeline_ticket ON timeline_events(ticket_id);

CREATE TRIGGER IF NOT EXISTS timeline_events_no_update
BEFORE UPDATE ON timeline_events
BEGIN
    SELECT RAISE(ABORT, 'timeline events are append-only');
END;

CREATE TRIGGER IF NOT EXISTS timeline_events_no_delete
BEFORE DELETE ON timeline_events
BEGIN
    SELECT RAISE(ABORT, 'timeline events are append-only');
END;

-- Idempotency records, keyed per actor
CREATE TABLE IF NOT EXISTS idempotency_records (
    actor_id TEXT NOT NULL,
    idempotency_key TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    PRIMARY KEY (actor_id, idempotency_key)
);

CREATE INDEX IF NOT EXISTS idx_idempotency_expires ON idempotency_records(expires_at);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Highest-urgency-first ordering used when sorting tickets by priority.
pub const PRIORITY_RANK_SQL: &str =
    "CASE priority WHEN 'urgent' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 WHEN 'low' THEN 3 END";
