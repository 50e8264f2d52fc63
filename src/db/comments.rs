use chrono::{DateTime, Utc};
use crate::db::{Database, DbError, format_datetime, get_datetime, stored_datetime};
use crate::db::models::{Comment, CommentKind};

/// Result of recording a comment. `first_response_recorded` is true when the
/// comment also stamped the ticket's `first_response_at` (and bumped its version).
#[derive(Debug, Clone)]
pub struct RecordedComment {
    pub comment: Comment,
    pub first_response_recorded: bool,
}

impl Database {
    /// Insert a comment and, if it is the first public comment on the ticket,
    /// stamp `first_response_at` in the same transaction.
    pub fn create_comment(
        &self,
        ticket_id: &str,
        author_id: &str,
        content: &str,
        kind: CommentKind,
        now: DateTime<Utc>,
    ) -> Result<RecordedComment, DbError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM tickets WHERE id = ?)",
                [ticket_id],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(DbError::NotFound(format!("Ticket {}", ticket_id)));
            }

            let is_first_response = kind == CommentKind::Comment && {
                let prior: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM comments WHERE ticket_id = ? AND kind = 'comment')",
                    [ticket_id],
                    |row| row.get(0),
                )?;
                !prior
            };

            let comment_id = uuid::Uuid::new_v4().to_string();
            let created_at = format_datetime(&now);

            tx.execute(
                r#"INSERT INTO comments (id, ticket_id, author_id, content, kind, is_first_response, created_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?)"#,
                rusqlite::params![
                    comment_id,
                    ticket_id,
                    author_id,
                    content,
                    kind.as_str(),
                    is_first_response,
                    created_at,
                ],
            )?;

            let first_response_recorded = if is_first_response {
                tx.execute(
                    r#"UPDATE tickets
                       SET first_response_at = ?1, updated_at = ?1, version = version + 1
                       WHERE id = ?2 AND first_response_at IS NULL"#,
                    rusqlite::params![created_at, ticket_id],
                )? > 0
            } else {
                false
            };

            tx.commit()?;

            Ok(RecordedComment {
                comment: Comment {
                    id: comment_id,
                    ticket_id: ticket_id.to_string(),
                    author_id: author_id.to_string(),
                    content: content.to_string(),
                    kind,
                    is_first_response,
                    created_at: stored_datetime(&now),
                },
                first_response_recorded,
            })
        })
    }

    pub fn get_comments(&self, ticket_id: &str, include_internal: bool) -> Result<Vec<Comment>, DbError> {
        self.with_conn(|conn| {
            let sql = if include_internal {
                r#"SELECT id, ticket_id, author_id, content, kind, is_first_response, created_at
                   FROM comments WHERE ticket_id = ? ORDER BY created_at, rowid"#
            } else {
                r#"SELECT id, ticket_id, author_id, content, kind, is_first_response, created_at
                   FROM comments WHERE ticket_id = ? AND kind = 'comment' ORDER BY created_at, rowid"#
            };
            let mut stmt = conn.prepare(sql)?;

            let comments = stmt.query_map([ticket_id], |row| {
                let kind_str: String = row.get(4)?;

                Ok(Comment {
                    id: row.get(0)?,
                    ticket_id: row.get(1)?,
                    author_id: row.get(2)?,
                    content: row.get(3)?,
                    kind: CommentKind::parse(&kind_str).unwrap_or_default(),
                    is_first_response: row.get::<_, i32>(5)? != 0,
                    created_at: get_datetime(row, 6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

            Ok(comments)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{CreateUser, Priority, Role};
    use crate::db::tickets::test_support::ticket_fixture;
    use chrono::{Duration, TimeZone};

    fn create_test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn setup(db: &Database) -> (String, String, String) {
        let user = db.create_user(&CreateUser {
            name: "Filer".to_string(),
            email: "filer@example.com".to_string(),
            role: Role::User,
        }, t0()).unwrap().user;
        let agent = db.create_user(&CreateUser {
            name: "Agent".to_string(),
            email: "agent@example.com".to_string(),
            role: Role::Agent,
        }, t0()).unwrap().user;
        let ticket = db.insert_ticket(&ticket_fixture(&user.id, Priority::Medium, t0())).unwrap();
        (user.id, agent.id, ticket.id)
    }

    #[test]
    fn first_public_comment_stamps_ticket() {
        let db = create_test_db();
        let (_, agent_id, ticket_id) = setup(&db);

        let later = t0() + Duration::hours(1);
        let recorded = db.create_comment(&ticket_id, &agent_id, "On it", CommentKind::Comment, later).unwrap();
        assert!(recorded.comment.is_first_response);
        assert!(recorded.first_response_recorded);

        let ticket = db.get_ticket(&ticket_id).unwrap();
        assert_eq!(ticket.first_response_at, Some(later));
        assert_eq!(ticket.version, 1);

        let second = db.create_comment(&ticket_id, &agent_id, "Update", CommentKind::Comment, later + Duration::hours(1)).unwrap();
        assert!(!second.comment.is_first_response);
        assert!(!second.first_response_recorded);
        let ticket = db.get_ticket(&ticket_id).unwrap();
        assert_eq!(ticket.first_response_at, Some(later));
        assert_eq!(ticket.version, 1);
    }

    #[test]
    fn internal_note_is_never_first_response() {
        let db = create_test_db();
        let (_, agent_id, ticket_id) = setup(&db);

        let note = db.create_comment(&ticket_id, &agent_id, "Looks like a driver issue", CommentKind::InternalNote, t0()).unwrap();
        assert!(!note.comment.is_first_response);
        assert!(db.get_ticket(&ticket_id).unwrap().first_response_at.is_none());

        let reply = db.create_comment(&ticket_id, &agent_id, "Hello", CommentKind::Comment, t0()).unwrap();
        assert!(reply.comment.is_first_response);
    }

    #[test]
    fn creator_comment_counts_as_first_response() {
        let db = create_test_db();
        let (user_id, _, ticket_id) = setup(&db);

        let recorded = db.create_comment(&ticket_id, &user_id, "Any news?", CommentKind::Comment, t0()).unwrap();
        assert!(recorded.comment.is_first_response);
    }

    #[test]
    fn comment_on_missing_ticket() {
        let db = create_test_db();
        let (user_id, _, _) = setup(&db);
        let result = db.create_comment("missing", &user_id, "hi", CommentKind::Comment, t0());
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[test]
    fn get_comments_hides_internal_notes() {
        let db = create_test_db();
        let (user_id, agent_id, ticket_id) = setup(&db);

        db.create_comment(&ticket_id, &user_id, "Help", CommentKind::Comment, t0()).unwrap();
        db.create_comment(&ticket_id, &agent_id, "Escalate", CommentKind::InternalNote, t0()).unwrap();

        assert_eq!(db.get_comments(&ticket_id, true).unwrap().len(), 2);
        let public = db.get_comments(&ticket_id, false).unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].content, "Help");
    }
}
