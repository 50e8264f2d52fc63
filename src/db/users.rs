use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use crate::db::{Database, DbError, format_datetime, get_datetime, stored_datetime};
use crate::db::models::{CreateUser, IssuedUser, Role, User};

const USER_COLUMNS: &str = "id, name, email, role, active, created_at";

impl Database {
    pub fn create_user(&self, user: &CreateUser, now: DateTime<Utc>) -> Result<IssuedUser, DbError> {
        if user.name.trim().is_empty() {
            return Err(DbError::Validation("User name cannot be empty".to_string()));
        }
        if user.email.trim().is_empty() {
            return Err(DbError::Validation("User email cannot be empty".to_string()));
        }

        self.with_conn(|conn| {
            let user_id = uuid::Uuid::new_v4().to_string();
            let api_token = generate_api_token();

            conn.execute(
                r#"INSERT INTO users (id, name, email, role, active, api_token, created_at)
                   VALUES (?, ?, ?, ?, 1, ?, ?)"#,
                rusqlite::params![
                    user_id,
                    user.name.trim(),
                    user.email.trim(),
                    user.role.as_str(),
                    api_token,
                    format_datetime(&now),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(ref err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    DbError::Validation(format!("A user with email {} already exists", user.email))
                }
                other => DbError::Sqlite(other),
            })?;

            tracing::info!("Created {} user {}", user.role.as_str(), user_id);

            Ok(IssuedUser {
                user: User {
                    id: user_id,
                    name: user.name.trim().to_string(),
                    email: user.email.trim().to_string(),
                    role: user.role,
                    active: true,
                    created_at: stored_datetime(&now),
                },
                api_token,
            })
        })
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<User>, DbError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
                [user_id],
                Self::map_user_row,
            )
            .optional()
            .map_err(DbError::from)
        })
    }

    pub fn get_user_by_token(&self, api_token: &str) -> Result<Option<User>, DbError> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM users WHERE api_token = ?", USER_COLUMNS),
                [api_token],
                Self::map_user_row,
            )
            .optional()
            .map_err(DbError::from)
        })
    }

    pub fn set_user_active(&self, user_id: &str, active: bool) -> Result<(), DbError> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                "UPDATE users SET active = ? WHERE id = ?",
                rusqlite::params![active, user_id],
            )?;

            if affected == 0 {
                return Err(DbError::NotFound(format!("User {}", user_id)));
            }
            Ok(())
        })
    }

    pub fn count_users(&self) -> Result<u64, DbError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    fn map_user_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
        let role_str: String = row.get(3)?;
        Ok(User {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            role: Role::parse(&role_str).unwrap_or(Role::User),
            active: row.get::<_, i32>(4)? != 0,
            created_at: get_datetime(row, 5)?,
        })
    }
}

pub fn generate_api_token() -> String {
    use rand::Rng;

    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    const TOKEN_LENGTH: usize = 32;

    let mut rng = rand::thread_rng();
    (0..TOKEN_LENGTH)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}
