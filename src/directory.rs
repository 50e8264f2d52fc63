//! User directory lookups used for display names and assignee checks.

use crate::db::{Database, DbError, User};

pub trait UserDirectory: Send + Sync {
    fn find_user(&self, user_id: &str) -> Result<Option<User>, DbError>;

    /// Name to show in audit descriptions. Falls back to the raw id for unknown users.
    fn display_name(&self, user_id: &str) -> String {
        match self.find_user(user_id) {
            Ok(Some(user)) => user.name,
            Ok(None) => user_id.to_string(),
            Err(e) => {
                tracing::warn!("Directory lookup for {} failed: {}", user_id, e);
                user_id.to_string()
            }
        }
    }
}

impl UserDirectory for Database {
    fn find_user(&self, user_id: &str) -> Result<Option<User>, DbError> {
        self.get_user(user_id)
    }
}
