use thiserror::Error;

use crate::db::DbError;
use crate::lifecycle::AssignmentDenial;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{field} is required")]
    FieldRequired { field: &'static str },

    #[error("{message}")]
    InvalidField { field: &'static str, message: String },

    #[error("No changes requested")]
    NoChanges,

    #[error("Ticket {ticket_id} was modified by someone else (expected version {expected}, current version {actual})")]
    StaleUpdate {
        ticket_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    InvalidAssignee(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Db(DbError),
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => EngineError::NotFound(what),
            DbError::VersionConflict { ticket_id, expected, actual } => {
                EngineError::StaleUpdate { ticket_id, expected, actual }
            }
            other => EngineError::Db(other),
        }
    }
}

impl From<AssignmentDenial> for EngineError {
    fn from(denial: AssignmentDenial) -> Self {
        match denial {
            AssignmentDenial::Forbidden(msg) => EngineError::Forbidden(msg),
            AssignmentDenial::InvalidAssignee(msg) => EngineError::InvalidAssignee(msg),
        }
    }
}
