use serde_json::json;
use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("invalid attendance status: {raw:?}")]
    InvalidStatus { raw: String },
    #[error("{message}")]
    ConstraintViolation { message: String },
    #[error("no valid attendance entries submitted")]
    NoValidEntries,
    #[error("{message}")]
    BadParams { message: String },
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation {
            message: message.into(),
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::BadParams {
            message: message.into(),
        }
    }

    /// Stable wire code for the IPC layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::InvalidStatus { .. } => "invalid_status",
            Self::ConstraintViolation { .. } => "constraint_violation",
            Self::NoValidEntries => "no_valid_entries",
            Self::BadParams { .. } => "bad_params",
            Self::Storage(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::NotFound { entity, id } => Some(json!({ "entity": entity, "id": id })),
            Self::InvalidStatus { raw } => Some(json!({ "status": raw })),
            _ => None,
        }
    }
}
