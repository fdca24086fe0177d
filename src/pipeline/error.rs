use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::{http::StatusCode, response::IntoResponse, Json};
use uuid::Uuid;

use super::types::ItemKind;

/// Failure classes callers react to. Nothing here is retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Stage not found: {0}")]
    StageNotFound(Uuid),
    #[error("{kind} not found: {id}")]
    ItemNotFound { kind: ItemKind, id: Uuid },
    #[error("Lead not found: {0}")]
    LeadNotFound(Uuid),
    #[error("Stage \"{name}\" has {leads} lead(s) and {deals} deal(s) attached; move them before deleting it")]
    HasDependents { name: String, leads: i64, deals: i64 },
    #[error("Lead {lead_id} has already been converted to a deal")]
    AlreadyConverted { lead_id: Uuid, deal_id: Option<Uuid> },
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Storage(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StageNotFound(_) | Self::ItemNotFound { .. } | Self::LeadNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::HasDependents { .. } | Self::AlreadyConverted { .. } => ErrorKind::Conflict,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Storage(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::StageNotFound(_) => "STAGE_NOT_FOUND",
            Self::ItemNotFound { .. } => "ITEM_NOT_FOUND",
            Self::LeadNotFound(_) => "LEAD_NOT_FOUND",
            Self::HasDependents { .. } => "HAS_DEPENDENTS",
            Self::AlreadyConverted { .. } => "ALREADY_CONVERTED",
            Self::Validation(_) => "VALIDATION",
            Self::Storage(_) | Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict | ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<diesel::result::Error> for PipelineError {
    fn from(e: diesel::result::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<diesel::r2d2::PoolError> for PipelineError {
    fn from(e: diesel::r2d2::PoolError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<JsonRejection> for PipelineError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for PipelineError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for PipelineError {
    fn from(rejection: PathRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let message = match self.kind() {
            ErrorKind::Internal => {
                log::error!("Pipeline request failed: {self}");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };
        (
            status,
            Json(serde_json::json!({ "error": message, "code": self.code() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_taxonomy() {
        let id = Uuid::new_v4();
        assert_eq!(PipelineError::StageNotFound(id).kind(), ErrorKind::NotFound);
        assert_eq!(
            PipelineError::ItemNotFound { kind: ItemKind::Deal, id }.kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            PipelineError::AlreadyConverted { lead_id: id, deal_id: None }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            PipelineError::Validation("entityId is required".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(PipelineError::Storage("down".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_status_codes() {
        let id = Uuid::new_v4();
        assert_eq!(PipelineError::LeadNotFound(id).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            PipelineError::HasDependents { name: "New".into(), leads: 1, deals: 0 }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PipelineError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_dependents_message_is_readable() {
        let err = PipelineError::HasDependents { name: "Proposal".into(), leads: 2, deals: 1 };
        assert_eq!(
            err.to_string(),
            "Stage \"Proposal\" has 2 lead(s) and 1 deal(s) attached; move them before deleting it"
        );
    }
}
