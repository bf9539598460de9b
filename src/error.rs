use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use thiserror::Error;

use crate::params::ValidationError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("context for {scope} {id} is not valid: {reason}")]
    Context {
        scope: &'static str,
        id: i64,
        reason: String,
    },
    #[error("access denied: {message}")]
    AccessDenied {
        errorcode: &'static str,
        message: String,
    },
    #[error("{entity} {id} not found")]
    NotFound {
        errorcode: &'static str,
        entity: &'static str,
        id: String,
    },
    #[error("invalid token")]
    InvalidToken,
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
    #[error("storage write failure: {0}")]
    StorageWrite(StoreError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("corrupt record in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },
}

impl ServiceError {
    pub fn denied(errorcode: &'static str, message: impl Into<String>) -> Self {
        ServiceError::AccessDenied {
            errorcode,
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ServiceError::NotFound {
            errorcode: "invalidrecord",
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_module(id: impl ToString) -> Self {
        ServiceError::NotFound {
            errorcode: "invalidcoursemodule",
            entity: "course module",
            id: id.to_string(),
        }
    }

    pub fn invalid_activity(module: &str, id: impl ToString) -> Self {
        ServiceError::NotFound {
            errorcode: "invalidactivityid",
            entity: "activity",
            id: format!("{}:{}", module, id.to_string()),
        }
    }

    /// Stable machine-readable code, mirrored in the JSON error body.
    pub fn errorcode(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "invalidparameter",
            ServiceError::Context { .. } => "errorcoursecontextnotvalid",
            ServiceError::AccessDenied { errorcode, .. } => errorcode,
            ServiceError::NotFound { errorcode, .. } => errorcode,
            ServiceError::InvalidToken => "invalidtoken",
            ServiceError::Storage(_) => "dmlreadexception",
            ServiceError::StorageWrite(_) => "dmlwriteexception",
        }
    }

    pub fn exception(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "invalid_parameter_exception",
            ServiceError::Context { .. } => "context_exception",
            ServiceError::AccessDenied { .. } => "required_capability_exception",
            ServiceError::NotFound { .. } => "dml_missing_record_exception",
            ServiceError::InvalidToken => "webservice_access_exception",
            ServiceError::Storage(_) | ServiceError::StorageWrite(_) => "dml_exception",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::InvalidToken => StatusCode::UNAUTHORIZED,
            ServiceError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            ServiceError::Context { .. } | ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::Storage(_) | ServiceError::StorageWrite(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ServiceError::Storage(e) => {
                tracing::error!(error=%e, "storage failure");
                "error reading from database".to_string()
            }
            ServiceError::StorageWrite(e) => {
                tracing::error!(error=%e, "storage write failure");
                "error writing to database".to_string()
            }
            _ => self.to_string(),
        };
        let body = serde_json::json!({
            "exception": self.exception(),
            "errorcode": self.errorcode(),
            "message": message,
        });
        (status, Json(body)).into_response()
    }
}

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;
