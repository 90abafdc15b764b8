use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Failures raised by the demand engine itself. Every variant is terminal for
/// the operation that raised it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Training data is empty")]
    EmptyDataset,

    #[error("Invalid value for {feature}: \"{value}\"")]
    InvalidFeatureValue { feature: String, value: String },

    #[error("Unknown {feature} value: \"{value}\". Use values present in the training data")]
    UnknownCategory { feature: String, value: String },

    #[error("Invalid training data: {0}")]
    InvalidTrainingData(String),

    #[error("Model is not trained: {0}")]
    ModelNotTrained(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
}

impl EngineError {
    pub fn invalid_value(feature: &str, value: &str) -> Self {
        EngineError::InvalidFeatureValue {
            feature: feature.to_string(),
            value: value.to_string(),
        }
    }

    pub fn unknown_category(feature: &str, value: &str) -> Self {
        EngineError::UnknownCategory {
            feature: feature.to_string(),
            value: value.to_string(),
        }
    }
}

/// Errors surfaced by the HTTP service.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Training job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Engine(EngineError::EmptyDataset)
            | AppError::Engine(EngineError::InvalidFeatureValue { .. })
            | AppError::Engine(EngineError::UnknownCategory { .. })
            | AppError::Engine(EngineError::InvalidTrainingData(_)) => StatusCode::BAD_REQUEST,
            AppError::Engine(EngineError::ModelNotTrained(_)) => StatusCode::CONFLICT,
            AppError::JobNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = if status.is_server_error() {
            tracing::error!("Internal server error: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_category_names_feature_and_value() {
        let err = EngineError::unknown_category("dayOfWeek", "Funday");
        let msg = err.to_string();
        assert!(msg.contains("dayOfWeek"));
        assert!(msg.contains("Funday"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::from(EngineError::EmptyDataset).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(EngineError::ModelNotTrained("no snapshot".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(EngineError::PersistenceFailure("disk full".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(AppError::JobNotFound(Uuid::nil()).status(), StatusCode::NOT_FOUND);
    }
}
