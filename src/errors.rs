use crate::domain::deletion::DeleteBlock;
use crate::response::ApiResponse;
use crate::session::SessionError;
use anyhow::anyhow;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use deadpool_diesel::InteractError;
use deadpool_diesel::postgres::PoolError;
use thiserror::Error;
use tracing::error;

pub const LOGIN_PATH: &str = "/user/login";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String), // 400

    #[error("Invalid username or password.")]
    AuthenticationFailed, // redirect to login with a notice

    #[error("Login required")]
    LoginRequired, // 303 to login

    #[error("Forbidden: {0}")]
    Forbidden(String), // 403

    #[error("Not Found: {0}")]
    NotFound(String), // 404

    #[error("Conflict: {0}")]
    Conflict(String), // 409

    #[error("Blocked: {0}")]
    IntegrityBlock(DeleteBlock), // 409

    #[error("Unprocessable Entity: {0}")]
    Validation(String), // 422

    #[error("Database error: {0}")]
    DieselError(diesel::result::Error), // 500

    #[error("Database pool error: {0}")]
    PoolError(PoolError), // 500

    #[error("Database interaction error: {0}")]
    InteractError(InteractError), // 500

    #[error("Internal Server Error: {0}")]
    InternalServerError(#[from] anyhow::Error), // 500
}

impl AppError {
    /// Whether the failure is caused by the request itself and should be
    /// shown to the user as a notice rather than treated as a server fault.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            AppError::BadRequest(_)
                | AppError::AuthenticationFailed
                | AppError::Forbidden(_)
                | AppError::NotFound(_)
                | AppError::Conflict(_)
                | AppError::IntegrityBlock(_)
                | AppError::Validation(_)
        )
    }

    /// Text for a notice, without the status prefix.
    pub fn user_message(&self) -> String {
        match self {
            AppError::BadRequest(message)
            | AppError::Forbidden(message)
            | AppError::NotFound(message)
            | AppError::Conflict(message)
            | AppError::Validation(message) => message.clone(),
            AppError::IntegrityBlock(block) => block.to_string(),
            other => other.to_string(),
        }
    }
}

impl From<PoolError> for AppError {
    fn from(err: PoolError) -> Self {
        error!("Database pool error encountered: {:?}", err);
        AppError::PoolError(err)
    }
}

impl From<InteractError> for AppError {
    fn from(err: InteractError) -> Self {
        error!("Database interaction error encountered: {:?}", err);
        AppError::InteractError(err)
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(err: diesel::result::Error) -> Self {
        AppError::DieselError(err)
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        error!("Session store error encountered: {:?}", err);
        AppError::InternalServerError(anyhow!(err).context("Session store error"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::LoginRequired => return Redirect::to(LOGIN_PATH).into_response(),

            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            AppError::AuthenticationFailed => (
                StatusCode::UNAUTHORIZED,
                AppError::AuthenticationFailed.to_string(),
            ),
            AppError::Forbidden(message) => (StatusCode::FORBIDDEN, message),
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            AppError::Conflict(message) => (StatusCode::CONFLICT, message),
            AppError::IntegrityBlock(block) => (StatusCode::CONFLICT, block.to_string()),
            AppError::Validation(message) => (StatusCode::UNPROCESSABLE_ENTITY, message),

            AppError::DieselError(diesel::result::Error::NotFound) => (
                StatusCode::NOT_FOUND,
                "Resource not found (database query)".to_string(),
            ),

            source @ (AppError::DieselError(_)
            | AppError::PoolError(_)
            | AppError::InteractError(_)
            | AppError::InternalServerError(_)) => {
                error!(
                    "Responding with 500 Internal Server Error. Source: {:?}",
                    source
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = ApiResponse::<()> {
            status_code: status.as_u16(),
            status_message: error_message,
            data: None,
        };

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_required_redirects_to_login() {
        let response = AppError::LoginRequired.into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()["location"], LOGIN_PATH);
    }

    #[test]
    fn integrity_block_maps_to_conflict() {
        let response = AppError::IntegrityBlock(DeleteBlock::SubjectAssignedToClasses).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn infrastructure_errors_are_not_user_facing() {
        let err = AppError::InternalServerError(anyhow!("disk on fire"));
        assert!(!err.is_user_facing());
        assert!(AppError::Validation("bad".into()).is_user_facing());
    }

    #[test]
    fn user_message_strips_status_prefix() {
        let err = AppError::NotFound("Subject with ID 3 not found.".into());
        assert_eq!(err.user_message(), "Subject with ID 3 not found.");
        let blocked = AppError::IntegrityBlock(DeleteBlock::AdminUser);
        assert_eq!(blocked.user_message(), DeleteBlock::AdminUser.to_string());
    }

    #[test]
    fn diesel_not_found_maps_to_404() {
        let response = AppError::from(diesel::result::Error::NotFound).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
