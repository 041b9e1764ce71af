use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;

use crate::repo::RepoError;

/// Where unauthenticated requests to protected routes are sent.
pub const LOGIN_URL: &str = "/auth/login";

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("bad request")] BadRequest,
    #[error("forbidden")] Forbidden,
    /// Carries the path (with query) the client was trying to reach so the
    /// login redirect can send it back there afterwards.
    #[error("login required")] LoginRequired(String),
    #[error("internal error")] Internal,
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Conflict => ApiError::Conflict,
            RepoError::Internal(_) => ApiError::Internal,
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        if let ApiError::LoginRequired(next) = self {
            // `next` is the request path as received, already in encoded form
            return HttpResponse::Found()
                .insert_header(("Location", format!("{LOGIN_URL}?next={next}")))
                .finish();
        }
        let status = match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::BadRequest => StatusCode::BAD_REQUEST,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::LoginRequired(_) => unreachable!(),
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        HttpResponse::build(status).json(ApiErrorBody { error: self.to_string() })
    }
}
