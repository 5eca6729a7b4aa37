//! Editor-facing endpoints. Every handler authenticates the caller itself (via
//! the injected `Authenticator`) and hands the resulting `CallerId` to the
//! core, which decides what that caller may touch.

mod publish;
mod subscribers;

use std::fmt::Debug;

use actix_web::http::header;
use actix_web::http::header::HeaderValue;
use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use actix_web::ResponseError;
pub use publish::*;
pub use subscribers::*;

use crate::authentication::AuthError;
use crate::ownership::OwnershipError;
use crate::publishing::PublishError;
use crate::subscriptions::ListError;
use crate::utils::error_chain_fmt;

#[derive(thiserror::Error)]
pub enum AdminError {
    #[error("Authentication failed")]
    AuthError(#[source] anyhow::Error),
    #[error("{0}")]
    ValidationError(String),
    #[error("Not found")]
    NotFound,
    #[error("Forbidden")]
    Forbidden,
    #[error("Publishing was cancelled")]
    Cancelled,
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl Debug for AdminError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl ResponseError for AdminError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthError(_) => StatusCode::UNAUTHORIZED,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            Self::UnexpectedError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    // supersedes `status_code`, which is only used here
    fn error_response(&self) -> HttpResponse<actix_web::body::BoxBody> {
        let mut resp = HttpResponse::new(self.status_code());
        if let Self::AuthError(_) = self {
            resp.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(r#"Basic realm="publish""#),
            );
        }
        resp
    }
}

impl From<AuthError> for AdminError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials(e) => Self::AuthError(e),
            AuthError::UnexpectedError(e) => Self::UnexpectedError(e),
        }
    }
}

impl From<OwnershipError> for AdminError {
    fn from(e: OwnershipError) -> Self {
        match e {
            OwnershipError::NotFound => Self::NotFound,
            OwnershipError::Forbidden => Self::Forbidden,
            OwnershipError::UnexpectedError(e) => Self::UnexpectedError(e),
        }
    }
}

impl From<ListError> for AdminError {
    fn from(e: ListError) -> Self {
        match e {
            ListError::UnexpectedError(e) => Self::UnexpectedError(e),
        }
    }
}

impl From<PublishError> for AdminError {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::NotFound => Self::NotFound,
            PublishError::Forbidden => Self::Forbidden,
            PublishError::Cancelled => Self::Cancelled,
            PublishError::MarkPublished(e) => {
                Self::UnexpectedError(e.context("Emails were sent but the post is still a draft"))
            }
            PublishError::UnexpectedError(e) => Self::UnexpectedError(e),
        }
    }
}
