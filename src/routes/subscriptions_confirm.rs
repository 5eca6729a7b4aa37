use actix_web::http::StatusCode;
use actix_web::web;
use actix_web::HttpResponse;
use actix_web::ResponseError;
use serde::Deserialize;

use crate::subscriptions::ConfirmError;
use crate::subscriptions::SubscriptionStateMachine;

#[derive(Deserialize)]
pub struct Parameters {
    pub subscription_token: String,
}

impl ResponseError for ConfirmError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidOrExpiredToken => StatusCode::UNAUTHORIZED,
            Self::AlreadyConfirmed => StatusCode::CONFLICT,
            Self::UnexpectedError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// `GET /subscriptions/confirm?subscription_token=...`, the link in the
/// confirmation email. A missing token is rejected with 400 by `Query`.
#[tracing::instrument(name = "Confirming subscription", skip_all)]
pub async fn confirm(
    params: web::Query<Parameters>,
    subscriptions: web::Data<SubscriptionStateMachine>,
) -> Result<HttpResponse, ConfirmError> {
    subscriptions.confirm(&params.subscription_token).await?;
    Ok(HttpResponse::Ok().finish())
}
