use actix_web::http::StatusCode;
use actix_web::web;
use actix_web::HttpResponse;
use actix_web::ResponseError;

use super::Parameters;
use crate::subscriptions::SubscriptionStateMachine;
use crate::subscriptions::UnsubscribeError;

impl ResponseError for UnsubscribeError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidOrExpiredToken => StatusCode::UNAUTHORIZED,
            Self::UnexpectedError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// `GET /subscriptions/unsubscribe?subscription_token=...`, the link at the
/// bottom of every issue. Clicking it again is fine.
#[tracing::instrument(name = "Unsubscribing", skip_all)]
pub async fn unsubscribe(
    params: web::Query<Parameters>,
    subscriptions: web::Data<SubscriptionStateMachine>,
) -> Result<HttpResponse, UnsubscribeError> {
    let outcome = subscriptions
        .unsubscribe_by_token(&params.subscription_token)
        .await?;
    tracing::info!(?outcome, "Unsubscribe handled");
    Ok(HttpResponse::Ok().finish())
}
