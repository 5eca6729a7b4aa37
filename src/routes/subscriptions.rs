use actix_web::http::StatusCode;
use actix_web::web;
use actix_web::HttpResponse;
use actix_web::ResponseError;
use serde::Deserialize;
use uuid::Uuid;

use crate::subscriptions::SubscribeError;
use crate::subscriptions::SubscriptionStateMachine;

#[derive(Deserialize)]
pub struct FormData {
    email: String,
    newsletter_id: Uuid,
}

impl ResponseError for SubscribeError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::AlreadySubscribed | Self::Conflict => StatusCode::CONFLICT,
            Self::UnexpectedError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// `POST /subscriptions`
///
/// A new address gets a confirmation email; an address that unsubscribed
/// earlier is reactivated immediately and gets a "welcome back" email.
///
/// ```sh
///     curl --data 'email=john@foo.com&newsletter_id=...' http://127.0.0.1:8000/subscriptions
/// ```
///
/// A form that cannot be deserialized (e.g. a malformed `newsletter_id`) is
/// rejected by the extractor with 400 before we get here.
#[tracing::instrument(
    name = "Handling subscription request",
    skip(form, subscriptions),
    fields(subscriber_email = %form.email, newsletter_id = %form.newsletter_id)
)]
pub async fn subscribe(
    form: web::Form<FormData>,
    subscriptions: web::Data<SubscriptionStateMachine>,
) -> Result<HttpResponse, SubscribeError> {
    let FormData {
        email,
        newsletter_id,
    } = form.into_inner();
    let subscriber = subscriptions.subscribe(email, newsletter_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": subscriber.status })))
}
