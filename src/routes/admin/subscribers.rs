use actix_web::web;
use actix_web::HttpRequest;
use actix_web::HttpResponse;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use super::AdminError;
use crate::authentication::Authenticator;
use crate::domain::Page;
use crate::domain::Subscriber;
use crate::ownership::OwnershipGuard;
use crate::subscriptions::SubscriptionStateMachine;

#[derive(Deserialize)]
pub struct PageParams {
    limit: Option<u32>,
    offset: Option<u32>,
}

#[derive(Serialize)]
struct SubscriberPage {
    subscribers: Vec<Subscriber>,
    total: u64,
    limit: u32,
    offset: u32,
}

/// `GET /admin/newsletters/{newsletter_id}/subscribers?limit=&offset=`
///
/// Active subscribers of a newsletter the caller owns, oldest first.
#[tracing::instrument(
    name = "Listing subscribers",
    skip(request, params, authenticator, guard, subscriptions)
)]
pub async fn list_subscribers(
    request: HttpRequest,
    newsletter_id: web::Path<Uuid>,
    params: web::Query<PageParams>,
    authenticator: web::Data<dyn Authenticator>,
    guard: web::Data<OwnershipGuard>,
    subscriptions: web::Data<SubscriptionStateMachine>,
) -> Result<HttpResponse, AdminError> {
    let caller = authenticator.authenticate(request.headers()).await?;
    let page = Page::parse(params.limit, params.offset).map_err(AdminError::ValidationError)?;

    let (_, newsletter) = guard
        .verify_newsletter_ownership(&caller, newsletter_id.into_inner())
        .await?;
    let (subscribers, total) = subscriptions.list_active(newsletter.id, page).await?;

    Ok(HttpResponse::Ok().json(SubscriberPage {
        subscribers,
        total,
        limit: page.limit(),
        offset: page.offset(),
    }))
}
