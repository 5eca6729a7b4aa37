use actix_web::web;
use actix_web::HttpRequest;
use actix_web::HttpResponse;
use anyhow::Context;
use tracing::Instrument;
use uuid::Uuid;

use super::AdminError;
use crate::authentication::Authenticator;
use crate::publishing::Cancellation;
use crate::publishing::PublishingOrchestrator;

/// `POST /admin/posts/{post_id}/publish`
///
/// Responds with the outcome and, when anything was sent, a delivery report:
///
/// ```json
/// {"status": "partial_delivery_failure", "report": {"recipients": 3, "delivered": 2, "failed": 1, "skipped": 0}}
/// ```
///
/// Publishing again is harmless and answers `{"status": "already_published"}`.
/// A publish still fanning out when the server shuts down is cancelled and
/// answers 503, leaving the post a draft that can be published again.
#[tracing::instrument(
    name = "Handling publish request",
    skip(request, authenticator, orchestrator, shutdown)
)]
pub async fn publish_post(
    request: HttpRequest,
    post_id: web::Path<Uuid>,
    authenticator: web::Data<dyn Authenticator>,
    orchestrator: web::Data<PublishingOrchestrator>,
    shutdown: web::Data<Cancellation>,
) -> Result<HttpResponse, AdminError> {
    let caller = authenticator.authenticate(request.headers()).await?;
    let post_id = post_id.into_inner();
    let orchestrator = orchestrator.into_inner();
    let shutdown = shutdown.get_ref().clone();

    // actix drops the handler future when the client disconnects; the fan-out
    // runs in its own task so that it always reaches the barrier
    let outcome = tokio::spawn(
        async move {
            orchestrator
                .publish(post_id, &caller, &shutdown)
                .await
        }
        .in_current_span(),
    )
    .await
    .context("Publishing task failed")??;

    Ok(HttpResponse::Ok().json(outcome))
}
