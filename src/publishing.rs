use std::fmt::Debug;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::watch;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::CallerId;
use crate::domain::Post;
use crate::domain::Subscriber;
use crate::email_client::Mailer;
use crate::links::Links;
use crate::ownership::OwnershipError;
use crate::ownership::OwnershipGuard;
use crate::store::PostStore;
use crate::subscriptions::SubscriptionStateMachine;
use crate::utils::error_chain_fmt;

/// Default size of the fan-out pool
pub const MAX_CONCURRENT_DELIVERIES: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Active subscribers at the time of publishing
    pub recipients: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Active subscribers without an unsubscribe token
    pub skipped: usize,
}

/// Serialized as `{"status": "published", "report": {...}}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "report", rename_all = "snake_case")]
pub enum PublishOutcome {
    Published(DeliveryReport),
    /// The post is published, but `report.failed` emails did not go out.
    PartialDeliveryFailure(DeliveryReport),
    /// Nothing was sent by this call
    AlreadyPublished,
}

#[derive(thiserror::Error)]
pub enum PublishError {
    #[error("Post not found")]
    NotFound,
    #[error("Forbidden")]
    Forbidden,
    #[error("Publishing was cancelled before the post was marked published")]
    Cancelled,
    /// Emails went out but the post is still a draft. Publishing again
    /// completes the write without sending anything.
    #[error("Failed to mark post as published")]
    MarkPublished(#[source] anyhow::Error),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl Debug for PublishError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl From<OwnershipError> for PublishError {
    fn from(e: OwnershipError) -> Self {
        match e {
            OwnershipError::NotFound => Self::NotFound,
            OwnershipError::Forbidden => Self::Forbidden,
            OwnershipError::UnexpectedError(e) => Self::UnexpectedError(e),
        }
    }
}

/// Sending half of a `Cancellation`.
#[derive(Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) { self.0.send_replace(true); }
}

/// Governs a single publish call. Once cancelled, no new sends are started;
/// sends already in flight are allowed to finish.
#[derive(Clone)]
pub struct Cancellation(watch::Receiver<bool>);

pub fn cancellation() -> (CancelHandle, Cancellation) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(Arc::new(tx)), Cancellation(rx))
}

impl Cancellation {
    /// A cancellation that never fires
    pub fn never() -> Self { cancellation().1 }

    pub fn is_cancelled(&self) -> bool { *self.0.borrow() }

    /// Resolves once cancelled. If the handle is dropped without cancelling,
    /// this never resolves.
    pub async fn cancelled(&self) {
        let mut rx = self.0.clone();
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

/// Delivers a post to every active subscriber of its newsletter, at most once
/// per post.
///
/// Only the caller that wins `PostStore::claim_for_publishing` fans out. The
/// post is marked published after every send has finished (successfully or
/// not), and a failed send never stops the others.
pub struct PublishingOrchestrator {
    guard: OwnershipGuard,
    subscriptions: Arc<SubscriptionStateMachine>,
    posts: Arc<dyn PostStore>,
    mailer: Arc<dyn Mailer>,
    links: Links,
    clock: Arc<dyn Clock>,
    max_concurrent_deliveries: usize,
}

impl PublishingOrchestrator {
    pub fn new(
        guard: OwnershipGuard,
        subscriptions: Arc<SubscriptionStateMachine>,
        posts: Arc<dyn PostStore>,
        mailer: Arc<dyn Mailer>,
        links: Links,
        clock: Arc<dyn Clock>,
        max_concurrent_deliveries: usize,
    ) -> Self {
        Self {
            guard,
            subscriptions,
            posts,
            mailer,
            links,
            clock,
            // a pool of zero would never send anything
            max_concurrent_deliveries: max_concurrent_deliveries.max(1),
        }
    }

    #[tracing::instrument(
        name = "Publishing post",
        skip(self, caller, cancellation),
        fields(caller = %caller)
    )]
    pub async fn publish(
        &self,
        post_id: Uuid,
        caller: &CallerId,
        cancellation: &Cancellation,
    ) -> Result<PublishOutcome, PublishError> {
        let (_, post) = self.guard.verify_post_ownership(caller, post_id).await?;

        if post.published_at.is_some() {
            tracing::info!("Post already published, nothing to send");
            return Ok(PublishOutcome::AlreadyPublished);
        }

        let claimed = self
            .posts
            .claim_for_publishing(post.id, self.clock.now())
            .await
            .context("Failed to claim post for publishing")?;
        if !claimed {
            // Either another call is fanning out right now, or an earlier one
            // finished its fan-out but failed to mark the post. Only the
            // latter is matched by the conditional mark.
            let marked = self
                .posts
                .mark_published_conditional(post.id, self.clock.now())
                .await
                .map_err(|e| PublishError::MarkPublished(e.into()))?;
            if marked {
                tracing::info!("Marked previously delivered post as published");
            } else {
                tracing::info!("Post is being published by another call");
            }
            return Ok(PublishOutcome::AlreadyPublished);
        }

        let subscribers = match self.subscriptions.list_all_active(post.newsletter_id).await {
            Ok(subscribers) => subscribers,
            Err(e) => {
                self.release_claim(post.id).await;
                return Err(anyhow::Error::from(e)
                    .context("Failed to fetch recipients")
                    .into());
            }
        };

        let report = self.fan_out(&post, subscribers, cancellation).await;

        if cancellation.is_cancelled() {
            tracing::warn!(?report, "Publishing cancelled, post left as draft");
            self.release_claim(post.id).await;
            return Err(PublishError::Cancelled);
        }

        // a delivered claim is never released, so a retry after a failed
        // mark completes it instead of sending again
        self.posts
            .mark_delivered(post.id, self.clock.now())
            .await
            .map_err(|e| PublishError::MarkPublished(e.into()))?;
        self.posts
            .mark_published_conditional(post.id, self.clock.now())
            .await
            .map_err(|e| PublishError::MarkPublished(e.into()))?;

        tracing::info!(?report, "Post published");
        if report.failed > 0 {
            Ok(PublishOutcome::PartialDeliveryFailure(report))
        } else {
            Ok(PublishOutcome::Published(report))
        }
    }

    /// Sends one issue per subscriber through a fixed-size pool and waits for
    /// all of them.
    async fn fan_out(
        &self,
        post: &Post,
        subscribers: Vec<Subscriber>,
        cancellation: &Cancellation,
    ) -> DeliveryReport {
        let mut report = DeliveryReport {
            recipients: subscribers.len(),
            ..DeliveryReport::default()
        };
        let pool = Arc::new(Semaphore::new(self.max_concurrent_deliveries));
        let subject: Arc<str> = Arc::from(post.title.as_str());
        let body: Arc<str> = Arc::from(post.content.as_str());
        let mut sends = JoinSet::new();

        for subscriber in subscribers {
            let Some(token) = subscriber.unsubscribe_token.as_deref() else {
                tracing::warn!(
                    subscriber_id = %subscriber.id,
                    "Skipping active subscriber without an unsubscribe token"
                );
                report.skipped += 1;
                continue;
            };
            let unsubscribe_link = self.links.unsubscribe(token);

            let permit = tokio::select! {
                biased;
                _ = cancellation.cancelled() => None,
                permit = pool.clone().acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                break;
            };

            let mailer = self.mailer.clone();
            let subject = subject.clone();
            let body = body.clone();
            sends.spawn(
                async move {
                    let result = mailer
                        .send_issue(&subscriber.email, &subject, &body, &unsubscribe_link)
                        .await;
                    drop(permit);
                    (subscriber, result)
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.delivered += 1,
                Ok((subscriber, Err(e))) => {
                    report.failed += 1;
                    tracing::warn!(
                        subscriber_id = %subscriber.id,
                        error.cause_chain = ?e,
                        "Failed to deliver issue"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(error = %e, "Delivery task panicked");
                }
            }
        }
        report
    }

    async fn release_claim(
        &self,
        post_id: Uuid,
    ) {
        if let Err(e) = self.posts.release_publishing_claim(post_id).await {
            tracing::error!(error.cause_chain = ?e, "Failed to release publishing claim");
        }
    }
}
