use std::fmt::Debug;
use std::sync::Arc;

use anyhow::Context;
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::Page;
use crate::domain::Subscriber;
use crate::domain::SubscriberEmail;
use crate::domain::SubscriberStatus;
use crate::email_client::Mailer;
use crate::links::Links;
use crate::store::NewsletterStore;
use crate::store::StoreError;
use crate::store::SubscriberStore;
use crate::tokens::TokenIssuer;
use crate::utils::error_chain_fmt;

#[derive(thiserror::Error)]
pub enum SubscribeError {
    #[error("{0}")]
    ValidationError(String),
    #[error("Newsletter not found")]
    NotFound,
    #[error("Already subscribed to this newsletter")]
    AlreadySubscribed,
    /// Lost a race against a concurrent subscribe for the same pair
    #[error("Subscription was created concurrently")]
    Conflict,
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl Debug for SubscribeError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[derive(thiserror::Error)]
pub enum ConfirmError {
    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,
    #[error("Subscription already confirmed")]
    AlreadyConfirmed,
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl Debug for ConfirmError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[derive(thiserror::Error)]
pub enum UnsubscribeError {
    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl Debug for UnsubscribeError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[derive(thiserror::Error)]
pub enum ListError {
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl Debug for ListError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    Unsubscribed,
    /// The token was valid, but the subscriber had already left
    AlreadyUnsubscribed,
}

/// Owns every transition of a `Subscriber`:
///
/// - subscribe: absent -> pending (confirmation email), or unsubscribed ->
///   active (welcome back email, no confirmation)
/// - confirm: pending -> active
/// - unsubscribe: active -> unsubscribed
///
/// Store writes that race (token consumption, reactivation) are conditional,
/// so losing a race shows up as a `false` from the store rather than as a
/// double transition.
pub struct SubscriptionStateMachine {
    subscribers: Arc<dyn SubscriberStore>,
    newsletters: Arc<dyn NewsletterStore>,
    mailer: Arc<dyn Mailer>,
    tokens: TokenIssuer,
    links: Links,
    clock: Arc<dyn Clock>,
}

impl SubscriptionStateMachine {
    pub fn new(
        subscribers: Arc<dyn SubscriberStore>,
        newsletters: Arc<dyn NewsletterStore>,
        mailer: Arc<dyn Mailer>,
        tokens: TokenIssuer,
        links: Links,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            subscribers,
            newsletters,
            mailer,
            tokens,
            links,
            clock,
        }
    }

    /// Exactly one email goes out per successful call. A failed send never
    /// fails the call (on any path): the row is already written, and the
    /// subscriber can simply subscribe again to get another email.
    #[tracing::instrument(
        name = "Subscribing",
        skip(self, email),
        fields(subscriber_email = %email, newsletter_id = %newsletter_id)
    )]
    pub async fn subscribe(
        &self,
        email: String,
        newsletter_id: Uuid,
    ) -> Result<Subscriber, SubscribeError> {
        let email = SubscriberEmail::parse(email).map_err(SubscribeError::ValidationError)?;

        self.newsletters
            .get_newsletter(newsletter_id)
            .await
            .context("Failed to fetch newsletter")?
            .ok_or(SubscribeError::NotFound)?;

        let existing = self
            .subscribers
            .find_by_email_and_newsletter(&email, newsletter_id)
            .await
            .context("Failed to look up existing subscription")?;

        match existing {
            None => self.create_pending(email, newsletter_id).await,
            Some(sub) => match sub.status {
                SubscriberStatus::Active => Err(SubscribeError::AlreadySubscribed),
                SubscriberStatus::Unsubscribed => self.resubscribe(sub).await,
                SubscriberStatus::PendingConfirmation => self.resend_confirmation(sub).await,
            },
        }
    }

    async fn create_pending(
        &self,
        email: SubscriberEmail,
        newsletter_id: Uuid,
    ) -> Result<Subscriber, SubscribeError> {
        let now = self.clock.now();
        let sub = Subscriber::pending(
            email,
            newsletter_id,
            self.tokens.new_token(),
            self.tokens.expiry_from(now),
            now,
        );

        match self.subscribers.create(&sub).await {
            Ok(()) => {}
            Err(StoreError::Conflict) => return Err(SubscribeError::Conflict),
            Err(e) => {
                return Err(anyhow::Error::from(e)
                    .context("Failed to store new subscriber")
                    .into())
            }
        }
        tracing::info!(subscriber_id = %sub.id, "New subscriber pending confirmation");

        self.send_confirmation(&sub).await;
        Ok(sub)
    }

    /// A second subscribe before confirming never creates a second row. The
    /// same token is sent again while it is valid; an expired one is replaced.
    async fn resend_confirmation(
        &self,
        mut sub: Subscriber,
    ) -> Result<Subscriber, SubscribeError> {
        let now = self.clock.now();

        if sub.confirmation_token.is_none() || sub.confirmation_expired(now) {
            let token = self.tokens.new_token();
            let expiry = self.tokens.expiry_from(now);
            let reissued = self
                .subscribers
                .reissue_confirmation_token(sub.id, &token, expiry)
                .await
                .context("Failed to reissue confirmation token")?;
            if !reissued {
                // confirmed in the meantime
                return Err(SubscribeError::AlreadySubscribed);
            }
            sub.confirmation_token = Some(token);
            sub.token_expiry = Some(expiry);
        }

        self.send_confirmation(&sub).await;
        Ok(sub)
    }

    /// No re-confirmation: the address was confirmed once already.
    async fn resubscribe(
        &self,
        mut sub: Subscriber,
    ) -> Result<Subscriber, SubscribeError> {
        let now = self.clock.now();
        let unsubscribe_token = self.tokens.new_token();

        let reactivated = self
            .subscribers
            .reactivate(sub.id, &unsubscribe_token, now)
            .await
            .context("Failed to reactivate subscriber")?;
        if !reactivated {
            return Err(SubscribeError::AlreadySubscribed);
        }
        tracing::info!(subscriber_id = %sub.id, "Subscriber reactivated");

        let result = self
            .mailer
            .send_welcome_back(&sub.email, &self.links.unsubscribe(&unsubscribe_token))
            .await;
        log_send_failure(result, "welcome back");

        sub.status = SubscriberStatus::Active;
        sub.subscription_date = now;
        sub.unsubscribe_token = Some(unsubscribe_token);
        Ok(sub)
    }

    async fn send_confirmation(
        &self,
        sub: &Subscriber,
    ) {
        if let Some(token) = &sub.confirmation_token {
            let result = self
                .mailer
                .send_confirmation(&sub.email, &self.links.confirmation(token))
                .await;
            log_send_failure(result, "confirmation");
        }
    }

    /// Consumes a confirmation token. A token works once: the row forgets it
    /// on success, so any later attempt fails the lookup.
    #[tracing::instrument(name = "Confirming subscriber", skip(self, token))]
    pub async fn confirm(
        &self,
        token: &str,
    ) -> Result<Subscriber, ConfirmError> {
        let mut sub = self
            .subscribers
            .find_by_confirmation_token(token)
            .await
            .context("Failed to look up confirmation token")?
            .ok_or(ConfirmError::InvalidOrExpiredToken)?;

        if sub.status == SubscriberStatus::Active && sub.confirmed_at.is_some() {
            return Err(ConfirmError::AlreadyConfirmed);
        }
        if sub.status != SubscriberStatus::PendingConfirmation {
            return Err(ConfirmError::InvalidOrExpiredToken);
        }

        let now = self.clock.now();
        if sub.confirmation_expired(now) {
            return Err(ConfirmError::InvalidOrExpiredToken);
        }

        let unsubscribe_token = self.tokens.new_token();
        let confirmed = self
            .subscribers
            .confirm_atomic(sub.id, token, &unsubscribe_token, now)
            .await
            .context("Failed to confirm subscriber")?;
        if !confirmed {
            // a concurrent confirm consumed the token first
            return Err(ConfirmError::InvalidOrExpiredToken);
        }
        tracing::info!(subscriber_id = %sub.id, "Subscriber confirmed");

        sub.status = SubscriberStatus::Active;
        sub.confirmed_at = Some(now);
        sub.confirmation_token = None;
        sub.token_expiry = None;
        sub.unsubscribe_token = Some(unsubscribe_token);
        Ok(sub)
    }

    /// Idempotent: the token stays on the row after unsubscribing, so a
    /// repeated click keeps succeeding until a resubscription replaces it.
    #[tracing::instrument(name = "Unsubscribing", skip(self, token))]
    pub async fn unsubscribe_by_token(
        &self,
        token: &str,
    ) -> Result<UnsubscribeOutcome, UnsubscribeError> {
        let sub = self
            .subscribers
            .find_by_unsubscribe_token(token)
            .await
            .context("Failed to look up unsubscribe token")?
            .ok_or(UnsubscribeError::InvalidOrExpiredToken)?;

        match sub.status {
            SubscriberStatus::Unsubscribed => return Ok(UnsubscribeOutcome::AlreadyUnsubscribed),
            SubscriberStatus::PendingConfirmation => {
                return Err(UnsubscribeError::InvalidOrExpiredToken)
            }
            SubscriberStatus::Active => {}
        }

        let changed = self
            .subscribers
            .unsubscribe_atomic(token)
            .await
            .context("Failed to unsubscribe")?;
        if changed {
            tracing::info!(subscriber_id = %sub.id, "Subscriber unsubscribed");
            Ok(UnsubscribeOutcome::Unsubscribed)
        } else {
            Ok(UnsubscribeOutcome::AlreadyUnsubscribed)
        }
    }

    /// Ordered by subscription date, then id
    #[tracing::instrument(name = "Listing active subscribers", skip(self))]
    pub async fn list_active(
        &self,
        newsletter_id: Uuid,
        page: Page,
    ) -> Result<(Vec<Subscriber>, u64), ListError> {
        let listed = self
            .subscribers
            .list_active_by_newsletter(newsletter_id, page)
            .await
            .context("Failed to list active subscribers")?;
        Ok(listed)
    }

    pub async fn list_all_active(
        &self,
        newsletter_id: Uuid,
    ) -> Result<Vec<Subscriber>, ListError> {
        let all = self
            .subscribers
            .list_all_active_by_newsletter(newsletter_id)
            .await
            .context("Failed to list active subscribers")?;
        Ok(all)
    }
}

fn log_send_failure(
    result: Result<(), anyhow::Error>,
    kind: &str,
) {
    if let Err(e) = result {
        tracing::warn!(
            error.cause_chain = ?e,
            error.message = %e,
            "Failed to send {kind} email; the subscription change stands"
        );
    }
}
