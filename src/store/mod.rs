//! Persistence capabilities consumed by the core. Each trait is implemented
//! twice: by `PostgresStore` (production) and by `InMemoryStore` (tests and
//! database-free local runs).
//!
//! Every method that changes state as part of a race (token consumption,
//! publishing claims) is a *conditional* update returning whether a row was
//! changed; callers treat `false` as "someone else got there first".

mod memory;
mod postgres;

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
use secrecy::Secret;
use uuid::Uuid;

use crate::domain::Editor;
use crate::domain::Newsletter;
use crate::domain::Page;
use crate::domain::Post;
use crate::domain::Subscriber;
use crate::domain::SubscriberEmail;
use crate::utils::error_chain_fmt;

#[derive(thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated, e.g. a second row for the same
    /// (email, newsletter) pair
    #[error("Row already exists")]
    Conflict,
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl Debug for StoreError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn find_by_email_and_newsletter(
        &self,
        email: &SubscriberEmail,
        newsletter_id: Uuid,
    ) -> Result<Option<Subscriber>, StoreError>;

    /// Fails with `StoreError::Conflict` if a row for the same (email,
    /// newsletter) pair already exists.
    async fn create(
        &self,
        subscriber: &Subscriber,
    ) -> Result<(), StoreError>;

    async fn find_by_confirmation_token(
        &self,
        token: &str,
    ) -> Result<Option<Subscriber>, StoreError>;

    async fn find_by_unsubscribe_token(
        &self,
        token: &str,
    ) -> Result<Option<Subscriber>, StoreError>;

    /// Replace the confirmation token of a row that is still pending.
    async fn reissue_confirmation_token(
        &self,
        id: Uuid,
        token: &str,
        expiry: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Pending -> active, consuming `confirmation_token`. Only matches if the
    /// row is pending, still carries that token, and the token has not
    /// expired at `now`.
    async fn confirm_atomic(
        &self,
        id: Uuid,
        confirmation_token: &str,
        unsubscribe_token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Active -> unsubscribed, matching on the unsubscribe token.
    async fn unsubscribe_atomic(
        &self,
        unsubscribe_token: &str,
    ) -> Result<bool, StoreError>;

    /// Unsubscribed -> active, with a new unsubscribe token and a refreshed
    /// subscription date.
    async fn reactivate(
        &self,
        id: Uuid,
        unsubscribe_token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Returns the requested window and the total number of active rows.
    async fn list_active_by_newsletter(
        &self,
        newsletter_id: Uuid,
        page: Page,
    ) -> Result<(Vec<Subscriber>, u64), StoreError>;

    async fn list_all_active_by_newsletter(
        &self,
        newsletter_id: Uuid,
    ) -> Result<Vec<Subscriber>, StoreError>;
}

#[async_trait]
pub trait NewsletterStore: Send + Sync {
    async fn get_newsletter(
        &self,
        id: Uuid,
    ) -> Result<Option<Newsletter>, StoreError>;
}

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn get_post(
        &self,
        id: Uuid,
    ) -> Result<Option<Post>, StoreError>;

    /// Grants the right to fan out. Succeeds only for a draft that nobody
    /// has claimed yet.
    async fn claim_for_publishing(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Undo a claim on a post that is still a draft and whose fan-out has
    /// not finished.
    async fn release_publishing_claim(
        &self,
        id: Uuid,
    ) -> Result<(), StoreError>;

    /// Record that the fan-out for a claimed draft has finished. Returns
    /// `false` if the post is not claimed, or already delivered or published.
    async fn mark_delivered(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Set `published_at` on a delivered post unless it is already set. A
    /// post whose fan-out is still running is never matched.
    async fn mark_published_conditional(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait EditorStore: Send + Sync {
    async fn find_editor_by_auth_id(
        &self,
        auth_id: &str,
    ) -> Result<Option<Editor>, StoreError>;

    /// Returns the editor's auth id and PHC password hash.
    async fn get_stored_credentials(
        &self,
        username: &str,
    ) -> Result<Option<(String, Secret<String>)>, StoreError>;
}
