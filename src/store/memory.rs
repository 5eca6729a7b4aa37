use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use secrecy::Secret;
use uuid::Uuid;

use super::EditorStore;
use super::NewsletterStore;
use super::PostStore;
use super::StoreError;
use super::SubscriberStore;
use crate::domain::Editor;
use crate::domain::Newsletter;
use crate::domain::Page;
use crate::domain::Post;
use crate::domain::Subscriber;
use crate::domain::SubscriberEmail;
use crate::domain::SubscriberStatus;

struct PostRecord {
    post: Post,
    publishing_claimed_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
}

struct EditorRecord {
    editor: Editor,
    password_hash: Secret<String>,
}

#[derive(Default)]
struct State {
    subscribers: HashMap<Uuid, Subscriber>,
    newsletters: HashMap<Uuid, Newsletter>,
    posts: HashMap<Uuid, PostRecord>,
    /// keyed by `auth_id`
    editors: HashMap<String, EditorRecord>,
}

/// All four stores behind a single lock. Every trait method takes the lock
/// once, so each conditional update is atomic in the same way a single
/// `UPDATE ... WHERE` is in Postgres.
///
/// The lock is never held across an `.await`.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self { Self::default() }

    // a panic while holding the lock leaves the maps consistent (every
    // mutation is a single insert/assignment), so poisoning is ignored
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_editor(
        &self,
        editor: Editor,
        password_hash: Secret<String>,
    ) {
        self.state().editors.insert(
            editor.auth_id.clone(),
            EditorRecord {
                editor,
                password_hash,
            },
        );
    }

    pub fn add_newsletter(
        &self,
        newsletter: Newsletter,
    ) {
        self.state().newsletters.insert(newsletter.id, newsletter);
    }

    pub fn add_post(
        &self,
        post: Post,
    ) {
        self.state().posts.insert(
            post.id,
            PostRecord {
                post,
                publishing_claimed_at: None,
                delivered_at: None,
            },
        );
    }

    /// Snapshot of every subscriber row, in no particular order
    pub fn subscribers(&self) -> Vec<Subscriber> {
        self.state().subscribers.values().cloned().collect()
    }

    pub fn post(
        &self,
        id: Uuid,
    ) -> Option<Post> {
        self.state().posts.get(&id).map(|r| r.post.clone())
    }
}

fn active_in(
    state: &State,
    newsletter_id: Uuid,
) -> Vec<Subscriber> {
    let mut active: Vec<Subscriber> = state
        .subscribers
        .values()
        .filter(|s| s.newsletter_id == newsletter_id && s.status == SubscriberStatus::Active)
        .cloned()
        .collect();
    active.sort_by(|a, b| {
        a.subscription_date
            .cmp(&b.subscription_date)
            .then(a.id.cmp(&b.id))
    });
    active
}

#[async_trait]
impl SubscriberStore for InMemoryStore {
    async fn find_by_email_and_newsletter(
        &self,
        email: &SubscriberEmail,
        newsletter_id: Uuid,
    ) -> Result<Option<Subscriber>, StoreError> {
        Ok(self
            .state()
            .subscribers
            .values()
            .find(|s| &s.email == email && s.newsletter_id == newsletter_id)
            .cloned())
    }

    async fn create(
        &self,
        subscriber: &Subscriber,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        let exists = state.subscribers.values().any(|s| {
            s.id == subscriber.id
                || (s.email == subscriber.email && s.newsletter_id == subscriber.newsletter_id)
        });
        if exists {
            return Err(StoreError::Conflict);
        }
        state.subscribers.insert(subscriber.id, subscriber.clone());
        Ok(())
    }

    async fn find_by_confirmation_token(
        &self,
        token: &str,
    ) -> Result<Option<Subscriber>, StoreError> {
        Ok(self
            .state()
            .subscribers
            .values()
            .find(|s| s.confirmation_token.as_deref() == Some(token))
            .cloned())
    }

    async fn find_by_unsubscribe_token(
        &self,
        token: &str,
    ) -> Result<Option<Subscriber>, StoreError> {
        Ok(self
            .state()
            .subscribers
            .values()
            .find(|s| s.unsubscribe_token.as_deref() == Some(token))
            .cloned())
    }

    async fn reissue_confirmation_token(
        &self,
        id: Uuid,
        token: &str,
        expiry: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state.subscribers.get_mut(&id) {
            Some(s) if s.status == SubscriberStatus::PendingConfirmation => {
                s.confirmation_token = Some(token.to_string());
                s.token_expiry = Some(expiry);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn confirm_atomic(
        &self,
        id: Uuid,
        confirmation_token: &str,
        unsubscribe_token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state.subscribers.get_mut(&id) {
            Some(s)
                if s.status == SubscriberStatus::PendingConfirmation
                    && s.confirmation_token.as_deref() == Some(confirmation_token)
                    && !s.confirmation_expired(now) =>
            {
                s.status = SubscriberStatus::Active;
                s.confirmed_at = Some(now);
                s.confirmation_token = None;
                s.token_expiry = None;
                s.unsubscribe_token = Some(unsubscribe_token.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn unsubscribe_atomic(
        &self,
        unsubscribe_token: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        let row = state.subscribers.values_mut().find(|s| {
            s.status == SubscriberStatus::Active
                && s.unsubscribe_token.as_deref() == Some(unsubscribe_token)
        });
        match row {
            Some(s) => {
                s.status = SubscriberStatus::Unsubscribed;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reactivate(
        &self,
        id: Uuid,
        unsubscribe_token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state.subscribers.get_mut(&id) {
            Some(s) if s.status == SubscriberStatus::Unsubscribed => {
                s.status = SubscriberStatus::Active;
                s.unsubscribe_token = Some(unsubscribe_token.to_string());
                s.subscription_date = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_active_by_newsletter(
        &self,
        newsletter_id: Uuid,
        page: Page,
    ) -> Result<(Vec<Subscriber>, u64), StoreError> {
        let active = active_in(&self.state(), newsletter_id);
        let total = active.len() as u64;
        let window = active
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect();
        Ok((window, total))
    }

    async fn list_all_active_by_newsletter(
        &self,
        newsletter_id: Uuid,
    ) -> Result<Vec<Subscriber>, StoreError> {
        Ok(active_in(&self.state(), newsletter_id))
    }
}

#[async_trait]
impl NewsletterStore for InMemoryStore {
    async fn get_newsletter(
        &self,
        id: Uuid,
    ) -> Result<Option<Newsletter>, StoreError> {
        Ok(self.state().newsletters.get(&id).cloned())
    }
}

#[async_trait]
impl PostStore for InMemoryStore {
    async fn get_post(
        &self,
        id: Uuid,
    ) -> Result<Option<Post>, StoreError> {
        Ok(self.post(id))
    }

    async fn claim_for_publishing(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state.posts.get_mut(&id) {
            Some(r) if r.post.published_at.is_none() && r.publishing_claimed_at.is_none() => {
                r.publishing_claimed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_publishing_claim(
        &self,
        id: Uuid,
    ) -> Result<(), StoreError> {
        if let Some(r) = self.state().posts.get_mut(&id) {
            if r.post.published_at.is_none() && r.delivered_at.is_none() {
                r.publishing_claimed_at = None;
            }
        }
        Ok(())
    }

    async fn mark_delivered(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state.posts.get_mut(&id) {
            Some(r)
                if r.publishing_claimed_at.is_some()
                    && r.delivered_at.is_none()
                    && r.post.published_at.is_none() =>
            {
                r.delivered_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_published_conditional(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state.posts.get_mut(&id) {
            Some(r) if r.delivered_at.is_some() && r.post.published_at.is_none() => {
                r.post.published_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl EditorStore for InMemoryStore {
    async fn find_editor_by_auth_id(
        &self,
        auth_id: &str,
    ) -> Result<Option<Editor>, StoreError> {
        Ok(self.state().editors.get(auth_id).map(|r| r.editor.clone()))
    }

    async fn get_stored_credentials(
        &self,
        username: &str,
    ) -> Result<Option<(String, Secret<String>)>, StoreError> {
        Ok(self
            .state()
            .editors
            .get(username)
            .map(|r| (r.editor.auth_id.clone(), r.password_hash.clone())))
    }
}
