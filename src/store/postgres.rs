use anyhow::Context;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use secrecy::Secret;
use sqlx::PgPool;
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

// `sqlx::query!` would check these at compile time, but that requires either a
// running db or a `.sqlx` directory; the unchecked variants keep the build
// self-contained. the schema lives in `migrations/`.

/// All four stores, backed by a single Postgres pool.
///
/// `PgPool` is used over `PgConnection` as the former has a `Mutex` 'built-in'
/// and is cheap to clone.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

const SUBSCRIBER_COLUMNS: &str = "id, email, newsletter_id, status, confirmation_token, \
                                  token_expiry, unsubscribe_token, subscription_date, confirmed_at";

#[derive(sqlx::FromRow)]
struct SubscriberRow {
    id: Uuid,
    email: String,
    newsletter_id: Uuid,
    status: String,
    confirmation_token: Option<String>,
    token_expiry: Option<DateTime<Utc>>,
    unsubscribe_token: Option<String>,
    subscription_date: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
}

// although emails were parsed when they were added to the db, we cannot assume
// that they are (still) valid when retrieved, so the conversion is fallible
impl TryFrom<SubscriberRow> for Subscriber {
    type Error = anyhow::Error;
    fn try_from(row: SubscriberRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            email: SubscriberEmail::parse(row.email).map_err(anyhow::Error::msg)?,
            newsletter_id: row.newsletter_id,
            status: SubscriberStatus::parse(&row.status).map_err(anyhow::Error::msg)?,
            confirmation_token: row.confirmation_token,
            token_expiry: row.token_expiry,
            unsubscribe_token: row.unsubscribe_token,
            subscription_date: row.subscription_date,
            confirmed_at: row.confirmed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PostRow {
    id: Uuid,
    newsletter_id: Uuid,
    title: String,
    content: String,
    published_at: Option<DateTime<Utc>>,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Self {
            id: row.id,
            newsletter_id: row.newsletter_id,
            title: row.title,
            content: row.content,
            published_at: row.published_at,
        }
    }
}

impl PostgresStore {
    async fn find_subscriber_where(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<Subscriber>, StoreError> {
        let row = sqlx::query_as::<_, SubscriberRow>(&format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscriptions WHERE {column} = $1"
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to look up subscriber by {column}"))?;
        Ok(row.map(Subscriber::try_from).transpose()?)
    }
}

#[async_trait]
impl SubscriberStore for PostgresStore {
    #[tracing::instrument(name = "Looking up subscriber by email", skip(self))]
    async fn find_by_email_and_newsletter(
        &self,
        email: &SubscriberEmail,
        newsletter_id: Uuid,
    ) -> Result<Option<Subscriber>, StoreError> {
        let row = sqlx::query_as::<_, SubscriberRow>(&format!(
            "SELECT {SUBSCRIBER_COLUMNS} FROM subscriptions WHERE email = $1 AND newsletter_id = $2"
        ))
        .bind(email.as_ref())
        .bind(newsletter_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up subscriber by email")?;
        Ok(row.map(Subscriber::try_from).transpose()?)
    }

    #[tracing::instrument(name = "INSERTing new subscriber into db", skip(self, subscriber))]
    async fn create(
        &self,
        subscriber: &Subscriber,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (id, email, newsletter_id, status, confirmation_token,
                 token_expiry, unsubscribe_token, subscription_date, confirmed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(subscriber.id)
        .bind(subscriber.email.as_ref())
        .bind(subscriber.newsletter_id)
        .bind(subscriber.status.as_ref())
        .bind(&subscriber.confirmation_token)
        .bind(subscriber.token_expiry)
        .bind(&subscriber.unsubscribe_token)
        .bind(subscriber.subscription_date)
        .bind(subscriber.confirmed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            // (email, newsletter_id) is UNIQUE; a concurrent subscribe beat us to it
            sqlx::Error::Database(ref db) if db.is_unique_violation() => StoreError::Conflict,
            e => StoreError::UnexpectedError(
                anyhow::Error::new(e).context("Failed to insert subscriber"),
            ),
        })?;
        Ok(())
    }

    async fn find_by_confirmation_token(
        &self,
        token: &str,
    ) -> Result<Option<Subscriber>, StoreError> {
        self.find_subscriber_where("confirmation_token", token)
            .await
    }

    async fn find_by_unsubscribe_token(
        &self,
        token: &str,
    ) -> Result<Option<Subscriber>, StoreError> {
        self.find_subscriber_where("unsubscribe_token", token)
            .await
    }

    async fn reissue_confirmation_token(
        &self,
        id: Uuid,
        token: &str,
        expiry: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET confirmation_token = $2, token_expiry = $3
            WHERE id = $1 AND status = 'pending_confirmation'
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(expiry)
        .execute(&self.pool)
        .await
        .context("Failed to reissue confirmation token")?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(name = "Confirming subscriber in db", skip_all)]
    async fn confirm_atomic(
        &self,
        id: Uuid,
        confirmation_token: &str,
        unsubscribe_token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // matching on the token in the same statement that clears it means two
        // concurrent requests with the same token cannot both succeed
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET
                status = 'active',
                confirmed_at = $4,
                confirmation_token = NULL,
                token_expiry = NULL,
                unsubscribe_token = $3
            WHERE
                id = $1 AND
                confirmation_token = $2 AND
                status = 'pending_confirmation' AND
                token_expiry >= $4
            "#,
        )
        .bind(id)
        .bind(confirmation_token)
        .bind(unsubscribe_token)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to confirm subscriber")?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(name = "Unsubscribing subscriber in db", skip_all)]
    async fn unsubscribe_atomic(
        &self,
        unsubscribe_token: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'unsubscribed'
            WHERE unsubscribe_token = $1 AND status = 'active'
            "#,
        )
        .bind(unsubscribe_token)
        .execute(&self.pool)
        .await
        .context("Failed to unsubscribe subscriber")?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(name = "Reactivating subscriber in db", skip_all)]
    async fn reactivate(
        &self,
        id: Uuid,
        unsubscribe_token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'active', unsubscribe_token = $2, subscription_date = $3
            WHERE id = $1 AND status = 'unsubscribed'
            "#,
        )
        .bind(id)
        .bind(unsubscribe_token)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to reactivate subscriber")?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(name = "Getting page of active subscribers", skip(self))]
    async fn list_active_by_newsletter(
        &self,
        newsletter_id: Uuid,
        page: Page,
    ) -> Result<(Vec<Subscriber>, u64), StoreError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM subscriptions WHERE newsletter_id = $1 AND status = 'active'",
        )
        .bind(newsletter_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count active subscribers")?;

        let rows = sqlx::query_as::<_, SubscriberRow>(&format!(
            r#"
            SELECT {SUBSCRIBER_COLUMNS} FROM subscriptions
            WHERE newsletter_id = $1 AND status = 'active'
            ORDER BY subscription_date, id
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(newsletter_id)
        .bind(i64::from(page.limit()))
        .bind(i64::from(page.offset()))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list active subscribers")?;

        // `total` still counts rows that `parse_rows` drops, so a page may come
        // back shorter than `limit` with more pages after it
        Ok((parse_rows(rows), total.try_into().unwrap_or_default()))
    }

    #[tracing::instrument(name = "Getting list of active subscribers", skip(self))]
    async fn list_all_active_by_newsletter(
        &self,
        newsletter_id: Uuid,
    ) -> Result<Vec<Subscriber>, StoreError> {
        let rows = sqlx::query_as::<_, SubscriberRow>(&format!(
            r#"
            SELECT {SUBSCRIBER_COLUMNS} FROM subscriptions
            WHERE newsletter_id = $1 AND status = 'active'
            ORDER BY subscription_date, id
            "#
        ))
        .bind(newsletter_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list active subscribers")?;
        Ok(parse_rows(rows))
    }
}

/// Both listings skip a row that no longer parses rather than failing as a
/// whole; one bad email must not block delivery to (or listing of) everybody
/// else.
fn parse_rows(rows: Vec<SubscriberRow>) -> Vec<Subscriber> {
    rows.into_iter()
        .filter_map(|row| match Subscriber::try_from(row) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(e.cause_chain=?e, "skipping invalid subscriber row");
                None
            }
        })
        .collect()
}

#[async_trait]
impl NewsletterStore for PostgresStore {
    async fn get_newsletter(
        &self,
        id: Uuid,
    ) -> Result<Option<Newsletter>, StoreError> {
        let row: Option<(Uuid, Uuid, String)> =
            sqlx::query_as("SELECT id, editor_id, name FROM newsletters WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to get newsletter")?;
        Ok(row.map(|(id, editor_id, name)| Newsletter {
            id,
            editor_id,
            name,
        }))
    }
}

#[async_trait]
impl PostStore for PostgresStore {
    async fn get_post(
        &self,
        id: Uuid,
    ) -> Result<Option<Post>, StoreError> {
        let row = sqlx::query_as::<_, PostRow>(
            "SELECT id, newsletter_id, title, content, published_at FROM posts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get post")?;
        Ok(row.map(Post::from))
    }

    #[tracing::instrument(name = "Claiming post for publishing", skip(self))]
    async fn claim_for_publishing(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET publishing_claimed_at = $2
            WHERE
                id = $1 AND
                published_at IS NULL AND
                publishing_claimed_at IS NULL
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to claim post for publishing")?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_publishing_claim(
        &self,
        id: Uuid,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE posts
            SET publishing_claimed_at = NULL
            WHERE id = $1 AND published_at IS NULL AND delivered_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to release publishing claim")?;
        Ok(())
    }

    #[tracing::instrument(name = "Marking post as delivered", skip(self))]
    async fn mark_delivered(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET delivered_at = $2
            WHERE
                id = $1 AND
                publishing_claimed_at IS NOT NULL AND
                delivered_at IS NULL AND
                published_at IS NULL
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to mark post as delivered")?;
        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(name = "Marking post as published", skip(self))]
    async fn mark_published_conditional(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET published_at = $2
            WHERE id = $1 AND delivered_at IS NOT NULL AND published_at IS NULL
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to mark post as published")?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl EditorStore for PostgresStore {
    async fn find_editor_by_auth_id(
        &self,
        auth_id: &str,
    ) -> Result<Option<Editor>, StoreError> {
        let row: Option<(Uuid, String)> =
            sqlx::query_as("SELECT editor_id, username FROM editors WHERE username = $1")
                .bind(auth_id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to query editors")?;
        Ok(row.map(|(id, auth_id)| Editor { id, auth_id }))
    }

    #[tracing::instrument(name = "Getting stored credentials", skip(self))]
    async fn get_stored_credentials(
        &self,
        username: &str,
    ) -> Result<Option<(String, Secret<String>)>, StoreError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT username, password_hash FROM editors WHERE username = $1")
                .bind(username)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to query editors")?;
        Ok(row.map(|(username, hash)| (username, Secret::new(hash))))
    }
}
