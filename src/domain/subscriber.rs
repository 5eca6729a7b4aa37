use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::SubscriberEmail;

/// Lifecycle of a subscription:
///
/// ```text
/// PendingConfirmation --confirm--> Active --unsubscribe--> Unsubscribed
///                                    ^                          |
///                                    +-------resubscribe--------+
/// ```
///
/// There is no edge from `PendingConfirmation` to `Unsubscribed`; a pending
/// row that is never confirmed just stays pending (and becomes inert once its
/// token expires).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberStatus {
    PendingConfirmation,
    Active,
    Unsubscribed,
}

impl SubscriberStatus {
    pub fn parse(status: &str) -> Result<Self, String> {
        match status {
            "pending_confirmation" => Ok(Self::PendingConfirmation),
            "active" => Ok(Self::Active),
            "unsubscribed" => Ok(Self::Unsubscribed),
            s => Err(format!("Invalid subscriber status: {s:?}")),
        }
    }
}

impl AsRef<str> for SubscriberStatus {
    fn as_ref(&self) -> &str {
        match self {
            Self::PendingConfirmation => "pending_confirmation",
            Self::Active => "active",
            Self::Unsubscribed => "unsubscribed",
        }
    }
}

/// One row per (email, newsletter). Rows are never deleted by this crate.
#[derive(Debug, Clone, Serialize)]
pub struct Subscriber {
    pub id: Uuid,
    #[serde(serialize_with = "serialize_email")]
    pub email: SubscriberEmail,
    pub newsletter_id: Uuid,
    pub status: SubscriberStatus,
    /// Only set while `PendingConfirmation`
    #[serde(skip_serializing)]
    pub confirmation_token: Option<String>,
    /// Only meaningful while `confirmation_token` is set
    #[serde(skip_serializing)]
    pub token_expiry: Option<DateTime<Utc>>,
    /// Set once the subscription has been active; reissued on resubscription
    #[serde(skip_serializing)]
    pub unsubscribe_token: Option<String>,
    pub subscription_date: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

fn serialize_email<S>(
    email: &SubscriberEmail,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(email.as_ref())
}

impl Subscriber {
    /// A fresh, unconfirmed subscription
    pub fn pending(
        email: SubscriberEmail,
        newsletter_id: Uuid,
        confirmation_token: String,
        token_expiry: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            newsletter_id,
            status: SubscriberStatus::PendingConfirmation,
            confirmation_token: Some(confirmation_token),
            token_expiry: Some(token_expiry),
            unsubscribe_token: None,
            subscription_date: now,
            confirmed_at: None,
        }
    }

    /// A token without an expiry is treated as expired.
    pub fn confirmation_expired(
        &self,
        now: DateTime<Utc>,
    ) -> bool {
        self.token_expiry.map_or(true, |expiry| now > expiry)
    }
}
