use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

/// Not to be confused with `Newsletter`! A post is a single issue of a
/// newsletter.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: Uuid,
    pub newsletter_id: Uuid,
    pub title: String,
    pub content: String,
    /// `None` means draft. Once set, publishing never clears it.
    pub published_at: Option<DateTime<Utc>>,
}
