use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of every issued token. 32 alphanumeric chars ~ 190 bits, so a
/// collision is not something we need to plan for.
const TOKEN_LENGTH: usize = 32;

/// Confirmation links are valid for a day. Unsubscribe tokens never expire.
pub const CONFIRMATION_WINDOW_HOURS: i64 = 24;

/// Issues the opaque tokens embedded in confirmation and unsubscribe links.
#[derive(Debug, Clone, Copy)]
pub struct TokenIssuer {
    confirmation_window: Duration,
}

impl Default for TokenIssuer {
    fn default() -> Self { Self::new(Duration::hours(CONFIRMATION_WINDOW_HOURS)) }
}

impl TokenIssuer {
    pub fn new(confirmation_window: Duration) -> Self {
        Self {
            confirmation_window,
        }
    }

    /// `thread_rng` is a CSPRNG (ChaCha, reseeded from the OS), so tokens are
    /// unguessable as well as unique.
    pub fn new_token(&self) -> String {
        let mut rng = rand::thread_rng();
        std::iter::repeat_with(|| rng.sample(Alphanumeric))
            .map(char::from)
            .take(TOKEN_LENGTH)
            .collect()
    }

    pub fn expiry_from(
        &self,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        now + self.confirmation_window
    }
}
