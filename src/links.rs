/// Builds the absolute links sent to subscribers. Tokens are percent-encoded,
/// even though the alphabet we issue never needs it.
#[derive(Debug, Clone)]
pub struct Links {
    base_url: String,
}

impl Links {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn confirmation(
        &self,
        token: &str,
    ) -> String {
        format!(
            "{}/subscriptions/confirm?subscription_token={}",
            self.base_url,
            urlencoding::encode(token)
        )
    }

    pub fn unsubscribe(
        &self,
        token: &str,
    ) -> String {
        format!(
            "{}/subscriptions/unsubscribe?subscription_token={}",
            self.base_url,
            urlencoding::encode(token)
        )
    }
}
