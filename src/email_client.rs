use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Serialize;

use crate::domain::SubscriberEmail;

/// Outbound email capability. Only `send_email` talks to a transport; the
/// other methods compose the (deliberately plain) bodies for each kind of
/// message and delegate to it.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_email(
        &self,
        recipient: &SubscriberEmail,
        subject: &str,
        html_content: &str,
        text_content: &str,
    ) -> Result<(), anyhow::Error>;

    async fn send_confirmation(
        &self,
        recipient: &SubscriberEmail,
        confirmation_link: &str,
    ) -> Result<(), anyhow::Error> {
        let html = format!(
            "Welcome to our newsletter!<br />\
            Click <a href=\"{confirmation_link}\">here</a> to confirm your subscription."
        );
        let text = format!(
            "Welcome to our newsletter!\nVisit {confirmation_link} to confirm your subscription."
        );
        self.send_email(recipient, "Welcome!", &html, &text).await
    }

    async fn send_welcome_back(
        &self,
        recipient: &SubscriberEmail,
        unsubscribe_link: &str,
    ) -> Result<(), anyhow::Error> {
        let html = format!(
            "Welcome back! You are subscribed again.<br />\
            <a href=\"{unsubscribe_link}\">Unsubscribe</a>"
        );
        let text = format!(
            "Welcome back! You are subscribed again.\nUnsubscribe: {unsubscribe_link}"
        );
        self.send_email(recipient, "Welcome back!", &html, &text)
            .await
    }

    async fn send_issue(
        &self,
        recipient: &SubscriberEmail,
        subject: &str,
        body: &str,
        unsubscribe_link: &str,
    ) -> Result<(), anyhow::Error> {
        let html = format!("{body}<hr /><a href=\"{unsubscribe_link}\">Unsubscribe</a>");
        let text = format!("{body}\n\n--\nUnsubscribe: {unsubscribe_link}");
        self.send_email(recipient, subject, &html, &text).await
    }
}

/// Client for a Postmark-style HTTP email API.
///
/// Establishing a HTTP connection is expensive, so a single `EmailClient` (and
/// its inner connection pool) is built at startup and shared.
pub struct EmailClient {
    http_client: Client,
    base_url: String,
    sender: SubscriberEmail,
    authorization_token: Secret<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html_body: &'a str,
    text_body: &'a str,
}

impl EmailClient {
    pub fn new(
        base_url: String,
        sender: SubscriberEmail,
        authorization_token: Secret<String>,
        timeout: Duration,
    ) -> Result<Self, anyhow::Error> {
        // without a timeout, a hanging email API would hold a fan-out slot
        // forever
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url,
            sender,
            authorization_token,
        })
    }
}

#[async_trait]
impl Mailer for EmailClient {
    #[tracing::instrument(
        name = "Sending email",
        skip_all,
        fields(recipient = %recipient, subject = %subject)
    )]
    async fn send_email(
        &self,
        recipient: &SubscriberEmail,
        subject: &str,
        html_content: &str,
        text_content: &str,
    ) -> Result<(), anyhow::Error> {
        let url = format!("{}/email", self.base_url);
        let body = SendEmailRequest {
            from: self.sender.as_ref(),
            to: recipient.as_ref(),
            subject,
            html_body: html_content,
            text_body: text_content,
        };
        self.http_client
            .post(&url)
            .header(
                "X-Postmark-Server-Token",
                self.authorization_token.expose_secret(),
            )
            .json(&body)
            .send()
            .await?
            // 4xx/5xx from the API are errors too
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
pub use mock::RecordingMailer;
