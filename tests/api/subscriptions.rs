use newsletter_publisher::domain::SubscriberStatus;
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::ResponseTemplate;

use crate::helpers::spawn_app;

#[tokio::test]
async fn subscribe_ok() {
    let app = spawn_app().await;

    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&app.email_server)
        .await;

    let resp = app.subscribe("foo@bar.com").await;
    assert_eq!(resp.status().as_u16(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "pending_confirmation");

    let added = app.subscriber("foo@bar.com");
    assert_eq!(added.status, SubscriberStatus::PendingConfirmation);
    assert_eq!(added.newsletter_id, app.newsletter_id);
}

#[tokio::test]
async fn subscribe_sends_a_confirmation_email_with_a_link() {
    let app = spawn_app().await;

    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;

    app.subscribe("foo@bar.com").await;

    let requests = app.email_server.received_requests().await.unwrap();
    let links = app.get_links(&requests[0]);
    assert_eq!(links.html, links.text);
    assert_eq!(links.text.path(), "/subscriptions/confirm");
}

#[tokio::test]
async fn subscribe_invalid() {
    let app = spawn_app().await;
    let newsletter_id = app.newsletter_id;

    for (body, msg) in [
        (String::new(), "empty body"),
        (format!("newsletter_id={newsletter_id}"), "missing email"),
        ("email=foo%40bar.com".to_string(), "missing newsletter"),
        (
            "email=foo%40bar.com&newsletter_id=not-a-uuid".to_string(),
            "malformed newsletter",
        ),
        (format!("email=&newsletter_id={newsletter_id}"), "empty email"),
        (
            format!("email=not-an-email&newsletter_id={newsletter_id}"),
            "invalid email",
        ),
    ] {
        let resp = app.post_subscriptions(body).await;
        assert_eq!(resp.status().as_u16(), 400, "{msg}");
    }
    assert!(app.store.subscribers().is_empty());
}

#[tokio::test]
async fn subscribe_to_unknown_newsletter() {
    let app = spawn_app().await;

    let body = format!("email=foo%40bar.com&newsletter_id={}", Uuid::new_v4());
    let resp = app.post_subscriptions(body).await;
    assert_eq!(resp.status().as_u16(), 404);
}

#[tokio::test]
async fn subscribing_twice_before_confirming_keeps_one_row() {
    let app = spawn_app().await;

    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&app.email_server)
        .await;

    assert_eq!(app.subscribe("foo@bar.com").await.status().as_u16(), 200);
    assert_eq!(app.subscribe("FOO@bar.com").await.status().as_u16(), 200);

    assert_eq!(app.store.subscribers().len(), 1);
    let requests = app.email_server.received_requests().await.unwrap();
    assert_eq!(
        app.get_links(&requests[0]).text,
        app.get_links(&requests[1]).text
    );
}

#[tokio::test]
async fn subscribing_while_active_is_a_conflict() {
    let app = spawn_app().await;
    app.create_confirmed_subscriber("foo@bar.com").await;

    Mock::given(path("/email"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&app.email_server)
        .await;

    assert_eq!(app.subscribe("foo@bar.com").await.status().as_u16(), 409);
}

/// A failed confirmation email is logged, the subscription still stands
#[tokio::test]
async fn subscribe_succeeds_when_email_api_fails() {
    let app = spawn_app().await;

    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&app.email_server)
        .await;

    assert_eq!(app.subscribe("foo@bar.com").await.status().as_u16(), 200);
    assert_eq!(
        app.subscriber("foo@bar.com").status,
        SubscriberStatus::PendingConfirmation
    );
}
