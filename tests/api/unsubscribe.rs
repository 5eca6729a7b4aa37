use newsletter_publisher::domain::SubscriberStatus;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::ResponseTemplate;

use crate::helpers::spawn_app;

#[tokio::test]
async fn unknown_token_is_rejected() {
    let app = spawn_app().await;
    assert_eq!(app.get_unsubscribe("nope").await.status().as_u16(), 401);
}

#[tokio::test]
async fn missing_token_is_rejected() {
    let app = spawn_app().await;
    let resp = reqwest::get(format!("{}/subscriptions/unsubscribe", app.addr))
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}

#[tokio::test]
async fn unsubscribing_twice_succeeds_twice() {
    let app = spawn_app().await;
    let subscriber = app.create_confirmed_subscriber("foo@bar.com").await;
    let token = subscriber.unsubscribe_token.unwrap();

    assert_eq!(app.get_unsubscribe(&token).await.status().as_u16(), 200);
    assert_eq!(app.get_unsubscribe(&token).await.status().as_u16(), 200);
    assert_eq!(
        app.subscriber("foo@bar.com").status,
        SubscriberStatus::Unsubscribed
    );
}

#[tokio::test]
async fn resubscribing_reactivates_without_confirmation() {
    let app = spawn_app().await;
    let subscriber = app.create_confirmed_subscriber("foo@bar.com").await;
    let old_token = subscriber.unsubscribe_token.unwrap();
    app.get_unsubscribe(&old_token)
        .await
        .error_for_status()
        .unwrap();

    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;

    let resp = app.subscribe("foo@bar.com").await;
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "active");

    let reactivated = app.subscriber("foo@bar.com");
    assert_eq!(reactivated.status, SubscriberStatus::Active);
    assert_eq!(app.store.subscribers().len(), 1);

    // the welcome back email carries the new unsubscribe link
    let links = app.last_links_to("foo@bar.com").await;
    assert_eq!(links.text.path(), "/subscriptions/unsubscribe");
    let new_token = reactivated.unsubscribe_token.unwrap();
    assert_ne!(new_token, old_token);
    assert!(links.text.as_str().ends_with(&new_token));

    assert_eq!(app.get_unsubscribe(&old_token).await.status().as_u16(), 401);
    assert_eq!(app.get_unsubscribe(&new_token).await.status().as_u16(), 200);
}
