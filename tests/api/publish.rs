use std::time::Duration;

use chrono::Utc;
use newsletter_publisher::store::PostStore;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::any;
use wiremock::matchers::body_partial_json;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::ResponseTemplate;

use crate::helpers::spawn_app;

#[tokio::test]
async fn publish_requires_credentials() {
    let app = spawn_app().await;
    let post_id = app.add_post(app.newsletter_id);

    let resp = app
        .api_client
        .post(format!("{}/admin/posts/{post_id}/publish", app.addr))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 401);
    assert_eq!(
        resp.headers()["WWW-Authenticate"],
        r#"Basic realm="publish""#
    );
}

#[tokio::test]
async fn publish_rejects_bad_credentials() {
    let app = spawn_app().await;
    let post_id = app.add_post(app.newsletter_id);

    for (username, password) in [
        (app.editor.username.clone(), Uuid::new_v4().to_string()),
        (Uuid::new_v4().to_string(), app.editor.password.clone()),
    ] {
        let resp = app
            .api_client
            .post(format!("{}/admin/posts/{post_id}/publish", app.addr))
            .basic_auth(username, Some(password))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 401);
    }
    assert!(app.store.post(post_id).unwrap().published_at.is_none());
}

#[tokio::test]
async fn publishing_someone_elses_post_is_forbidden() {
    let app = spawn_app().await;
    let foreign = app.add_foreign_newsletter();
    let post_id = app.add_post(foreign);

    assert_eq!(app.publish(post_id).await.status().as_u16(), 403);
    assert!(app.store.post(post_id).unwrap().published_at.is_none());
}

#[tokio::test]
async fn publishing_unknown_post_is_not_found() {
    let app = spawn_app().await;
    assert_eq!(app.publish(Uuid::new_v4()).await.status().as_u16(), 404);
}

#[tokio::test]
async fn issues_are_delivered_to_active_subscribers_only() {
    let app = spawn_app().await;
    app.create_confirmed_subscriber("active@bar.com").await;

    // pending: gets a confirmation email, but not the issue
    let guard = Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .named("Confirmation for pending subscriber")
        .expect(1)
        .mount_as_scoped(&app.email_server)
        .await;
    app.subscribe("pending@bar.com").await;
    drop(guard);

    Mock::given(path("/email"))
        .and(method("POST"))
        .and(body_partial_json(json!({ "To": "active@bar.com" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&app.email_server)
        .await;

    let post_id = app.add_post(app.newsletter_id);
    let resp = app.publish(post_id).await;
    assert_eq!(resp.status().as_u16(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "published");
    assert_eq!(body["report"]["recipients"], 1);
    assert_eq!(body["report"]["delivered"], 1);
    assert!(app.store.post(post_id).unwrap().published_at.is_some());

    // every issue links back to the recipient's own unsubscribe token
    let links = app.last_links_to("active@bar.com").await;
    let token = app
        .subscriber("active@bar.com")
        .unsubscribe_token
        .unwrap();
    assert!(links.text.as_str().ends_with(&token));
}

#[tokio::test]
async fn publishing_twice_sends_once() {
    let app = spawn_app().await;
    app.create_confirmed_subscriber("a@bar.com").await;
    app.create_confirmed_subscriber("b@bar.com").await;

    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&app.email_server)
        .await;

    let post_id = app.add_post(app.newsletter_id);
    let first: serde_json::Value = app.publish(post_id).await.json().await.unwrap();
    assert_eq!(first["status"], "published");

    let second = app.publish(post_id).await;
    assert_eq!(second.status().as_u16(), 200);
    let second: serde_json::Value = second.json().await.unwrap();
    assert_eq!(second, json!({ "status": "already_published" }));
}

#[tokio::test]
async fn one_failed_delivery_does_not_stop_the_others() {
    let app = spawn_app().await;
    for email in ["one@bar.com", "two@bar.com", "three@bar.com"] {
        app.create_confirmed_subscriber(email).await;
    }

    // first mounted match wins
    Mock::given(body_partial_json(json!({ "To": "two@bar.com" })))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&app.email_server)
        .await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&app.email_server)
        .await;

    let post_id = app.add_post(app.newsletter_id);
    let resp = app.publish(post_id).await;
    assert_eq!(resp.status().as_u16(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "partial_delivery_failure");
    assert_eq!(
        body["report"],
        json!({ "recipients": 3, "delivered": 2, "failed": 1, "skipped": 0 })
    );
    assert!(app.store.post(post_id).unwrap().published_at.is_some());
}

#[tokio::test]
async fn shutdown_mid_publish_leaves_a_draft() {
    let app = spawn_app().await;
    for email in ["one@bar.com", "two@bar.com", "three@bar.com"] {
        app.create_confirmed_subscriber(email).await;
    }

    Mock::given(path("/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&app.email_server)
        .await;

    let post_id = app.add_post(app.newsletter_id);
    let shutdown = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        app.shutdown.cancel();
    };
    let (resp, ()) = tokio::join!(app.publish(post_id), shutdown);

    assert_eq!(resp.status().as_u16(), 503);
    assert!(app.store.post(post_id).unwrap().published_at.is_none());
    // the claim was given back
    assert!(app
        .store
        .claim_for_publishing(post_id, Utc::now())
        .await
        .unwrap());
}
