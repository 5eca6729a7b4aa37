use crate::helpers::spawn_app;

#[tokio::test]
async fn lists_active_subscribers_in_pages() {
    let app = spawn_app().await;
    for email in ["a@bar.com", "b@bar.com", "c@bar.com"] {
        app.create_confirmed_subscriber(email).await;
    }

    let resp = app
        .list_subscribers(app.newsletter_id, "?limit=2&offset=1")
        .await;
    assert_eq!(resp.status().as_u16(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["total"], 3);
    assert_eq!(body["limit"], 2);
    assert_eq!(body["offset"], 1);
    let emails: Vec<&str> = body["subscribers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["email"].as_str().unwrap())
        .collect();
    assert_eq!(emails, ["b@bar.com", "c@bar.com"]);

    // tokens never leave the server
    assert!(body["subscribers"][0].get("unsubscribe_token").is_none());
}

#[tokio::test]
async fn out_of_range_limit_is_rejected() {
    let app = spawn_app().await;
    for query in ["?limit=0", "?limit=501"] {
        let resp = app.list_subscribers(app.newsletter_id, query).await;
        assert_eq!(resp.status().as_u16(), 400, "{query}");
    }
}

#[tokio::test]
async fn only_the_owner_may_list() {
    let app = spawn_app().await;
    let foreign = app.add_foreign_newsletter();
    assert_eq!(
        app.list_subscribers(foreign, "").await.status().as_u16(),
        403
    );

    let resp = app
        .api_client
        .get(format!(
            "{}/admin/newsletters/{}/subscribers",
            app.addr, app.newsletter_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
}
