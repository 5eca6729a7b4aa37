use std::sync::Arc;

use newsletter_publisher::authentication::compute_password_hash;
use newsletter_publisher::configuration::get_configuration;
use newsletter_publisher::configuration::DatabaseSettings;
use newsletter_publisher::configuration::StorageBackend;
use newsletter_publisher::domain::Editor;
use newsletter_publisher::domain::Newsletter;
use newsletter_publisher::domain::Post;
use newsletter_publisher::domain::Subscriber;
use newsletter_publisher::publishing::CancelHandle;
use newsletter_publisher::startup::Application;
use newsletter_publisher::startup::Stores;
use newsletter_publisher::store::InMemoryStore;
use newsletter_publisher::store::PostgresStore;
use newsletter_publisher::telemetry::get_subscriber;
use newsletter_publisher::telemetry::init_subscriber;
use once_cell::sync::Lazy;
use secrecy::Secret;
use sqlx::Connection;
use sqlx::Executor;
use sqlx::PgConnection;
use sqlx::PgPool;
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;

/// Init the tracing subscriber once for the whole test binary.
///
/// To opt in to verbose logging, use the env var `TEST_LOG`:
///
/// ```sh
///      TEST_LOG=true cargo test [test_name] | bunyan
/// ```
static TRACING: Lazy<()> = Lazy::new(|| {
    // the two sinks are different closure types, hence the two arms
    match std::env::var("TEST_LOG") {
        Ok(_) => {
            let subscriber = get_subscriber("test", "debug", std::io::stdout);
            init_subscriber(subscriber);
        }
        Err(_) => {
            let subscriber = get_subscriber("test", "debug", std::io::sink);
            init_subscriber(subscriber);
        }
    };
});

/// Links found in an email, with the port of the test server filled in
pub struct EmailLinks {
    pub html: reqwest::Url,
    pub text: reqwest::Url,
}

pub struct TestEditor {
    pub username: String,
    pub password: String,
}

impl TestEditor {
    fn generate() -> Self {
        Self {
            username: Uuid::new_v4().to_string(),
            password: Uuid::new_v4().to_string(),
        }
    }

    /// Stored with the same argon2 params as production hashes, so that the
    /// fallback hash for unknown users costs the same
    fn store(
        &self,
        store: &InMemoryStore,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let hash = compute_password_hash(Secret::new(self.password.clone())).unwrap();
        store.add_editor(
            Editor {
                id,
                auth_id: self.username.clone(),
            },
            hash,
        );
        id
    }
}

pub struct TestApp {
    pub addr: String,
    pub port: u16,
    pub store: Arc<InMemoryStore>,
    pub email_server: MockServer,
    pub api_client: reqwest::Client,
    pub editor: TestEditor,
    /// Owned by `editor`
    pub newsletter_id: Uuid,
    /// Fires the same cancellation as a Ctrl-C would
    pub shutdown: CancelHandle,
}

impl TestApp {
    pub async fn post_subscriptions(
        &self,
        body: String,
    ) -> reqwest::Response {
        self.api_client
            .post(format!("{}/subscriptions", self.addr))
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .expect("execute request")
    }

    /// Subscribe `email` to the editor's newsletter
    pub async fn subscribe(
        &self,
        email: &str,
    ) -> reqwest::Response {
        let body = serde_urlencoded::to_string([
            ("email", email.to_string()),
            ("newsletter_id", self.newsletter_id.to_string()),
        ])
        .unwrap();
        self.post_subscriptions(body).await
    }

    pub async fn get_unsubscribe(
        &self,
        token: &str,
    ) -> reqwest::Response {
        self.api_client
            .get(format!("{}/subscriptions/unsubscribe", self.addr))
            .query(&[("subscription_token", token)])
            .send()
            .await
            .expect("execute request")
    }

    /// Extract the link from an email sent to the email API
    pub fn get_links(
        &self,
        email_request: &wiremock::Request,
    ) -> EmailLinks {
        let body: serde_json::Value = serde_json::from_slice(&email_request.body).unwrap();

        let get_link = |s: &str| {
            let links: Vec<_> = linkify::LinkFinder::new()
                .links(s)
                .filter(|l| *l.kind() == linkify::LinkKind::Url)
                .collect();
            assert_eq!(links.len(), 1);
            let mut link = reqwest::Url::parse(links[0].as_str()).unwrap();
            // never send emails that point at the internet
            assert_eq!(link.host_str().unwrap(), "127.0.0.1");
            link.set_port(Some(self.port)).unwrap();
            link
        };

        EmailLinks {
            html: get_link(body["HtmlBody"].as_str().unwrap()),
            text: get_link(body["TextBody"].as_str().unwrap()),
        }
    }

    /// Links from the most recent email sent to `recipient`
    pub async fn last_links_to(
        &self,
        recipient: &str,
    ) -> EmailLinks {
        let requests = self.email_server.received_requests().await.unwrap();
        let last = requests
            .iter()
            .rev()
            .find(|r| {
                let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
                body["To"] == recipient
            })
            .expect("no email was sent to recipient");
        self.get_links(last)
    }

    /// Subscribe and confirm through the public endpoints; returns the
    /// subscriber as stored.
    pub async fn create_confirmed_subscriber(
        &self,
        email: &str,
    ) -> Subscriber {
        let _guard = Mock::given(path("/email"))
            .and(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .named("Create confirmed subscriber")
            .expect(1)
            .mount_as_scoped(&self.email_server)
            .await;

        self.subscribe(email).await.error_for_status().unwrap();
        let links = self.last_links_to(email).await;
        reqwest::get(links.text)
            .await
            .unwrap()
            .error_for_status()
            .unwrap();

        self.subscriber(email)
    }

    pub fn subscriber(
        &self,
        email: &str,
    ) -> Subscriber {
        self.store
            .subscribers()
            .into_iter()
            .find(|s| s.email.as_ref() == email)
            .expect("subscriber not stored")
    }

    /// Adds a draft post to `newsletter_id`
    pub fn add_post(
        &self,
        newsletter_id: Uuid,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.store.add_post(Post {
            id,
            newsletter_id,
            title: "Issue #1".to_string(),
            content: "Plain text content".to_string(),
            published_at: None,
        });
        id
    }

    /// A newsletter owned by a different editor
    pub fn add_foreign_newsletter(&self) -> Uuid {
        let owner = TestEditor::generate().store(&self.store);
        let id = Uuid::new_v4();
        self.store.add_newsletter(Newsletter {
            id,
            editor_id: owner,
            name: "someone else's".to_string(),
        });
        id
    }

    pub async fn publish(
        &self,
        post_id: Uuid,
    ) -> reqwest::Response {
        self.api_client
            .post(format!("{}/admin/posts/{post_id}/publish", self.addr))
            .basic_auth(&self.editor.username, Some(&self.editor.password))
            .send()
            .await
            .expect("execute request")
    }

    pub async fn list_subscribers(
        &self,
        newsletter_id: Uuid,
        query: &str,
    ) -> reqwest::Response {
        self.api_client
            .get(format!(
                "{}/admin/newsletters/{newsletter_id}/subscribers{query}",
                self.addr
            ))
            .basic_auth(&self.editor.username, Some(&self.editor.password))
            .send()
            .await
            .expect("execute request")
    }
}

/// Spawn the application on a random port, backed by in-memory stores and a
/// mock email API. The stores are seeded with one editor and one newsletter
/// they own.
pub async fn spawn_app() -> TestApp {
    Lazy::force(&TRACING);

    let email_server = MockServer::start().await;

    let cfg = {
        let mut cfg = get_configuration().unwrap();
        // port 0 makes the OS pick a free port; `get_port` tells us which
        cfg.application.port = 0;
        cfg.application.base_url = "http://127.0.0.1".to_string();
        cfg.email_client.base_url = email_server.uri();
        cfg.storage = StorageBackend::InMemory;
        cfg
    };

    let store = Arc::new(InMemoryStore::new());
    let editor = TestEditor::generate();
    let editor_id = editor.store(&store);
    let newsletter_id = Uuid::new_v4();
    store.add_newsletter(Newsletter {
        id: newsletter_id,
        editor_id,
        name: "The Test Newsletter".to_string(),
    });

    let app = Application::build_with(cfg, Stores::in_memory(store.clone()))
        .await
        .unwrap();
    let port = app.get_port();
    let addr = format!("http://127.0.0.1:{port}");
    let shutdown = app.shutdown_handle();
    tokio::spawn(app.run_until_stopped());

    TestApp {
        addr,
        port,
        store,
        email_server,
        api_client: reqwest::Client::new(),
        editor,
        newsletter_id,
        shutdown,
    }
}

/// Create a randomised database on the configured Postgres instance and run
/// the migrations against it.
async fn configure_database(cfg: &DatabaseSettings) -> PgPool {
    // connect to the top-level db
    let mut conn = PgConnection::connect_with(&cfg.connection_without_db())
        .await
        .expect("postgres must be running");

    // `Executor` must be in scope for `execute` on a raw string
    conn.execute(format!(r#"CREATE DATABASE "{}";"#, cfg.database_name).as_str())
        .await
        .unwrap();

    // `migrate!` path defaults to "./migrations", relative to the project root
    let pool = PgPool::connect_with(cfg.connection()).await.unwrap();
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("failed to migrate");
    pool
}

/// A `PostgresStore` on a fresh database, plus the pool for seeding the
/// tables that have no store method (editors, newsletters, posts).
pub async fn spawn_postgres_store() -> (PostgresStore, PgPool) {
    Lazy::force(&TRACING);

    let mut cfg = get_configuration().unwrap();
    cfg.database.database_name = Uuid::new_v4().to_string();
    let pool = configure_database(&cfg.database).await;
    (PostgresStore::new(pool.clone()), pool)
}
