use std::net::TcpListener;
use std::sync::Arc;

use actix_web::dev::Server;
use actix_web::web;
use actix_web::App;
use actix_web::HttpServer;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_actix_web::TracingLogger;

use crate::authentication::Authenticator;
use crate::authentication::BasicAuthenticator;
use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::configuration::DatabaseSettings;
use crate::configuration::Settings;
use crate::configuration::StorageBackend;
use crate::email_client::Mailer;
use crate::links::Links;
use crate::ownership::OwnershipGuard;
use crate::publishing::cancellation;
use crate::publishing::CancelHandle;
use crate::publishing::Cancellation;
use crate::publishing::PublishingOrchestrator;
use crate::routes::confirm;
use crate::routes::health_check;
use crate::routes::list_subscribers;
use crate::routes::publish_post;
use crate::routes::subscribe;
use crate::routes::unsubscribe;
use crate::store::EditorStore;
use crate::store::InMemoryStore;
use crate::store::NewsletterStore;
use crate::store::PostStore;
use crate::store::PostgresStore;
use crate::store::SubscriberStore;
use crate::subscriptions::SubscriptionStateMachine;
use crate::tokens::TokenIssuer;

/// One handle per store capability. Both backends implement all four, so each
/// field usually points at the same object.
#[derive(Clone)]
pub struct Stores {
    pub subscribers: Arc<dyn SubscriberStore>,
    pub newsletters: Arc<dyn NewsletterStore>,
    pub posts: Arc<dyn PostStore>,
    pub editors: Arc<dyn EditorStore>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        let store = Arc::new(PostgresStore::new(pool));
        Self {
            subscribers: store.clone(),
            newsletters: store.clone(),
            posts: store.clone(),
            editors: store,
        }
    }

    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            subscribers: store.clone(),
            newsletters: store.clone(),
            posts: store.clone(),
            editors: store,
        }
    }
}

/// Wrapper for actix's `Server` with access to the bound port. Not to be
/// confused with actix's `App`!
pub struct Application {
    /// Left private; use `get_port` to access
    port: u16,
    server: Server,
    /// Cancels every publish in flight
    shutdown: CancelHandle,
}

impl Application {
    /// Picks the store backend from `cfg.storage`.
    pub async fn build(cfg: Settings) -> Result<Self, anyhow::Error> {
        let stores = match cfg.storage {
            StorageBackend::Postgres => Stores::postgres(get_connection_pool(&cfg.database)),
            StorageBackend::InMemory => {
                tracing::warn!("Using in-memory storage; nothing survives a restart");
                Stores::in_memory(Arc::new(InMemoryStore::new()))
            }
        };
        Self::build_with(cfg, stores).await
    }

    /// Tests use this to keep a handle on the stores they seed.
    pub async fn build_with(
        cfg: Settings,
        stores: Stores,
    ) -> Result<Self, anyhow::Error> {
        // port 0 gets a random port from the OS, which is what `get_port` is
        // for
        let addr = format!("{}:{}", cfg.application.host, cfg.application.port);
        let listener = TcpListener::bind(addr)?;
        let port = listener.local_addr()?.port();

        let mailer: Arc<dyn Mailer> = Arc::new(cfg.email_client.client()?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let links = Links::new(cfg.application.base_url);

        let subscriptions = Arc::new(SubscriptionStateMachine::new(
            stores.subscribers.clone(),
            stores.newsletters.clone(),
            mailer.clone(),
            TokenIssuer::default(),
            links.clone(),
            clock.clone(),
        ));
        let guard = || {
            OwnershipGuard::new(
                stores.editors.clone(),
                stores.newsletters.clone(),
                stores.posts.clone(),
            )
        };
        let orchestrator = PublishingOrchestrator::new(
            guard(),
            subscriptions.clone(),
            stores.posts.clone(),
            mailer,
            links,
            clock,
            cfg.publishing.max_concurrent_deliveries,
        );
        let authenticator: Arc<dyn Authenticator> =
            Arc::new(BasicAuthenticator::new(stores.editors.clone()));
        let (shutdown, publishing) = cancellation();

        let server = run(
            listener,
            subscriptions,
            guard(),
            orchestrator,
            authenticator,
            publishing,
        )?;

        Ok(Self {
            port,
            server,
            shutdown,
        })
    }

    pub fn get_port(&self) -> u16 { self.port }

    /// The handle that `run_until_stopped` fires on Ctrl-C / SIGTERM. Must be
    /// taken before the app is run.
    pub fn shutdown_handle(&self) -> CancelHandle { self.shutdown.clone() }

    /// Because this consumes `self`, this should be the final function call (or
    /// passed to `tokio::spawn`)
    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        // actix stops accepting on the same signals and then waits for the
        // handlers in flight; cancelling lets publishes among them release
        // their claims instead of holding them forever
        let shutdown = self.shutdown;
        let on_signal = tokio::spawn(async move {
            match shutdown_signal().await {
                Ok(()) => {
                    tracing::info!("Shutdown requested, cancelling publishes in flight");
                    shutdown.cancel();
                }
                Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signals"),
            }
        });
        let result = self.server.await;
        on_signal.abort();
        result
    }
}

/// Resolves on Ctrl-C or SIGTERM
#[cfg(unix)]
async fn shutdown_signal() -> Result<(), std::io::Error> {
    use tokio::signal::unix::signal;
    use tokio::signal::unix::SignalKind;

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r,
        _ = sigterm.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<(), std::io::Error> { tokio::signal::ctrl_c().await }

/// Connects lazily, so that db-free requests (e.g. `health_check`) work
/// before the db is up.
pub fn get_connection_pool(db_cfg: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new().connect_lazy_with(db_cfg.connection())
}

/// The server is not responsible for binding to an address, it only listens to
/// an already bound address.
///
/// Declares all API endpoints.
fn run(
    listener: TcpListener,
    subscriptions: Arc<SubscriptionStateMachine>,
    guard: OwnershipGuard,
    orchestrator: PublishingOrchestrator,
    authenticator: Arc<dyn Authenticator>,
    publishing: Cancellation,
) -> Result<Server, anyhow::Error> {
    // `Data` is an `Arc`; every worker gets a clone of the same handles
    let subscriptions = web::Data::from(subscriptions);
    let guard = web::Data::new(guard);
    let orchestrator = web::Data::new(orchestrator);
    let authenticator: web::Data<dyn Authenticator> = web::Data::from(authenticator);
    let publishing = web::Data::new(publishing);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .route("/health_check", web::get().to(health_check))
            .route("/subscriptions", web::post().to(subscribe))
            .route("/subscriptions/confirm", web::get().to(confirm))
            .route("/subscriptions/unsubscribe", web::get().to(unsubscribe))
            .service(
                web::scope("/admin")
                    .route(
                        "/newsletters/{newsletter_id}/subscribers",
                        web::get().to(list_subscribers),
                    )
                    .route("/posts/{post_id}/publish", web::post().to(publish_post)),
            )
            .app_data(subscriptions.clone())
            .app_data(guard.clone())
            .app_data(orchestrator.clone())
            .app_data(authenticator.clone())
            .app_data(publishing.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}
