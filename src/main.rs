use std::fmt::Debug;
use std::fmt::Display;

use newsletter_publisher::configuration::get_configuration;
use newsletter_publisher::startup::Application;
use newsletter_publisher::telemetry::get_subscriber;
use newsletter_publisher::telemetry::init_subscriber;
use tokio::task::JoinError;

fn report_exit(
    name: &str,
    outcome: Result<Result<(), impl Debug + Display>, JoinError>,
) {
    match outcome {
        Ok(Ok(())) => {
            tracing::info!("{name} exited gracefully")
        }

        Ok(Err(e)) => {
            tracing::error!(
                error.cause_chain=?e,
                error.message=%e,
                "{name} failed (inner)"
            )
        }

        Err(e) => {
            tracing::error!(
                error.cause_chain=?e,
                error.message=%e,
                "{name} failed (outer)"
            )
        }
    }
}

/// Initialise telemetry, load config, and start the server
#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let subscriber = get_subscriber("newsletter-publisher", "info", std::io::stdout);
    init_subscriber(subscriber);

    let cfg = get_configuration()?;
    let server = Application::build(cfg).await?.run_until_stopped();

    // spawned so that a panic in the server is reported rather than unwinding
    // through main
    let server_thread = tokio::spawn(server);
    report_exit("API", server_thread.await);

    Ok(())
}
