pub mod authentication;
pub mod clock;
pub mod configuration;
pub mod domain;
pub mod email_client;
pub mod links;
pub mod ownership;
pub mod publishing;
pub mod routes;
pub mod startup;
pub mod store;
pub mod subscriptions;
pub mod telemetry;
pub mod tokens;
pub mod utils;
