use std::sync::Arc;

use actix_web::http::header::HeaderMap;
use anyhow::Context;
use argon2::password_hash::SaltString;
use argon2::Algorithm;
use argon2::Argon2;
use argon2::Params;
use argon2::PasswordHash;
use argon2::PasswordHasher;
use argon2::PasswordVerifier;
use argon2::Version;
use async_trait::async_trait;
use base64::Engine;
use secrecy::ExposeSecret;
use secrecy::Secret;

use crate::domain::CallerId;
use crate::store::EditorStore;
use crate::telemetry::spawn_blocking_with_tracing;

/// Resolves an inbound request to a stable caller identity. Handlers call this
/// explicitly and pass the `CallerId` on; identity never travels in request
/// extensions.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        headers: &HeaderMap,
    ) -> Result<CallerId, AuthError>;
}

#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: Secret<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials(#[source] anyhow::Error),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

/// Extract credentials from an `Authorization: Basic ...` header (RFC 7617).
pub fn basic_authentication(headers: &HeaderMap) -> Result<Credentials, anyhow::Error> {
    let encoded = headers
        .get("Authorization")
        .context("No Authorization header")?
        .to_str()
        .context("Authorization header was not a valid UTF8 string")?
        .strip_prefix("Basic ")
        .context("Authorization scheme was not 'Basic'")?;

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .context("Failed to decode base64")?;
    let decoded = String::from_utf8(decoded).context("Decoded credentials were not UTF8")?;

    // the password may itself contain ':'
    let (username, password) = decoded
        .split_once(':')
        .context("No password in Basic credentials")?;

    Ok(Credentials {
        username: username.to_string(),
        password: Secret::new(password.to_string()),
    })
}

/// Hash a password into a PHC string, which carries the algorithm, params and
/// salt alongside the hash.
pub fn compute_password_hash(password: Secret<String>) -> Result<Secret<String>, anyhow::Error> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    let hash = Argon2::new(
        Algorithm::Argon2id,
        Version::V0x13,
        Params::new(15000, 2, 1, None).context("Invalid argon2 params")?,
    )
    .hash_password(password.expose_secret().as_bytes(), &salt)
    .context("Failed to hash password")?
    .to_string();
    Ok(Secret::new(hash))
}

/// CPU-bound, and slow on purpose; call through `spawn_blocking_with_tracing`.
#[tracing::instrument(name = "Verifying password hash", skip_all)]
fn verify_password(
    supplied_password: Secret<String>,
    stored_hash: Secret<String>,
) -> Result<(), AuthError> {
    let stored_hash = PasswordHash::new(stored_hash.expose_secret())
        .context("Failed to read stored PHC string")?;
    Argon2::default()
        .verify_password(supplied_password.expose_secret().as_bytes(), &stored_hash)
        .context("Invalid password")
        .map_err(AuthError::InvalidCredentials)
}

/// Checks HTTP basic credentials against the argon2 hashes in `EditorStore`.
/// The caller identity is the editor's username.
pub struct BasicAuthenticator {
    editors: Arc<dyn EditorStore>,
}

impl BasicAuthenticator {
    pub fn new(editors: Arc<dyn EditorStore>) -> Self { Self { editors } }

    #[tracing::instrument(name = "Validating credentials", skip_all)]
    async fn validate_credentials(
        &self,
        creds: Credentials,
    ) -> Result<CallerId, AuthError> {
        let stored = self
            .editors
            .get_stored_credentials(&creds.username)
            .await
            .context("Failed to fetch stored credentials")?;

        // An unknown username still pays for a full verification, against a
        // hash with the same params, so response times do not reveal which
        // usernames exist.
        let (auth_id, stored_hash) = match stored {
            Some((auth_id, hash)) => (Some(auth_id), hash),
            None => (
                None,
                Secret::new(
                    "$argon2id$v=19$m=15000,t=2,p=1\
                    $gZiV/M1gPc22ElAH/Jh1Hw\
                    $CWOrkoo7oJBQ/iyh7uJ0LO2aLEfrHwTWllSAxT0zRno"
                        .to_string(),
                ),
            ),
        };

        spawn_blocking_with_tracing(move || verify_password(creds.password, stored_hash))
            .await
            .context("Failed to spawn blocking task")??;

        auth_id
            .map(CallerId::new)
            .ok_or_else(|| AuthError::InvalidCredentials(anyhow::anyhow!("Unknown username")))
    }
}

#[async_trait]
impl Authenticator for BasicAuthenticator {
    #[tracing::instrument(
        name = "Authenticating caller",
        skip_all,
        fields(username = tracing::field::Empty)
    )]
    async fn authenticate(
        &self,
        headers: &HeaderMap,
    ) -> Result<CallerId, AuthError> {
        let creds = basic_authentication(headers).map_err(AuthError::InvalidCredentials)?;
        tracing::Span::current().record("username", tracing::field::display(&creds.username));
        self.validate_credentials(creds).await
    }
}
