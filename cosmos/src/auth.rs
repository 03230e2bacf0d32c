//! Request authorization for the Cosmos DB REST API.
//!
//! Two schemes are supported:
//!
//! - **Shared key**: each request is signed with HMAC-SHA256 over the verb,
//!   resource type, resource link and date, using the account key.
//! - **Workload identity**: a federated service-account token is exchanged for
//!   an Entra ID access token, which is cached until shortly before it expires.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use makeline_core::repository::RepositoryError;
use serde::Deserialize;
use sha2::Sha256;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Default Entra ID authority.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com/";

/// Refresh cached tokens this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// How requests to the account are authorized.
pub enum CosmosCredential {
    /// Account key, already base64-decoded.
    SharedKey(Vec<u8>),
    /// Federated workload identity.
    WorkloadIdentity(WorkloadIdentity),
}

impl CosmosCredential {
    /// Build a shared-key credential from the base64 account key.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::AuthenticationError`] if the key is empty or
    /// not valid base64.
    pub fn shared_key(encoded: &str) -> Result<Self, RepositoryError> {
        if encoded.is_empty() {
            return Err(RepositoryError::AuthenticationError(
                "Cosmos DB account key is empty".to_string(),
            ));
        }
        STANDARD.decode(encoded).map(Self::SharedKey).map_err(|e| {
            RepositoryError::AuthenticationError(format!("Cosmos DB account key is not base64: {e}"))
        })
    }

    /// Value of the `authorization` header for one request.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::AuthenticationError`] if a workload identity
    /// token cannot be obtained.
    pub(crate) async fn authorization(
        &self,
        http: &reqwest::Client,
        request: &SignedRequest<'_>,
    ) -> Result<String, RepositoryError> {
        let token = match self {
            Self::SharedKey(key) => {
                format!("type=master&ver=1.0&sig={}", sign(key, request)?)
            },
            Self::WorkloadIdentity(identity) => {
                format!("type=aad&ver=1.0&sig={}", identity.access_token(http).await?)
            },
        };
        Ok(urlencoding::encode(&token).into_owned())
    }
}

impl fmt::Debug for CosmosCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SharedKey(_) => f.write_str("SharedKey(..)"),
            Self::WorkloadIdentity(identity) => f
                .debug_struct("WorkloadIdentity")
                .field("client_id", &identity.client_id)
                .field("tenant_id", &identity.tenant_id)
                .finish_non_exhaustive(),
        }
    }
}

/// The parts of a request covered by a shared-key signature.
pub(crate) struct SignedRequest<'a> {
    pub verb: &'a str,
    pub resource_type: &'a str,
    pub resource_link: &'a str,
    /// RFC 1123 date, also sent as `x-ms-date`.
    pub date: &'a str,
}

fn sign(key: &[u8], request: &SignedRequest<'_>) -> Result<String, RepositoryError> {
    let payload = format!(
        "{}\n{}\n{}\n{}\n\n",
        request.verb.to_lowercase(),
        request.resource_type.to_lowercase(),
        request.resource_link,
        request.date.to_lowercase()
    );

    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| RepositoryError::AuthenticationError(format!("Invalid account key: {e}")))?;
    mac.update(payload.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Entra ID workload identity settings plus a cached access token.
pub struct WorkloadIdentity {
    client_id: String,
    tenant_id: String,
    token_file: PathBuf,
    authority_host: String,
    scope: String,
    cached: RwLock<Option<CachedToken>>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

impl WorkloadIdentity {
    /// Create a workload identity for the account at `endpoint`.
    ///
    /// The token scope is the endpoint's scheme and host, so
    /// `https://acct.documents.azure.com:443/` asks for
    /// `https://acct.documents.azure.com/.default`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::AuthenticationError`] if `endpoint` is not an
    /// absolute URL with a host.
    pub fn new(
        endpoint: &str,
        client_id: impl Into<String>,
        tenant_id: impl Into<String>,
        token_file: impl Into<PathBuf>,
        authority_host: impl Into<String>,
    ) -> Result<Self, RepositoryError> {
        Ok(Self {
            client_id: client_id.into(),
            tenant_id: tenant_id.into(),
            token_file: token_file.into(),
            authority_host: authority_host.into(),
            scope: token_scope(endpoint)?,
            cached: RwLock::new(None),
        })
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host.trim_end_matches('/'),
            self.tenant_id
        )
    }

    async fn access_token(&self, http: &reqwest::Client) -> Result<String, RepositoryError> {
        if let Some(token) = fresh(self.cached.read().await.as_ref()) {
            return Ok(token);
        }

        let mut cached = self.cached.write().await;
        if let Some(token) = fresh(cached.as_ref()) {
            return Ok(token);
        }

        let assertion = tokio::fs::read_to_string(&self.token_file)
            .await
            .map_err(|e| {
                RepositoryError::AuthenticationError(format!(
                    "Failed to read federated token file {}: {e}",
                    self.token_file.display()
                ))
            })?;

        let response = http
            .post(self.token_url())
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("scope", self.scope.as_str()),
                ("grant_type", "client_credentials"),
                ("client_assertion_type", CLIENT_ASSERTION_TYPE),
                ("client_assertion", assertion.trim()),
            ])
            .send()
            .await
            .map_err(|e| RepositoryError::AuthenticationError(format!("Token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RepositoryError::AuthenticationError(format!(
                "Token request rejected ({status}): {body}"
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            RepositoryError::AuthenticationError(format!("Invalid token response: {e}"))
        })?;

        tracing::debug!(expires_in = token.expires_in, "Acquired Cosmos DB access token");

        *cached = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(token.access_token)
    }
}

/// The cached token, unless it is missing or about to expire.
fn fresh(cached: Option<&CachedToken>) -> Option<String> {
    cached
        .filter(|c| c.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN)
        .map(|c| c.token.clone())
}

fn token_scope(endpoint: &str) -> Result<String, RepositoryError> {
    let url = reqwest::Url::parse(endpoint).map_err(|e| {
        RepositoryError::AuthenticationError(format!("Invalid account endpoint {endpoint:?}: {e}"))
    })?;
    let host = url.host_str().ok_or_else(|| {
        RepositoryError::AuthenticationError(format!("Account endpoint {endpoint:?} has no host"))
    })?;
    Ok(format!("{}://{host}/.default", url.scheme()))
}
