//! Client credentials for onboarded nodes.
//!
//! Each host gets one client id/secret pair, keyed by tenant and host UUID.
//! The provisioning pipeline writes the pair onto the node so its agents can
//! authenticate.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use onboard_reconcile::{Classify, ErrorCode};
use rand::Rng;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Default timeout for a single credential provider call.
pub const DEFAULT_CREDENTIALS_TIMEOUT: Duration = Duration::from_secs(3);

/// Length of generated client secrets.
const SECRET_LEN: usize = 32;

/// Alphabet for generated client secrets.
const SECRET_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// A node's client credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Credential provider errors.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credentials for host {uuid} in tenant {tenant_id}")]
    NotFound { tenant_id: String, uuid: Uuid },

    #[error("credentials for host {uuid} in tenant {tenant_id} already exist")]
    AlreadyExists { tenant_id: String, uuid: Uuid },

    #[error("credential provider unavailable: {0}")]
    Unavailable(String),

    #[error("credential {operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },
}

impl CredentialError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl Classify for CredentialError {
    fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::NotFound { .. } => Some(ErrorCode::NotFound),
            Self::AlreadyExists { .. } => Some(ErrorCode::AlreadyExists),
            Self::Unavailable(_) => Some(ErrorCode::Unavailable),
            Self::Timeout { .. } => Some(ErrorCode::DeadlineExceeded),
        }
    }
}

/// Issues and revokes node client credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_credentials_by_uuid(
        &self,
        tenant_id: &str,
        uuid: Uuid,
    ) -> Result<ClientCredentials, CredentialError>;

    async fn create_credentials_with_uuid(
        &self,
        tenant_id: &str,
        uuid: Uuid,
    ) -> Result<ClientCredentials, CredentialError>;

    /// Revoke a host's credentials. Missing credentials are not an error.
    async fn revoke_credentials(&self, tenant_id: &str, uuid: Uuid) -> Result<(), CredentialError>;

    /// Return existing credentials or issue new ones.
    async fn get_or_create(
        &self,
        tenant_id: &str,
        uuid: Uuid,
    ) -> Result<ClientCredentials, CredentialError> {
        match self.get_credentials_by_uuid(tenant_id, uuid).await {
            Ok(credentials) => Ok(credentials),
            Err(e) if e.is_not_found() => self.create_credentials_with_uuid(tenant_id, uuid).await,
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<P: CredentialProvider + ?Sized> CredentialProvider for Arc<P> {
    async fn get_credentials_by_uuid(
        &self,
        tenant_id: &str,
        uuid: Uuid,
    ) -> Result<ClientCredentials, CredentialError> {
        (**self).get_credentials_by_uuid(tenant_id, uuid).await
    }

    async fn create_credentials_with_uuid(
        &self,
        tenant_id: &str,
        uuid: Uuid,
    ) -> Result<ClientCredentials, CredentialError> {
        (**self).create_credentials_with_uuid(tenant_id, uuid).await
    }

    async fn revoke_credentials(&self, tenant_id: &str, uuid: Uuid) -> Result<(), CredentialError> {
        (**self).revoke_credentials(tenant_id, uuid).await
    }
}

/// Bounds every call of the wrapped provider.
pub struct TimeoutCredentials<P> {
    inner: P,
    timeout: Duration,
}

impl<P: CredentialProvider> TimeoutCredentials<P> {
    pub fn new(inner: P, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, CredentialError>
    where
        F: Future<Output = Result<T, CredentialError>> + Send,
    {
        let started = Instant::now();
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| CredentialError::Timeout {
                operation,
                elapsed: started.elapsed(),
            })?
    }
}

#[async_trait]
impl<P: CredentialProvider> CredentialProvider for TimeoutCredentials<P> {
    async fn get_credentials_by_uuid(
        &self,
        tenant_id: &str,
        uuid: Uuid,
    ) -> Result<ClientCredentials, CredentialError> {
        self.bounded("get", self.inner.get_credentials_by_uuid(tenant_id, uuid))
            .await
    }

    async fn create_credentials_with_uuid(
        &self,
        tenant_id: &str,
        uuid: Uuid,
    ) -> Result<ClientCredentials, CredentialError> {
        self.bounded("create", self.inner.create_credentials_with_uuid(tenant_id, uuid))
            .await
    }

    async fn revoke_credentials(&self, tenant_id: &str, uuid: Uuid) -> Result<(), CredentialError> {
        self.bounded("revoke", self.inner.revoke_credentials(tenant_id, uuid))
            .await
    }
}

/// Client id for a host.
pub fn client_id_for(uuid: Uuid) -> String {
    format!("edgenode-{uuid}")
}

fn generate_secret() -> String {
    let mut rng = rand::rng();
    (0..SECRET_LEN)
        .map(|_| SECRET_CHARS[rng.random_range(0..SECRET_CHARS.len())] as char)
        .collect()
}

/// In-memory credential provider.
#[derive(Default)]
pub struct MemoryCredentials {
    credentials: RwLock<HashMap<(String, Uuid), ClientCredentials>>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of hosts holding credentials.
    pub async fn len(&self) -> usize {
        self.credentials.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.credentials.read().await.is_empty()
    }
}

#[async_trait]
impl CredentialProvider for MemoryCredentials {
    async fn get_credentials_by_uuid(
        &self,
        tenant_id: &str,
        uuid: Uuid,
    ) -> Result<ClientCredentials, CredentialError> {
        self.credentials
            .read()
            .await
            .get(&(tenant_id.to_string(), uuid))
            .cloned()
            .ok_or_else(|| CredentialError::NotFound {
                tenant_id: tenant_id.to_string(),
                uuid,
            })
    }

    async fn create_credentials_with_uuid(
        &self,
        tenant_id: &str,
        uuid: Uuid,
    ) -> Result<ClientCredentials, CredentialError> {
        let mut credentials = self.credentials.write().await;
        let key = (tenant_id.to_string(), uuid);
        if credentials.contains_key(&key) {
            return Err(CredentialError::AlreadyExists {
                tenant_id: tenant_id.to_string(),
                uuid,
            });
        }

        let issued = ClientCredentials {
            client_id: client_id_for(uuid),
            client_secret: generate_secret(),
        };
        credentials.insert(key, issued.clone());
        info!(tenant_id, %uuid, "Client credentials issued");
        Ok(issued)
    }

    async fn revoke_credentials(&self, tenant_id: &str, uuid: Uuid) -> Result<(), CredentialError> {
        if self
            .credentials
            .write()
            .await
            .remove(&(tenant_id.to_string(), uuid))
            .is_none()
        {
            debug!(tenant_id, %uuid, "No credentials to revoke");
        }
        Ok(())
    }
}
