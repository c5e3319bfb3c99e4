//! Bearer token provider
//!
//! Token acquisition is an external collaborator's job; this module only
//! reads (and re-reads after a collaborator refresh) the `auth.json` file
//! kept next to the database in the data directory.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ClassifiedError;

/// Persisted token pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Supplies the bearer token for model requests
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Current bearer token
    async fn bearer(&self) -> Result<String, ClassifiedError>;

    /// Ask the collaborator for a fresh token after a rejection
    async fn refresh(&self) -> Result<String, ClassifiedError>;
}

/// `auth.json`-backed provider
pub struct FileAuthProvider {
    path: PathBuf,
}

impl FileAuthProvider {
    /// Provider reading `auth.json` under `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: data_dir.into().join("auth.json"),
        }
    }

    async fn load(&self) -> Result<AuthTokens, ClassifiedError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ClassifiedError::permanent(format!(
                "auth file unreadable at {}: {e}",
                self.path.display()
            ))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| ClassifiedError::permanent(format!("auth file malformed: {e}")))
    }
}

#[async_trait]
impl AuthProvider for FileAuthProvider {
    async fn bearer(&self) -> Result<String, ClassifiedError> {
        Ok(self.load().await?.access_token)
    }

    async fn refresh(&self) -> Result<String, ClassifiedError> {
        // The OAuth collaborator rewrites auth.json out of band; a refresh
        // here is a re-read of whatever it produced
        debug!(path = %self.path.display(), "re-reading auth file after refresh request");
        self.bearer().await
    }
}

/// Fixed-token provider for tests and single-shot runs
pub struct StaticAuthProvider {
    token: String,
}

impl StaticAuthProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn bearer(&self) -> Result<String, ClassifiedError> {
        Ok(self.token.clone())
    }

    async fn refresh(&self) -> Result<String, ClassifiedError> {
        Ok(self.token.clone())
    }
}
