//! Release registry lookup is opaque per spec (§1 Non-goals): `app_id -> {image_digest,
//! encrypted_env, public_env}`. This module owns only the trait boundary the `/secrets`
//! handler calls, plus an in-memory stand-in for tests.

use async_trait::async_trait;
use std::collections::HashMap;

/// A published release record for one application.
#[derive(Debug, Clone)]
pub struct Release {
    pub image_digest: String,
    pub encrypted_env: Vec<u8>,
    pub public_env: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("no release found for app {0}")]
    NotFound(String),
}

#[async_trait]
pub trait ReleaseRegistry: Send + Sync {
    async fn get(&self, app_id: &str) -> Result<Release, ReleaseError>;
}

/// A fixed in-memory table of releases, for tests and local development.
#[derive(Debug, Default, Clone)]
pub struct InMemoryReleaseRegistry {
    releases: HashMap<String, Release>,
}

impl InMemoryReleaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_release(mut self, app_id: impl Into<String>, release: Release) -> Self {
        self.releases.insert(app_id.into(), release);
        self
    }
}

#[async_trait]
impl ReleaseRegistry for InMemoryReleaseRegistry {
    async fn get(&self, app_id: &str) -> Result<Release, ReleaseError> {
        self.releases.get(app_id).cloned().ok_or_else(|| ReleaseError::NotFound(app_id.to_string()))
    }
}
