// Identity resolution for WebSocket connections.
//
// A bearer token presented at upgrade time or in the `startup` event is
// resolved to a user id plus the display profile copied into watch sessions.

pub mod jwt;
pub mod remote;

use std::{collections::HashMap, sync::Arc};

use axum::http::{header::AUTHORIZATION, HeaderMap};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::RelayConfig;

use self::{jwt::JwtIdentityService, remote::RemoteIdentityClient};

/// Display attributes denormalized from the identity service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar: Option<String>,
    pub avatar_thumbnail: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub profile: Profile,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("identity service timed out")]
    Timeout,
    #[error("identity service failure: {0}")]
    Upstream(String),
}

#[derive(Clone)]
pub enum IdentityService {
    Jwt(Arc<JwtIdentityService>),
    Remote(Arc<RemoteIdentityClient>),
    #[cfg_attr(not(test), allow(dead_code))]
    Memory(Arc<RwLock<HashMap<String, Identity>>>),
}

impl IdentityService {
    /// Remote lookup when an identity URL is configured, local JWT validation otherwise.
    pub fn from_config(config: &RelayConfig) -> anyhow::Result<Self> {
        match config.identity_url.as_deref() {
            Some(url) => Ok(Self::Remote(Arc::new(RemoteIdentityClient::new(
                url,
                config.identity_api_key.clone(),
                config.identity_timeout,
            )?))),
            None => Ok(Self::Jwt(Arc::new(JwtIdentityService::new(&config.jwt_secret)?))),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Jwt(_) => "jwt",
            Self::Remote(_) => "remote",
            Self::Memory(_) => "memory",
        }
    }

    pub async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidToken("token is empty".to_string()));
        }

        match self {
            Self::Jwt(service) => service.validate_token(token),
            Self::Remote(client) => client.authenticate(token).await,
            Self::Memory(tokens) => tokens
                .read()
                .await
                .get(token)
                .cloned()
                .ok_or_else(|| AuthError::InvalidToken("unknown token".to_string())),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    #[cfg(test)]
    pub(crate) async fn register_for_tests(&self, token: &str, identity: Identity) {
        if let Self::Memory(tokens) = self {
            tokens.write().await.insert(token.to_string(), identity);
        }
    }
}

/// Token from an `Authorization: Bearer <token>` header, if present.
pub fn bearer_token_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()).and_then(extract_bearer_token)
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}
