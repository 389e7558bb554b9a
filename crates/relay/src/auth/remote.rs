// Identity lookup against the user service over HTTP.
//
// `GET {base}/auth` with the client's bearer token and the relay's API key.
// 401/403 means the token is invalid; anything else non-2xx is an upstream
// failure.

use std::time::Duration;

use anyhow::Context;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;
use uuid::Uuid;

use super::{AuthError, Identity, Profile};

const API_KEY_HEADER: &str = "X-API-KEY";

#[derive(Debug, Deserialize)]
struct RemoteUser {
    uuid: Uuid,
    #[serde(default)]
    username: String,
    first_name: Option<String>,
    last_name: Option<String>,
    avatar: Option<String>,
    avatar_thumbnail: Option<String>,
    bio: Option<String>,
}

pub struct RemoteIdentityClient {
    client: Client,
    auth_url: Url,
    api_key: Option<String>,
    timeout: Duration,
}

impl RemoteIdentityClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let auth_url = Url::parse(&format!("{}/auth", base_url.trim_end_matches('/')))
            .with_context(|| format!("invalid identity service url '{base_url}'"))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build identity service http client")?;

        Ok(Self { client, auth_url, api_key, timeout })
    }

    pub async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        match tokio::time::timeout(self.timeout, self.fetch(token)).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::Timeout),
        }
    }

    async fn fetch(&self, token: &str) -> Result<Identity, AuthError> {
        let mut request = self.client.get(self.auth_url.clone()).bearer_auth(token);
        if let Some(api_key) = &self.api_key {
            request = request.header(API_KEY_HEADER, api_key);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AuthError::InvalidToken(
                    "identity service rejected the token".to_string(),
                ));
            }
            status if !status.is_success() => {
                return Err(AuthError::Upstream(format!("identity service returned {status}")));
            }
            _ => {}
        }

        let user = response.json::<RemoteUser>().await.map_err(map_transport_error)?;
        Ok(Identity {
            user_id: user.uuid,
            profile: Profile {
                username: user.username,
                first_name: user.first_name,
                last_name: user.last_name,
                avatar: user.avatar,
                avatar_thumbnail: user.avatar_thumbnail,
                bio: user.bio,
            },
        })
    }
}

fn map_transport_error(error: reqwest::Error) -> AuthError {
    if error.is_timeout() {
        AuthError::Timeout
    } else {
        AuthError::Upstream(error.to_string())
    }
}
