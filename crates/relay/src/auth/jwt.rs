use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use super::{AuthError, Identity, Profile};

pub const IDENTITY_TOKEN_TTL_SECONDS: i64 = 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdentityClaims {
    sub: String,
    iat: i64,
    exp: i64,
    #[serde(default)]
    username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    avatar_thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bio: Option<String>,
}

/// Validates HS256 identity tokens whose claims carry the user's profile.
#[derive(Clone)]
pub struct JwtIdentityService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue_token(&self, identity: &Identity) -> anyhow::Result<String> {
        self.issue_token_at(identity, current_unix_timestamp()?)
    }

    fn issue_token_at(&self, identity: &Identity, issued_at: i64) -> anyhow::Result<String> {
        let profile = identity.profile.clone();
        let claims = IdentityClaims {
            sub: identity.user_id.to_string(),
            iat: issued_at,
            exp: issued_at + IDENTITY_TOKEN_TTL_SECONDS,
            username: profile.username,
            first_name: profile.first_name,
            last_name: profile.last_name,
            avatar: profile.avatar,
            avatar_thumbnail: profile.avatar_thumbnail,
            bio: profile.bio,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode identity token")
    }

    pub fn validate_token(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = decode::<IdentityClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|error| AuthError::InvalidToken(error.to_string()))?
            .claims;

        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| {
            AuthError::InvalidToken(format!("token subject '{}' is not a UUID", claims.sub))
        })?;

        Ok(Identity {
            user_id,
            profile: Profile {
                username: claims.username,
                first_name: claims.first_name,
                last_name: claims.last_name,
                avatar: claims.avatar,
                avatar_thumbnail: claims.avatar_thumbnail,
                bio: claims.bio,
            },
        })
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}

#[cfg(test)]
mod tests {
    use super::{current_unix_timestamp, JwtIdentityService, IDENTITY_TOKEN_TTL_SECONDS};
    use crate::auth::{AuthError, Identity, Profile};
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde::Serialize;
    use uuid::Uuid;

    const TEST_SECRET: &str = "cowatch_test_secret_that_is_definitely_long_enough";

    fn identity() -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            profile: Profile {
                username: "marta".into(),
                first_name: Some("Marta".into()),
                avatar_thumbnail: Some("https://cdn.example/m-64.png".into()),
                ..Profile::default()
            },
        }
    }

    #[test]
    fn rejects_short_secrets() {
        assert!(JwtIdentityService::new("too-short").is_err());
    }

    #[test]
    fn issues_and_validates_identity_tokens() {
        let service = JwtIdentityService::new(TEST_SECRET).expect("service should initialize");
        let expected = identity();

        let token = service.issue_token(&expected).expect("token should be issued");
        let resolved = service.validate_token(&token).expect("token should validate");

        assert_eq!(resolved, expected);
    }

    #[test]
    fn rejects_tampered_tokens() {
        let service = JwtIdentityService::new(TEST_SECRET).expect("service should initialize");
        let token = service.issue_token(&identity()).expect("token should be issued");
        let tampered = format!("{token}x");

        assert!(matches!(service.validate_token(&tampered), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn rejects_expired_tokens() {
        let service = JwtIdentityService::new(TEST_SECRET).expect("service should initialize");
        let issued_at = current_unix_timestamp().expect("current timestamp should resolve")
            - IDENTITY_TOKEN_TTL_SECONDS
            - 1;
        let token = service.issue_token_at(&identity(), issued_at).expect("token should be issued");

        assert!(service.validate_token(&token).is_err());
    }

    #[test]
    fn rejects_tokens_with_invalid_subject_claim() {
        #[derive(Serialize)]
        struct InvalidSubjectClaims {
            sub: &'static str,
            iat: i64,
            exp: i64,
        }

        let service = JwtIdentityService::new(TEST_SECRET).expect("service should initialize");
        let now = current_unix_timestamp().expect("current timestamp should resolve");
        let claims = InvalidSubjectClaims {
            sub: "not-a-uuid",
            iat: now,
            exp: now + IDENTITY_TOKEN_TTL_SECONDS,
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .expect("token should encode");

        assert!(service.validate_token(&token).is_err());
    }

    #[test]
    fn profile_claims_are_optional() {
        #[derive(Serialize)]
        struct BareClaims {
            sub: String,
            iat: i64,
            exp: i64,
        }

        let service = JwtIdentityService::new(TEST_SECRET).expect("service should initialize");
        let now = current_unix_timestamp().expect("current timestamp should resolve");
        let user_id = Uuid::new_v4();
        let token = encode(
            &Header::new(Algorithm::HS256),
            &BareClaims { sub: user_id.to_string(), iat: now, exp: now + 60 },
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .expect("token should encode");

        let resolved = service.validate_token(&token).expect("bare token should validate");
        assert_eq!(resolved.user_id, user_id);
        assert_eq!(resolved.profile, Profile::default());
    }
}
