//! Bearer-JWT and API-key authentication.
//!
//! The authenticated identity supplies the username component of every
//! server key. Token issuance, password hashing, and API-key encryption
//! live in the surrounding platform; this module only validates.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{extract::FromRequestParts, http::request::Parts};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use mcp_hub::{UserConfig, UserGroup};
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, state::AppState};

/// Header carrying an API key as an alternative to a bearer token.
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
}

/// The authenticated caller.
#[derive(Clone, Debug)]
pub struct AuthedUser {
    pub username: String,
    pub group: UserGroup,
}

impl AuthedUser {
    pub fn is_admin(&self) -> bool {
        self.group.is_admin()
    }

    /// Resolves which user's servers this request addresses. Admins may
    /// target any user via the `user` query parameter; everyone else only
    /// themselves.
    pub fn target<'a>(&'a self, requested: Option<&'a str>) -> Result<&'a str, ApiError> {
        match requested {
            None => Ok(&self.username),
            Some(user) if user == self.username => Ok(user),
            Some(user) if self.is_admin() => Ok(user),
            Some(_) => Err(ApiError::forbidden(
                "only admins may address other users' servers",
            )),
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(token) = bearer_token(parts) {
            let data = decode::<Claims>(
                token,
                &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
                &Validation::default(),
            )
            .map_err(|_| ApiError::unauthorized("invalid bearer token"))?;

            let user = state
                .store
                .user(&data.claims.sub)
                .ok_or_else(|| ApiError::unauthorized("unknown user"))?;
            return active(user);
        }

        if let Some(key) = header_value(parts, API_KEY_HEADER) {
            let user = state
                .store
                .find_by_api_key(key)
                .ok_or_else(|| ApiError::unauthorized("unknown API key"))?;
            return active(user);
        }

        Err(ApiError::unauthorized("missing credentials"))
    }
}

fn active(user: UserConfig) -> Result<AuthedUser, ApiError> {
    if user.disabled {
        return Err(ApiError::forbidden("account disabled"));
    }
    Ok(AuthedUser {
        username: user.username,
        group: user.group,
    })
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    header_value(parts, "authorization")?.strip_prefix("Bearer ")
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts.headers.get(name)?.to_str().ok()
}

/// Mints an HS256 token for a user. Used by the login collaborator and by
/// the test suites.
pub fn issue_token(
    secret: &str,
    username: &str,
    ttl: Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let claims = Claims {
        sub: username.to_string(),
        exp: (now + ttl).as_secs(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}
