use std::collections::HashMap;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Query},
    http::{header, request::Parts, HeaderName},
};
use relink_core::UserId;
use thiserror::Error;

use crate::{errors::ServerError, ServerContext};

/// The header a fronting auth proxy is trusted to set, unless configured otherwise
pub const DEFAULT_TRUSTED_HEADER: &str = "x-relink-user";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Missing authorization")]
    Missing,
    #[error("Authorization must be Bearer")]
    Malformed,
    #[error("Unknown token")]
    UnknownToken,
}

/// Resolves the already authenticated user behind a request.
///
/// reLink doesn't check credentials itself. Whatever sits in front of it does, and an
/// implementation of this trait only reads the outcome.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn identify(&self, parts: &Parts) -> Result<UserId, IdentityError>;
}

/// Looks bearer tokens up in a fixed table
#[derive(Debug, Default)]
pub struct TokenIdentities {
    tokens: HashMap<String, UserId>,
}

impl TokenIdentities {
    /// Parses a `token:user_id,token:user_id` list. Malformed entries are skipped.
    pub fn parse(table: &str) -> Self {
        let tokens = table
            .split(',')
            .filter_map(|entry| entry.trim().split_once(':'))
            .filter(|(token, user)| !token.is_empty() && !user.is_empty())
            .map(|(token, user)| (token.to_string(), UserId::from(user)))
            .collect();

        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Takes the token from the authorization header, or the `token` query parameter
/// since browsers can't set headers on WebSocket upgrades
fn token(parts: &Parts) -> Result<String, IdentityError> {
    if let Some(value) = parts.headers.get(header::AUTHORIZATION) {
        let value = value.to_str().map_err(|_| IdentityError::Malformed)?;
        let mut words = value.split_ascii_whitespace();

        return match (words.next(), words.next()) {
            (Some("Bearer"), Some(token)) => Ok(token.to_string()),
            _ => Err(IdentityError::Malformed),
        };
    }

    let query: Query<HashMap<String, String>> =
        Query::try_from_uri(&parts.uri).map_err(|_| IdentityError::Malformed)?;

    query.0.get("token").cloned().ok_or(IdentityError::Missing)
}

#[async_trait]
impl IdentityProvider for TokenIdentities {
    async fn identify(&self, parts: &Parts) -> Result<UserId, IdentityError> {
        let token = token(parts)?;

        self.tokens
            .get(&token)
            .cloned()
            .ok_or(IdentityError::UnknownToken)
    }
}

/// Trusts a header set by an auth proxy in front of the server
#[derive(Debug, Clone)]
pub struct TrustedHeader {
    header: HeaderName,
}

impl TrustedHeader {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }
}

impl Default for TrustedHeader {
    fn default() -> Self {
        Self::new(HeaderName::from_static(DEFAULT_TRUSTED_HEADER))
    }
}

#[async_trait]
impl IdentityProvider for TrustedHeader {
    async fn identify(&self, parts: &Parts) -> Result<UserId, IdentityError> {
        let user = parts
            .headers
            .get(&self.header)
            .ok_or(IdentityError::Missing)?
            .to_str()
            .map_err(|_| IdentityError::Malformed)?
            .trim();

        if user.is_empty() {
            return Err(IdentityError::Missing);
        }

        Ok(user.into())
    }
}

/// The user behind a request
pub struct Identity(pub UserId);

#[axum::async_trait]
impl FromRequestParts<ServerContext> for Identity {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerContext,
    ) -> Result<Self, Self::Rejection> {
        let user_id = state.identities.identify(parts).await?;

        Ok(Self(user_id))
    }
}
