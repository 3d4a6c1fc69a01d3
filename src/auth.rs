use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;

/// Bearer token scoped to pulling a single repository.
///
/// Lives for one run only; it is never written anywhere.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn value(&self) -> &str {
        &self.0
    }

    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

// Docker Hub answers with both fields; other token services only send one.
#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Decodes the token service's JSON answer.
pub fn decode_token(body: &str) -> Result<AuthToken> {
    let response: TokenResponse = serde_json::from_str(body)
        .map_err(|e| Error::Auth(format!("malformed token response: {e}")))?;
    response
        .token
        .or(response.access_token)
        .filter(|t| !t.is_empty())
        .map(AuthToken)
        .ok_or_else(|| Error::Auth("token response carries no token".to_string()))
}
