//! Auth Subsystem (§4.G) — Basic pre-attach and Bearer challenge/token
//! exchange, each permitting exactly one retry.

use anyhub_core::policy::BearerChallenge;
use base64::Engine;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("bearer challenge missing realm")]
    MissingRealm,
    #[error("token request failed: {0}")]
    TokenRequestFailed(#[from] reqwest::Error),
    #[error("token response did not contain a token")]
    NoTokenInResponse,
}

/// `Authorization: Basic <base64(user:pass)>` header value.
pub fn basic_auth_header(creds: &Credentials) -> String {
    let raw = format!("{}:{}", creds.username, creds.password);
    let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
    format!("Basic {encoded}")
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Exchange a parsed Bearer challenge for a token. Attaches Basic
/// credentials to the token request when available — registries commonly
/// require them there even for otherwise-anonymous pulls.
pub async fn exchange_bearer_token(
    client: &reqwest::Client,
    challenge: &BearerChallenge,
    creds: Option<&Credentials>,
    timeout: Duration,
) -> Result<String, AuthError> {
    let token_url = challenge.token_url().ok_or(AuthError::MissingRealm)?;
    let mut req = client.get(token_url.as_str()).timeout(timeout);
    if let Some(creds) = creds {
        req = req.header("Authorization", basic_auth_header(creds));
    }
    let resp = req.send().await?.error_for_status()?;
    let parsed: TokenResponse = resp.json().await?;
    parsed
        .token
        .or(parsed.access_token)
        .ok_or(AuthError::NoTokenInResponse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_header_matches_rfc7617_shape() {
        let creds = Credentials {
            username: "alice".into(),
            password: "s3cret".into(),
        };
        let header = basic_auth_header(&creds);
        assert!(header.starts_with("Basic "));
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(header.trim_start_matches("Basic "))
            .unwrap();
        assert_eq!(decoded, b"alice:s3cret");
    }

    #[tokio::test]
    async fn exchange_fails_fast_without_realm() {
        let client = reqwest::Client::new();
        let challenge = BearerChallenge::default();
        let result =
            exchange_bearer_token(&client, &challenge, None, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(AuthError::MissingRealm)));
    }
}
