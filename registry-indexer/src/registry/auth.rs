//! Authentication capability providers and the v2 challenge/token dance.
//!
//! Credentials come from one of two capability providers, matching
//! `pkg/auth` and the `docker_auth.CredentialStore` usage in the original:
//! static username/password, or a short-lived bearer token minted from the
//! platform's ambient credentials.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use indexer_model::Error;
use reqwest::header::{HeaderMap, WWW_AUTHENTICATE};
use reqwest::{Client, StatusCode};

/// Sentinel username returned by [`Credentials::Ambient`], matching the Go
/// original's `_dcgcloud_token`.
pub const AMBIENT_TOKEN_USERNAME: &str = "_dcgcloud_token";

/// A capability provider for basic-auth credentials, as used to exchange
/// for a bearer token or to authenticate directly against a Basic
/// challenge.
#[derive(Clone)]
pub enum Credentials {
    /// Fixed username/password supplied in configuration.
    Static { username: String, password: String },
    /// A short-lived bearer token minted via the platform default token
    /// source, refreshed on expiry.
    Ambient(std::sync::Arc<dyn gcp_auth::TokenProvider>),
}

impl Credentials {
    pub fn r#static(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Static {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Builds an ambient credential source, testing that an initial token
    /// can be acquired. Fails construction otherwise, matching
    /// `NewApplicationDefaultCredentialStore`.
    pub async fn ambient() -> Result<Self, Error> {
        let manager = gcp_auth::provider()
            .await
            .map_err(|e| Error::Auth(format!("failed to initialize ambient credentials: {e}")))?;
        manager
            .token(&["https://www.googleapis.com/auth/cloud-platform.read-only"])
            .await
            .map_err(|e| Error::Auth(format!("failed to acquire initial ambient token: {e}")))?;
        Ok(Credentials::Ambient(manager))
    }

    /// Returns the `(username, password)` pair used for HTTP Basic auth,
    /// either directly against the registry or against a token endpoint.
    pub async fn basic(&self) -> Result<(String, String), Error> {
        match self {
            Credentials::Static { username, password } => {
                Ok((username.clone(), password.clone()))
            }
            Credentials::Ambient(manager) => {
                let token = manager
                    .token(&["https://www.googleapis.com/auth/cloud-platform.read-only"])
                    .await
                    .map_err(|e| Error::Auth(format!("failed to refresh ambient token: {e}")))?;
                Ok((AMBIENT_TOKEN_USERNAME.to_string(), token.as_str().to_string()))
            }
        }
    }
}

/// What kind of auth challenge the registry presented at the v2 ping.
#[derive(Debug, Clone)]
enum Challenge {
    None,
    Basic,
    Bearer { realm: String, service: Option<String> },
}

fn parse_challenge(headers: &HeaderMap) -> Challenge {
    let Some(value) = headers.get(WWW_AUTHENTICATE).and_then(|v| v.to_str().ok()) else {
        return Challenge::None;
    };
    let lower = value.to_ascii_lowercase();
    if lower.starts_with("basic") {
        return Challenge::Basic;
    }
    if lower.starts_with("bearer") {
        let params = parse_auth_params(value);
        let realm = params.get("realm").cloned().unwrap_or_default();
        let service = params.get("service").cloned();
        return Challenge::Bearer { realm, service };
    }
    Challenge::None
}

fn parse_auth_params(value: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let rest = value.splitn(2, ' ').nth(1).unwrap_or("");
    for part in rest.split(',') {
        if let Some((key, val)) = part.split_once('=') {
            params.insert(
                key.trim().to_string(),
                val.trim().trim_matches('"').to_string(),
            );
        }
    }
    params
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Manages the v2 challenge response for one registry endpoint and mints
/// per-scope bearer tokens, caching and refreshing them on expiry.
///
/// A per-scope token handler is created per operation (scope =
/// `repository:<name>:pull`); this manager is the shared state those
/// handlers consult.
pub struct ChallengeManager {
    challenge: Challenge,
    client: Client,
    credentials: Option<Credentials>,
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl ChallengeManager {
    /// Performs the v2 ping preflight against `base_url` and records the
    /// challenge it presents (if any), to be acquired on the first scoped
    /// request.
    pub async fn ping(
        client: Client,
        base_url: &url::Url,
        credentials: Option<Credentials>,
    ) -> Result<Self, Error> {
        let ping_url = base_url.join("/v2/").map_err(|e| Error::Config(e.to_string()))?;
        let response = client
            .get(ping_url)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("v2 ping failed: {e}")))?;

        let challenge = match response.status() {
            StatusCode::OK => Challenge::None,
            StatusCode::UNAUTHORIZED => parse_challenge(response.headers()),
            other => {
                return Err(Error::Protocol(format!(
                    "{base_url} is not a Docker Registry v2 API (ping returned {other})"
                )))
            }
        };

        Ok(ChallengeManager {
            challenge,
            client,
            credentials,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Attaches the appropriate `Authorization` header for the given
    /// pull scope (`repository:<name>:pull`), fetching or reusing a
    /// cached bearer token as needed.
    pub async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        scope: &str,
    ) -> Result<reqwest::RequestBuilder, Error> {
        match &self.challenge {
            Challenge::None => Ok(request),
            Challenge::Basic => {
                let Some(creds) = &self.credentials else {
                    return Ok(request);
                };
                let (user, pass) = creds.basic().await?;
                Ok(request.basic_auth(user, Some(pass)))
            }
            Challenge::Bearer { realm, service } => {
                let token = self.token_for_scope(realm, service.as_deref(), scope).await?;
                Ok(request.bearer_auth(token))
            }
        }
    }

    async fn token_for_scope(
        &self,
        realm: &str,
        service: Option<&str>,
        scope: &str,
    ) -> Result<String, Error> {
        {
            let cache = self.tokens.lock().expect("token cache poisoned");
            if let Some(cached) = cache.get(scope) {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.token.clone());
                }
            }
        }

        let mut request = self.client.get(realm);
        if let Some(service) = service {
            request = request.query(&[("service", service)]);
        }
        request = request.query(&[("scope", scope)]);
        if let Some(creds) = &self.credentials {
            let (user, pass) = creds.basic().await?;
            request = request.basic_auth(user, Some(pass));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Auth(format!("token request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Auth(format!(
                "token request returned {}",
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Auth(format!("malformed token response: {e}")))?;
        let ttl = body.expires_in.unwrap_or(60).max(1);

        self.tokens.lock().expect("token cache poisoned").insert(
            scope.to_string(),
            CachedToken {
                token: body.token.clone(),
                expires_at: Instant::now() + Duration::from_secs(ttl),
            },
        );

        Ok(body.token)
    }
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    #[serde(alias = "access_token")]
    token: String,
    expires_in: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bearer_challenge_params() {
        let value = r#"Bearer realm="https://auth.example/token",service="r.example",scope="repository:ns/app:pull""#;
        let params = parse_auth_params(value);
        assert_eq!(params.get("realm").unwrap(), "https://auth.example/token");
        assert_eq!(params.get("service").unwrap(), "r.example");
    }

    #[test]
    fn identifies_basic_challenge() {
        let mut headers = HeaderMap::new();
        headers.insert(WWW_AUTHENTICATE, "Basic realm=\"registry\"".parse().unwrap());
        assert!(matches!(parse_challenge(&headers), Challenge::Basic));
    }
}
