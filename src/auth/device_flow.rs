//! OAuth2 Device Authorization Grant (RFC 8628) against the Microsoft
//! identity platform, for a public client without a secret.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};

use super::token_cache::{CachedToken, TokenCache};
use super::CredentialProvider;

const AUTHORITY_URL: &str = "https://login.microsoftonline.com";
const GRAPH_SCOPES: &[&str] = &[
    "User.Read",
    "Mail.Read",
    "Mail.ReadWrite",
    "Notes.Create",
    "Notes.ReadWrite",
    "offline_access",
];
const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    #[serde(default = "default_interval")]
    interval: u64,
    #[serde(default)]
    message: Option<String>,
}

fn default_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum PollStep {
    Wait,
    SlowDown,
    Fail(String),
}

fn poll_step(error: &TokenErrorResponse) -> PollStep {
    match error.error.as_str() {
        "authorization_pending" => PollStep::Wait,
        "slow_down" => PollStep::SlowDown,
        "expired_token" | "code_expired" => {
            PollStep::Fail("Device code expired before authorization".to_string())
        }
        "access_denied" | "authorization_declined" => {
            PollStep::Fail("User denied the authorization request".to_string())
        }
        other => PollStep::Fail(format!(
            "Token request error: {} - {}",
            other,
            error.error_description.as_deref().unwrap_or_default()
        )),
    }
}

impl TokenResponse {
    /// Microsoft may omit a new refresh token on refresh; keep the old one then.
    fn into_cached(self, previous_refresh: Option<String>) -> CachedToken {
        let lifetime = self.expires_in.unwrap_or(3600);
        CachedToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: Utc::now() + chrono::Duration::seconds(lifetime),
        }
    }
}

pub struct DeviceCodeAuth {
    client: Client,
    client_id: String,
    tenant_id: String,
    cache: Mutex<TokenCache>,
}

impl DeviceCodeAuth {
    pub fn new(client_id: String, tenant_id: String, cache: TokenCache) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            client_id,
            tenant_id,
            cache: Mutex::new(cache),
        }
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}/oauth2/v2.0/{}", AUTHORITY_URL, self.tenant_id, name)
    }

    fn scope() -> String {
        GRAPH_SCOPES.join(" ")
    }

    async fn silent_token(&self) -> Result<Option<String>> {
        let mut cache = self.cache.lock().await;
        let Some(cached) = cache.token().cloned() else {
            return Ok(None);
        };

        if cached.is_fresh(Utc::now()) {
            return Ok(Some(cached.access_token));
        }

        let Some(refresh_token) = cached.refresh_token else {
            tracing::debug!("Cached token expired and no refresh token is available");
            return Ok(None);
        };

        match self.refresh(&refresh_token).await {
            Ok(response) => {
                let token = response.into_cached(Some(refresh_token));
                let access = token.access_token.clone();
                cache.store(token)?;
                tracing::debug!("Refreshed access token");
                Ok(Some(access))
            }
            Err(e) => {
                tracing::warn!("Silent token refresh failed: {}", e);
                Ok(None)
            }
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let scope = Self::scope();
        let params = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("scope", scope.as_str()),
        ];

        let response = self
            .client
            .post(self.endpoint("token"))
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Auth(format!(
                "Token refresh failed ({}): {}",
                status,
                crate::services::truncate_body(&body)
            )));
        }

        Ok(response.json().await?)
    }

    async fn request_device_code(&self) -> Result<DeviceCodeResponse> {
        let scope = Self::scope();
        let params = [("client_id", self.client_id.as_str()), ("scope", scope.as_str())];

        let response = self
            .client
            .post(self.endpoint("devicecode"))
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Auth(format!(
                "Device code request failed ({}): {}",
                status,
                crate::services::truncate_body(&body)
            )));
        }

        Ok(response.json().await?)
    }

    async fn poll_for_token(&self, device_code: &DeviceCodeResponse) -> Result<TokenResponse> {
        let deadline = std::time::Instant::now() + Duration::from_secs(device_code.expires_in);
        let mut interval = Duration::from_secs(device_code.interval.max(1));

        loop {
            if std::time::Instant::now() > deadline {
                return Err(AppError::Auth(
                    "Device code expired before authorization".to_string(),
                ));
            }

            tokio::time::sleep(interval).await;

            let params = [
                ("client_id", self.client_id.as_str()),
                ("grant_type", DEVICE_CODE_GRANT_TYPE),
                ("device_code", device_code.device_code.as_str()),
            ];
            let response = self
                .client
                .post(self.endpoint("token"))
                .form(&params)
                .send()
                .await?;

            if response.status().is_success() {
                return Ok(response.json().await?);
            }

            let error: TokenErrorResponse = response.json().await?;
            match poll_step(&error) {
                PollStep::Wait => tracing::debug!("Authorization pending, continuing to poll"),
                PollStep::SlowDown => {
                    interval = (interval + Duration::from_secs(5)).min(MAX_POLL_INTERVAL);
                    tracing::debug!("Server requested slow down, interval now {:?}", interval);
                }
                PollStep::Fail(reason) => return Err(AppError::Auth(reason)),
            }
        }
    }

    async fn interactive_token(&self) -> Result<String> {
        let device_code = self.request_device_code().await?;

        let instructions = device_code.message.clone().unwrap_or_else(|| {
            format!(
                "To sign in, open {} and enter the code {}",
                device_code.verification_uri, device_code.user_code
            )
        });
        let rule = "=".repeat(60);
        println!("\n{}\nAUTHENTICATION REQUIRED\n{}\n\n{}\n\n{}\n", rule, rule, instructions, rule);
        std::io::stdout().flush()?;

        let response = self.poll_for_token(&device_code).await?;
        let token = response.into_cached(None);
        let access = token.access_token.clone();
        let mut cache = self.cache.lock().await;
        cache.store(token)?;
        tracing::debug!("Token cached at {}", cache.path().display());

        println!("Authentication successful!");
        Ok(access)
    }
}

#[async_trait]
impl CredentialProvider for DeviceCodeAuth {
    async fn get_token(&self, interactive: bool) -> Result<Option<String>> {
        if let Some(token) = self.silent_token().await? {
            return Ok(Some(token));
        }

        if !interactive {
            return Ok(None);
        }

        match self.interactive_token().await {
            Ok(token) => Ok(Some(token)),
            Err(e) => {
                tracing::error!("Authentication failed: {}", e);
                Ok(None)
            }
        }
    }

    async fn clear_cached_credential(&self) -> Result<()> {
        self.cache.lock().await.clear()
    }

    async fn has_cached_credential(&self) -> bool {
        self.cache.lock().await.token().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_with(token: Option<CachedToken>) -> (tempfile::TempDir, DeviceCodeAuth) {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = TokenCache::load(dir.path().join("token_cache.json"));
        if let Some(token) = token {
            cache.store(token).unwrap();
        }
        let auth = DeviceCodeAuth::new("client".to_string(), "tenant".to_string(), cache);
        (dir, auth)
    }

    fn error(code: &str) -> TokenErrorResponse {
        TokenErrorResponse {
            error: code.to_string(),
            error_description: Some("details".to_string()),
        }
    }

    #[test]
    fn endpoints_use_tenant() {
        let (_dir, auth) = auth_with(None);
        assert_eq!(
            auth.endpoint("devicecode"),
            "https://login.microsoftonline.com/tenant/oauth2/v2.0/devicecode"
        );
    }

    #[test]
    fn scope_requests_offline_access() {
        let scope = DeviceCodeAuth::scope();
        assert!(scope.contains("Mail.ReadWrite"));
        assert!(scope.contains("Notes.Create"));
        assert!(scope.ends_with("offline_access"));
    }

    #[test]
    fn poll_errors_map_to_steps() {
        assert_eq!(poll_step(&error("authorization_pending")), PollStep::Wait);
        assert_eq!(poll_step(&error("slow_down")), PollStep::SlowDown);
        assert!(matches!(poll_step(&error("expired_token")), PollStep::Fail(m) if m.contains("expired")));
        assert!(matches!(poll_step(&error("access_denied")), PollStep::Fail(m) if m.contains("denied")));
        assert!(matches!(poll_step(&error("invalid_grant")), PollStep::Fail(m) if m.contains("invalid_grant")));
    }

    #[test]
    fn refresh_keeps_previous_refresh_token() {
        let response = TokenResponse {
            access_token: "new".to_string(),
            refresh_token: None,
            expires_in: Some(3600),
        };
        let cached = response.into_cached(Some("old-refresh".to_string()));
        assert_eq!(cached.access_token, "new");
        assert_eq!(cached.refresh_token.as_deref(), Some("old-refresh"));
        assert!(cached.is_fresh(Utc::now()));
    }

    #[test]
    fn device_code_interval_defaults() {
        let json = r#"{"device_code": "d", "user_code": "ABC", "verification_uri": "https://microsoft.com/devicelogin", "expires_in": 900}"#;
        let code: DeviceCodeResponse = serde_json::from_str(json).unwrap();
        assert_eq!(code.interval, 5);
        assert!(code.message.is_none());
    }

    #[tokio::test]
    async fn fresh_cached_token_is_returned_silently() {
        let token = CachedToken {
            access_token: "cached-access".to_string(),
            refresh_token: None,
            expires_at: Utc::now() + chrono::Duration::hours(1),
        };
        let (_dir, auth) = auth_with(Some(token));

        assert!(auth.has_cached_credential().await);
        assert_eq!(
            auth.get_token(false).await.unwrap().as_deref(),
            Some("cached-access")
        );
    }

    #[tokio::test]
    async fn expired_token_without_refresh_is_absent() {
        let token = CachedToken {
            access_token: "stale".to_string(),
            refresh_token: None,
            expires_at: Utc::now() - chrono::Duration::hours(1),
        };
        let (_dir, auth) = auth_with(Some(token));

        assert_eq!(auth.get_token(false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_cache_without_interaction_is_absent() {
        let (_dir, auth) = auth_with(None);
        assert!(!auth.has_cached_credential().await);
        assert_eq!(auth.get_token(false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn clearing_forgets_credential() {
        let token = CachedToken {
            access_token: "cached-access".to_string(),
            refresh_token: None,
            expires_at: Utc::now() + chrono::Duration::hours(1),
        };
        let (_dir, auth) = auth_with(Some(token));

        auth.clear_cached_credential().await.unwrap();
        assert!(!auth.has_cached_credential().await);
        assert_eq!(auth.get_token(false).await.unwrap(), None);
    }
}
