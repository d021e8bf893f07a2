//! Bearer token acquisition for the billed-cost service.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{CostError, CostResult};

const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
// Refresh a little before the token actually expires
const EXPIRY_MARGIN_SECS: i64 = 120;

/// A bearer token and the moment it stops being valid
#[derive(Debug, Clone, PartialEq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

/// Issues tokens for a resource scope
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self, resource_scope: &str) -> CostResult<AccessToken>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Client-credentials flow against the Azure AD token endpoint
pub struct ClientSecretTokenProvider {
    client: Client,
    authority: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<(String, AccessToken)>>,
}

impl ClientSecretTokenProvider {
    pub fn new(tenant_id: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            client: Client::new(),
            authority: DEFAULT_AUTHORITY.to_string(),
            tenant_id: tenant_id.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            cached: Mutex::new(None),
        }
    }

    pub fn with_authority(mut self, authority: &str) -> Self {
        self.authority = authority.trim_end_matches('/').to_string();
        self
    }

    fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority, self.tenant_id)
    }

    async fn request_token(&self, resource_scope: &str) -> CostResult<AccessToken> {
        let scope = format!("{}/.default", resource_scope.trim_end_matches('/'));
        info!(tenant = %self.tenant_id, scope = %scope, "Requesting access token");

        let response = self
            .client
            .post(self.token_url())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CostError::Authentication(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Token request rejected");
            return Err(CostError::Authentication(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CostError::Authentication(e.to_string()))?;

        Ok(AccessToken {
            token: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        })
    }
}

#[async_trait]
impl TokenProvider for ClientSecretTokenProvider {
    async fn get_token(&self, resource_scope: &str) -> CostResult<AccessToken> {
        let mut cached = self.cached.lock().await;
        if let Some((scope, token)) = cached.as_ref()
            && scope == resource_scope
            && token.is_fresh(Utc::now())
        {
            debug!("Reusing cached access token");
            return Ok(token.clone());
        }

        let token = self.request_token(resource_scope).await?;
        *cached = Some((resource_scope.to_string(), token.clone()));
        Ok(token)
    }
}
