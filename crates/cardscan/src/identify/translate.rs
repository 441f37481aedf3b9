//! Literal translation fallback with service-account tokens and a monthly
//! character quota.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{http_error, Translator};
use crate::db::{usage_repo, Database};
use crate::error::IdentifyError;
use crate::types::Language;

const SERVICE: &str = "translation";
const TOKEN_SERVICE: &str = "translation token endpoint";

/// Tokens are refreshed this long before they expire.
pub const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime assumed when the token endpoint does not send `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    access_token: SecretString,
    expires_at: Instant,
}

/// Exchanges client credentials for bearer tokens and caches them.
pub struct TokenProvider {
    client: Client,
    token_url: String,
    client_id: SecretString,
    client_secret: SecretString,
    scope: Option<String>,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(
        token_url: impl Into<String>,
        client_id: SecretString,
        client_secret: SecretString,
        scope: Option<String>,
        timeout: Duration,
    ) -> Result<Self, IdentifyError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| IdentifyError::from_reqwest(TOKEN_SERVICE, e))?;
        Ok(Self {
            client,
            token_url: token_url.into(),
            client_id,
            client_secret,
            scope,
            cached: Mutex::new(None),
        })
    }

    /// Returns a bearer token, fetching a new one when none is cached or
    /// the cached one is within [`TOKEN_REFRESH_MARGIN`] of expiring.
    ///
    /// The lock is held across the exchange so concurrent callers share a
    /// single refresh.
    pub async fn bearer_token(&self) -> Result<String, IdentifyError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.access_token.expose_secret().to_string());
            }
        }

        let fresh = self.exchange().await?;
        let value = fresh.access_token.expose_secret().to_string();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn exchange(&self) -> Result<CachedToken, IdentifyError> {
        log::debug!("Requesting translation access token");

        let mut params = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.expose_secret()),
            ("client_secret", self.client_secret.expose_secret()),
        ];
        if let Some(scope) = self.scope.as_deref() {
            params.push(("scope", scope));
        }

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| IdentifyError::from_reqwest(TOKEN_SERVICE, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let err = http_error(TOKEN_SERVICE, response).await;
            if status.is_client_error() && status.as_u16() != 429 {
                return Err(IdentifyError::Auth {
                    service: SERVICE,
                    message: err.to_string(),
                });
            }
            return Err(err);
        }

        let token: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| IdentifyError::MalformedResponse {
                    service: TOKEN_SERVICE,
                    message: e.to_string(),
                })?;
        let lifetime = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);

        Ok(CachedToken {
            access_token: SecretString::from(token.access_token),
            expires_at: Instant::now() + lifetime,
        })
    }
}

/// Usage of the translation service in the current month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub month: String,
    pub characters_used: u64,
    pub requests: u64,
    /// Zero means unlimited.
    pub monthly_limit: u64,
}

impl QuotaStatus {
    pub fn remaining(&self) -> Option<u64> {
        (self.monthly_limit > 0).then(|| self.monthly_limit.saturating_sub(self.characters_used))
    }
}

/// Monthly character quota backed by `translation_usage`.
pub struct TranslationQuota {
    db: Database,
    monthly_limit: u64,
}

impl TranslationQuota {
    pub fn new(db: Database, monthly_limit: u64) -> Self {
        Self { db, monthly_limit }
    }

    fn current_month() -> String {
        Utc::now().format("%Y-%m").to_string()
    }

    pub fn status(&self) -> Result<QuotaStatus, IdentifyError> {
        let month = Self::current_month();
        let (characters_used, requests) = usage_repo::get(&self.db, &month)?;
        Ok(QuotaStatus {
            month,
            characters_used,
            requests,
            monthly_limit: self.monthly_limit,
        })
    }

    /// Counts `characters` against this month, failing when that would
    /// exceed the limit. Concurrent callers cannot both pass on the same
    /// remaining budget.
    pub fn reserve(&self, characters: u64) -> Result<QuotaReservation, IdentifyError> {
        let month = Self::current_month();
        let (used, granted) =
            usage_repo::reserve(&self.db, &month, characters, self.monthly_limit)?;
        if !granted {
            return Err(IdentifyError::QuotaExhausted {
                used,
                limit: self.monthly_limit,
            });
        }
        Ok(QuotaReservation { month, characters })
    }

    /// Returns a reservation whose request never reached the service.
    pub fn release(&self, reservation: QuotaReservation) -> Result<(), IdentifyError> {
        usage_repo::release(&self.db, &reservation.month, reservation.characters)?;
        Ok(())
    }
}

/// Characters counted against one month for a single request.
#[derive(Debug, PartialEq, Eq)]
pub struct QuotaReservation {
    month: String,
    characters: u64,
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    text: &'a str,
    source: &'a str,
    target: &'a str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translated_text: String,
}

/// Client for the literal translation service.
pub struct LiteralTranslator {
    client: Client,
    endpoint: String,
    tokens: TokenProvider,
    quota: TranslationQuota,
}

impl LiteralTranslator {
    pub fn new(
        endpoint: impl Into<String>,
        tokens: TokenProvider,
        quota: TranslationQuota,
        timeout: Duration,
    ) -> Result<Self, IdentifyError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| IdentifyError::from_reqwest(SERVICE, e))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            tokens,
            quota,
        })
    }

    pub fn quota(&self) -> &TranslationQuota {
        &self.quota
    }

    async fn send(
        &self,
        text: &str,
        source: Language,
        target: Language,
    ) -> Result<reqwest::Response, IdentifyError> {
        let token = self.tokens.bearer_token().await?;
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&TranslateRequest {
                text,
                source: source.as_str(),
                target: target.as_str(),
            })
            .send()
            .await
            .map_err(|e| IdentifyError::from_reqwest(SERVICE, e))?;

        if !response.status().is_success() {
            return Err(http_error(SERVICE, response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl Translator for LiteralTranslator {
    async fn translate(
        &self,
        text: &str,
        source: Language,
        target: Language,
    ) -> Result<String, IdentifyError> {
        let reservation = self.quota.reserve(text.chars().count() as u64)?;
        let response = match self.send(text, source, target).await {
            Ok(response) => response,
            Err(e) => {
                if let Err(release_err) = self.quota.release(reservation) {
                    log::warn!("Failed to release translation quota: {}", release_err);
                }
                return Err(e);
            }
        };

        // Billed by the service from here on, whatever the body holds.
        let body: TranslateResponse =
            response
                .json()
                .await
                .map_err(|e| IdentifyError::MalformedResponse {
                    service: SERVICE,
                    message: e.to_string(),
                })?;

        Ok(body.translated_text)
    }
}
