//! Card catalog lookups.
//!
//! The catalog is the authority for canonical card ids. The worker uses it
//! to pre-match extracted fields, to enrich AI candidates with ids, and as
//! the manual search fallback.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::IdentifyError;
use crate::identify::http_error;
use crate::types::{CardQuery, CardRecord};

const SERVICE: &str = "catalog";

/// Upper bound on results for one search.
pub const MAX_SEARCH_LIMIT: u32 = 100;

const DEFAULT_SEARCH_LIMIT: u32 = 20;

#[async_trait]
pub trait CardCatalog: Send + Sync {
    async fn get_card(&self, id: &str) -> Result<Option<CardRecord>, IdentifyError>;

    async fn search(&self, query: &CardQuery) -> Result<Vec<CardRecord>, IdentifyError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<CardRecord>,
}

/// REST catalog client.
///
/// `GET {base}/cards/{id}` and `GET {base}/cards?game=&name=&set_code=&number=&limit=`.
pub struct HttpCardCatalog {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpCardCatalog {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, IdentifyError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| IdentifyError::from_reqwest(SERVICE, e))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.api_key {
            Some(key) => request.header("X-Api-Key", key.expose_secret()),
            None => request,
        }
    }
}

#[async_trait]
impl CardCatalog for HttpCardCatalog {
    async fn get_card(&self, id: &str) -> Result<Option<CardRecord>, IdentifyError> {
        let url = format!("{}/cards/{}", self.base_url, id);
        let response = self
            .get(&url)
            .send()
            .await
            .map_err(|e| IdentifyError::from_reqwest(SERVICE, e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(http_error(SERVICE, response).await);
        }

        let card = response
            .json::<CardRecord>()
            .await
            .map_err(|e| IdentifyError::MalformedResponse {
                service: SERVICE,
                message: e.to_string(),
            })?;
        Ok(Some(card))
    }

    async fn search(&self, query: &CardQuery) -> Result<Vec<CardRecord>, IdentifyError> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT)
            .to_string();
        let mut params: Vec<(&str, &str)> = vec![("limit", &limit)];
        if let Some(game) = query.game {
            params.push(("game", game.as_str()));
        }
        if let Some(name) = query.name.as_deref() {
            params.push(("name", name));
        }
        if let Some(set_code) = query.set_code.as_deref() {
            params.push(("set_code", set_code));
        }
        if let Some(number) = query.number.as_deref() {
            params.push(("number", number));
        }

        let url = format!("{}/cards", self.base_url);
        let response = self
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| IdentifyError::from_reqwest(SERVICE, e))?;

        if !response.status().is_success() {
            return Err(http_error(SERVICE, response).await);
        }

        let body = response
            .json::<SearchResponse>()
            .await
            .map_err(|e| IdentifyError::MalformedResponse {
                service: SERVICE,
                message: e.to_string(),
            })?;
        log::debug!("Catalog search returned {} cards", body.data.len());
        Ok(body.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_stub;
    use crate::types::Game;
    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    fn charizard() -> CardRecord {
        CardRecord {
            id: "swsh4-25".into(),
            name: "Charizard".into(),
            game: Some(Game::Pokemon),
            set_code: Some("swsh4".into()),
            number: Some("25".into()),
            ..Default::default()
        }
    }

    async fn stub() -> String {
        let app = Router::new()
            .route(
                "/cards/:id",
                get(|Path(id): Path<String>| async move {
                    if id == "swsh4-25" {
                        Ok(Json(charizard()))
                    } else {
                        Err(AxumStatus::NOT_FOUND)
                    }
                }),
            )
            .route(
                "/cards",
                get(
                    |headers: HeaderMap, Query(params): Query<HashMap<String, String>>| async move {
                        if headers.get("X-Api-Key").map(|v| v.as_bytes()) == Some(&b"bad"[..]) {
                            return Err(AxumStatus::UNAUTHORIZED);
                        }
                        let data = if params.get("name").map(String::as_str) == Some("Charizard")
                            && params.get("game").map(String::as_str) == Some("pokemon")
                        {
                            vec![charizard()]
                        } else {
                            vec![]
                        };
                        Ok(Json(serde_json::json!({ "data": data })))
                    },
                ),
            );
        spawn_stub(app).await
    }

    #[tokio::test]
    async fn test_get_card_found_and_missing() {
        let base = stub().await;
        let catalog = HttpCardCatalog::new(base, None, Duration::from_secs(5)).unwrap();
        assert_eq!(catalog.get_card("swsh4-25").await.unwrap(), Some(charizard()));
        assert_eq!(catalog.get_card("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_search_passes_filters() {
        let base = stub().await;
        let catalog = HttpCardCatalog::new(base, None, Duration::from_secs(5)).unwrap();
        let query = CardQuery {
            game: Some(Game::Pokemon),
            name: Some("Charizard".into()),
            ..Default::default()
        };
        let cards = catalog.search(&query).await.unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].id, "swsh4-25");

        let query = CardQuery {
            name: Some("Charizard".into()),
            ..Default::default()
        };
        assert!(catalog.search(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_error_status_is_upstream_error() {
        let base = stub().await;
        let catalog = HttpCardCatalog::new(
            base,
            Some(SecretString::from("bad".to_string())),
            Duration::from_secs(5),
        )
        .unwrap();
        let err = catalog.search(&CardQuery::default()).await.unwrap_err();
        assert!(matches!(err, IdentifyError::Http { status: 401, .. }));
        assert_eq!(err.code(), crate::error::ErrorCode::UpstreamError);
    }
}
