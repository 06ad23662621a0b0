// SPDX-License-Identifier: MIT

//! Restaurant search collaborator
//!
//! Wraps the HotPepper gourmet web service behind the
//! [`GourmetSearch`] trait so agent steps stay independent of the
//! concrete HTTP API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::engine::StepError;

const HOTPEPPER_ENDPOINT: &str = "http://webservice.recruit.co.jp/hotpepper/gourmet/v1/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Search parameters extracted from the user's request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Place or station name
    pub area: String,
    /// Restrict to places serving lunch
    pub lunch_only: bool,
    /// Maximum number of records
    pub count: u32,
}

impl SearchQuery {
    pub fn new(area: &str, lunch_only: bool) -> Self {
        Self {
            area: area.to_string(),
            lunch_only,
            count: 10,
        }
    }
}

/// One restaurant record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Restaurant {
    pub id: String,
    pub name: String,
    pub address: String,
    pub genre: String,
    pub budget: String,
    pub url: String,
    pub catch: String,
}

/// Search failures
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("API key not configured: {0}")]
    ApiKeyMissing(String),

    #[error("search API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid search response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl From<SearchError> for StepError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::ApiKeyMissing(_) => StepError::fatal(err.to_string()),
            other => StepError::transient(other.to_string()),
        }
    }
}

/// Restaurant search backend
#[async_trait]
pub trait GourmetSearch: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Restaurant>, SearchError>;
}

/// HotPepper gourmet v1 client
pub struct HotPepperClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl HotPepperClient {
    /// Create a client; requires `HOTPEPPER_API_KEY`
    pub fn new() -> Result<Self, SearchError> {
        let api_key = env::var("HOTPEPPER_API_KEY")
            .map_err(|_| SearchError::ApiKeyMissing("HOTPEPPER_API_KEY".to_string()))?;
        Ok(Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key,
            endpoint: HOTPEPPER_ENDPOINT.to_string(),
        })
    }

    fn parse_shops(body: &Value) -> Result<Vec<Restaurant>, SearchError> {
        let shops = body
            .get("results")
            .and_then(|r| r.get("shop"))
            .and_then(|s| s.as_array())
            .ok_or_else(|| {
                SearchError::InvalidResponse("missing results.shop in response".to_string())
            })?;

        Ok(shops.iter().map(Self::parse_shop).collect())
    }

    fn parse_shop(shop: &Value) -> Restaurant {
        let text = |v: &Value| v.as_str().unwrap_or("").to_string();
        Restaurant {
            id: text(&shop["id"]),
            name: text(&shop["name"]),
            address: text(&shop["address"]),
            genre: text(&shop["genre"]["name"]),
            budget: text(&shop["budget"]["average"]),
            url: text(&shop["urls"]["pc"]),
            catch: text(&shop["catch"]),
        }
    }
}

#[async_trait]
impl GourmetSearch for HotPepperClient {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Restaurant>, SearchError> {
        let mut params = vec![
            ("key", self.api_key.clone()),
            ("format", "json".to_string()),
            ("count", query.count.to_string()),
            ("keyword", query.area.clone()),
        ];
        if query.lunch_only {
            params.push(("lunch", "1".to_string()));
        }

        log::info!(
            "gourmet search: area='{}' lunch_only={}",
            query.area,
            query.lunch_only
        );

        let resp = self.client.get(&self.endpoint).query(&params).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(SearchError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = resp.json().await?;
        Self::parse_shops(&body)
    }
}
