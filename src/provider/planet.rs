//! Planet Data API and Orders v2 API over HTTPS.
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use url::Url;

use super::{ArchiveSource, ArchiveStream, CatalogApi, OrdersApi, RemoteArchive, SearchPage};
use crate::error::{Error, ProviderError};
use crate::order::{OrderState, OrderStatus};
use crate::order_plan::OrderRequest;
use crate::search::{SceneRecord, SearchRequest};

pub const API_KEY_ENV: &str = "PL_API_KEY";
const BASE_URL: &str = "https://api.planet.com/";
const SEARCH_PATH: &str = "data/v1/quick-search";
const ORDERS_PATH: &str = "compute/ops/orders/v2";
const PAGE_SIZE: u32 = 250;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest silence tolerated on an open connection, including archive bodies.
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Planet API key. Never printed.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Uses the explicit key if given, otherwise `PL_API_KEY`.
    pub fn resolve(explicit: Option<&str>) -> Result<Self, Error> {
        explicit
            .map(str::to_owned)
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
            .map(Self)
            .ok_or(Error::MissingApiKey)
    }

    fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base: Url,
    key: ApiKey,
}

impl Client {
    pub fn new(key: ApiKey) -> Result<Self, Error> {
        let base = Url::parse(BASE_URL).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Self::with_base_url(key, base)
    }

    /// Points the client at another deployment, e.g. a local stand-in.
    pub fn with_base_url(key: ApiKey, base: Url) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Ok(Self { http, base, key })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        self.base
            .join(path)
            .map_err(|e| ProviderError::Decode(format!("Invalid endpoint {path}: {e}")))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(self.key.expose(), Some(""))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ProviderError> {
        let response = self.authorized(request).send().await?;
        check_status(response).await
    }
}

async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    let err = match ProviderError::from_status(status.as_u16(), body) {
        ProviderError::RateLimited { .. } => ProviderError::RateLimited { retry_after },
        other => other,
    };
    Err(err)
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    features: Vec<SceneRecord>,
    #[serde(rename = "_links", default)]
    links: SearchLinks,
}

#[derive(Deserialize, Default)]
struct SearchLinks {
    #[serde(rename = "_next")]
    next: Option<Url>,
}

impl From<SearchResponse> for SearchPage {
    fn from(response: SearchResponse) -> Self {
        Self {
            scenes: response.features,
            next: response.links.next,
        }
    }
}

#[derive(Deserialize)]
struct OrderResponse {
    id: String,
    state: String,
    #[serde(rename = "_links", default)]
    links: OrderLinks,
}

#[derive(Deserialize, Default)]
struct OrderLinks {
    #[serde(default)]
    results: Vec<OrderResult>,
}

#[derive(Deserialize)]
struct OrderResult {
    name: Option<String>,
    location: Url,
}

impl TryFrom<OrderResponse> for OrderStatus {
    type Error = ProviderError;

    fn try_from(response: OrderResponse) -> Result<Self, Self::Error> {
        let state: OrderState = response.state.parse()?;
        let results = response
            .links
            .results
            .into_iter()
            .map(|r| RemoteArchive {
                name: r.name,
                location: r.location,
                filesize: None,
            })
            .collect();
        Ok(OrderStatus {
            id: response.id,
            state,
            results,
        })
    }
}

/// JSON body of an order creation call.
pub fn order_body(request: &OrderRequest) -> serde_json::Value {
    json!({
        "name": request.name,
        "products": [{
            "item_ids": request.scene_ids,
            "item_type": request.item_type.key(),
            "product_bundle": request.bundle.key(),
        }],
        "delivery": {"single_archive": true, "archive_type": "zip"},
    })
}

impl CatalogApi for Client {
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage, ProviderError> {
        let mut url = self.endpoint(SEARCH_PATH)?;
        url.query_pairs_mut()
            .append_pair("_page_size", &PAGE_SIZE.to_string());
        let response: SearchResponse = self
            .send(self.http.post(url).json(request))
            .await?
            .json()
            .await?;
        Ok(response.into())
    }

    async fn next_page(&self, link: &Url) -> Result<SearchPage, ProviderError> {
        let response: SearchResponse = self
            .send(self.http.get(link.clone()))
            .await?
            .json()
            .await?;
        Ok(response.into())
    }
}

impl OrdersApi for Client {
    async fn create_order(&self, request: &OrderRequest) -> Result<OrderStatus, ProviderError> {
        let url = self.endpoint(ORDERS_PATH)?;
        let response: OrderResponse = self
            .send(self.http.post(url).json(&order_body(request)))
            .await?
            .json()
            .await?;
        response.try_into()
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderStatus, ProviderError> {
        let url = self.endpoint(&format!("{ORDERS_PATH}/{order_id}"))?;
        let response: OrderResponse = self.send(self.http.get(url)).await?.json().await?;
        response.try_into()
    }
}

impl ArchiveSource for Client {
    async fn fetch(&self, archive: &RemoteArchive) -> Result<ArchiveStream, ProviderError> {
        // Result locations are pre-signed; they still accept the API key.
        let response = self.send(self.http.get(archive.location.clone())).await?;
        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map_err(ProviderError::from)
            .boxed();
        Ok(ArchiveStream {
            content_length,
            body,
        })
    }
}
