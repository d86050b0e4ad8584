//! Interfaces to the remote catalog and ordering service.
use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ProviderError;
use crate::order::OrderStatus;
use crate::order_plan::OrderRequest;
use crate::search::{SceneRecord, SearchRequest};

pub mod planet;

/// A downloadable archive listed in a completed order.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct RemoteArchive {
    pub name: Option<String>,
    pub location: Url,
    pub filesize: Option<u64>,
}

pub struct SearchPage {
    pub scenes: Vec<SceneRecord>,
    pub next: Option<Url>,
}

/// Streamed archive body and its announced length.
pub struct ArchiveStream {
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes, ProviderError>>,
}

pub trait CatalogApi {
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage, ProviderError>;

    async fn next_page(&self, link: &Url) -> Result<SearchPage, ProviderError>;
}

pub trait OrdersApi {
    /// Submits an order; the returned status carries the assigned id.
    async fn create_order(&self, request: &OrderRequest) -> Result<OrderStatus, ProviderError>;

    async fn get_order(&self, order_id: &str) -> Result<OrderStatus, ProviderError>;
}

pub trait ArchiveSource {
    async fn fetch(&self, archive: &RemoteArchive) -> Result<ArchiveStream, ProviderError>;
}
