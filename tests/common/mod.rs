#![allow(dead_code)]
//! In-memory stand-in for the Planet APIs.
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use geojson::{Geometry, Value as GeoValue};
use serde_json::{json, Map};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use planet_acquire::error::ProviderError;
use planet_acquire::order::{OrderHandle, OrderState, OrderStatus};
use planet_acquire::order_plan::OrderRequest;
use planet_acquire::provider::{
    ArchiveSource, ArchiveStream, CatalogApi, OrdersApi, RemoteArchive, SearchPage,
};
use planet_acquire::search::{SceneRecord, SearchRequest};

pub fn unit_square() -> serde_json::Value {
    json!({
        "type": "Polygon",
        "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
    })
}

pub fn scene(id: &str, item_type: &str) -> SceneRecord {
    let mut properties = Map::new();
    properties.insert("item_type".to_string(), json!(item_type));
    properties.insert("cloud_cover".to_string(), json!(0.1));
    SceneRecord {
        scene_id: id.to_string(),
        item_type: item_type.to_string(),
        geometry: Some(Geometry::new(GeoValue::Polygon(vec![vec![
            vec![0.0, 0.0],
            vec![0.5, 0.0],
            vec![0.5, 0.5],
            vec![0.0, 0.0],
        ]]))),
        properties,
    }
}

pub fn scenes(n: usize) -> Vec<SceneRecord> {
    (0..n)
        .map(|i| scene(&format!("2020010{}_{i:06}", i % 9 + 1), "PSScene"))
        .collect()
}

pub fn archive(order_id: &str, index: usize) -> RemoteArchive {
    RemoteArchive {
        name: Some(format!("{order_id}/PSScene/{order_id}_{index}.zip")),
        location: Url::parse(&format!("https://fake.test/{order_id}/{index}")).unwrap(),
        filesize: None,
    }
}

/// Handle that has already reached `state`, with `archives` results.
pub fn handle(order_id: &str, state: OrderState, archives: usize) -> OrderHandle {
    let mut handle = OrderHandle::new(order_id);
    handle.observe(OrderStatus {
        id: order_id.to_string(),
        state,
        results: (0..archives).map(|i| archive(order_id, i)).collect(),
    });
    handle
}

pub fn archive_body(archive: &RemoteArchive) -> Vec<u8> {
    format!("PK archive bytes for {}", archive.location)
        .repeat(64)
        .into_bytes()
}

/// Tracks how many calls of one kind are running at once.
#[derive(Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct FakePlanet {
    pub scenes: Vec<SceneRecord>,
    pub page_size: usize,
    pub search_failures: Mutex<VecDeque<ProviderError>>,
    pub create_failures: Mutex<VecDeque<ProviderError>>,
    pub poll_failures: Mutex<VecDeque<ProviderError>>,
    /// States reported by successive polls of every order.
    pub script: Vec<OrderState>,
    /// Per-order scripts, keyed by submission number (1-based).
    pub scripts: HashMap<usize, Vec<OrderState>>,
    /// State reported at creation, keyed by submission number; queued otherwise.
    pub created: HashMap<usize, OrderState>,
    /// Status requests never return.
    pub hang_polls: bool,
    /// Time spent inside every poll and fetch.
    pub latency: Duration,
    pub polls_in_flight: Gauge,
    pub fetches_in_flight: Gauge,
    pub archives_per_order: usize,
    /// Archive locations whose transfer breaks halfway.
    pub broken_archives: HashSet<String>,
    /// Locations that report more bytes than they send.
    pub short_archives: HashSet<String>,
    pub orders: Mutex<HashMap<String, VecDeque<OrderState>>>,
    pub submitted: Mutex<Vec<OrderRequest>>,
    pub search_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
}

impl Default for FakePlanet {
    fn default() -> Self {
        Self {
            scenes: vec![],
            page_size: 250,
            search_failures: Mutex::new(VecDeque::new()),
            create_failures: Mutex::new(VecDeque::new()),
            poll_failures: Mutex::new(VecDeque::new()),
            script: vec![OrderState::Running, OrderState::Success],
            scripts: HashMap::new(),
            created: HashMap::new(),
            hang_polls: false,
            latency: Duration::ZERO,
            polls_in_flight: Gauge::default(),
            fetches_in_flight: Gauge::default(),
            archives_per_order: 1,
            broken_archives: HashSet::new(),
            short_archives: HashSet::new(),
            orders: Mutex::new(HashMap::new()),
            submitted: Mutex::new(vec![]),
            search_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }
}

impl FakePlanet {
    pub fn with_scenes(scenes: Vec<SceneRecord>) -> Self {
        Self {
            scenes,
            ..Self::default()
        }
    }

    pub fn network_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
            + self.create_calls.load(Ordering::SeqCst)
            + self.poll_calls.load(Ordering::SeqCst)
            + self.fetch_calls.load(Ordering::SeqCst)
    }

    fn page(&self, page: usize) -> SearchPage {
        let start = page * self.page_size;
        let end = (start + self.page_size).min(self.scenes.len());
        let scenes = self.scenes.get(start..end).unwrap_or_default().to_vec();
        let next = (end < self.scenes.len())
            .then(|| Url::parse(&format!("https://fake.test/search?page={}", page + 1)).unwrap());
        SearchPage { scenes, next }
    }

    fn status(&self, order_id: &str, state: OrderState) -> OrderStatus {
        let results = if state.is_downloadable() {
            (0..self.archives_per_order)
                .map(|i| archive(order_id, i))
                .collect()
        } else {
            vec![]
        };
        OrderStatus {
            id: order_id.to_string(),
            state,
            results,
        }
    }
}

impl CatalogApi for FakePlanet {
    async fn search(&self, _request: &SearchRequest) -> Result<SearchPage, ProviderError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.search_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.page(0))
    }

    async fn next_page(&self, link: &Url) -> Result<SearchPage, ProviderError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let page = link
            .query_pairs()
            .find(|(k, _)| k == "page")
            .and_then(|(_, v)| v.parse().ok())
            .ok_or_else(|| ProviderError::Decode(format!("bad page link {link}")))?;
        Ok(self.page(page))
    }
}

impl OrdersApi for FakePlanet {
    async fn create_order(&self, request: &OrderRequest) -> Result<OrderStatus, ProviderError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = self.create_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.submitted.lock().unwrap().push(request.clone());
        let order_id = format!("order-{n}");
        let script = self.scripts.get(&n).unwrap_or(&self.script).clone();
        self.orders
            .lock()
            .unwrap()
            .insert(order_id.clone(), script.into());
        let state = self.created.get(&n).copied().unwrap_or(OrderState::Queued);
        Ok(self.status(&order_id, state))
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderStatus, ProviderError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_polls {
            std::future::pending::<()>().await;
        }
        self.polls_in_flight.enter();
        tokio::time::sleep(self.latency).await;
        self.polls_in_flight.exit();
        if let Some(err) = self.poll_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let mut orders = self.orders.lock().unwrap();
        let script = orders
            .get_mut(order_id)
            .ok_or_else(|| ProviderError::Rejected {
                status: 404,
                message: format!("no order {order_id}"),
            })?;
        let state = if script.len() > 1 {
            script.pop_front().unwrap_or(OrderState::Queued)
        } else {
            script.front().copied().unwrap_or(OrderState::Queued)
        };
        Ok(self.status(order_id, state))
    }
}

impl ArchiveSource for FakePlanet {
    async fn fetch(&self, archive: &RemoteArchive) -> Result<ArchiveStream, ProviderError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetches_in_flight.enter();
        tokio::time::sleep(self.latency).await;
        self.fetches_in_flight.exit();
        let body = archive_body(archive);
        let total = body.len() as u64;
        let (head, tail) = body.split_at(body.len() / 2);
        let location = archive.location.to_string();

        let chunks: Vec<Result<Bytes, ProviderError>> = if self.broken_archives.contains(&location) {
            vec![
                Ok(Bytes::copy_from_slice(head)),
                Err(ProviderError::Unreachable("connection reset".to_string())),
            ]
        } else if self.short_archives.contains(&location) {
            vec![Ok(Bytes::copy_from_slice(head))]
        } else {
            vec![Ok(Bytes::copy_from_slice(head)), Ok(Bytes::copy_from_slice(tail))]
        };

        Ok(ArchiveStream {
            content_length: Some(total),
            body: stream::iter(chunks).boxed(),
        })
    }
}
