//! Submission of order requests and waiting for their completion.
use futures_util::stream::{self, StreamExt};
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::OrderError;
use crate::order::{OrderHandle, OrderState};
use crate::order_plan::OrderRequest;
use crate::provider::OrdersApi;
use crate::retry::{with_retry, RetryDecision, RetryPolicy};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// What happened to one request. `handle` is `None` only when submission
/// itself failed.
#[derive(Clone, Debug)]
pub struct OrderReport {
    pub request: OrderRequest,
    pub handle: Option<OrderHandle>,
    pub error: Option<OrderError>,
}

impl OrderReport {
    pub fn is_downloadable(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|h| h.state.is_downloadable())
    }
}

#[derive(Clone, Debug)]
pub struct CoordinatorOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// Orders in flight at once; 1 submits and waits sequentially.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            concurrency: 4,
            retry: RetryPolicy::default(),
        }
    }
}

pub struct OrderCoordinator<'a, O> {
    api: &'a O,
    options: CoordinatorOptions,
}

impl<'a, O: OrdersApi> OrderCoordinator<'a, O> {
    pub fn new(api: &'a O, options: CoordinatorOptions) -> Self {
        Self { api, options }
    }

    /// Submits every request and waits for each order to finish. Reports are
    /// returned in request order; a problem with one order never stops the
    /// others.
    pub async fn submit_and_wait(&self, requests: Vec<OrderRequest>) -> Vec<OrderReport> {
        let total = requests.len();
        stream::iter(requests.into_iter().enumerate())
            .map(|(index, request)| self.run(index, total, request))
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await
    }

    async fn run(&self, index: usize, total: usize, request: OrderRequest) -> OrderReport {
        let handle = match self.submit(&request).await {
            Ok(handle) => handle,
            Err(error) => {
                warn!(
                    order = index + 1,
                    total,
                    item_type = %request.item_type,
                    bundle = %request.bundle,
                    error = %error,
                    "Order submission failed"
                );
                return OrderReport {
                    request,
                    handle: None,
                    error: Some(error),
                };
            }
        };
        info!(
            order = index + 1,
            total,
            order_id = %handle.order_id,
            scenes = request.scene_ids.len(),
            "Created order"
        );

        let (handle, error) = self.wait(handle).await;
        OrderReport {
            request,
            handle: Some(handle),
            error,
        }
    }

    /// Submits one request; transient failures are retried per the policy.
    pub async fn submit(&self, request: &OrderRequest) -> Result<OrderHandle, OrderError> {
        let status = with_retry(&self.options.retry, "create order", || {
            self.api.create_order(request)
        })
        .await
        .map_err(OrderError::Submission)?;
        Ok(OrderHandle::submitted(status))
    }

    /// Polls until the order is terminal or the timeout passes. On timeout
    /// the handle keeps its last observed state.
    pub async fn wait(&self, mut handle: OrderHandle) -> (OrderHandle, Option<OrderError>) {
        let started = Instant::now();
        let deadline = started + self.options.timeout;
        let mut failures = 0;

        loop {
            if handle.state.is_terminal() {
                let error = match handle.state {
                    OrderState::Failed => Some(OrderError::Failed {
                        order_id: handle.order_id.clone(),
                        state: handle.state,
                    }),
                    OrderState::Partial => {
                        warn!(order_id = %handle.order_id, "Order finished partially");
                        None
                    }
                    _ => None,
                };
                info!(order_id = %handle.order_id, state = %handle.state, "Order finished");
                return (handle, error);
            }

            let now = Instant::now();
            if now >= deadline {
                let error = OrderError::Timeout {
                    order_id: handle.order_id.clone(),
                    last_state: handle.state,
                    waited: now - started,
                };
                warn!(order_id = %handle.order_id, state = %handle.state, "Timed out waiting for order");
                return (handle, Some(error));
            }

            sleep(self.options.poll_interval.min(deadline - now)).await;

            let remaining = deadline.saturating_duration_since(Instant::now());
            let polled = match timeout(remaining, self.api.get_order(&handle.order_id)).await {
                Ok(polled) => polled,
                Err(_) => {
                    warn!(order_id = %handle.order_id, state = %handle.state, "Order status request outlived the timeout");
                    let error = OrderError::Timeout {
                        order_id: handle.order_id.clone(),
                        last_state: handle.state,
                        waited: started.elapsed(),
                    };
                    return (handle, Some(error));
                }
            };

            match polled {
                Ok(status) => {
                    failures = 0;
                    if handle.observe(status) {
                        debug!(order_id = %handle.order_id, state = %handle.state, "Order state changed");
                    }
                }
                Err(err) => {
                    failures += 1;
                    if let RetryDecision::GiveUp = self.options.retry.decide(failures, &err) {
                        warn!(order_id = %handle.order_id, error = %err, "Unable to poll order");
                        let error = OrderError::Status {
                            order_id: handle.order_id.clone(),
                            source: err,
                        };
                        return (handle, Some(error));
                    }
                    debug!(order_id = %handle.order_id, error = %err, "Transient poll failure");
                }
            }
        }
    }
}
