//! Lifecycle of a single remote order.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::ProviderError;
use crate::provider::RemoteArchive;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Queued,
    Running,
    Success,
    Failed,
    Partial,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Partial)
    }

    /// Success and partial orders have archives worth fetching.
    pub fn is_downloadable(&self) -> bool {
        matches!(self, Self::Success | Self::Partial)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Success | Self::Failed | Self::Partial => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Partial => "partial",
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderState {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" | "cancelled" => Ok(Self::Failed),
            "partial" => Ok(Self::Partial),
            other => Err(ProviderError::Decode(format!("Unknown order state: {other}"))),
        }
    }
}

/// Status snapshot returned by the remote service for one order.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderStatus {
    pub id: String,
    pub state: OrderState,
    pub results: Vec<RemoteArchive>,
}

/// Value object for a submitted order. Created queued on submission and then
/// advanced by `observe`; once terminal it never changes again.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderHandle {
    pub order_id: String,
    pub state: OrderState,
    pub result_urls: Vec<RemoteArchive>,
    history: Vec<OrderState>,
}

impl OrderHandle {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            state: OrderState::Queued,
            result_urls: vec![],
            history: vec![OrderState::Queued],
        }
    }

    /// Builds a handle from the status returned at submission time.
    pub fn submitted(status: OrderStatus) -> Self {
        let mut handle = Self::new(status.id.clone());
        handle.observe(status);
        handle
    }

    /// States this handle has moved through, oldest first.
    pub fn history(&self) -> &[OrderState] {
        &self.history
    }

    /// Applies a polled status. Regressions (e.g. running after success)
    /// are ignored so the observed sequence stays monotonic. Returns whether
    /// the state changed.
    pub fn observe(&mut self, status: OrderStatus) -> bool {
        if status.id != self.order_id {
            warn!(
                order_id = %self.order_id,
                reported_id = %status.id,
                "Ignoring status for a different order"
            );
            return false;
        }

        if self.state.is_terminal() || status.state.rank() < self.state.rank() {
            if status.state != self.state {
                warn!(
                    order_id = %self.order_id,
                    current = %self.state,
                    reported = %status.state,
                    "Ignoring out-of-order state report"
                );
            }
            return false;
        }

        if status.state.is_terminal() {
            self.result_urls = status.results;
        }

        if status.state == self.state {
            return false;
        }

        self.state = status.state;
        self.history.push(status.state);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(state: OrderState) -> OrderStatus {
        OrderStatus {
            id: "order-1".to_string(),
            state,
            results: vec![],
        }
    }

    #[test]
    fn test_state_from_str() {
        assert_eq!("running".parse::<OrderState>().unwrap(), OrderState::Running);
        assert_eq!("cancelled".parse::<OrderState>().unwrap(), OrderState::Failed);
        assert!("finishing".parse::<OrderState>().is_err());
    }

    #[test]
    fn test_handle_follows_lifecycle() {
        let mut handle = OrderHandle::new("order-1");
        assert!(handle.observe(status(OrderState::Running)));
        assert!(!handle.observe(status(OrderState::Running)));
        assert!(handle.observe(status(OrderState::Success)));
        assert_eq!(
            handle.history(),
            &[OrderState::Queued, OrderState::Running, OrderState::Success]
        );
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut handle = OrderHandle::new("order-1");
        handle.observe(status(OrderState::Success));
        assert!(!handle.observe(status(OrderState::Running)));
        assert!(!handle.observe(status(OrderState::Failed)));
        assert_eq!(handle.state, OrderState::Success);
        assert_eq!(handle.history(), &[OrderState::Queued, OrderState::Success]);
    }

    #[test]
    fn test_running_does_not_regress_to_queued() {
        let mut handle = OrderHandle::new("order-1");
        handle.observe(status(OrderState::Running));
        assert!(!handle.observe(status(OrderState::Queued)));
        assert_eq!(handle.state, OrderState::Running);
    }

    #[test]
    fn test_status_for_other_order_is_ignored() {
        let mut handle = OrderHandle::new("order-1");
        let other = OrderStatus {
            id: "order-2".to_string(),
            state: OrderState::Success,
            results: vec![],
        };
        assert!(!handle.observe(other));
        assert_eq!(handle.state, OrderState::Queued);
    }
}
