#![allow(async_fn_in_trait)]
pub mod acquisition;
pub mod config;
pub mod coordinator;
pub mod download;
pub mod error;
pub mod geometry;
pub mod item_type;
pub mod logging;
pub mod metadata;
pub mod order;
pub mod order_plan;
pub mod provider;
pub mod retry;
pub mod search;

pub use error::{Error, Result};
