//! Application Services
//!
//! Request/response correlation and long-lived feeds on top of the
//! Connection Manager, plus typed market data calls.

pub mod correlator;
pub mod feed;
pub mod market_data;

pub use correlator::{RequestCorrelator, RequestError};
pub use feed::{FeedError, FeedSubscription, subscribe_to_feed};
pub use market_data::MarketDataService;
