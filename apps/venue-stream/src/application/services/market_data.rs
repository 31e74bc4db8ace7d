//! Market Data Service
//!
//! Typed calls over the correlator and feed subscriptions: keep-alive ping,
//! the active symbol list, exchange rates and tick streams.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use super::correlator::{RequestCorrelator, RequestError};
use super::feed::{FeedError, FeedSubscription, subscribe_to_feed};
use crate::domain::frame::{InboundFrame, OutboundFrame, PassthroughTag};
use crate::domain::market::{
    ActiveSymbol, ActiveSymbolsRequest, ExchangeRates, Tick, exchange_rates_frame, ticks_frame,
};
use crate::infrastructure::connection::{ConnectionError, ConnectionManager};

/// Market data over the shared venue connection.
#[derive(Debug, Clone)]
pub struct MarketDataService {
    correlator: RequestCorrelator,
}

impl MarketDataService {
    /// Create the service. `request_timeout` applies to every one-shot call.
    #[must_use]
    pub const fn new(connection: ConnectionManager, request_timeout: Duration) -> Self {
        Self {
            correlator: RequestCorrelator::new(connection, request_timeout),
        }
    }

    /// The underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &ConnectionManager {
        self.correlator.connection()
    }

    /// Round-trip a ping. Resolves with the venue's reply (`"pong"`).
    ///
    /// # Errors
    ///
    /// Returns a `RequestError` if the request fails or the reply is not a string.
    pub async fn ping(&self) -> Result<String, RequestError> {
        let frame = self.call(OutboundFrame::new().with("ping", 1)).await?;
        decode(&frame)
    }

    /// Fetch the tradable symbol list.
    ///
    /// # Errors
    ///
    /// Returns a `RequestError` if the request fails or the list does not decode.
    pub async fn active_symbols(
        &self,
        request: &ActiveSymbolsRequest,
    ) -> Result<Vec<ActiveSymbol>, RequestError> {
        let frame = self.call(request.to_frame()).await?;
        let symbols: Vec<ActiveSymbol> = decode(&frame)?;
        tracing::debug!(count = symbols.len(), "Active symbols received");
        Ok(symbols)
    }

    /// Fetch current rates for `base_currency`.
    ///
    /// # Errors
    ///
    /// Returns a `RequestError` if the request fails or the rates do not decode.
    pub async fn exchange_rates(&self, base_currency: &str) -> Result<ExchangeRates, RequestError> {
        let frame = self.call(exchange_rates_frame(base_currency, None)).await?;
        decode(&frame)
    }

    /// Stream rates for `base_currency`, optionally narrowed to one target.
    ///
    /// # Errors
    ///
    /// Returns a `ConnectionError` if the request cannot be queued.
    pub fn subscribe_exchange_rates<U, E>(
        &self,
        base_currency: &str,
        target_currency: Option<&str>,
        on_update: U,
        on_error: E,
    ) -> Result<FeedSubscription, ConnectionError>
    where
        U: Fn(ExchangeRates) + Send + Sync + 'static,
        E: Fn(FeedError) + Send + Sync + 'static,
    {
        let payload = exchange_rates_frame(base_currency, target_currency).with("subscribe", 1);
        self.subscribe_decoded(payload, on_update, on_error)
    }

    /// Stream ticks for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns a `ConnectionError` if the request cannot be queued.
    pub fn subscribe_ticks<U, E>(
        &self,
        symbol: &str,
        on_update: U,
        on_error: E,
    ) -> Result<FeedSubscription, ConnectionError>
    where
        U: Fn(Tick) + Send + Sync + 'static,
        E: Fn(FeedError) + Send + Sync + 'static,
    {
        self.subscribe_decoded(ticks_frame(symbol), on_update, on_error)
    }

    async fn call(&self, payload: OutboundFrame) -> Result<InboundFrame, RequestError> {
        self.correlator
            .request_tagged(payload, self.correlator.default_timeout())
            .await
    }

    fn subscribe_decoded<T, U, E>(
        &self,
        mut payload: OutboundFrame,
        on_update: U,
        on_error: E,
    ) -> Result<FeedSubscription, ConnectionError>
    where
        T: DeserializeOwned + 'static,
        U: Fn(T) + Send + Sync + 'static,
        E: Fn(FeedError) + Send + Sync + 'static,
    {
        let tag = PassthroughTag::generate();
        payload.set_passthrough(&tag);

        let on_error = Arc::new(on_error);
        let decode_error = Arc::clone(&on_error);

        subscribe_to_feed(
            self.connection(),
            payload,
            move |frame| tag.matches(frame),
            move |frame| match frame.decode_payload::<T>() {
                Ok(update) => on_update(update),
                Err(e) => decode_error(FeedError::Decode(e.to_string())),
            },
            move |error| on_error(error),
        )
    }
}

fn decode<T: DeserializeOwned>(frame: &InboundFrame) -> Result<T, RequestError> {
    frame
        .decode_payload()
        .map_err(|e| RequestError::Decode(format!("{}: {e}", frame.msg_type().unwrap_or("unknown"))))
}
