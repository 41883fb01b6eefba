//! Historical ETH price enrichment.
//!
//! Indexer withdrawals carry no fiat value. [`PriceEnricher`] looks up the ETH/USD price for each
//! distinct withdrawal date and fills `amount_fiat` where it is missing.
//!
//! ## Rate limiting
//!
//! The public price API allows only a handful of requests per minute, so
//! [`HistoricalPriceClient`] funnels every network call through one queue lock:
//!
//! - after each successful fetch it waits the pacing delay before releasing the queue
//! - an HTTP 429 waits the backoff and retries the same date, optionally capped
//! - any other failure leaves the date unpriced and is logged, never propagated
//!
//! Successful prices are cached per calendar day for the lifetime of the client.

use crate::error::{LedgerError, LedgerResult};
use crate::models::Transaction;
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_PRICE_API: &str = "https://api.coingecko.com/api/v3";

/// Source of a USD price for ETH on a given day.
#[async_trait]
pub trait PriceLookup: Send + Sync {
    /// `None` when no price could be obtained.
    async fn price_on(&self, date: NaiveDate) -> Option<Decimal>;
}

/// Outcome of one request against a price feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedResponse {
    Price(Decimal),
    RateLimited,
    /// The feed answered but had no price for the day.
    Missing,
}

/// A single, unretried request for one day's price.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn fetch(&self, date: NaiveDate) -> LedgerResult<FeedResponse>;
}

pub struct CoinGeckoFeed {
    client: reqwest::Client,
    base_url: String,
}

impl CoinGeckoFeed {
    pub fn new(base_url: &str, timeout: Duration) -> LedgerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Config(format!("failed to build price HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn history_url(&self, date: NaiveDate) -> String {
        format!(
            "{}/coins/ethereum/history?date={}",
            self.base_url,
            date.format("%d-%m-%Y")
        )
    }
}

#[async_trait]
impl PriceFeed for CoinGeckoFeed {
    async fn fetch(&self, date: NaiveDate) -> LedgerResult<FeedResponse> {
        let url = self.history_url(date);
        debug!(%date, %url, "Requesting historical ETH price");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LedgerError::PriceLookup {
                date,
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Ok(FeedResponse::RateLimited);
        }
        if !status.is_success() {
            return Err(LedgerError::PriceLookup {
                date,
                reason: format!("HTTP {status}"),
            });
        }

        let body: Value = response.json().await.map_err(|e| LedgerError::PriceLookup {
            date,
            reason: format!("invalid JSON body: {e}"),
        })?;
        Ok(parse_history_price(&body).map_or(FeedResponse::Missing, FeedResponse::Price))
    }
}

/// `market_data.current_price.usd` from a history response.
pub fn parse_history_price(body: &Value) -> Option<Decimal> {
    let usd = body.pointer("/market_data/current_price/usd")?.as_f64()?;
    if usd <= 0.0 {
        return None;
    }
    Decimal::try_from(usd).ok()
}

#[derive(Debug, Clone)]
pub struct PricingPolicy {
    pub pacing: Duration,
    pub rate_limit_backoff: Duration,
    /// `None` retries rate-limited requests forever.
    pub max_rate_limit_retries: Option<u32>,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            pacing: Duration::from_millis(1500),
            rate_limit_backoff: Duration::from_secs(60),
            max_rate_limit_retries: None,
        }
    }
}

pub struct HistoricalPriceClient<F: PriceFeed> {
    feed: F,
    policy: PricingPolicy,
    cache: DashMap<NaiveDate, Decimal>,
    queue: Mutex<()>,
}

impl<F: PriceFeed> HistoricalPriceClient<F> {
    pub fn new(feed: F, policy: PricingPolicy) -> Self {
        Self {
            feed,
            policy,
            cache: DashMap::new(),
            queue: Mutex::new(()),
        }
    }

    pub fn cached(&self, date: NaiveDate) -> Option<Decimal> {
        self.cache.get(&date).map(|entry| *entry.value())
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    async fn fetch_with_retry(&self, date: NaiveDate) -> LedgerResult<Option<Decimal>> {
        let mut rate_limited = 0u32;
        loop {
            match self.feed.fetch(date).await? {
                FeedResponse::Price(price) => {
                    self.cache.insert(date, price);
                    debug!(%date, %price, "Fetched ETH price");
                    tokio::time::sleep(self.policy.pacing).await;
                    return Ok(Some(price));
                }
                FeedResponse::Missing => {
                    warn!(%date, "Price feed returned no price");
                    return Ok(None);
                }
                FeedResponse::RateLimited => {
                    rate_limited += 1;
                    if let Some(max) = self.policy.max_rate_limit_retries {
                        if rate_limited > max {
                            return Err(LedgerError::RateLimitExhausted {
                                date,
                                attempts: rate_limited,
                            });
                        }
                    }
                    warn!(
                        %date,
                        backoff_secs = self.policy.rate_limit_backoff.as_secs(),
                        "Price API rate limit hit, backing off"
                    );
                    tokio::time::sleep(self.policy.rate_limit_backoff).await;
                }
            }
        }
    }
}

#[async_trait]
impl<F: PriceFeed> PriceLookup for HistoricalPriceClient<F> {
    async fn price_on(&self, date: NaiveDate) -> Option<Decimal> {
        if let Some(price) = self.cached(date) {
            return Some(price);
        }

        let _queue = self.queue.lock().await;
        // Another caller may have fetched this day while we waited.
        if let Some(price) = self.cached(date) {
            return Some(price);
        }

        match self.fetch_with_retry(date).await {
            Ok(price) => price,
            Err(e) => {
                warn!(%date, error = %e, "ETH price unavailable");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentStats {
    pub dates_requested: usize,
    pub dates_priced: usize,
    pub records_priced: usize,
    pub records_unpriced: usize,
}

/// Fills missing fiat values from a [`PriceLookup`].
pub struct PriceEnricher<'a> {
    lookup: &'a dyn PriceLookup,
    batch_size: usize,
}

impl<'a> PriceEnricher<'a> {
    pub fn new(lookup: &'a dyn PriceLookup) -> Self {
        Self { lookup, batch_size: 5 }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set `amount_fiat = amount_primary * price` on records that have no fiat yet.
    ///
    /// Records without a date, or whose date has no price, stay unpriced.
    pub async fn enrich(&self, records: &mut [Transaction]) -> EnrichmentStats {
        let dates: Vec<NaiveDate> = records
            .iter()
            .filter(|r| r.amount_fiat.is_none())
            .filter_map(Transaction::date)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if !dates.is_empty() {
            info!(dates = dates.len(), "Looking up historical ETH prices");
        }

        let mut prices: HashMap<NaiveDate, Decimal> = HashMap::new();
        for batch in dates.chunks(self.batch_size) {
            let lookups = batch.iter().map(|&date| async move { (date, self.lookup.price_on(date).await) });
            for (date, price) in join_all(lookups).await {
                if let Some(price) = price {
                    prices.insert(date, price);
                }
            }
        }

        let mut stats = EnrichmentStats {
            dates_requested: dates.len(),
            dates_priced: prices.len(),
            ..Default::default()
        };
        for record in records.iter_mut().filter(|r| r.amount_fiat.is_none()) {
            let Some(price) = record.date().and_then(|d| prices.get(&d)) else {
                stats.records_unpriced += 1;
                continue;
            };
            match record.amount_primary.checked_mul(*price) {
                Some(fiat) => {
                    record.amount_fiat = Some(fiat);
                    stats.records_priced += 1;
                }
                None => {
                    warn!(amount = %record.amount_primary, %price, "Fiat value overflows, leaving record unpriced");
                    stats.records_unpriced += 1;
                }
            }
        }
        stats
    }
}
