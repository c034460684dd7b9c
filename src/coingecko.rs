use std::collections::VecDeque;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::price_history::{daily_prices, HistoricalPrices, PriceRequirements};

const API_BASE: &str = "https://api.coingecko.com/api/v3";

/// Extra days requested beyond the oldest date that needs a price.
const HISTORY_MARGIN_DAYS: i64 = 10;

/// Maps a ticker symbol to the coin id CoinGecko uses for it.
pub(crate) fn coin_id(symbol: &str) -> Option<&'static str> {
    let id = match symbol {
        "ADA" => "cardano",
        "AVAX" => "avalanche-2",
        "AXS" => "axie-infinity",
        "BNB" => "bnb",
        "BSGG" => "betswap-gg",
        "BTC" => "bitcoin",
        "CRO" => "crypto-com-chain",
        "DOGE" => "dogecoin",
        "DOT" => "polkadot",
        "ENJ" => "enjincoin",
        "ETH" => "ethereum",
        "FLOW" => "flow",
        "FWT" => "freeway",
        "GOHM" => "governance-ohm",
        "MANA" => "decentraland",
        "MATIC" => "matic-network",
        "NEXO" => "nexo",
        "SAND" => "the-sandbox",
        "SOL" => "solana",
        "TIME" => "wonderland",
        "WMEMO" => "wrapped-memory",
        _ => return None,
    };
    Some(id)
}

// {"prices":[[1634774401000,32000.5],...],"market_caps":[...],"total_volumes":[...]}
#[derive(Debug, Deserialize)]
struct MarketChartResponse {
    prices: Vec<[f64; 2]>,
}

/// Client side throttle for the public API, which allows only a handful of
/// calls per minute.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    calls: VecDeque<Instant>,
    window: Duration,
    max_calls: usize,
    pause: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), 6, Duration::from_secs(8))
    }
}

impl RateLimiter {
    pub fn new(window: Duration, max_calls: usize, pause: Duration) -> Self {
        Self { calls: VecDeque::new(), window, max_calls, pause }
    }

    /// Records a call made at `now` and returns how long to wait before
    /// making it.
    fn register(&mut self, now: Instant) -> Option<Duration> {
        while self.calls.front().is_some_and(|t| now.duration_since(*t) > self.window) {
            self.calls.pop_front();
        }
        self.calls.push_back(now);
        (self.calls.len() > self.max_calls).then_some(self.pause)
    }

    pub async fn wait(&mut self) {
        if let Some(pause) = self.register(Instant::now()) {
            debug!("{} calls within {:?}, pausing for {:?}", self.calls.len(), self.window, pause);
            tokio::time::sleep(pause).await;
        }
    }
}

pub(crate) struct CoinGecko {
    client: reqwest::Client,
    limiter: RateLimiter,
}

impl CoinGecko {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new(), limiter: RateLimiter::default() }
    }

    /// Fetches `days` of USD prices for a coin, averaged per day.
    pub async fn daily_usd_prices(&mut self, coin: &str, days: i64) -> Result<std::collections::BTreeMap<NaiveDate, Decimal>> {
        self.limiter.wait().await;

        let url = format!("{}/coins/{}/market_chart?vs_currency=usd&days={}", API_BASE, coin, days);
        info!("Fetching {} days of {} prices", days, coin);
        let response: MarketChartResponse = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("Request for {} prices failed", coin))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("Unexpected response for {} prices", coin))?;

        let points: Vec<(i64, Decimal)> = response
            .prices
            .iter()
            .filter_map(|[millis, price]| Decimal::from_f64_retain(*price).map(|p| (*millis as i64, p)))
            .collect();

        Ok(daily_prices(&points)?)
    }
}

/// Fills the history with every coin whose required dates it cannot price.
/// A coin that fails to download is skipped with a warning; its rows will
/// report the missing price.
pub(crate) async fn fetch_missing(history: &mut HistoricalPrices, requirements: &PriceRequirements) -> Result<()> {
    let missing = requirements.missing(history);
    if missing.is_empty() {
        return Ok(());
    }

    let today = Utc::now().date_naive();
    let mut api = CoinGecko::new();

    for (symbol, oldest) in missing {
        let Some(coin) = coin_id(&symbol) else {
            continue;
        };
        let days = (today - oldest).num_days().max(0) + HISTORY_MARGIN_DAYS;
        match api.daily_usd_prices(coin, days).await {
            Ok(daily) => {
                let added = history.add_daily(coin, daily);
                info!("Added {} daily {} prices", added, symbol);
            }
            Err(err) => warn!("Could not fetch {} prices: {:#}", symbol, err),
        }
    }

    Ok(())
}
