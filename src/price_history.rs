//! Daily USD price history per coin, backed by a CSV cache on disk.
//!
//! Prices are stored per CoinGecko coin id and calendar day. A day without a
//! price is estimated from the days either side of it when both are known.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::coingecko;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum PriceError {
    #[error("no CoinGecko coin known for symbol '{0}'")]
    UnknownSymbol(String),
    #[error("no {symbol} price for {date} or the days either side")]
    Unavailable { symbol: String, date: NaiveDate },
}

/// Source of historical USD prices for a ticker symbol.
pub(crate) trait PriceLookup {
    fn usd_price(&self, symbol: &str, date: NaiveDate) -> Result<Decimal, PriceError>;
}

/// One line of the price cache: coin id, date, price.
#[derive(Debug, Deserialize, Serialize)]
struct CachedPrice {
    coin: String,
    date: NaiveDate,
    price: String,
}

#[derive(Debug, Default)]
pub(crate) struct HistoricalPrices {
    coins: BTreeMap<String, BTreeMap<NaiveDate, Decimal>>,
    updated: bool,
}

impl HistoricalPrices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the cache file. A missing file gives an empty history.
    pub fn load(path: &Path) -> Result<Self> {
        let mut history = Self::new();
        if !path.exists() {
            warn!("Price cache {} not found, starting empty", path.display());
            return Ok(history);
        }

        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .with_context(|| format!("Failed to open price cache {}", path.display()))?;

        for result in rdr.deserialize() {
            let record: CachedPrice = result.context("Failed to read price cache")?;
            let price: Decimal = record
                .price
                .trim()
                .parse()
                .with_context(|| format!("Invalid cached price '{}' for {} on {}", record.price, record.coin, record.date))?;
            let days = history.coins.entry(record.coin.clone()).or_default();
            match days.get(&record.date) {
                Some(previous) if *previous != price => bail!(
                    "Price cache repeats {} on {} with a different price (was {}, now {})",
                    record.coin, record.date, previous, price
                ),
                Some(_) => warn!("Price cache repeats {} on {}", record.coin, record.date),
                None => {
                    days.insert(record.date, price);
                }
            }
        }

        info!("Loaded {} cached prices from {}", history.len(), path.display());
        Ok(history)
    }

    /// Writes the cache sorted by coin and date, but only when new prices
    /// were added since it was loaded.
    pub fn save(&self, path: &Path) -> Result<()> {
        if !self.updated {
            return Ok(());
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create price cache directory")?;
        }

        let file = File::create(path).with_context(|| format!("Failed to create price cache {}", path.display()))?;
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(BufWriter::new(file));
        for (coin, days) in &self.coins {
            for (date, price) in days {
                wtr.serialize(CachedPrice { coin: coin.clone(), date: *date, price: price.to_string() })?;
            }
        }
        wtr.flush()?;

        info!("Historical price cache updated: {}", path.display());
        Ok(())
    }

    pub fn is_updated(&self) -> bool {
        self.updated
    }

    pub fn len(&self) -> usize {
        self.coins.values().map(BTreeMap::len).sum()
    }

    /// Adds daily prices for a coin. Days already present keep their price.
    pub fn add_daily(&mut self, coin: &str, daily: BTreeMap<NaiveDate, Decimal>) -> usize {
        let days = self.coins.entry(coin.to_owned()).or_default();
        let mut added = 0;
        for (date, price) in daily {
            if let std::collections::btree_map::Entry::Vacant(entry) = days.entry(date) {
                entry.insert(price);
                added += 1;
            }
        }
        if added > 0 {
            self.updated = true;
        }
        added
    }

    /// Price on the given day, or the mean of the day before and after.
    fn price_on(&self, coin: &str, date: NaiveDate) -> Option<Decimal> {
        let days = self.coins.get(coin)?;
        if let Some(price) = days.get(&date) {
            return Some(*price);
        }
        let previous = days.get(&(date - Duration::days(1)))?;
        let next = days.get(&(date + Duration::days(1)))?;
        Some((previous + next) / Decimal::TWO)
    }

    fn covers(&self, coin: &str, date: NaiveDate) -> bool {
        self.price_on(coin, date).is_some()
    }
}

impl PriceLookup for HistoricalPrices {
    fn usd_price(&self, symbol: &str, date: NaiveDate) -> Result<Decimal, PriceError> {
        let coin = coingecko::coin_id(symbol).ok_or_else(|| PriceError::UnknownSymbol(symbol.to_owned()))?;
        self.price_on(coin, date)
            .ok_or_else(|| PriceError::Unavailable { symbol: symbol.to_owned(), date })
    }
}

/// Errors turning a CoinGecko chart into daily prices.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum DailyPriceError {
    #[error("invalid timestamp {0} in price chart")]
    InvalidTimestamp(i64),
    #[error("duplicate price generated for {0}")]
    Duplicate(NaiveDate),
    #[error("unexpected step in price chart from {from} to {to}")]
    UnexpectedStep { from: NaiveDate, to: NaiveDate },
}

/// Averages chart points (unix milliseconds, price) into one price per UTC
/// day. Days must advance by one or two days at a time: the chart interval
/// for long periods drifts past 24 hours, so a single missing day is normal.
pub(crate) fn daily_prices(points: &[(i64, Decimal)]) -> Result<BTreeMap<NaiveDate, Decimal>, DailyPriceError> {
    let mut result = BTreeMap::new();
    let mut current: Option<(NaiveDate, Decimal, u32)> = None;

    for &(millis, price) in points {
        let date = DateTime::from_timestamp_millis(millis)
            .ok_or(DailyPriceError::InvalidTimestamp(millis))?
            .date_naive();

        current = match current {
            None => Some((date, price, 1)),
            Some((day, total, count)) if day == date => Some((day, total + price, count + 1)),
            Some((day, total, count)) => {
                if result.insert(day, total / Decimal::from(count)).is_some() {
                    return Err(DailyPriceError::Duplicate(day));
                }
                let step = (date - day).num_days();
                if step != 1 && step != 2 {
                    return Err(DailyPriceError::UnexpectedStep { from: day, to: date });
                }
                Some((date, price, 1))
            }
        };
    }

    if let Some((day, total, count)) = current {
        if result.insert(day, total / Decimal::from(count)).is_some() {
            return Err(DailyPriceError::Duplicate(day));
        }
    }

    Ok(result)
}

/// The dates on which each symbol needs a price.
#[derive(Debug, Default)]
pub(crate) struct PriceRequirements {
    requirements: BTreeMap<String, BTreeSet<NaiveDate>>,
}

impl PriceRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, symbol: &str, date: NaiveDate) {
        self.requirements.entry(symbol.to_owned()).or_default().insert(date);
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn oldest(&self) -> Option<NaiveDate> {
        self.requirements.values().filter_map(|dates| dates.first().copied()).min()
    }

    /// Symbols with at least one date the history cannot price, with the
    /// first such date.
    pub fn missing(&self, history: &HistoricalPrices) -> BTreeMap<String, NaiveDate> {
        let mut missing = BTreeMap::new();
        for (symbol, dates) in &self.requirements {
            let Some(coin) = coingecko::coin_id(symbol) else {
                warn!("No CoinGecko coin known for {}, its prices cannot be fetched", symbol);
                continue;
            };
            if let Some(date) = dates.iter().find(|date| !history.covers(coin, **date)) {
                missing.insert(symbol.clone(), *date);
            }
        }
        missing
    }
}

/// A fixed set of prices, for tests of the converters.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FixedPrices {
    prices: BTreeMap<(String, NaiveDate), Decimal>,
}

#[cfg(test)]
impl FixedPrices {
    pub fn with(mut self, symbol: &str, date: &str, price: Decimal) -> Self {
        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
        self.prices.insert((symbol.to_owned(), date), price);
        self
    }
}

#[cfg(test)]
impl PriceLookup for FixedPrices {
    fn usd_price(&self, symbol: &str, date: NaiveDate) -> Result<Decimal, PriceError> {
        self.prices
            .get(&(symbol.to_owned(), date))
            .copied()
            .ok_or_else(|| PriceError::Unavailable { symbol: symbol.to_owned(), date })
    }
}
