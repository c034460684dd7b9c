mod base;
mod coingecko;
mod crypto_com;
mod currency;
mod kraken;
mod nexo;
mod price_history;
mod time;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use base::{Conversion, ConvertError};
use clap::Parser;
use csv::StringRecord;
use linkme::distributed_slice;
use price_history::{HistoricalPrices, PriceLookup, PriceRequirements};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// The exact header row of one CSV layout.
#[derive(Debug)]
pub(crate) struct CsvSpec {
    headers: &'static [&'static str],
}

impl CsvSpec {
    pub(crate) const fn new(headers: &'static [&'static str]) -> Self {
        Self { headers }
    }

    fn matches(&self, header: &StringRecord) -> bool {
        header.len() == self.headers.len() && header.iter().zip(self.headers).all(|(a, b)| a == *b)
    }

    /// Human readable list of how `header` differs from this layout.
    fn differences(&self, header: &StringRecord) -> Vec<String> {
        let mut differences: Vec<String> = self
            .headers
            .iter()
            .zip(header.iter())
            .enumerate()
            .filter_map(|(i, (expected, actual))| {
                (*expected != actual).then(|| format!("column {}: expected {} but found {}", i + 1, expected, actual))
            })
            .collect();
        if header.len() != self.headers.len() {
            differences.push(format!("expected {} columns but found {}", self.headers.len(), header.len()));
        }
        differences
    }
}

/// A registered input format.
#[derive(Debug)]
pub(crate) struct Converter {
    pub id: &'static str,
    pub label: &'static str,
    pub csv: &'static [CsvSpec],
    /// Historical prices the conversion will look up, if any.
    pub price_requirements: Option<fn(&str) -> Result<PriceRequirements>>,
    pub convert: fn(&str, &dyn PriceLookup) -> Result<Conversion>,
}

impl Converter {
    fn accepts(&self, header: &StringRecord) -> bool {
        self.csv.iter().any(|spec| spec.matches(header))
    }

    fn closest_differences(&self, header: &StringRecord) -> Vec<String> {
        self.csv
            .iter()
            .map(|spec| spec.differences(header))
            .min_by_key(Vec::len)
            .unwrap_or_default()
    }
}

#[distributed_slice]
pub(crate) static CONVERTERS: [Converter];

fn find_converter(id: &str) -> Option<&'static Converter> {
    CONVERTERS.iter().find(|converter| converter.id == id)
}

/// Picks the converter for a file header, or the forced one when `format` is
/// given. Fails with the differences from the closest known layout.
fn select_converter(format: Option<&str>, header: &StringRecord) -> Result<&'static Converter> {
    if let Some(id) = format {
        let converter = find_converter(id).ok_or_else(|| {
            let known: Vec<&str> = CONVERTERS.iter().map(|c| c.id).collect();
            anyhow!("Unknown format '{}', expected one of: {}", id, known.join(", "))
        })?;
        if !converter.accepts(header) {
            return Err(ConvertError::HeaderMismatch { differences: converter.closest_differences(header) }.into());
        }
        return Ok(converter);
    }

    if let Some(converter) = CONVERTERS.iter().find(|c| c.accepts(header)) {
        return Ok(converter);
    }

    let differences = CONVERTERS
        .iter()
        .map(|c| (c, c.closest_differences(header)))
        .min_by_key(|(_, differences)| differences.len())
        .map(|(c, differences)| {
            let mut lines = vec![format!("closest format is {}", c.label)];
            lines.extend(differences);
            lines
        })
        .unwrap_or_default();
    Err(ConvertError::HeaderMismatch { differences }.into())
}

fn read_header(text: &str) -> Result<StringRecord> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(text.as_bytes());
    Ok(rdr.headers().context("Cannot read the header row")?.clone())
}

fn default_cache_path() -> Result<PathBuf> {
    let dirs = directories::BaseDirs::new().context("Cannot determine the configuration directory")?;
    Ok(dirs.config_dir().join("coin-prices").join("cg-price-cache.csv"))
}

/// Converts exchange CSV exports into the standard transactions format,
/// grouped by currency.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// CSV file exported from the exchange
    #[arg(required_unless_present = "list_formats")]
    input: Option<PathBuf>,

    /// Where to write the standard transactions CSV
    #[arg(required_unless_present = "list_formats")]
    output: Option<PathBuf>,

    /// Input format, detected from the header when omitted
    #[arg(long, value_name = "ID")]
    format: Option<String>,

    /// Historical price cache
    #[arg(long, env = "COIN_PRICE_CACHE", value_name = "PATH")]
    cache: Option<PathBuf>,

    /// Use cached prices only
    #[arg(long)]
    offline: bool,

    /// List the supported input formats and exit
    #[arg(long)]
    list_formats: bool,
}

async fn load_prices(cli: &Cli, requirements: &PriceRequirements) -> Result<(HistoricalPrices, PathBuf)> {
    let cache_path = match &cli.cache {
        Some(path) => path.clone(),
        None => default_cache_path()?,
    };
    let mut prices = HistoricalPrices::load(&cache_path)?;

    if cli.offline {
        let missing = requirements.missing(&prices);
        if !missing.is_empty() {
            warn!("Offline, {} currencies lack cached prices", missing.len());
        }
    } else {
        coingecko::fetch_missing(&mut prices, requirements).await?;
    }
    Ok((prices, cache_path))
}

async fn run(cli: Cli) -> Result<()> {
    if cli.list_formats {
        for converter in CONVERTERS.iter() {
            println!("{:<18} {}", converter.id, converter.label);
        }
        return Ok(());
    }

    let (Some(input), Some(output)) = (cli.input.as_ref(), cli.output.as_ref()) else {
        bail!("Both an input and an output file are required");
    };

    let text = std::fs::read_to_string(input).with_context(|| format!("Cannot read {}", input.display()))?;
    let header = read_header(&text)?;
    let converter = select_converter(cli.format.as_deref(), &header)?;
    info!("Converting {} as {}", input.display(), converter.label);

    let mut prices = HistoricalPrices::new();
    let mut cache_path = None;
    if let Some(price_requirements) = converter.price_requirements {
        let requirements = price_requirements(&text)?;
        if !requirements.is_empty() {
            let (loaded, path) = load_prices(&cli, &requirements).await?;
            prices = loaded;
            cache_path = Some(path);
        }
    }

    let conversion = (converter.convert)(&text, &prices)?;

    for (currency, records) in conversion.groups.iter() {
        info!("{}: {} records", currency, records.len());
    }
    if conversion.diagnostics.is_empty() {
        info!("No issues found");
    } else {
        warn!("{} issues found, review the rows marked as bad data", conversion.diagnostics.len());
    }

    conversion.groups.save_to_csv(output)?;
    info!("Wrote {} records to {}", conversion.groups.record_count(), output.display());

    if let Some(path) = cache_path {
        prices.save(&path)?;
    }
    Ok(())
}

/// Logs a failed run once and turns it into the process exit status.
fn exit_code(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "coin_ledger=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    exit_code(run(cli).await)
}
