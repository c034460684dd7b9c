use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};

use crate::base::OutputRecord;

/// Resolves vendor ticker aliases to the symbol used in the output.
pub(crate) fn canonical_currency(currency: &str) -> &str {
    match currency {
        // Kraken uses the ISO style XBT for Bitcoin
        "XXBT" | "XBT" => "BTC",
        "XETH" => "ETH",
        "XXDG" => "DOGE",
        "XXRP" => "XRP",
        "XLTC" => "LTC",
        "XXLM" => "XLM",
        "XXMR" => "XMR",
        "ZEUR" => "EUR",
        "ZUSD" => "USD",
        "ZGBP" => "GBP",
        other => other,
    }
}

/// Output records grouped by canonical currency, each group in the order
/// the records were produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct CurrencyGroups {
    groups: BTreeMap<String, Vec<OutputRecord>>,
}

impl CurrencyGroups {
    pub fn push(&mut self, currency: &str, record: OutputRecord) {
        self.groups
            .entry(canonical_currency(currency).to_owned())
            .or_default()
            .push(record);
    }

    pub fn get(&self, currency: &str) -> Option<&[OutputRecord]> {
        self.groups.get(canonical_currency(currency)).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[OutputRecord])> {
        self.groups.iter().map(|(c, records)| (c.as_str(), records.as_slice()))
    }

    /// All rows of the output file. Each currency section is preceded by two
    /// blank rows and a banner, and followed by one blank row.
    pub fn to_rows(&self) -> Vec<Vec<String>> {
        let blank = || vec![String::new(), String::new()];
        let mut rows = Vec::with_capacity(self.record_count() + self.len() * 4);
        for (currency, records) in self.iter() {
            rows.push(blank());
            rows.push(blank());
            rows.push(vec![currency.to_owned(), "Data for a fixed currency".to_owned()]);
            rows.extend(records.iter().map(OutputRecord::to_row));
            rows.push(blank());
        }
        rows
    }

    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new().flexible(true).from_writer(writer);
        for row in self.to_rows() {
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn save_to_csv(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Cannot create output file {}", path.display()))?;
        self.write_csv(io::BufWriter::new(file))
            .with_context(|| format!("Cannot write output file {}", path.display()))
    }
}
