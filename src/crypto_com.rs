use std::sync::LazyLock;

use anyhow::Result;
use linkme::distributed_slice;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::{
    base::{Conversion, Diagnostics, Event, Issue, OutputRecord},
    currency::CurrencyGroups,
    price_history::PriceLookup,
    time::{into_chronological, utc_to_uk},
    Converter, CsvSpec,
};

const EXCHANGE: &str = "crypto.com App";

const HEADERS: [&str; 10] = [
    "Timestamp (UTC)",
    "Transaction Description",
    "Currency",
    "Amount",
    "To Currency",
    "To Amount",
    "Native Currency",
    "Native Amount",
    "Native Amount (in USD)",
    "Transaction Kind",
];

const HEADERS_WITH_HASH: [&str; 11] = [
    "Timestamp (UTC)",
    "Transaction Description",
    "Currency",
    "Amount",
    "To Currency",
    "To Amount",
    "Native Currency",
    "Native Amount",
    "Native Amount (in USD)",
    "Transaction Kind",
    "Transaction Hash",
];

static CONVERSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\S+) -> (\S+)$").unwrap());

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct AppRow {
    #[serde(skip)]
    row: usize,
    #[serde(rename = "Timestamp (UTC)")]
    timestamp: String,
    #[serde(rename = "Transaction Description")]
    description: String,
    #[serde(rename = "Currency")]
    currency: String,
    #[serde(rename = "Amount")]
    amount: String,
    #[serde(rename = "To Currency")]
    to_currency: String,
    #[serde(rename = "To Amount")]
    to_amount: String,
    #[serde(rename = "Native Currency")]
    native_currency: String,
    #[serde(rename = "Native Amount")]
    native_amount: String,
    #[serde(rename = "Native Amount (in USD)")]
    native_amount_in_usd: String,
    #[serde(rename = "Transaction Kind")]
    kind: String,
    #[serde(rename = "Transaction Hash", default)]
    hash: Option<String>,
}

/// What a row is, judged by its description.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RowShape {
    SignUpBonus,
    Deposit,
    CroStake,
    StakeRewards,
    CardCashback,
    CardCashbackReversal,
    Conversion { from: String, to: String },
    Unrecognised,
}

impl RowShape {
    fn of(description: &str) -> Self {
        match description {
            "Sign-up Bonus Unlocked" => return Self::SignUpBonus,
            "CRO Stake" => return Self::CroStake,
            "Card Cashback" => return Self::CardCashback,
            "Card Cashback Reversal" => return Self::CardCashbackReversal,
            _ => {}
        }
        if description.ends_with(" Deposit") {
            Self::Deposit
        } else if description.ends_with(" Stake Rewards") {
            Self::StakeRewards
        } else if let Some(captures) = CONVERSION.captures(description) {
            Self::Conversion { from: captures[1].to_owned(), to: captures[2].to_owned() }
        } else {
            Self::Unrecognised
        }
    }
}

/// Values a fixed-shape row must carry.
struct Expected {
    currency: &'static str,
    native_currency: &'static str,
    kind: &'static str,
}

struct AppConverter {
    output: CurrencyGroups,
    diagnostics: Diagnostics,
}

impl AppConverter {
    fn new() -> Self {
        Self { output: CurrencyGroups::default(), diagnostics: Diagnostics::default() }
    }

    fn expected(&mut self, row: &AppRow, field: &'static str, expected: &str, actual: &str) {
        self.diagnostics.push(
            row.row,
            Issue::UnexpectedValue { field, expected: expected.to_owned(), actual: actual.to_owned() },
        );
    }

    fn acceptable(&mut self, row: &AppRow, expected: Expected) -> bool {
        let mut ok = true;
        let checks = [
            ("currency", expected.currency, &row.currency),
            ("native currency", expected.native_currency, &row.native_currency),
            ("transaction kind", expected.kind, &row.kind),
            ("to currency", "", &row.to_currency),
            ("to amount", "", &row.to_amount),
        ];
        for (field, wanted, actual) in checks {
            if actual != wanted {
                let wanted = if wanted.is_empty() { "blank" } else { wanted };
                self.expected(row, field, wanted, actual);
                ok = false;
            }
        }
        ok
    }

    fn record(&self, event: Event, row: &AppRow, local_time: &str, amount: &str) -> OutputRecord {
        OutputRecord::new(EXCHANGE, event, row.timestamp.as_str(), local_time, amount)
    }

    fn convert_row(&mut self, row: &AppRow) {
        let local_time = utc_to_uk(&row.timestamp).unwrap_or_else(|| {
            self.diagnostics.push(row.row, Issue::InvalidTimestamp(row.timestamp.clone()));
            String::new()
        });
        let shape = RowShape::of(&row.description);
        debug!("row {}: {:?} {} {}", row.row, shape, row.amount, row.currency);

        match shape {
            RowShape::SignUpBonus => {
                let ok = self.acceptable(row, Expected { currency: "CRO", native_currency: "USD", kind: "referral_gift" });
                let record = self
                    .record(Event::Reward, row, &local_time, &row.amount)
                    .with_usd_value(row.native_amount.as_str())
                    .mark_bad(!ok);
                self.output.push(&row.currency, record);
            }
            RowShape::Deposit | RowShape::CroStake => {
                if row.native_currency != "GBP" {
                    self.expected(row, "native currency", "GBP", &row.native_currency);
                }
            }
            RowShape::StakeRewards => {
                let ok = self.acceptable(row, Expected { currency: "CRO", native_currency: "GBP", kind: "mco_stake_reward" });
                self.gbp_record(Event::Staking, row, &local_time, ok);
            }
            RowShape::CardCashback => {
                let ok = self.acceptable(row, Expected { currency: "CRO", native_currency: "GBP", kind: "referral_card_cashback" });
                self.gbp_record(Event::Cashback, row, &local_time, ok);
            }
            RowShape::CardCashbackReversal => {
                let ok = self.acceptable(row, Expected { currency: "CRO", native_currency: "GBP", kind: "card_cashback_reverted" });
                self.gbp_record(Event::CashbackReversal, row, &local_time, ok);
            }
            RowShape::Conversion { from, to } => self.conversion(row, &local_time, &from, &to),
            RowShape::Unrecognised => {
                self.diagnostics.push(row.row, Issue::Unhandled(row.description.clone()));
                let record = self
                    .record(Event::Buy, row, &local_time, &row.amount)
                    .with_gbp_value(row.native_amount.as_str())
                    .unrecognised();
                self.output.push(&row.currency, record);
            }
        }
    }

    fn gbp_record(&mut self, event: Event, row: &AppRow, local_time: &str, ok: bool) {
        let record = self
            .record(event, row, local_time, &row.amount)
            .with_gbp_value(row.native_amount.as_str())
            .mark_bad(!ok);
        self.output.push(&row.currency, record);
    }

    fn conversion(&mut self, row: &AppRow, local_time: &str, from: &str, to: &str) {
        let mut ok = true;
        if !matches!(row.kind.as_str(), "crypto_exchange" | "viban_purchase") {
            self.expected(row, "transaction kind", "crypto_exchange or viban_purchase", &row.kind);
            ok = false;
        }
        if row.currency != from {
            self.expected(row, "currency", from, &row.currency);
            ok = false;
        }
        if row.to_currency != to {
            self.expected(row, "to currency", to, &row.to_currency);
            ok = false;
        }
        if row.to_amount.is_empty() {
            self.diagnostics.push(row.row, Issue::MissingField("to amount"));
            ok = false;
        }
        if row.native_currency != "GBP" {
            self.expected(row, "native currency", "GBP", &row.native_currency);
            ok = false;
        }

        let paid = row.native_amount.trim_start_matches('-');
        if from == "GBP" {
            let record = self
                .record(Event::Buy, row, local_time, &row.to_amount)
                .with_gbp_value(paid)
                .mark_bad(!ok);
            self.output.push(to, record);
            return;
        }

        let note = format!(
            "Swapped {} {} for {} {}",
            row.amount.trim_start_matches('-'),
            from,
            row.to_amount,
            to
        );
        let sell = self
            .record(Event::Sell, row, local_time, &row.amount)
            .with_gbp_value(paid)
            .with_note(note.as_str())
            .mark_bad(!ok);
        let buy = self
            .record(Event::Buy, row, local_time, &row.to_amount)
            .with_gbp_value(paid)
            .with_note(note)
            .mark_bad(!ok);
        self.output.push(from, sell);
        self.output.push(to, buy);
    }

    fn finish(self) -> Conversion {
        Conversion { groups: self.output, diagnostics: self.diagnostics.into_vec() }
    }
}

fn load_rows(text: &str) -> Result<Vec<AppRow>> {
    let mut rdr = csv::ReaderBuilder::new().from_reader(text.as_bytes());
    let mut rows = Vec::new();
    for (index, result) in rdr.deserialize().enumerate() {
        let mut row: AppRow = result?;
        row.row = index + 2;
        rows.push(row);
    }
    into_chronological(&mut rows, |r| r.timestamp.as_str());
    Ok(rows)
}

fn convert_crypto_com_app_csv(text: &str, _prices: &dyn PriceLookup) -> Result<Conversion> {
    let mut converter = AppConverter::new();
    for row in load_rows(text)? {
        if let Some(hash) = row.hash.as_deref().filter(|h| !h.is_empty()) {
            debug!("row {}: transaction hash {}", row.row, hash);
        }
        converter.convert_row(&row);
    }
    Ok(converter.finish())
}

#[distributed_slice(crate::CONVERTERS)]
static CRYPTO_COM_APP_CSV: Converter = Converter {
    id: "CryptoComAppCsv",
    label: "Crypto.com App (CSV)",
    csv: &[CsvSpec::new(&HEADERS_WITH_HASH), CsvSpec::new(&HEADERS)],
    price_requirements: None,
    convert: convert_crypto_com_app_csv,
};
