use std::collections::VecDeque;
use std::str::FromStr;

use anyhow::Result;
use linkme::distributed_slice;
use rust_decimal::Decimal;
use serde::Deserialize;
use strum::{Display, EnumString};
use tracing::debug;

use crate::{
    base::{Conversion, Diagnostics, Event, Issue, OutputRecord, Relation},
    currency::CurrencyGroups,
    price_history::PriceLookup,
    time::{cet_to_uk, into_chronological},
    Converter, CsvSpec,
};

const EXCHANGE: &str = "nexo.io";

/// Currencies an exchange can be paid with that make it a plain purchase.
const FIAT_SOURCES: [&str; 2] = ["GBP", "GBPX"];

const HEADERS: [&str; 10] = [
    "Transaction",
    "Type",
    "Input Currency",
    "Input Amount",
    "Output Currency",
    "Output Amount",
    "USD Equivalent",
    "Details",
    "Outstanding Loan",
    "Date / Time",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
enum NexoTxType {
    Interest,
    FixedTermInterest,
    Deposit,
    Withdrawal,
    Exchange,
    LockingTermDeposit,
    UnlockingTermDeposit,
    ExchangeToWithdraw,
    WithdrawExchanged,
    DepositToExchange,
    ExchangeDepositedOn,
    #[strum(serialize = "Exchange Cashback")]
    ExchangeCashback,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct NexoRow {
    #[serde(skip)]
    row: usize,
    #[serde(rename = "Transaction")]
    transaction: String,
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Input Currency")]
    input_currency: String,
    #[serde(rename = "Input Amount")]
    input_amount: String,
    #[serde(rename = "Output Currency")]
    output_currency: String,
    #[serde(rename = "Output Amount")]
    output_amount: String,
    #[serde(rename = "USD Equivalent")]
    usd_equivalent: String,
    #[serde(rename = "Details")]
    details: String,
    #[serde(rename = "Outstanding Loan")]
    outstanding_loan: String,
    #[serde(rename = "Date / Time")]
    date_time: String,
}

impl NexoRow {
    fn usd_value(&self) -> &str {
        self.usd_equivalent.strip_prefix('$').unwrap_or(&self.usd_equivalent)
    }
}

/// The number part of an amount. Until April 2022 exchange amounts were
/// prefixed by a ticker, as in "UST 9.99".
fn split_amount(raw: &str) -> (Option<&str>, &str) {
    match raw.trim().rsplit_once(' ') {
        Some((ticker, number)) => (Some(ticker.trim()), number),
        None => (None, raw.trim()),
    }
}

/// Classifies Nexo rows in time order. Fiat moving between the GBP and GBPX
/// wallets is reported as two rows, matched first in first out.
pub(crate) struct Classifier {
    output: CurrencyGroups,
    exchange_to_withdraw: VecDeque<NexoRow>,
    deposit_to_exchange: VecDeque<NexoRow>,
    diagnostics: Diagnostics,
}

impl Classifier {
    pub fn new() -> Self {
        Self {
            output: CurrencyGroups::default(),
            exchange_to_withdraw: VecDeque::new(),
            deposit_to_exchange: VecDeque::new(),
            diagnostics: Diagnostics::default(),
        }
    }

    /// Handles one row and returns how many diagnostics it raised.
    pub fn classify(&mut self, row: NexoRow) -> usize {
        let before = self.diagnostics.len();

        let Ok(kind) = NexoTxType::from_str(&row.kind) else {
            self.diagnostics.push(row.row, Issue::Unhandled(row.kind.clone()));
            return self.diagnostics.len() - before;
        };
        debug!("row {}: {} {} {}", row.row, kind, row.input_currency, row.output_currency);

        let approved = self.check_common_fields(&row);
        let local_time = cet_to_uk(&row.date_time).unwrap_or_else(|| {
            self.diagnostics.push(row.row, Issue::InvalidTimestamp(row.date_time.clone()));
            String::new()
        });

        match kind {
            NexoTxType::Interest | NexoTxType::FixedTermInterest => {
                let record = self
                    .record(Event::Staking, &row, &local_time, &row.output_amount)
                    .with_usd_value(row.usd_value())
                    .mark_bad(!approved);
                self.output.push(&row.output_currency, record);
            }
            NexoTxType::Deposit => {
                let same = self.same_size(&row, "output amount", &row.input_amount, &row.output_amount);
                let record = self
                    .record(Event::Reward, &row, &local_time, &row.output_amount)
                    .with_usd_value(row.usd_value())
                    .mark_bad(!(approved && same));
                self.output.push(&row.output_currency, record);
            }
            NexoTxType::Withdrawal => {
                let same = self.same_size(&row, "output amount", &row.input_amount, &row.output_amount);
                let record = self
                    .record(Event::TransferOut, &row, &local_time, &row.input_amount)
                    .with_usd_value(row.usd_value())
                    .mark_bad(!(approved && same));
                self.output.push(&row.input_currency, record);
            }
            NexoTxType::Exchange => self.exchange(&row, &local_time, approved),
            NexoTxType::LockingTermDeposit => {
                if let (Some(input), Some(output)) = (self.amount(&row, "input amount", &row.input_amount), self.amount(&row, "output amount", &row.output_amount)) {
                    if !input.is_sign_negative() {
                        self.expected(&row, "input amount", "a negative amount", &row.input_amount);
                    }
                    if input.abs() != output {
                        self.mismatch(&row, "output amount", &row.input_amount, &row.output_amount);
                    }
                }
            }
            NexoTxType::UnlockingTermDeposit => {
                if let (Some(input), Some(output)) = (self.amount(&row, "input amount", &row.input_amount), self.amount(&row, "output amount", &row.output_amount)) {
                    if input != output {
                        self.mismatch(&row, "output amount", &row.input_amount, &row.output_amount);
                    }
                }
            }
            NexoTxType::ExchangeToWithdraw => {
                self.expect_currencies(&row, "GBPX", "GBP");
                if let (Some(input), Some(output)) = (self.amount(&row, "input amount", &row.input_amount), self.amount(&row, "output amount", &row.output_amount)) {
                    if input != -output {
                        self.expected(&row, "output amount", &format!("the negated input amount {}", row.input_amount), &row.output_amount);
                    }
                }
                self.exchange_to_withdraw.push_back(row);
            }
            NexoTxType::WithdrawExchanged => {
                let pending = self.exchange_to_withdraw.pop_front();
                self.close(pending, Relation::ExchangeToWithdraw, &row, "GBP");
            }
            NexoTxType::DepositToExchange => {
                self.expect_currencies(&row, "GBP", "GBPX");
                self.same_size(&row, "output amount", &row.input_amount, &row.output_amount);
                self.deposit_to_exchange.push_back(row);
            }
            NexoTxType::ExchangeDepositedOn => {
                let pending = self.deposit_to_exchange.pop_front();
                self.close(pending, Relation::DepositToExchange, &row, "GBPX");
            }
            // a promotional airdrop, booked by the user elsewhere
            NexoTxType::ExchangeCashback => {}
        }

        self.diagnostics.len() - before
    }

    /// Reports the fiat movements still waiting for their second row.
    pub fn finish(mut self) -> Conversion {
        let leftovers = [
            (Relation::ExchangeToWithdraw, std::mem::take(&mut self.exchange_to_withdraw)),
            (Relation::DepositToExchange, std::mem::take(&mut self.deposit_to_exchange)),
        ];
        for (relation, queue) in leftovers {
            for row in queue {
                self.diagnostics.push(row.row, Issue::Unmatched { relation, key: row.transaction });
            }
        }
        Conversion { groups: self.output, diagnostics: self.diagnostics.into_vec() }
    }

    fn record(&self, event: Event, row: &NexoRow, local_time: &str, amount: &str) -> OutputRecord {
        OutputRecord::new(EXCHANGE, event, row.date_time.as_str(), local_time, amount)
    }

    fn expected(&mut self, row: &NexoRow, field: &'static str, expected: &str, actual: &str) {
        self.diagnostics.push(
            row.row,
            Issue::UnexpectedValue { field, expected: expected.to_owned(), actual: actual.to_owned() },
        );
    }

    fn mismatch(&mut self, row: &NexoRow, field: &'static str, expected: &str, actual: &str) {
        self.diagnostics.push(
            row.row,
            Issue::Mismatch { field, other_row: row.row, expected: expected.to_owned(), actual: actual.to_owned() },
        );
    }

    fn check_common_fields(&mut self, row: &NexoRow) -> bool {
        let mut approved = true;
        if !row.details.starts_with("approved") {
            self.expected(row, "details", "to start with 'approved'", &row.details);
            approved = false;
        }
        if !row.usd_equivalent.starts_with('$') {
            self.expected(row, "USD equivalent", "a dollar amount", &row.usd_equivalent);
            approved = false;
        }
        if row.outstanding_loan != "$0.00" {
            self.expected(row, "outstanding loan", "$0.00", &row.outstanding_loan);
            approved = false;
        }
        approved
    }

    fn amount(&mut self, row: &NexoRow, field: &'static str, raw: &str) -> Option<Decimal> {
        let (_, number) = split_amount(raw);
        let amount = Decimal::from_str(number).ok();
        if amount.is_none() {
            self.expected(row, field, "a decimal number", raw);
        }
        amount
    }

    /// Whether two amounts agree, ignoring sign.
    fn same_size(&mut self, row: &NexoRow, field: &'static str, expected: &str, actual: &str) -> bool {
        let (Some(a), Some(b)) = (self.amount(row, field, expected), self.amount(row, field, actual)) else {
            return false;
        };
        if a.abs() != b.abs() {
            self.mismatch(row, field, expected, actual);
            return false;
        }
        true
    }

    fn expect_currencies(&mut self, row: &NexoRow, input: &str, output: &str) {
        if row.input_currency != input {
            self.expected(row, "input currency", input, &row.input_currency);
        }
        if row.output_currency != output {
            self.expected(row, "output currency", output, &row.output_currency);
        }
    }

    /// Checks the closing row of a fiat movement against the row it pairs
    /// with.
    fn close(&mut self, pending: Option<NexoRow>, relation: Relation, row: &NexoRow, output_currency: &str) {
        let Some(pending) = pending else {
            self.diagnostics.push(row.row, Issue::NoPendingMatch { relation, key: row.transaction.clone() });
            return;
        };
        if let (Some(opened), Some(closed)) = (
            self.amount(&pending, "input amount", &pending.input_amount),
            self.amount(row, "input amount", &row.input_amount),
        ) {
            if opened.abs() != closed.abs() {
                self.diagnostics.push(
                    row.row,
                    Issue::Mismatch {
                        field: "input amount",
                        other_row: pending.row,
                        expected: pending.input_amount.clone(),
                        actual: row.input_amount.clone(),
                    },
                );
            }
        }
        if row.output_currency != output_currency {
            self.expected(row, "output currency", output_currency, &row.output_currency);
        }
    }

    fn exchange(&mut self, row: &NexoRow, local_time: &str, approved: bool) {
        // "GBPX/UST" before May 2022, separate columns since
        let (source, target) = match row.input_currency.split_once('/') {
            Some((source, target)) => (source, target),
            None => (row.input_currency.as_str(), row.output_currency.as_str()),
        };
        if target != row.output_currency {
            self.expected(row, "output currency", target, &row.output_currency);
        }

        // the legacy input amount is sometimes given in the target currency
        let (ticker, number) = split_amount(&row.input_amount);
        let source_amount = match ticker {
            Some(t) if t != source => None,
            _ => Some(number),
        };

        if FIAT_SOURCES.contains(&source) {
            let paid = source_amount.map(|a| a.trim_start_matches('-')).unwrap_or_default();
            let record = self
                .record(Event::Buy, row, local_time, &row.output_amount)
                .with_usd_value(row.usd_value())
                .with_gbp_value(paid)
                .mark_bad(!approved);
            self.output.push(target, record);
            return;
        }

        let note = match source_amount {
            Some(amount) => format!("Swapped {} {} for {} {}", amount.trim_start_matches('-'), source, row.output_amount, target),
            None => format!("Swapped {} for {} {}", source, row.output_amount, target),
        };
        let sell = self
            .record(Event::Sell, row, local_time, source_amount.unwrap_or_default())
            .with_usd_value(row.usd_value())
            .with_note(note.as_str())
            .mark_bad(!approved);
        let buy = self
            .record(Event::Buy, row, local_time, &row.output_amount)
            .with_usd_value(row.usd_value())
            .with_note(note)
            .mark_bad(!approved);
        self.output.push(source, sell);
        self.output.push(target, buy);
    }
}

fn load_rows(text: &str) -> Result<Vec<NexoRow>> {
    let mut rdr = csv::ReaderBuilder::new().from_reader(text.as_bytes());
    let mut rows = Vec::new();
    for (index, result) in rdr.deserialize().enumerate() {
        let mut row: NexoRow = result?;
        row.row = index + 2;
        rows.push(row);
    }
    into_chronological(&mut rows, |r| r.date_time.as_str());
    Ok(rows)
}

fn convert_nexo_csv(text: &str, _prices: &dyn PriceLookup) -> Result<Conversion> {
    let mut classifier = Classifier::new();
    for row in load_rows(text)? {
        classifier.classify(row);
    }
    Ok(classifier.finish())
}

#[distributed_slice(crate::CONVERTERS)]
static NEXO_CSV: Converter = Converter {
    id: "NexoCsv",
    label: "Nexo (CSV)",
    csv: &[CsvSpec::new(&HEADERS)],
    price_requirements: None,
    convert: convert_nexo_csv,
};
