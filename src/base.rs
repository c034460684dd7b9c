use std::fmt;

use strum::Display;
use thiserror::Error;
use tracing::warn;

use crate::currency::CurrencyGroups;

/// Classification of an output record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING-KEBAB-CASE")]
pub(crate) enum Event {
    Staking,
    Reward,
    Buy,
    Sell,
    Cashback,
    CashbackReversal,
    TransferIn,
    TransferOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Validity {
    #[default]
    Valid,
    /// The underlying rows failed validation, emitted for manual review.
    BadData,
    /// The row did not match any known shape.
    Unrecognised,
}

const BAD_DATA: &str = "**BAD DATA**";

/// One row of the standard transactions format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutputRecord {
    pub exchange: &'static str,
    pub time: String,
    pub local_time: String,
    pub amount: String,
    pub unit_price: String,
    pub usd_value: String,
    pub gbp_value: String,
    pub note: String,
    pub event: Event,
    pub validity: Validity,
}

impl OutputRecord {
    pub fn new(
        exchange: &'static str,
        event: Event,
        time: impl Into<String>,
        local_time: impl Into<String>,
        amount: impl Into<String>,
    ) -> Self {
        Self {
            exchange,
            time: time.into(),
            local_time: local_time.into(),
            amount: amount.into(),
            unit_price: String::new(),
            usd_value: String::new(),
            gbp_value: String::new(),
            note: String::new(),
            event,
            validity: Validity::Valid,
        }
    }

    pub fn with_unit_price(mut self, price: impl Into<String>) -> Self {
        self.unit_price = price.into();
        self
    }

    pub fn with_usd_value(mut self, value: impl Into<String>) -> Self {
        self.usd_value = value.into();
        self
    }

    pub fn with_gbp_value(mut self, value: impl Into<String>) -> Self {
        self.gbp_value = value.into();
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    /// Tags the record as bad data when `bad` is set. Never clears an
    /// existing tag.
    pub fn mark_bad(mut self, bad: bool) -> Self {
        if bad && self.validity == Validity::Valid {
            self.validity = Validity::BadData;
        }
        self
    }

    pub fn unrecognised(mut self) -> Self {
        self.validity = Validity::Unrecognised;
        self
    }

    pub fn is_valid(&self) -> bool {
        self.validity == Validity::Valid
    }

    fn flag(&self) -> &'static str {
        match self.validity {
            Validity::Valid => "",
            Validity::BadData => BAD_DATA,
            Validity::Unrecognised => "***UNRECOGNISED***",
        }
    }

    pub fn label(&self) -> String {
        match self.validity {
            Validity::Valid => self.event.to_string(),
            Validity::BadData => format!("{} {}", self.event, BAD_DATA),
            Validity::Unrecognised => "***INVALID***".to_owned(),
        }
    }

    /// The 14 cells of the record: flag, exchange, time, local time, amount,
    /// unit price, USD value, exchange rate, GBP value, three cells left for
    /// the spreadsheet, note and label.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.flag().to_owned(),
            self.exchange.to_owned(),
            self.time.clone(),
            self.local_time.clone(),
            self.amount.clone(),
            self.unit_price.clone(),
            self.usd_value.clone(),
            String::new(),
            self.gbp_value.clone(),
            String::new(),
            String::new(),
            String::new(),
            self.note.clone(),
            self.label(),
        ]
    }
}

/// The two halves of a logical transaction that get paired up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub(crate) enum Relation {
    #[strum(serialize = "spend")]
    Spend,
    #[strum(serialize = "withdrawal")]
    Withdrawal,
    #[strum(serialize = "staking deposit")]
    StakingDeposit,
    #[strum(serialize = "token deposit")]
    TokenDeposit,
    #[strum(serialize = "ExchangeToWithdraw")]
    ExchangeToWithdraw,
    #[strum(serialize = "DepositToExchange")]
    DepositToExchange,
}

/// Something wrong with a row that does not stop the conversion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum Issue {
    #[error("required field '{0}' is empty")]
    MissingField(&'static str),
    #[error("expected {field} {expected} but found '{actual}'")]
    UnexpectedValue {
        field: &'static str,
        expected: String,
        actual: String,
    },
    #[error("{field} does not match row {other_row}: expected '{expected}' but found '{actual}'")]
    Mismatch {
        field: &'static str,
        other_row: usize,
        expected: String,
        actual: String,
    },
    #[error("{relation} with repeated reference {key} (previous in row {previous_row})")]
    DuplicateReference {
        relation: Relation,
        key: String,
        previous_row: usize,
    },
    #[error("no pending {relation} for {key}")]
    NoPendingMatch { relation: Relation, key: String },
    #[error("unmatched {relation} {key}")]
    Unmatched { relation: Relation, key: String },
    #[error("unhandled transaction '{0}'")]
    Unhandled(String),
    #[error("price unavailable: {0}")]
    PriceUnavailable(String),
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Diagnostic {
    /// Line in the input file, the header being line 1.
    pub row: usize,
    pub issue: Issue,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row, self.issue)
    }
}

/// Collects row-level diagnostics, logging each one as it arrives.
#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn push(&mut self, row: usize, issue: Issue) {
        let diagnostic = Diagnostic { row, issue };
        warn!("{}", diagnostic);
        self.entries.push(diagnostic);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }
}

/// Result of running a converter over a whole file.
#[derive(Debug, Default)]
pub(crate) struct Conversion {
    pub groups: CurrencyGroups,
    pub diagnostics: Vec<Diagnostic>,
}

/// Conditions that abort the whole run.
#[derive(Debug, Error)]
pub(crate) enum ConvertError {
    #[error("header does not match any known format:\n{}", .differences.join("\n"))]
    HeaderMismatch { differences: Vec<String> },
    #[error("row {row}: unverified transaction type '{kind}', review the export before converting")]
    UnverifiedType { row: usize, kind: String },
    #[error("row {row}: unverified subtype '{subtype}' for transaction type '{kind}'")]
    UnverifiedSubtype {
        row: usize,
        kind: String,
        subtype: String,
    },
}
