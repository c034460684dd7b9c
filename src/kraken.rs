//! Kraken ledger reconciliation.
//!
//! Kraken records most logical transactions as two ledger entries sharing a
//! reference id. Notes on the shapes seen in real ledgers:
//!
//! - fiat deposit: one or two `deposit` rows of ZGBP, ZEUR or EUR.HOLD
//! - token deposit: `deposit` with blank txid and balance, then the same
//!   `deposit` again with both filled in
//! - purchase: `spend` of the paying asset, then `receive` of the bought one
//! - staking: `withdrawal` of the token (blank txid), `deposit` of TOKEN.S,
//!   `transfer` stakingfromspot of TOKEN.S, `transfer` spottostaking of TOKEN
//! - staking reward: `deposit` of TOKEN.S with blank balance, then `staking`
//!
//! See <https://support.kraken.com/hc/en-us/articles/360001169383-How-to-interpret-Ledger-history-fields>

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::Result;
use linkme::distributed_slice;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;
use strum::{Display, EnumString, IntoStaticStr};
use tracing::debug;

use crate::{
    base::{Conversion, ConvertError, Diagnostics, Event, Issue, OutputRecord, Relation},
    currency::{canonical_currency, CurrencyGroups},
    price_history::{PriceLookup, PriceRequirements},
    time::{into_chronological, parse_date_time, utc_to_uk},
    Converter, CsvSpec,
};

const EXCHANGE: &str = "Kraken";

/// Suffix Kraken gives the staked variant of an asset.
const STAKED_SUFFIX: &str = ".S";

const FIAT_ASSETS: [&str; 3] = ["ZGBP", "ZEUR", "EUR.HOLD"];

/// Non-fiat assets known to be spent on purchases. Spending one of these is
/// recorded as a swap.
const SWAP_ASSETS: [&str; 4] = ["USDC", "USDT", "XXBT", "XETH"];

const LEDGER_HEADERS: [&str; 11] = [
    "txid", "refid", "time", "type", "subtype", "aclass", "asset", "wallet", "amount", "fee", "balance",
];

const LEGACY_LEDGER_HEADERS: [&str; 10] = [
    "txid", "refid", "time", "type", "subtype", "aclass", "asset", "amount", "fee", "balance",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
enum LedgerType {
    Deposit,
    Withdrawal,
    Spend,
    Receive,
    Transfer,
    Staking,
    Earn,
    Trade,
    #[strum(serialize = "margin trade")]
    MarginTrade,
    Rollover,
    Adjustment,
    Settled,
    /// Documented as the credit of staking rewards, though `staking` is what
    /// actually appears.
    Reward,
    Sale,
    Dividend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
enum TransferSubtype {
    SpotToStaking,
    StakingFromSpot,
    StakingToSpot,
    SpotFromStaking,
    /// Seen once, for the EthereumPoW credit after the Ethereum merge.
    SpotFromFutures,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "lowercase")]
enum EarnSubtype {
    Reward,
    Migration,
    Allocation,
    AutoAllocation,
    Deallocation,
}

/// One entry of the ledger export. Both the current export (with `wallet`)
/// and the older one without it are accepted.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub(crate) struct LedgerRow {
    /// Line of the input file, header included.
    #[serde(skip)]
    row: usize,
    /// Whether the row passed the required field checks.
    #[serde(skip)]
    acceptable: bool,
    txid: String,
    refid: String,
    time: String,
    #[serde(rename = "type")]
    kind: String,
    subtype: String,
    aclass: String,
    asset: String,
    #[serde(default)]
    wallet: Option<String>,
    amount: String,
    fee: String,
    balance: String,
}

/// The kinds of row that open a two-row transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opening {
    Spend,
    Withdrawal,
    StakingDeposit,
    TokenDeposit,
}

impl Opening {
    const ALL: [Opening; 4] = [Opening::Spend, Opening::Withdrawal, Opening::StakingDeposit, Opening::TokenDeposit];

    fn relation(self) -> Relation {
        match self {
            Opening::Spend => Relation::Spend,
            Opening::Withdrawal => Relation::Withdrawal,
            Opening::StakingDeposit => Relation::StakingDeposit,
            Opening::TokenDeposit => Relation::TokenDeposit,
        }
    }
}

/// Fields both halves of a pair must agree on.
#[derive(Debug, Clone, Copy, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
enum Field {
    Asset,
    Amount,
    Fee,
}

impl Field {
    fn of(self, entry: &LedgerRow) -> &str {
        match self {
            Field::Asset => &entry.asset,
            Field::Amount => &entry.amount,
            Field::Fee => &entry.fee,
        }
    }
}

/// Opening halves of two-row transactions, keyed by reference id.
#[derive(Debug, Default)]
struct PendingMatches {
    spends: BTreeMap<String, LedgerRow>,
    withdrawals: BTreeMap<String, LedgerRow>,
    staking_deposits: BTreeMap<String, LedgerRow>,
    token_deposits: BTreeMap<String, LedgerRow>,
}

impl PendingMatches {
    fn map(&mut self, opening: Opening) -> &mut BTreeMap<String, LedgerRow> {
        match opening {
            Opening::Spend => &mut self.spends,
            Opening::Withdrawal => &mut self.withdrawals,
            Opening::StakingDeposit => &mut self.staking_deposits,
            Opening::TokenDeposit => &mut self.token_deposits,
        }
    }

    fn len(&self) -> usize {
        self.spends.len() + self.withdrawals.len() + self.staking_deposits.len() + self.token_deposits.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

const MOVEMENT_FIELDS: [Field; 3] = [Field::Asset, Field::Amount, Field::Fee];

fn is_fiat(asset: &str) -> bool {
    FIAT_ASSETS.contains(&asset)
}

fn parse_amount(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw.trim()).ok()
}

/// Total paid for a purchase: the spent amount plus the fee, each cut to
/// whole pennies (never rounded up).
fn total_spend(spend: &LedgerRow) -> Option<String> {
    let pennies = |raw: &str| parse_amount(raw).map(|v| v.abs().round_dp_with_strategy(2, RoundingStrategy::ToZero));
    let total = pennies(&spend.amount)? + pennies(&spend.fee)?;
    Some(format!("{:.2}", total))
}

/// Converts ledger rows in time order into output records, pairing up the
/// halves of each logical transaction.
pub(crate) struct Reconciler<'a> {
    prices: &'a dyn PriceLookup,
    pending: PendingMatches,
    output: CurrencyGroups,
    diagnostics: Diagnostics,
}

impl<'a> Reconciler<'a> {
    pub fn new(prices: &'a dyn PriceLookup) -> Self {
        Self {
            prices,
            pending: PendingMatches::default(),
            output: CurrencyGroups::default(),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn process(&mut self, mut entry: LedgerRow) -> Result<(), ConvertError> {
        entry.acceptable = self.check_required_fields(&entry);
        let kind = LedgerType::from_str(&entry.kind)
            .map_err(|_| ConvertError::UnverifiedType { row: entry.row, kind: entry.kind.clone() })?;
        let local_time = utc_to_uk(&entry.time).unwrap_or_else(|| {
            self.diagnostics.push(entry.row, Issue::InvalidTimestamp(entry.time.clone()));
            String::new()
        });
        debug!(
            "row {}: {} {} {} {} ({})",
            entry.row,
            kind,
            entry.subtype,
            entry.amount,
            entry.asset,
            entry.wallet.as_deref().unwrap_or("spot")
        );

        match kind {
            LedgerType::Deposit => self.deposit(entry, local_time),
            LedgerType::Spend => self.spend(entry),
            LedgerType::Receive => self.receive(entry, local_time),
            LedgerType::Withdrawal => self.withdrawal(entry, local_time),
            LedgerType::Transfer => self.transfer(entry)?,
            LedgerType::Staking => self.staking_reward(entry, local_time, true),
            LedgerType::Earn => {
                let subtype = EarnSubtype::from_str(&entry.subtype).map_err(|_| ConvertError::UnverifiedSubtype {
                    row: entry.row,
                    kind: entry.kind.clone(),
                    subtype: entry.subtype.clone(),
                })?;
                match subtype {
                    EarnSubtype::Reward => self.staking_reward(entry, local_time, false),
                    // moves between earn wallets, nothing taxable happens
                    EarnSubtype::Migration
                    | EarnSubtype::Allocation
                    | EarnSubtype::AutoAllocation
                    | EarnSubtype::Deallocation => {}
                }
            }
            LedgerType::Trade
            | LedgerType::MarginTrade
            | LedgerType::Rollover
            | LedgerType::Adjustment
            | LedgerType::Settled
            | LedgerType::Reward
            | LedgerType::Sale
            | LedgerType::Dividend => {
                return Err(ConvertError::UnverifiedType { row: entry.row, kind: entry.kind });
            }
        }
        Ok(())
    }

    /// Reports every opening half that was never closed.
    pub fn finish(mut self) -> Conversion {
        if !self.pending.is_empty() {
            debug!("{} ledger entries left unmatched", self.pending.len());
        }
        for opening in Opening::ALL {
            for (refid, entry) in std::mem::take(self.pending.map(opening)) {
                self.diagnostics.push(entry.row, Issue::Unmatched { relation: opening.relation(), key: refid });
            }
        }
        Conversion { groups: self.output, diagnostics: self.diagnostics.into_vec() }
    }

    fn check_required_fields(&mut self, entry: &LedgerRow) -> bool {
        let required = [
            ("refid", &entry.refid),
            ("time", &entry.time),
            ("type", &entry.kind),
            ("asset", &entry.asset),
            ("amount", &entry.amount),
            ("fee", &entry.fee),
        ];
        let mut acceptable = true;
        for (field, value) in required {
            if value.trim().is_empty() {
                self.diagnostics.push(entry.row, Issue::MissingField(field));
                acceptable = false;
            }
        }
        if entry.aclass != "currency" {
            self.expected(entry.row, "aclass", "currency", &entry.aclass);
            acceptable = false;
        }
        acceptable
    }

    fn expected(&mut self, row: usize, field: &'static str, expected: &str, actual: &str) {
        self.diagnostics.push(
            row,
            Issue::UnexpectedValue { field, expected: expected.to_owned(), actual: actual.to_owned() },
        );
    }

    fn record(&self, event: Event, entry: &LedgerRow, local_time: &str) -> OutputRecord {
        OutputRecord::new(EXCHANGE, event, entry.time.as_str(), local_time, entry.amount.as_str())
    }

    fn open(&mut self, opening: Opening, entry: LedgerRow) {
        let key = entry.refid.clone();
        let row = entry.row;
        if let Some(previous) = self.pending.map(opening).insert(key.clone(), entry) {
            self.diagnostics.push(
                row,
                Issue::DuplicateReference { relation: opening.relation(), key, previous_row: previous.row },
            );
        }
    }

    fn close(&mut self, opening: Opening, entry: &LedgerRow) -> Option<LedgerRow> {
        let pending = self.pending.map(opening).remove(&entry.refid);
        if pending.is_none() {
            self.diagnostics.push(
                entry.row,
                Issue::NoPendingMatch { relation: opening.relation(), key: entry.refid.clone() },
            );
        }
        pending
    }

    /// Checks that both halves of a pair agree on `fields`.
    fn same_movement(&mut self, opening: &LedgerRow, closing: &LedgerRow, fields: &[Field]) -> bool {
        let mut same = true;
        for &field in fields {
            let (expected, actual) = (field.of(opening), field.of(closing));
            if expected != actual {
                self.diagnostics.push(
                    closing.row,
                    Issue::Mismatch {
                        field: field.into(),
                        other_row: opening.row,
                        expected: expected.to_owned(),
                        actual: actual.to_owned(),
                    },
                );
                same = false;
            }
        }
        same
    }

    fn deposit(&mut self, entry: LedgerRow, local_time: String) {
        if is_fiat(&entry.asset) {
            return;
        }
        if entry.asset.ends_with(STAKED_SUFFIX) {
            // either a move into staking, closed by a transfer, or the first
            // half of a staking reward
            self.open(Opening::StakingDeposit, entry);
            return;
        }

        let first_half = entry.txid.is_empty() && entry.balance.is_empty();
        let second_half = !entry.txid.is_empty() && !entry.balance.is_empty();
        if !first_half && !second_half {
            self.expected(entry.row, "txid and balance", "both blank or both present", &format!("txid '{}', balance '{}'", entry.txid, entry.balance));
            let record = self.record(Event::TransferIn, &entry, &local_time).mark_bad(true);
            self.output.push(&entry.asset, record);
        } else if first_half {
            self.open(Opening::TokenDeposit, entry);
        } else {
            let matched = match self.close(Opening::TokenDeposit, &entry) {
                Some(opening) => self.same_movement(&opening, &entry, &MOVEMENT_FIELDS) && opening.acceptable,
                None => false,
            };
            let record = self.record(Event::TransferIn, &entry, &local_time).mark_bad(!(matched && entry.acceptable));
            self.output.push(&entry.asset, record);
        }
    }

    fn check_trade_leg(&mut self, entry: &LedgerRow) -> bool {
        let mut valid = true;
        if entry.txid.is_empty() {
            self.diagnostics.push(entry.row, Issue::MissingField("txid"));
            valid = false;
        }
        if entry.balance.is_empty() {
            self.diagnostics.push(entry.row, Issue::MissingField("balance"));
            valid = false;
        }
        if !entry.subtype.is_empty() {
            self.expected(entry.row, "subtype", "blank", &entry.subtype);
            valid = false;
        }
        valid
    }

    fn spend(&mut self, mut entry: LedgerRow) {
        // reported now in case no receive ever turns up
        entry.acceptable &= self.check_trade_leg(&entry);
        self.open(Opening::Spend, entry);
    }

    fn receive(&mut self, entry: LedgerRow, local_time: String) {
        let leg_valid = self.check_trade_leg(&entry);

        let Some(spend) = self.close(Opening::Spend, &entry) else {
            let record = self.record(Event::Buy, &entry, &local_time).mark_bad(true);
            self.output.push(&entry.asset, record);
            return;
        };

        let bad = !(entry.acceptable && leg_valid && spend.acceptable);
        if SWAP_ASSETS.contains(&spend.asset.as_str()) {
            let note = format!(
                "Swapped {} {} for {} {}",
                spend.amount.trim_start_matches('-'),
                canonical_currency(&spend.asset),
                entry.amount,
                canonical_currency(&entry.asset),
            );
            // an invalid spend time was reported when the spend was read
            let spend_local_time = utc_to_uk(&spend.time).unwrap_or_default();
            let sell = self
                .record(Event::Sell, &spend, &spend_local_time)
                .with_note(note.as_str())
                .mark_bad(bad);
            let buy = self.record(Event::Buy, &entry, &local_time).with_note(note).mark_bad(bad);
            self.output.push(&spend.asset, sell);
            self.output.push(&entry.asset, buy);
            return;
        }

        let mut bad = bad;
        if spend.asset != "ZGBP" {
            self.expected(spend.row, "spend asset", "ZGBP", &spend.asset);
            bad = true;
        }
        let total = total_spend(&spend).unwrap_or_else(|| {
            self.expected(spend.row, "amount and fee", "decimal numbers", &format!("{} and {}", spend.amount, spend.fee));
            bad = true;
            String::new()
        });
        let record = self.record(Event::Buy, &entry, &local_time).with_gbp_value(total).mark_bad(bad);
        self.output.push(&entry.asset, record);
    }

    fn withdrawal(&mut self, entry: LedgerRow, local_time: String) {
        // the first half has no txid; it is closed either by a second
        // withdrawal or by a transfer into staking
        if entry.txid.is_empty() {
            self.open(Opening::Withdrawal, entry);
            return;
        }
        let matched = match self.close(Opening::Withdrawal, &entry) {
            Some(opening) => self.same_movement(&opening, &entry, &MOVEMENT_FIELDS) && opening.acceptable,
            None => false,
        };
        let record = self.record(Event::TransferOut, &entry, &local_time).mark_bad(!(matched && entry.acceptable));
        self.output.push(&entry.asset, record);
    }

    /// Transfers move assets between spot and staking and never produce
    /// output; they only close a pending entry.
    fn transfer(&mut self, entry: LedgerRow) -> Result<(), ConvertError> {
        let subtype = TransferSubtype::from_str(&entry.subtype).map_err(|_| ConvertError::UnverifiedSubtype {
            row: entry.row,
            kind: entry.kind.clone(),
            subtype: entry.subtype.clone(),
        })?;
        match subtype {
            TransferSubtype::SpotToStaking | TransferSubtype::StakingToSpot => {
                if let Some(withdrawal) = self.close(Opening::Withdrawal, &entry) {
                    self.same_movement(&withdrawal, &entry, &MOVEMENT_FIELDS);
                }
            }
            TransferSubtype::StakingFromSpot => {
                if let Some(deposit) = self.close(Opening::StakingDeposit, &entry) {
                    self.same_movement(&deposit, &entry, &[Field::Asset]);
                }
            }
            TransferSubtype::SpotFromStaking | TransferSubtype::SpotFromFutures => {
                if let Some(deposit) = self.close(Opening::TokenDeposit, &entry) {
                    self.same_movement(&deposit, &entry, &[Field::Asset]);
                }
            }
        }
        Ok(())
    }

    /// Finds the staking deposit announcing this reward. Kraken gives the two
    /// rows different reference ids, so the first pending deposit of the same
    /// asset and amount without a txid is taken. With several identical
    /// rewards in flight this may pair the wrong rows.
    ///
    /// Returns whether a matched deposit passed its checks.
    fn take_reward_deposit(&mut self, entry: &LedgerRow) -> bool {
        let key = self
            .pending
            .staking_deposits
            .iter()
            .find(|(_, d)| d.asset == entry.asset && d.amount == entry.amount && d.txid.is_empty())
            .map(|(k, _)| k.clone());
        match key.and_then(|key| self.pending.staking_deposits.remove(&key)) {
            Some(deposit) => deposit.acceptable,
            None => {
                self.diagnostics.push(
                    entry.row,
                    Issue::NoPendingMatch {
                        relation: Relation::StakingDeposit,
                        key: format!("{} {}", entry.amount, entry.asset),
                    },
                );
                true
            }
        }
    }

    fn staking_reward(&mut self, entry: LedgerRow, local_time: String, require_suffix: bool) {
        let mut bad = !entry.acceptable;
        let base = match entry.asset.strip_suffix(STAKED_SUFFIX) {
            Some(base) => base.to_owned(),
            None => {
                if require_suffix {
                    self.expected(entry.row, "staking asset", "a .S suffix", &entry.asset);
                    bad = true;
                }
                entry.asset.clone()
            }
        };
        if !self.take_reward_deposit(&entry) {
            bad = true;
        }

        let mut record = self.record(Event::Staking, &entry, &local_time);
        if !bad {
            match self.value_in_usd(&entry, canonical_currency(&base)) {
                Ok((price, value)) => record = record.with_unit_price(price).with_usd_value(value),
                Err(issue) => {
                    self.diagnostics.push(entry.row, issue);
                    bad = true;
                }
            }
        }
        self.output.push(&base, record.mark_bad(bad));
    }

    fn value_in_usd(&self, entry: &LedgerRow, symbol: &str) -> Result<(String, String), Issue> {
        let date = parse_date_time(&entry.time)
            .map_err(|_| Issue::InvalidTimestamp(entry.time.clone()))?
            .date();
        let amount = parse_amount(&entry.amount).ok_or_else(|| Issue::UnexpectedValue {
            field: "amount",
            expected: "a decimal number".to_owned(),
            actual: entry.amount.clone(),
        })?;
        let price = self
            .prices
            .usd_price(symbol, date)
            .map_err(|e| Issue::PriceUnavailable(e.to_string()))?;
        let value = (amount * price).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        Ok((price.normalize().to_string(), format!("{:.2}", value)))
    }
}

fn load_ledger(text: &str) -> Result<Vec<LedgerRow>> {
    let mut rdr = csv::ReaderBuilder::new().from_reader(text.as_bytes());
    let mut rows = Vec::new();
    for (index, result) in rdr.deserialize().enumerate() {
        let mut row: LedgerRow = result?;
        row.row = index + 2;
        rows.push(row);
    }
    into_chronological(&mut rows, |r| r.time.as_str());
    Ok(rows)
}

fn convert_kraken_ledger(text: &str, prices: &dyn PriceLookup) -> Result<Conversion> {
    let mut reconciler = Reconciler::new(prices);
    for row in load_ledger(text)? {
        reconciler.process(row)?;
    }
    Ok(reconciler.finish())
}

/// Staking rewards are valued in USD on the day they were received.
fn kraken_price_requirements(text: &str) -> Result<PriceRequirements> {
    let mut requirements = PriceRequirements::new();
    for row in load_ledger(text)? {
        let reward = row.kind == "staking" || (row.kind == "earn" && row.subtype == "reward");
        if !reward {
            continue;
        }
        if let Ok(time) = parse_date_time(&row.time) {
            let base = row.asset.strip_suffix(STAKED_SUFFIX).unwrap_or(&row.asset);
            requirements.add(canonical_currency(base), time.date());
        }
    }
    Ok(requirements)
}

#[distributed_slice(crate::CONVERTERS)]
static KRAKEN_LEDGER_CSV: Converter = Converter {
    id: "KrakenLedgerCsv",
    label: "Kraken Ledger (CSV)",
    csv: &[CsvSpec::new(&LEDGER_HEADERS), CsvSpec::new(&LEGACY_LEDGER_HEADERS)],
    price_requirements: Some(kraken_price_requirements),
    convert: convert_kraken_ledger,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{Diagnostic, Validity};
    use crate::price_history::FixedPrices;
    use rust_decimal_macros::dec;

    const HEADER: &str = "txid,refid,time,type,subtype,aclass,asset,wallet,amount,fee,balance\n";

    fn ledger(rows: &str) -> String {
        format!("{}{}", HEADER, rows)
    }

    fn convert(rows: &str) -> Conversion {
        convert_with(rows, &FixedPrices::default())
    }

    fn convert_with(rows: &str, prices: &FixedPrices) -> Conversion {
        convert_kraken_ledger(&ledger(rows), prices).unwrap()
    }

    fn reconciler_after<'a>(rows: &str, prices: &'a FixedPrices) -> Reconciler<'a> {
        let mut reconciler = Reconciler::new(prices);
        for row in load_ledger(&ledger(rows)).unwrap() {
            reconciler.process(row).unwrap();
        }
        reconciler
    }

    #[test]
    fn parse_ledger_rows() {
        let rows = load_ledger(&ledger(
            "\"LED123\",\"REF456\",\"2024-01-10 08:00:00.0000\",\"deposit\",\"\",\"currency\",\"XXBT\",\"spot / main\",\"0.5\",\"0.0\",\"0.5\"\n",
        ))
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row, 2);
        assert_eq!(rows[0].refid, "REF456");
        assert_eq!(rows[0].wallet.as_deref(), Some("spot / main"));
        assert_eq!(rows[0].kind, "deposit");
    }

    #[test]
    fn parse_legacy_ledger_without_wallet() {
        let csv_data = "txid,refid,time,type,subtype,aclass,asset,amount,fee,balance\n\
            \"L1\",\"R1\",\"2021-11-01 10:00:00\",\"spend\",\"\",\"currency\",\"ZGBP\",\"-10.00\",\"0.50\",\"89.50\"\n\
            \"L2\",\"R1\",\"2021-11-01 10:00:00\",\"receive\",\"\",\"currency\",\"FLOW\",\"1.5\",\"0\",\"1.5\"\n";
        let conversion = convert_kraken_ledger(csv_data, &FixedPrices::default()).unwrap();
        let flow = conversion.groups.get("FLOW").unwrap();
        assert_eq!(flow.len(), 1);
        assert_eq!(flow[0].gbp_value, "10.50");
        assert!(conversion.diagnostics.is_empty());
    }

    #[test]
    fn fiat_spend_then_receive_is_one_buy() {
        let conversion = convert(
            "L1,A,2022-01-10 12:00:00,spend,,currency,ZGBP,spot / main,-10.00,0.50,89.50\n\
             L2,A,2022-01-10 12:00:00,receive,,currency,XXBT,spot / main,0.001,0,0.001\n",
        );
        assert_eq!(conversion.groups.len(), 1);
        let btc = conversion.groups.get("BTC").unwrap();
        assert_eq!(btc.len(), 1);
        let row = btc[0].to_row();
        assert_eq!(row[0], "");
        assert_eq!(row[4], "0.001");
        assert_eq!(row[8], "10.50");
        assert_eq!(row[13], "BUY");
        assert!(conversion.diagnostics.is_empty());
    }

    #[test]
    fn spend_total_is_truncated_to_pennies() {
        let spend = LedgerRow { amount: "-123.759".to_owned(), fee: "0.0199".to_owned(), ..Default::default() };
        assert_eq!(total_spend(&spend).as_deref(), Some("123.76"));
        let spend = LedgerRow { amount: "-25".to_owned(), fee: ".1".to_owned(), ..Default::default() };
        assert_eq!(total_spend(&spend).as_deref(), Some("25.10"));
        let spend = LedgerRow { amount: "lots".to_owned(), fee: "0".to_owned(), ..Default::default() };
        assert_eq!(total_spend(&spend), None);
    }

    #[test]
    fn token_spend_is_a_swap() {
        let conversion = convert(
            "L1,B,2022-02-01 09:00:00,spend,,currency,USDT,spot / main,-100.00,0.26,0\n\
             L2,B,2022-02-01 09:00:00,receive,,currency,XETH,spot / main,0.035,0,0.035\n",
        );
        let sell = conversion.groups.get("USDT").unwrap();
        let buy = conversion.groups.get("ETH").unwrap();
        assert_eq!(sell.len(), 1);
        assert_eq!(buy.len(), 1);
        assert_eq!(sell[0].event, Event::Sell);
        assert_eq!(sell[0].amount, "-100.00");
        assert_eq!(buy[0].event, Event::Buy);
        assert_eq!(buy[0].amount, "0.035");
        assert_eq!(buy[0].note, "Swapped 100.00 USDT for 0.035 ETH");
        assert!(sell[0].is_valid() && buy[0].is_valid());
    }

    #[test]
    fn other_spend_asset_is_bad_data() {
        let conversion = convert(
            "L1,C,2022-02-01 09:00:00,spend,,currency,ZEUR,spot / main,-20.00,0.10,0\n\
             L2,C,2022-02-01 09:00:00,receive,,currency,DOT,spot / main,1,0,1\n",
        );
        let dot = conversion.groups.get("DOT").unwrap();
        assert_eq!(dot[0].validity, Validity::BadData);
        assert_eq!(dot[0].gbp_value, "20.10");
        assert_eq!(conversion.diagnostics.len(), 1);
    }

    #[test]
    fn receive_without_spend_is_bad_data() {
        let conversion = convert("L2,Z,2022-01-10 12:00:00,receive,,currency,SOL,spot / main,2,0,2\n");
        let sol = conversion.groups.get("SOL").unwrap();
        assert_eq!(sol.len(), 1);
        assert_eq!(sol[0].label(), "BUY **BAD DATA**");
        assert_eq!(sol[0].gbp_value, "");
        assert_eq!(
            conversion.diagnostics[0].issue,
            Issue::NoPendingMatch { relation: Relation::Spend, key: "Z".to_owned() }
        );
    }

    #[test]
    fn fiat_deposit_is_ignored() {
        let prices = FixedPrices::default();
        let reconciler = reconciler_after(
            ",D,2022-01-01 10:00:00,deposit,,currency,ZGBP,spot / main,100.00,0,\n\
             ,D,2022-01-01 10:00:01,deposit,,currency,ZGBP,spot / main,100.00,0,100.00\n",
            &prices,
        );
        assert!(reconciler.pending.is_empty());
        let conversion = reconciler.finish();
        assert!(conversion.groups.is_empty());
        assert!(conversion.diagnostics.is_empty());
    }

    #[test]
    fn token_deposit_reported_twice_is_one_transfer_in() {
        let conversion = convert(
            ",E,2022-03-01 10:00:00,deposit,,currency,ADA,spot / main,250,0,\n\
             T1,E,2022-03-01 10:05:00,deposit,,currency,ADA,spot / main,250,0,250\n",
        );
        let ada = conversion.groups.get("ADA").unwrap();
        assert_eq!(ada.len(), 1);
        assert_eq!(ada[0].label(), "TRANSFER-IN");
        assert_eq!(ada[0].time, "2022-03-01 10:05:00");
        assert!(conversion.diagnostics.is_empty());
    }

    #[test]
    fn token_deposit_halves_that_disagree_are_bad_data() {
        let conversion = convert(
            ",E,2022-03-01 10:00:00,deposit,,currency,ADA,spot / main,250,0,\n\
             T1,E,2022-03-01 10:05:00,deposit,,currency,ADA,spot / main,249,0,249\n",
        );
        let ada = conversion.groups.get("ADA").unwrap();
        assert_eq!(ada[0].validity, Validity::BadData);
        assert!(matches!(
            conversion.diagnostics[0].issue,
            Issue::Mismatch { field: "amount", other_row: 2, .. }
        ));
    }

    #[test]
    fn half_filled_token_deposit_is_bad_data() {
        let conversion = convert("T1,E,2022-03-01 10:05:00,deposit,,currency,ADA,spot / main,250,0,\n");
        assert_eq!(conversion.groups.get("ADA").unwrap()[0].validity, Validity::BadData);
    }

    #[test]
    fn staking_a_token_produces_no_output() {
        let prices = FixedPrices::default();
        let reconciler = reconciler_after(
            ",W,2022-04-01 08:00:00,withdrawal,,currency,DOT,spot / main,-10,0,\n\
             ,S,2022-04-01 08:00:01,deposit,,currency,DOT.S,staking,10,0,\n\
             T1,S,2022-04-01 08:05:00,transfer,stakingfromspot,currency,DOT.S,staking,10,0,10\n\
             T2,W,2022-04-01 08:05:00,transfer,spottostaking,currency,DOT,spot / main,-10,0,0\n",
            &prices,
        );
        assert!(reconciler.pending.is_empty());
        let conversion = reconciler.finish();
        assert!(conversion.groups.is_empty());
        assert!(conversion.diagnostics.is_empty());
    }

    #[test]
    fn staking_deposit_is_removed_by_its_transfer() {
        let prices = FixedPrices::default();
        let mut reconciler = reconciler_after(",S,2022-04-01 08:00:01,deposit,,currency,DOT.S,staking,10,0,\n", &prices);
        assert_eq!(reconciler.pending.staking_deposits.len(), 1);
        let transfer = load_ledger(&ledger(
            "T1,S,2022-04-01 08:05:00,transfer,stakingfromspot,currency,DOT.S,staking,10,0,10\n",
        ))
        .unwrap();
        reconciler.process(transfer[0].clone()).unwrap();
        assert!(reconciler.pending.staking_deposits.is_empty());
        assert!(reconciler.finish().groups.is_empty());
    }

    #[test]
    fn withdrawal_pair_is_transfer_out() {
        let conversion = convert(
            ",X,2022-05-01 08:00:00,withdrawal,,currency,XETH,spot / main,-1.0,0.005,\n\
             T9,X,2022-05-01 08:30:00,withdrawal,,currency,XETH,spot / main,-1.0,0.005,0.2\n",
        );
        let eth = conversion.groups.get("ETH").unwrap();
        assert_eq!(eth.len(), 1);
        assert_eq!(eth[0].label(), "TRANSFER-OUT");
        assert_eq!(eth[0].local_time, "2022-05-01 09:30:00");
    }

    #[test]
    fn staking_reward_is_valued_in_usd() {
        let prices = FixedPrices::default().with("FLOW", "2022-06-01", dec!(2.5));
        let conversion = convert_with(
            ",R1,2022-06-01 01:00:00,deposit,,currency,FLOW.S,staking,0.3,0,\n\
             S1,R2,2022-06-01 01:00:05,staking,,currency,FLOW.S,staking,0.3,0,100.3\n",
            &prices,
        );
        let flow = conversion.groups.get("FLOW").unwrap();
        assert_eq!(flow.len(), 1);
        assert_eq!(flow[0].label(), "STAKING");
        assert_eq!(flow[0].unit_price, "2.5");
        assert_eq!(flow[0].usd_value, "0.75");
        assert!(conversion.groups.get("FLOW.S").is_none());
        assert!(conversion.diagnostics.is_empty());
    }

    #[test]
    fn staking_reward_without_price_is_bad_data() {
        let conversion = convert(
            ",R1,2022-06-01 01:00:00,deposit,,currency,FLOW.S,staking,0.3,0,\n\
             S1,R2,2022-06-01 01:00:05,staking,,currency,FLOW.S,staking,0.3,0,100.3\n",
        );
        let flow = conversion.groups.get("FLOW").unwrap();
        assert_eq!(flow[0].validity, Validity::BadData);
        assert_eq!(flow[0].unit_price, "");
        assert!(matches!(conversion.diagnostics[0].issue, Issue::PriceUnavailable(_)));
    }

    #[test]
    fn staking_reward_needs_staked_asset() {
        let prices = FixedPrices::default().with("DOT", "2022-06-01", dec!(9));
        let conversion = convert_with("S1,R2,2022-06-01 01:00:05,staking,,currency,DOT,staking,0.3,0,100.3\n", &prices);
        let dot = conversion.groups.get("DOT").unwrap();
        assert_eq!(dot[0].validity, Validity::BadData);
        // no suffix and no deposit to match
        assert_eq!(conversion.diagnostics.len(), 2);
    }

    #[test]
    fn earn_reward_is_staking_and_migration_is_ignored() {
        let prices = FixedPrices::default().with("DOT", "2023-03-01", dec!(6.1));
        let conversion = convert_with(
            ",M1,2023-02-28 10:00:00,earn,migration,currency,DOT,earn / bonded,5,0,5\n\
             ,R3,2023-03-01 02:00:00,deposit,,currency,DOT.S,earn / bonded,0.02,0,\n\
             E1,R4,2023-03-01 02:00:00,earn,reward,currency,DOT.S,earn / bonded,0.02,0,5.02\n",
            &prices,
        );
        let dot = conversion.groups.get("DOT").unwrap();
        assert_eq!(dot.len(), 1);
        assert_eq!(dot[0].event, Event::Staking);
        assert_eq!(dot[0].usd_value, "0.12");
        assert!(conversion.diagnostics.is_empty());
    }

    #[test]
    fn unverified_types_stop_the_conversion() {
        let err = convert_kraken_ledger(
            &ledger("T1,A,2022-01-01 00:00:00,trade,,currency,XXBT,spot / main,0.1,0,0.1\n"),
            &FixedPrices::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConvertError>(),
            Some(ConvertError::UnverifiedType { row: 2, .. })
        ));

        let err = convert_kraken_ledger(
            &ledger("T1,A,2022-01-01 00:00:00,margin trade,,currency,XXBT,spot / main,0.1,0,0.1\n"),
            &FixedPrices::default(),
        )
        .unwrap_err();
        assert!(err.downcast_ref::<ConvertError>().is_some());

        let err = convert_kraken_ledger(
            &ledger("T1,A,2022-01-01 00:00:00,something new,,currency,XXBT,spot / main,0.1,0,0.1\n"),
            &FixedPrices::default(),
        )
        .unwrap_err();
        assert!(err.downcast_ref::<ConvertError>().is_some());
    }

    #[test]
    fn unverified_transfer_subtype_stops_the_conversion() {
        let err = convert_kraken_ledger(
            &ledger("T1,A,2022-01-01 00:00:00,transfer,spotfromsomewhere,currency,DOT,spot / main,1,0,1\n"),
            &FixedPrices::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConvertError>(),
            Some(ConvertError::UnverifiedSubtype { subtype, .. }) if subtype == "spotfromsomewhere"
        ));
    }

    #[test]
    fn unmatched_spend_is_reported_at_the_end() {
        let conversion = convert("L1,REF-A,2022-01-10 12:00:00,spend,,currency,ZGBP,spot / main,-10.00,0.50,89.50\n");
        assert!(conversion.groups.is_empty());
        assert_eq!(conversion.diagnostics.len(), 1);
        assert_eq!(conversion.diagnostics[0].row, 2);
        assert_eq!(
            conversion.diagnostics[0].issue,
            Issue::Unmatched { relation: Relation::Spend, key: "REF-A".to_owned() }
        );
    }

    #[test]
    fn missing_fields_tag_output() {
        let conversion = convert(
            "L1,A,2022-01-10 12:00:00,spend,,currency,ZGBP,spot / main,-10.00,0.50,89.50\n\
             L2,A,2022-01-10 12:00:00,receive,,bogus,XXBT,spot / main,0.001,0,0.001\n",
        );
        let btc = conversion.groups.get("BTC").unwrap();
        assert_eq!(btc[0].validity, Validity::BadData);
        assert!(matches!(
            conversion.diagnostics[0].issue,
            Issue::UnexpectedValue { field: "aclass", .. }
        ));
    }

    #[test]
    fn duplicate_spend_reference_is_reported() {
        let conversion = convert(
            "L1,A,2022-01-10 12:00:00,spend,,currency,ZGBP,spot / main,-10.00,0.50,89.50\n\
             L3,A,2022-01-10 12:00:01,spend,,currency,ZGBP,spot / main,-20.00,0.50,69.00\n\
             L2,A,2022-01-10 12:00:02,receive,,currency,XXBT,spot / main,0.001,0,0.001\n",
        );
        assert!(matches!(
            conversion.diagnostics[0].issue,
            Issue::DuplicateReference { relation: Relation::Spend, previous_row: 2, .. }
        ));
        // the later spend wins
        assert_eq!(conversion.groups.get("BTC").unwrap()[0].gbp_value, "20.50");
    }

    #[test]
    fn newest_first_ledger_is_processed_in_time_order() {
        let conversion = convert(
            "L2,A,2022-01-10 12:00:01,receive,,currency,XXBT,spot / main,0.001,0,0.001\n\
             L1,A,2022-01-10 12:00:00,spend,,currency,ZGBP,spot / main,-10.00,0.50,89.50\n",
        );
        assert_eq!(conversion.groups.get("BTC").unwrap()[0].label(), "BUY");
        assert!(conversion.diagnostics.is_empty());
    }

    #[test]
    fn same_input_gives_same_output() {
        let rows = "L1,A,2022-01-10 12:00:00,spend,,currency,ZGBP,spot / main,-10.00,0.50,89.50\n\
                    L2,A,2022-01-10 12:00:00,receive,,currency,XXBT,spot / main,0.001,0,0.001\n\
                    ,E,2022-03-01 10:00:00,deposit,,currency,ADA,spot / main,250,0,\n";
        assert_eq!(convert(rows).groups.to_rows(), convert(rows).groups.to_rows());
    }

    #[test]
    fn reward_dates_are_price_requirements() {
        let requirements = kraken_price_requirements(&ledger(
            "S1,R2,2022-06-01 01:00:05,staking,,currency,FLOW.S,staking,0.3,0,100.3\n\
             E1,R4,2023-03-01 02:00:00,earn,reward,currency,DOT.S,earn / bonded,0.02,0,5.02\n\
             L1,A,2022-01-10 12:00:00,spend,,currency,ZGBP,spot / main,-10.00,0.50,89.50\n",
        ))
        .unwrap();
        assert_eq!(requirements.oldest(), chrono::NaiveDate::from_ymd_opt(2022, 6, 1));
        assert!(!requirements.is_empty());
    }

    #[test]
    fn invalid_first_deposit_half_marks_transfer_in() {
        let conversion = convert(
            ",E,2022-03-01 10:00:00,deposit,,bogus,ADA,spot / main,250,0,\n\
             T1,E,2022-03-01 10:05:00,deposit,,currency,ADA,spot / main,250,0,250\n",
        );
        let ada = conversion.groups.get("ADA").unwrap();
        assert_eq!(ada[0].label(), "TRANSFER-IN **BAD DATA**");
        assert!(matches!(
            conversion.diagnostics[0].issue,
            Issue::UnexpectedValue { field: "aclass", .. }
        ));
    }

    #[test]
    fn invalid_spend_marks_buy() {
        let conversion = convert(
            "L1,A,2022-01-10 12:00:00,spend,,bogus,ZGBP,spot / main,-10.00,0.50,89.50\n\
             L2,A,2022-01-10 12:00:00,receive,,currency,XXBT,spot / main,0.001,0,0.001\n",
        );
        let btc = conversion.groups.get("BTC").unwrap();
        assert_eq!(btc[0].label(), "BUY **BAD DATA**");
        assert_eq!(btc[0].gbp_value, "10.50");
    }

    #[test]
    fn spend_without_txid_marks_swap() {
        let conversion = convert(
            ",B,2022-02-01 09:00:00,spend,,currency,USDT,spot / main,-100.00,0.26,0\n\
             L2,B,2022-02-01 09:00:00,receive,,currency,XETH,spot / main,0.035,0,0.035\n",
        );
        assert_eq!(conversion.groups.get("USDT").unwrap()[0].validity, Validity::BadData);
        assert_eq!(conversion.groups.get("ETH").unwrap()[0].validity, Validity::BadData);
    }

    #[test]
    fn invalid_first_withdrawal_marks_transfer_out() {
        let conversion = convert(
            ",X,2022-05-01 08:00:00,withdrawal,,bogus,XETH,spot / main,-1.0,0.005,\n\
             T9,X,2022-05-01 08:30:00,withdrawal,,currency,XETH,spot / main,-1.0,0.005,0.2\n",
        );
        assert_eq!(conversion.groups.get("ETH").unwrap()[0].label(), "TRANSFER-OUT **BAD DATA**");
    }

    #[test]
    fn invalid_staking_deposit_marks_reward() {
        let prices = FixedPrices::default().with("FLOW", "2022-06-01", dec!(2.5));
        let conversion = convert_with(
            ",R1,2022-06-01 01:00:00,deposit,,bogus,FLOW.S,staking,0.3,0,\n\
             S1,R2,2022-06-01 01:00:05,staking,,currency,FLOW.S,staking,0.3,0,100.3\n",
            &prices,
        );
        let flow = conversion.groups.get("FLOW").unwrap();
        assert_eq!(flow[0].label(), "STAKING **BAD DATA**");
        assert_eq!(conversion.diagnostics.len(), 1);
    }

    #[test]
    fn withdrawal_halves_that_disagree_are_bad_data() {
        let conversion = convert(
            ",X,2022-05-01 08:00:00,withdrawal,,currency,XETH,spot / main,-1.0,0.005,\n\
             T9,X,2022-05-01 08:30:00,withdrawal,,currency,XETH,spot / main,-0.9,0.005,0.3\n",
        );
        assert_eq!(conversion.groups.get("ETH").unwrap()[0].label(), "TRANSFER-OUT **BAD DATA**");
        assert_eq!(conversion.diagnostics.len(), 1);
        assert!(matches!(
            conversion.diagnostics[0].issue,
            Issue::Mismatch { field: "amount", other_row: 2, .. }
        ));
    }

    #[test]
    fn swap_sell_uses_the_spend_time() {
        let conversion = convert(
            "L1,B,2022-06-01 09:00:00,spend,,currency,USDC,spot / main,-50.00,0.10,0\n\
             L2,B,2022-06-01 09:00:02,receive,,currency,DOT,spot / main,6,0,6\n",
        );
        let sell = &conversion.groups.get("USDC").unwrap()[0];
        let buy = &conversion.groups.get("DOT").unwrap()[0];
        assert_eq!(sell.time, "2022-06-01 09:00:00");
        assert_eq!(sell.local_time, "2022-06-01 10:00:00");
        assert_eq!(buy.local_time, "2022-06-01 10:00:02");
    }

    #[test]
    fn futures_credit_closes_token_deposit() {
        let prices = FixedPrices::default();
        let reconciler = reconciler_after(
            ",F,2022-09-15 10:00:00,deposit,,currency,ETHW,spot / main,0.5,0,\n\
             T1,F,2022-09-15 10:00:00,transfer,spotfromfutures,currency,ETHW,spot / main,0.5,0,0.5\n",
            &prices,
        );
        assert!(reconciler.pending.is_empty());
        let conversion = reconciler.finish();
        assert!(conversion.groups.is_empty());
        assert!(conversion.diagnostics.is_empty());
    }

    #[test]
    fn unstaking_produces_no_output() {
        let prices = FixedPrices::default();
        let reconciler = reconciler_after(
            ",U1,2022-07-01 08:00:00,withdrawal,,currency,DOT.S,staking,-5,0,\n\
             ,U2,2022-07-01 08:00:00,deposit,,currency,DOT,spot / main,5,0,\n\
             T1,U1,2022-07-01 08:10:00,transfer,stakingtospot,currency,DOT.S,staking,-5,0,0\n\
             T2,U2,2022-07-01 08:10:00,transfer,spotfromstaking,currency,DOT,spot / main,5,0,5\n",
            &prices,
        );
        assert!(reconciler.pending.is_empty());
        let conversion = reconciler.finish();
        assert!(conversion.groups.is_empty());
        assert!(conversion.diagnostics.is_empty());
    }

    #[test]
    fn transfer_to_staking_without_withdrawal_is_reported() {
        let conversion = convert("T2,W,2022-04-01 08:05:00,transfer,spottostaking,currency,DOT,spot / main,-10,0,0\n");
        assert!(conversion.groups.is_empty());
        assert_eq!(conversion.diagnostics.len(), 1);
        assert_eq!(
            conversion.diagnostics[0].issue,
            Issue::NoPendingMatch { relation: Relation::Withdrawal, key: "W".to_owned() }
        );
    }

    #[test]
    fn earn_allocations_are_ignored() {
        let conversion = convert(
            "E1,A1,2023-03-01 02:00:00,earn,allocation,currency,DOT,earn / flexible,5,0,5\n\
             E2,A2,2023-03-02 02:00:00,earn,autoallocation,currency,DOT,earn / flexible,1,0,6\n\
             E3,A3,2023-03-03 02:00:00,earn,deallocation,currency,DOT,earn / flexible,-6,0,0\n",
        );
        assert!(conversion.groups.is_empty());
        assert!(conversion.diagnostics.is_empty());
    }

    #[test]
    fn unmatched_withdrawal_is_reported_at_the_end() {
        let conversion = convert(",W,2022-04-01 08:00:00,withdrawal,,currency,DOT,spot / main,-10,0,\n");
        assert!(conversion.groups.is_empty());
        assert_eq!(
            conversion.diagnostics,
            [Diagnostic { row: 2, issue: Issue::Unmatched { relation: Relation::Withdrawal, key: "W".to_owned() } }]
        );
    }

    #[test]
    fn unmatched_staking_deposit_is_reported_at_the_end() {
        let conversion = convert(",S,2022-04-01 08:00:01,deposit,,currency,DOT.S,staking,10,0,\n");
        assert!(conversion.groups.is_empty());
        assert_eq!(
            conversion.diagnostics,
            [Diagnostic { row: 2, issue: Issue::Unmatched { relation: Relation::StakingDeposit, key: "S".to_owned() } }]
        );
    }

    #[test]
    fn unmatched_token_deposit_is_reported_at_the_end() {
        let conversion = convert(",E,2022-03-01 10:00:00,deposit,,currency,ADA,spot / main,250,0,\n");
        assert!(conversion.groups.is_empty());
        assert_eq!(
            conversion.diagnostics,
            [Diagnostic { row: 2, issue: Issue::Unmatched { relation: Relation::TokenDeposit, key: "E".to_owned() } }]
        );
    }

    #[test]
    fn other_unverified_types_stop_the_conversion() {
        for kind in ["rollover", "adjustment", "settled", "reward", "sale", "dividend"] {
            let err = convert_kraken_ledger(
                &ledger(&format!("T1,A,2022-01-01 00:00:00,{},,currency,XXBT,spot / main,0.1,0,0.1\n", kind)),
                &FixedPrices::default(),
            )
            .unwrap_err();
            assert!(
                matches!(err.downcast_ref::<ConvertError>(), Some(ConvertError::UnverifiedType { kind: k, .. }) if k == kind),
                "{kind} should be fatal"
            );
        }
    }

    #[test]
    fn unknown_earn_subtype_stops_the_conversion() {
        let err = convert_kraken_ledger(
            &ledger("E1,A1,2023-03-01 02:00:00,earn,bonus,currency,DOT,earn / flexible,5,0,5\n"),
            &FixedPrices::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConvertError>(),
            Some(ConvertError::UnverifiedSubtype { subtype, .. }) if subtype == "bonus"
        ));
    }
}
