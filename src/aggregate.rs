//! Grouped fraud statistics: transaction count, fraud count, fraud rate and
//! fraud loss per day bucket, transaction type, sender and receiver.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use tracing::{info, warn};

use crate::error::PipelineError;
use crate::frame::{Cell, Column, Frame};

pub const LABEL_COLUMN: &str = "isfraud";
pub const AMOUNT_COLUMN: &str = "amount";

/// Number of day buckets the time step is folded into.
const DAYS_PER_CYCLE: i64 = 7;

/// A dimension the transactions are grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    Day,
    Type,
    Sender,
    Receiver,
}

impl Grouping {
    pub const ALL: [Grouping; 4] = [
        Grouping::Day,
        Grouping::Type,
        Grouping::Sender,
        Grouping::Receiver,
    ];

    /// Input column the key is read from.
    pub fn source_column(self) -> &'static str {
        match self {
            Grouping::Day => "step",
            Grouping::Type => "type",
            Grouping::Sender => "nameorig",
            Grouping::Receiver => "namedest",
        }
    }

    /// Header of the key column in the export.
    pub fn key_name(self) -> &'static str {
        match self {
            Grouping::Day => "step_day",
            other => other.source_column(),
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Grouping::Day => "fraud_by_day.csv",
            Grouping::Type => "fraud_by_type.csv",
            Grouping::Sender => "fraud_by_sender.csv",
            Grouping::Receiver => "fraud_by_receiver.csv",
        }
    }

    /// Account tables also report the total amount moved.
    pub fn reports_total_amount(self) -> bool {
        matches!(self, Grouping::Sender | Grouping::Receiver)
    }

    fn key<'a>(self, cell: Cell<'a>) -> Option<GroupKey<'a>> {
        match self {
            Grouping::Day => day_bucket(cell).map(GroupKey::Int),
            _ => GroupKey::from_cell(cell),
        }
    }
}

/// Folds a time step into a day bucket in `0..7`.
pub fn day_bucket(step: Cell<'_>) -> Option<i64> {
    match step {
        Cell::Int(v) => Some(v.rem_euclid(DAYS_PER_CYCLE)),
        Cell::Float(v) if v.is_finite() => Some((v.floor() as i64).rem_euclid(DAYS_PER_CYCLE)),
        _ => None,
    }
}

/// Value of a group key, borrowed from the frame. Keys of one table always
/// share a variant; ordering is the natural ascending order of that variant.
#[derive(Debug, Clone, Copy)]
pub enum GroupKey<'a> {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(&'a str),
}

impl<'a> GroupKey<'a> {
    fn from_cell(cell: Cell<'a>) -> Option<Self> {
        match cell {
            Cell::Int(v) => Some(GroupKey::Int(v)),
            Cell::Float(v) if !v.is_nan() => Some(GroupKey::Float(v)),
            Cell::Bool(v) => Some(GroupKey::Bool(v)),
            Cell::Text(v) => Some(GroupKey::Text(v)),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            GroupKey::Bool(_) => 0,
            GroupKey::Int(_) => 1,
            GroupKey::Float(_) => 2,
            GroupKey::Text(_) => 3,
        }
    }
}

impl Ord for GroupKey<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (GroupKey::Int(a), GroupKey::Int(b)) => a.cmp(b),
            (GroupKey::Float(a), GroupKey::Float(b)) => a.total_cmp(b),
            (GroupKey::Bool(a), GroupKey::Bool(b)) => a.cmp(b),
            (GroupKey::Text(a), GroupKey::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for GroupKey<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for GroupKey<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GroupKey<'_> {}

impl fmt::Display for GroupKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Int(v) => write!(f, "{}", v),
            GroupKey::Float(v) => write!(f, "{}", crate::frame::format_float(*v)),
            GroupKey::Bool(v) => write!(f, "{}", v),
            GroupKey::Text(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow<'a> {
    pub key: GroupKey<'a>,
    pub total_transactions: u64,
    pub fraud_cases: u64,
    /// Sum of `amount` over every row of the group
    pub total_amount: f64,
    /// Sum of `amount` over the fraudulent rows of the group
    pub total_fraud_loss_usd: f64,
}

impl AggregateRow<'_> {
    /// Share of fraudulent transactions as a percentage, rounded to 2 decimals.
    pub fn fraud_rate(&self) -> f64 {
        if self.total_transactions == 0 {
            return 0.0;
        }
        let pct = self.fraud_cases as f64 / self.total_transactions as f64 * 100.0;
        (pct * 100.0).round_ties_even() / 100.0
    }
}

#[derive(Debug, Clone)]
pub struct AggregateTable<'a> {
    pub grouping: Grouping,
    pub rows: Vec<AggregateRow<'a>>,
}

impl AggregateTable<'_> {
    pub fn total_transactions(&self) -> u64 {
        self.rows.iter().map(|r| r.total_transactions).sum()
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    total: u64,
    fraud: u64,
    amount: f64,
    fraud_loss: f64,
}

/// Group the frame by one dimension. Returns `None` when the key's source
/// column is absent from the input.
pub fn aggregate(
    frame: &Frame,
    grouping: Grouping,
) -> Result<Option<AggregateTable<'_>>, PipelineError> {
    let labels = frame.require(LABEL_COLUMN)?;
    let amounts = frame.require(AMOUNT_COLUMN)?;
    let keys = match frame.column(grouping.source_column()) {
        Some(column) => column,
        None => return Ok(None),
    };

    Ok(Some(AggregateTable {
        grouping,
        rows: group_rows(grouping, keys, labels, amounts, frame.n_rows()),
    }))
}

fn group_rows<'a>(
    grouping: Grouping,
    keys: &'a Column,
    labels: &Column,
    amounts: &Column,
    n_rows: usize,
) -> Vec<AggregateRow<'a>> {
    let mut groups: BTreeMap<GroupKey<'a>, Accumulator> = BTreeMap::new();

    for row in 0..n_rows {
        // null keys form no group
        let Some(key) = grouping.key(keys.get(row)) else {
            continue;
        };
        let acc = groups.entry(key).or_default();
        let is_fraud = labels.get(row).is_positive_label();
        let amount = amounts.get(row).as_f64();

        acc.total += 1;
        if let Some(amount) = amount {
            acc.amount += amount;
        }
        if is_fraud {
            acc.fraud += 1;
            if let Some(amount) = amount {
                acc.fraud_loss += amount;
            }
        }
    }

    groups
        .into_iter()
        .map(|(key, acc)| AggregateRow {
            key,
            total_transactions: acc.total,
            fraud_cases: acc.fraud,
            total_amount: acc.amount,
            total_fraud_loss_usd: acc.fraud_loss,
        })
        .collect()
}

/// Compute every grouping whose source column is present.
pub fn aggregate_all(frame: &Frame) -> Result<Vec<AggregateTable<'_>>, PipelineError> {
    let mut tables = Vec::with_capacity(Grouping::ALL.len());
    for grouping in Grouping::ALL {
        match aggregate(frame, grouping)? {
            Some(table) => {
                info!(
                    table = grouping.file_name(),
                    groups = table.rows.len(),
                    "Aggregated fraud statistics"
                );
                tables.push(table);
            }
            None => warn!(
                column = grouping.source_column(),
                table = grouping.file_name(),
                "Source column missing, skipping table"
            ),
        }
    }
    Ok(tables)
}
