//! Per-customer RFM feature computation

use crate::error::SegmentError;
use crate::transaction::{DropReport, RowIssue, Transaction, TransactionRecord};
use chrono::{Duration, NaiveDate};
use ndarray::Array2;
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

/// Length of the trailing window used for the "last 90 days" metrics
pub const RECENT_WINDOW_DAYS: i64 = 90;

/// RFM and auxiliary metrics for one customer
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerFeatures {
    pub customer_id: String,
    /// Days between the reference date and the last purchase
    pub recency_days: i64,
    /// Number of distinct orders
    pub frequency: usize,
    /// Total spend
    pub monetary: f64,
    pub avg_order_value: f64,
    pub orders_last_90d: usize,
    pub spend_last_90d: f64,
    pub first_purchase_date: NaiveDate,
    pub last_purchase_date: NaiveDate,
    /// Days between the reference date and the first purchase
    pub days_since_first: i64,
}

/// Numeric columns that can be fed to the scaler and the clustering engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum FeatureColumn {
    Recency,
    Frequency,
    Monetary,
    AvgOrderValue,
    OrdersLast90d,
    SpendLast90d,
    DaysSinceFirst,
}

impl FeatureColumn {
    /// The classic recency/frequency/monetary triple
    pub const RFM: [FeatureColumn; 3] = [
        FeatureColumn::Recency,
        FeatureColumn::Frequency,
        FeatureColumn::Monetary,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FeatureColumn::Recency => "RecencyDays",
            FeatureColumn::Frequency => "Frequency",
            FeatureColumn::Monetary => "Monetary",
            FeatureColumn::AvgOrderValue => "AvgOrderValue",
            FeatureColumn::OrdersLast90d => "OrdersLast90d",
            FeatureColumn::SpendLast90d => "MonetaryLast90d",
            FeatureColumn::DaysSinceFirst => "DaysSinceFirst",
        }
    }

    pub fn value(&self, customer: &CustomerFeatures) -> f64 {
        match self {
            FeatureColumn::Recency => customer.recency_days as f64,
            FeatureColumn::Frequency => customer.frequency as f64,
            FeatureColumn::Monetary => customer.monetary,
            FeatureColumn::AvgOrderValue => customer.avg_order_value,
            FeatureColumn::OrdersLast90d => customer.orders_last_90d as f64,
            FeatureColumn::SpendLast90d => customer.spend_last_90d,
            FeatureColumn::DaysSinceFirst => customer.days_since_first as f64,
        }
    }
}

/// Result of a feature build: customer rows plus diagnostics
#[derive(Debug, Clone)]
pub struct FeatureBuild {
    /// One row per customer, ascending by customer_id
    pub customers: Vec<CustomerFeatures>,
    pub reference_date: NaiveDate,
    pub dropped: DropReport,
    /// Number of transactions that made it into the aggregation
    pub used_rows: usize,
}

#[derive(Default)]
struct CustomerAccumulator<'a> {
    orders: HashSet<&'a str>,
    recent_orders: HashSet<&'a str>,
    monetary: f64,
    spend_recent: f64,
    first: Option<NaiveDate>,
    last: Option<NaiveDate>,
}

impl<'a> CustomerAccumulator<'a> {
    fn add(&mut self, tx: &'a Transaction, window_start: NaiveDate) {
        self.orders.insert(&tx.order_id);
        self.monetary += tx.amount;
        if tx.order_date >= window_start {
            self.recent_orders.insert(&tx.order_id);
            self.spend_recent += tx.amount;
        }
        self.first = Some(self.first.map_or(tx.order_date, |d| d.min(tx.order_date)));
        self.last = Some(self.last.map_or(tx.order_date, |d| d.max(tx.order_date)));
    }
}

/// Validate raw records and aggregate them into one feature row per customer
///
/// # Arguments
/// * `records` - Raw transaction rows
/// * `reference_date` - Date recency is measured from (default: latest valid order date)
///
/// Invalid rows are dropped and counted in the returned `DropReport`. The build
/// only fails when no valid row remains.
pub fn build_features(
    records: &[TransactionRecord],
    reference_date: Option<NaiveDate>,
) -> Result<FeatureBuild, SegmentError> {
    let mut dropped = DropReport::default();
    let mut transactions = Vec::with_capacity(records.len());

    for record in records {
        match Transaction::try_from(record) {
            Ok(tx) => transactions.push(tx),
            Err(issue) => dropped.record(issue),
        }
    }

    build_from_transactions(transactions, reference_date, dropped)
}

/// Aggregate already-validated transactions
pub fn build_from_transactions(
    transactions: Vec<Transaction>,
    reference_date: Option<NaiveDate>,
    mut dropped: DropReport,
) -> Result<FeatureBuild, SegmentError> {
    let latest = transactions.iter().map(|tx| tx.order_date).max();
    let reference_date = match (reference_date, latest) {
        (Some(date), _) => date,
        (None, Some(date)) => date,
        (None, None) => {
            return Err(SegmentError::EmptyInput {
                dropped: dropped.total(),
            })
        }
    };

    let mut kept = Vec::with_capacity(transactions.len());
    for tx in transactions {
        if tx.order_date > reference_date {
            dropped.record(RowIssue::AfterReference);
        } else {
            kept.push(tx);
        }
    }

    if kept.is_empty() {
        return Err(SegmentError::EmptyInput {
            dropped: dropped.total(),
        });
    }

    if dropped.total() > 0 {
        warn!("{}", dropped);
    }

    let window_start = reference_date - Duration::days(RECENT_WINDOW_DAYS);
    let mut groups: BTreeMap<&str, CustomerAccumulator> = BTreeMap::new();
    for tx in &kept {
        groups
            .entry(tx.customer_id.as_str())
            .or_default()
            .add(tx, window_start);
    }

    let customers: Vec<CustomerFeatures> = groups
        .into_iter()
        .filter_map(|(customer_id, acc)| {
            let first = acc.first?;
            let last = acc.last?;
            let frequency = acc.orders.len();
            Some(CustomerFeatures {
                customer_id: customer_id.to_string(),
                recency_days: (reference_date - last).num_days(),
                frequency,
                monetary: acc.monetary,
                avg_order_value: acc.monetary / frequency as f64,
                orders_last_90d: acc.recent_orders.len(),
                spend_last_90d: acc.spend_recent,
                first_purchase_date: first,
                last_purchase_date: last,
                days_since_first: (reference_date - first).num_days(),
            })
        })
        .collect();

    info!(
        "Built features for {} customers from {} transactions (reference date {})",
        customers.len(),
        kept.len(),
        reference_date
    );

    Ok(FeatureBuild {
        customers,
        reference_date,
        dropped,
        used_rows: kept.len(),
    })
}

/// Extract the selected columns into an (n_customers, n_columns) matrix
pub fn feature_matrix(customers: &[CustomerFeatures], columns: &[FeatureColumn]) -> Array2<f64> {
    Array2::from_shape_fn((customers.len(), columns.len()), |(i, j)| {
        columns[j].value(&customers[i])
    })
}
