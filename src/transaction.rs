//! Transaction records and row-level validation

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fmt;

/// Sales channel of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Channel {
    Web,
    Store,
    Other(String),
    #[default]
    Unknown,
}

impl Channel {
    /// Parse a channel name, case-insensitively
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" => Channel::Unknown,
            "web" | "online" => Channel::Web,
            "store" | "shop" => Channel::Store,
            _ => Channel::Other(trimmed.to_string()),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Web => write!(f, "Web"),
            Channel::Store => write!(f, "Store"),
            Channel::Other(name) => write!(f, "{}", name),
            Channel::Unknown => Ok(()),
        }
    }
}

/// One row as supplied by a tabular reader, before validation
///
/// Every field is optional: missing cells and empty strings are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionRecord {
    pub customer_id: Option<String>,
    pub order_id: Option<String>,
    pub order_date: Option<String>,
    pub amount: Option<String>,
    pub category: Option<String>,
    pub channel: Option<String>,
    pub country: Option<String>,
}

impl TransactionRecord {
    /// Convenience constructor for the four required fields
    pub fn new(customer_id: &str, order_id: &str, order_date: &str, amount: &str) -> Self {
        Self {
            customer_id: Some(customer_id.to_string()),
            order_id: Some(order_id.to_string()),
            order_date: Some(order_date.to_string()),
            amount: Some(amount.to_string()),
            ..Default::default()
        }
    }
}

/// A validated transaction
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub customer_id: String,
    pub order_id: String,
    pub order_date: NaiveDate,
    pub amount: f64,
    pub category: String,
    pub channel: Channel,
    pub country: String,
}

/// Why a row was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowIssue {
    MissingCustomerId,
    MissingOrderId,
    InvalidDate,
    InvalidAmount,
    NonPositiveAmount,
    AfterReference,
}

/// Per-reason counts of dropped rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropReport {
    pub missing_customer_id: usize,
    pub missing_order_id: usize,
    pub invalid_date: usize,
    pub invalid_amount: usize,
    pub non_positive_amount: usize,
    pub after_reference: usize,
}

impl DropReport {
    pub fn record(&mut self, issue: RowIssue) {
        match issue {
            RowIssue::MissingCustomerId => self.missing_customer_id += 1,
            RowIssue::MissingOrderId => self.missing_order_id += 1,
            RowIssue::InvalidDate => self.invalid_date += 1,
            RowIssue::InvalidAmount => self.invalid_amount += 1,
            RowIssue::NonPositiveAmount => self.non_positive_amount += 1,
            RowIssue::AfterReference => self.after_reference += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.missing_customer_id
            + self.missing_order_id
            + self.invalid_date
            + self.invalid_amount
            + self.non_positive_amount
            + self.after_reference
    }
}

impl fmt::Display for DropReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows dropped (missing customer_id: {}, missing order_id: {}, invalid date: {}, \
             invalid amount: {}, non-positive amount: {}, after reference date: {})",
            self.total(),
            self.missing_customer_id,
            self.missing_order_id,
            self.invalid_date,
            self.invalid_amount,
            self.non_positive_amount,
            self.after_reference
        )
    }
}

impl TryFrom<&TransactionRecord> for Transaction {
    type Error = RowIssue;

    fn try_from(record: &TransactionRecord) -> Result<Self, Self::Error> {
        let customer_id = non_empty(&record.customer_id).ok_or(RowIssue::MissingCustomerId)?;
        let order_id = non_empty(&record.order_id).ok_or(RowIssue::MissingOrderId)?;
        let order_date = non_empty(&record.order_date)
            .and_then(parse_order_date)
            .ok_or(RowIssue::InvalidDate)?;
        let amount = non_empty(&record.amount)
            .and_then(parse_amount)
            .ok_or(RowIssue::InvalidAmount)?;
        if amount <= 0.0 {
            return Err(RowIssue::NonPositiveAmount);
        }

        Ok(Transaction {
            customer_id: customer_id.to_string(),
            order_id: order_id.to_string(),
            order_date,
            amount,
            category: non_empty(&record.category).unwrap_or_default().to_string(),
            channel: non_empty(&record.channel).map(Channel::parse).unwrap_or_default(),
            country: non_empty(&record.country).unwrap_or_default().to_string(),
        })
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Parse a currency amount such as `"1 234,50 €"` or `"99.90"`
///
/// Decimal commas become dots; euro signs and spaces are stripped, as is a
/// euro sign lost to lossy decoding (U+FFFD).
pub fn parse_amount(value: &str) -> Option<f64> {
    let cleaned: String = value
        .chars()
        .filter(|c| *c != '€' && *c != char::REPLACEMENT_CHARACTER && !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse an order date, discarding any time-of-day component
pub fn parse_order_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    for format in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(value, format) {
            return Some(datetime.date());
        }
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|datetime| datetime.date_naive())
}
