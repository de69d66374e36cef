//! Transaction loading with Polars and RFM feature preparation

use crate::error::SegmentError;
use crate::features::{build_features, feature_matrix, CustomerFeatures, FeatureBuild, FeatureColumn};
use crate::scaling::StandardScaler;
use crate::transaction::{DropReport, TransactionRecord};
use chrono::NaiveDate;
use ndarray::{Array1, Array2};
use polars::prelude::*;
use std::path::Path;
use tracing::{debug, warn};

/// Columns that must be present in the transaction file
pub const REQUIRED_COLUMNS: [&str; 4] = ["customer_id", "order_id", "order_date", "amount_eur"];

/// Separators tried, in order, when none is given
pub const CANDIDATE_SEPARATORS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Text encoding of the input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum InputEncoding {
    /// Strict UTF-8, falling back to lossy decoding
    #[default]
    Auto,
    Utf8,
    /// Replace invalid byte sequences with U+FFFD
    Lossy,
}

/// RFM data structure containing customer features, scaled matrix and scaler
#[derive(Debug, Clone)]
pub struct RfmData {
    /// Per-customer features, ascending by customer_id
    pub customers: Vec<CustomerFeatures>,
    /// Customer IDs corresponding to each row
    pub customer_ids: Vec<String>,
    /// Columns used to build the feature matrices
    pub feature_columns: Vec<FeatureColumn>,
    /// Raw feature values before scaling (n_customers, n_columns)
    pub raw_features: Array2<f64>,
    /// Standardized features (n_customers, n_columns)
    pub features: Array2<f64>,
    /// Fitted StandardScaler for normalizing new data
    pub scaler: StandardScaler,
    pub reference_date: NaiveDate,
    pub dropped: DropReport,
}

impl RfmData {
    /// Select feature columns from a build and standardize them
    pub fn from_build(build: FeatureBuild, columns: &[FeatureColumn]) -> Result<Self, SegmentError> {
        if columns.is_empty() {
            return Err(SegmentError::InvalidConfig(
                "at least one feature column is required".to_string(),
            ));
        }

        let raw_features = feature_matrix(&build.customers, columns);
        let scaler = StandardScaler::fit(&raw_features)?;
        let features = scaler.transform(&raw_features)?;
        let customer_ids = build.customers.iter().map(|c| c.customer_id.clone()).collect();

        Ok(Self {
            customers: build.customers,
            customer_ids,
            feature_columns: columns.to_vec(),
            raw_features,
            features,
            scaler,
            reference_date: build.reference_date,
            dropped: build.dropped,
        })
    }

    /// Scale new raw feature values using the fitted scaler
    pub fn scale_new_data(&self, values: &[f64]) -> Result<Array1<f64>, SegmentError> {
        self.scaler.transform_row(values)
    }

    pub fn n_customers(&self) -> usize {
        self.customers.len()
    }
}

/// Load a transaction CSV and compute scaled customer features
///
/// # Arguments
/// * `file_path` - Path to the CSV file
/// * `reference_date` - Date recency is measured from (default: latest order date)
/// * `separator` - Field separator; auto-detected when `None`
/// * `columns` - Feature columns to scale and cluster on
pub fn load_and_process_data(
    file_path: &Path,
    reference_date: Option<NaiveDate>,
    separator: Option<u8>,
    columns: &[FeatureColumn],
) -> crate::Result<RfmData> {
    load_with_encoding(file_path, reference_date, separator, InputEncoding::Auto, columns)
}

/// Same as [`load_and_process_data`] with an explicit text encoding
pub fn load_with_encoding(
    file_path: &Path,
    reference_date: Option<NaiveDate>,
    separator: Option<u8>,
    encoding: InputEncoding,
    columns: &[FeatureColumn],
) -> crate::Result<RfmData> {
    let records = read_transactions_with_encoding(file_path, separator, encoding)?;
    let build = build_features(&records, reference_date)?;
    Ok(RfmData::from_build(build, columns)?)
}

/// Read raw transaction rows from a CSV file
///
/// Header names are trimmed and matched case-insensitively; unknown columns are
/// ignored. Every column is read as text so that row validation can count
/// malformed values instead of failing the whole read.
pub fn read_transactions(file_path: &Path, separator: Option<u8>) -> crate::Result<Vec<TransactionRecord>> {
    read_transactions_with_encoding(file_path, separator, InputEncoding::Auto)
}

/// Read raw transaction rows, decoding text as `encoding` dictates
///
/// With [`InputEncoding::Auto`] every separator is first tried as strict UTF-8;
/// only when none succeeds is the file re-read with invalid byte sequences
/// replaced by U+FFFD (Windows-1252/1253 exports).
pub fn read_transactions_with_encoding(
    file_path: &Path,
    separator: Option<u8>,
    encoding: InputEncoding,
) -> crate::Result<Vec<TransactionRecord>> {
    if !file_path.exists() {
        anyhow::bail!("Input file not found: {}", file_path.display());
    }

    let separators: Vec<u8> = match separator {
        Some(sep) => vec![sep],
        None => CANDIDATE_SEPARATORS.to_vec(),
    };
    let lossy_passes: &[bool] = match encoding {
        InputEncoding::Auto => &[false, true],
        InputEncoding::Utf8 => &[false],
        InputEncoding::Lossy => &[true],
    };

    let mut failures = Vec::new();
    for &lossy in lossy_passes {
        for &sep in &separators {
            match read_frame(file_path, sep, lossy) {
                Ok(df) if has_required_columns(&df) => {
                    if lossy && encoding == InputEncoding::Auto {
                        warn!(
                            "{} is not valid UTF-8; undecodable bytes were replaced",
                            file_path.display()
                        );
                    }
                    debug!("Read {} rows using separator {:?}", df.height(), sep as char);
                    return frame_to_records(&df);
                }
                Ok(_) => failures.push(format!("{:?}: missing required columns", sep as char)),
                Err(e) => failures.push(format!(
                    "{:?}{}: {}",
                    sep as char,
                    if lossy { " (lossy)" } else { "" },
                    e
                )),
            }
        }
    }

    anyhow::bail!(
        "Could not read {} with required columns {:?}. Tried: {}",
        file_path.display(),
        REQUIRED_COLUMNS,
        failures.join("; ")
    )
}

fn read_frame(file_path: &Path, separator: u8, lossy: bool) -> PolarsResult<DataFrame> {
    let encoding = if lossy {
        CsvEncoding::LossyUtf8
    } else {
        CsvEncoding::Utf8
    };
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .map_parse_options(|opts| opts.with_separator(separator).with_encoding(encoding))
        .try_into_reader_with_file_path(Some(file_path.to_path_buf()))?
        .finish()
}

fn find_column<'a>(df: &'a DataFrame, name: &str) -> Option<&'a Series> {
    df.get_columns()
        .iter()
        .find(|s| s.name().trim().eq_ignore_ascii_case(name))
}

fn has_required_columns(df: &DataFrame) -> bool {
    REQUIRED_COLUMNS.iter().all(|name| find_column(df, name).is_some())
}

/// Text values of a column, or all-`None` when the column is absent
fn text_column(df: &DataFrame, name: &str) -> crate::Result<Vec<Option<String>>> {
    let Some(series) = find_column(df, name) else {
        return Ok(vec![None; df.height()]);
    };
    let series = series.cast(&DataType::String)?;
    let values = series
        .str()?
        .into_iter()
        .map(|value| {
            value
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .collect();
    Ok(values)
}

fn frame_to_records(df: &DataFrame) -> crate::Result<Vec<TransactionRecord>> {
    let customer_id = text_column(df, "customer_id")?;
    let order_id = text_column(df, "order_id")?;
    let order_date = text_column(df, "order_date")?;
    let amount = text_column(df, "amount_eur")?;
    let category = text_column(df, "category")?;
    let channel = text_column(df, "channel")?;
    let country = text_column(df, "country")?;

    let records = customer_id
        .into_iter()
        .zip(order_id)
        .zip(order_date)
        .zip(amount)
        .zip(category)
        .zip(channel)
        .zip(country)
        .map(
            |((((((customer_id, order_id), order_date), amount), category), channel), country)| {
                TransactionRecord {
                    customer_id,
                    order_id,
                    order_date,
                    amount,
                    category,
                    channel,
                    country,
                }
            },
        )
        .collect();

    Ok(records)
}
