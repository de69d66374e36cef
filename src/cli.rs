//! Command-line interface definitions and argument parsing

use crate::data::InputEncoding;
use crate::features::FeatureColumn;
use crate::model::{ClusterConfig, DEFAULT_MAX_ITERATIONS, DEFAULT_RESTARTS, DEFAULT_SEED, DEFAULT_TOLERANCE};
use crate::quality::SweepConfig;
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

pub const RFM_FILE: &str = "customers_rfm.csv";
pub const SEGMENTS_FILE: &str = "customers_segments.csv";
pub const METRICS_FILE: &str = "cluster_metrics.csv";
pub const ELBOW_FILE: &str = "elbow.csv";
pub const PROFILES_FILE: &str = "cluster_profiles.csv";

/// Customer segmentation CLI: RFM features, K-Means clustering and cluster quality sweeps
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the transactions CSV file
    #[arg(short, long, default_value = "transactions.csv")]
    pub input: PathBuf,

    /// CSV separator (auto-detected among , ; tab | when omitted)
    #[arg(long)]
    pub separator: Option<char>,

    /// Text encoding of the input; auto retries non-UTF-8 files with lossy decoding
    #[arg(long, value_enum, default_value_t = InputEncoding::Auto)]
    pub encoding: InputEncoding,

    /// Reference date (YYYY-MM-DD) for recency; defaults to the latest order date
    #[arg(long, value_parser = parse_date)]
    pub reference_date: Option<NaiveDate>,

    /// Feature columns to cluster on
    #[arg(long, value_enum, value_delimiter = ',', default_value = "recency,frequency,monetary")]
    pub features: Vec<FeatureColumn>,

    /// Number of clusters for K-Means
    #[arg(short = 'k', long, default_value_t = 4)]
    pub clusters: usize,

    /// Independent K-Means restarts; the lowest inertia wins
    #[arg(long, default_value_t = DEFAULT_RESTARTS)]
    pub restarts: usize,

    /// Maximum iterations for K-Means algorithm
    #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
    pub max_iters: usize,

    /// Tolerance for K-Means convergence
    #[arg(long, default_value_t = DEFAULT_TOLERANCE)]
    pub tolerance: f64,

    /// Random seed for centroid initialization
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Directory for the exported CSV tables
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Also run a quality sweep over --k-min..=--k-max
    #[arg(long)]
    pub sweep: bool,

    /// Smallest k evaluated by the sweep
    #[arg(long, default_value_t = 2)]
    pub k_min: usize,

    /// Largest k evaluated by the sweep
    #[arg(long, default_value_t = 8)]
    pub k_max: usize,

    /// Seeds averaged per k during the sweep
    #[arg(long, value_delimiter = ',', default_value = "0,1,2,3,4")]
    pub sweep_seeds: Vec<u64>,

    /// Largest k of the elbow curve (starting at 1)
    #[arg(long, default_value_t = 7)]
    pub elbow_max: usize,

    /// Prediction mode: raw feature values as comma-separated string
    /// Example: --predict "30,10,500.0" for Recency=30, Frequency=10, Monetary=500.0
    #[arg(short, long)]
    pub predict: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{}' (expected YYYY-MM-DD): {}", value, e))
}

impl Args {
    /// Parse feature values from the predict string
    /// Expected format: one number per selected feature column, comma-separated
    pub fn parse_predict_values(&self) -> crate::Result<Option<Vec<f64>>> {
        let Some(ref predict_str) = self.predict else {
            return Ok(None);
        };

        let parts: Vec<&str> = predict_str.split(',').collect();
        if parts.len() != self.features.len() {
            let names: Vec<&str> = self.features.iter().map(|f| f.name()).collect();
            anyhow::bail!(
                "Predict values must be in format '{}' ({} values, got {})",
                names.join(","),
                self.features.len(),
                parts.len()
            );
        }

        let values = parts
            .iter()
            .zip(&self.features)
            .map(|(part, feature)| -> crate::Result<f64> {
                let value = part
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| anyhow::anyhow!("Invalid {} value: {}", feature.name(), part))?;
                if !value.is_finite() {
                    anyhow::bail!("{} value must be finite, got {}", feature.name(), part.trim());
                }
                Ok(value)
            })
            .collect::<crate::Result<Vec<f64>>>()?;

        Ok(Some(values))
    }

    /// Separator as a single byte
    pub fn separator_byte(&self) -> crate::Result<Option<u8>> {
        match self.separator {
            None => Ok(None),
            Some(c) if c.is_ascii() => Ok(Some(c as u8)),
            Some(c) => anyhow::bail!("Separator must be a single ASCII character, got {:?}", c),
        }
    }

    /// Validated clustering parameters
    pub fn cluster_config(&self) -> crate::Result<ClusterConfig> {
        let config = ClusterConfig::new(self.clusters)
            .restarts(self.restarts)
            .max_iterations(self.max_iters)
            .tolerance(self.tolerance)
            .seed(self.seed);
        config.validate()?;
        Ok(config)
    }

    /// Validated sweep parameters
    pub fn sweep_config(&self) -> crate::Result<SweepConfig> {
        let config = SweepConfig {
            k_min: self.k_min,
            k_max: self.k_max,
            seeds: self.sweep_seeds.clone(),
            n_restarts: self.restarts,
            max_iterations: self.max_iters,
            tolerance: self.tolerance,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["segmentforge"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = args(&[]);
        assert_eq!(args.input, PathBuf::from("transactions.csv"));
        assert_eq!(args.clusters, 4);
        assert_eq!(args.features, FeatureColumn::RFM.to_vec());
        assert_eq!(args.sweep_seeds, vec![0, 1, 2, 3, 4]);
        assert_eq!(args.encoding, InputEncoding::Auto);
        assert_eq!(args.cluster_config().unwrap(), ClusterConfig::new(4));
    }

    #[test]
    fn test_parse_predict_values() {
        let mut args = args(&["--predict", "30,10,500.0"]);
        let result = args.parse_predict_values().unwrap();
        assert_eq!(result, Some(vec![30.0, 10.0, 500.0]));

        args.predict = None;
        assert_eq!(args.parse_predict_values().unwrap(), None);

        args.predict = Some("invalid".to_string());
        assert!(args.parse_predict_values().is_err());

        args.predict = Some("1,x,3".to_string());
        assert!(args.parse_predict_values().is_err());
    }

    #[test]
    fn test_parse_predict_values_rejects_non_finite() {
        let mut args = args(&[]);
        for input in ["nan,10,500", "30,inf,500", "30,10,-inf"] {
            args.predict = Some(input.to_string());
            assert!(args.parse_predict_values().is_err(), "{} was accepted", input);
        }
    }

    #[test]
    fn test_reference_date_and_features() {
        let args = args(&[
            "--reference-date",
            "2025-09-01",
            "--features",
            "recency,monetary",
            "--separator",
            ";",
            "--encoding",
            "lossy",
        ]);
        assert_eq!(args.encoding, InputEncoding::Lossy);
        assert_eq!(args.reference_date, NaiveDate::from_ymd_opt(2025, 9, 1));
        assert_eq!(
            args.features,
            vec![FeatureColumn::Recency, FeatureColumn::Monetary]
        );
        assert_eq!(args.separator_byte().unwrap(), Some(b';'));

        assert!(Args::try_parse_from(["segmentforge", "--reference-date", "09/01/2025"]).is_err());
    }

    #[test]
    fn test_invalid_configs() {
        assert!(args(&["-k", "0"]).cluster_config().is_err());
        assert!(args(&["--restarts", "0"]).cluster_config().is_err());
        assert!(args(&["--tolerance=-1"]).cluster_config().is_err());
        assert!(args(&["--k-min", "6", "--k-max", "3"]).sweep_config().is_err());
        assert!(args(&["--separator", "é"]).separator_byte().is_err());
    }
}
