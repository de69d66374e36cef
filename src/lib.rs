//! SegmentForge: customer segmentation from raw transaction logs
//!
//! This library turns transactions into per-customer RFM (Recency, Frequency,
//! Monetary) features, standardizes them, partitions customers with K-Means and
//! scores candidate cluster counts with internal validity indices.

pub mod cli;
pub mod data;
pub mod error;
pub mod features;
pub mod model;
pub mod quality;
pub mod report;
pub mod scaling;
pub mod scoring;
pub mod transaction;

// Re-export public items for easier access
pub use cli::Args;
pub use data::{
    load_and_process_data, load_with_encoding, read_transactions, read_transactions_with_encoding,
    InputEncoding, RfmData,
};
pub use error::SegmentError;
pub use features::{build_features, feature_matrix, CustomerFeatures, FeatureBuild, FeatureColumn};
pub use model::{fit_kmeans, predict_cluster, ClusterConfig, ClusterModel};
pub use quality::{elbow_curve, score, sweep, ElbowPoint, QualityReport, QualityScores, SweepConfig};
pub use report::{cluster_profiles, ClusterProfile};
pub use scaling::{fit_transform, ScalerParams, StandardScaler};
pub use scoring::{score_customers, RfmScore, Segment};
pub use transaction::{Channel, DropReport, Transaction, TransactionRecord};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
