//! Tabular outputs for downstream reporting: cluster profiles and CSV exports

use crate::features::CustomerFeatures;
use crate::quality::{ElbowPoint, QualityReport};
use crate::scoring::RfmScore;
use ndarray::Array1;
use polars::prelude::*;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

/// Average raw RFM values of one cluster
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterProfile {
    pub cluster: usize,
    pub count: usize,
    pub mean_recency: f64,
    pub mean_frequency: f64,
    pub mean_monetary: f64,
}

/// Summarize each cluster by its member count and mean recency, frequency and monetary
///
/// Empty clusters are reported with a count of zero and NaN means.
pub fn cluster_profiles(
    customers: &[CustomerFeatures],
    labels: &Array1<usize>,
    n_clusters: usize,
) -> Vec<ClusterProfile> {
    let mut sums = vec![(0usize, 0.0, 0.0, 0.0); n_clusters];
    for (customer, &label) in customers.iter().zip(labels.iter()) {
        if let Some(entry) = sums.get_mut(label) {
            entry.0 += 1;
            entry.1 += customer.recency_days as f64;
            entry.2 += customer.frequency as f64;
            entry.3 += customer.monetary;
        }
    }

    sums.into_iter()
        .enumerate()
        .map(|(cluster, (count, recency, frequency, monetary))| {
            let n = count as f64;
            ClusterProfile {
                cluster,
                count,
                mean_recency: recency / n,
                mean_frequency: frequency / n,
                mean_monetary: monetary / n,
            }
        })
        .collect()
}

fn rfm_frame(customers: &[CustomerFeatures], scores: &[RfmScore]) -> PolarsResult<DataFrame> {
    let ids: Vec<&str> = customers.iter().map(|c| c.customer_id.as_str()).collect();
    let recency: Vec<i64> = customers.iter().map(|c| c.recency_days).collect();
    let frequency: Vec<i64> = customers.iter().map(|c| c.frequency as i64).collect();
    let monetary: Vec<f64> = customers.iter().map(|c| c.monetary).collect();
    let r_score: Vec<i64> = scores.iter().map(|s| s.recency as i64).collect();
    let f_score: Vec<i64> = scores.iter().map(|s| s.frequency as i64).collect();
    let m_score: Vec<i64> = scores.iter().map(|s| s.monetary as i64).collect();
    let rfm_sum: Vec<i64> = scores.iter().map(|s| s.sum() as i64).collect();
    let segment: Vec<&str> = scores.iter().map(|s| s.segment().label()).collect();
    let avg_order_value: Vec<f64> = customers.iter().map(|c| c.avg_order_value).collect();
    let orders_90d: Vec<i64> = customers.iter().map(|c| c.orders_last_90d as i64).collect();
    let spend_90d: Vec<f64> = customers.iter().map(|c| c.spend_last_90d).collect();
    let first: Vec<String> = customers.iter().map(|c| c.first_purchase_date.to_string()).collect();
    let last: Vec<String> = customers.iter().map(|c| c.last_purchase_date.to_string()).collect();
    let tenure: Vec<i64> = customers.iter().map(|c| c.days_since_first).collect();

    df!(
        "customer_id" => ids,
        "RecencyDays" => recency,
        "Frequency" => frequency,
        "Monetary" => monetary,
        "R_score" => r_score,
        "F_score" => f_score,
        "M_score" => m_score,
        "RFM_sum" => rfm_sum,
        "Segment" => segment,
        "AvgOrderValue" => avg_order_value,
        "OrdersLast90d" => orders_90d,
        "MonetaryLast90d" => spend_90d,
        "FirstPurchase" => first,
        "LastPurchase" => last,
        "DaysSinceFirst" => tenure
    )
}

/// Export per-customer RFM features and scores
pub fn write_rfm_csv(path: &Path, customers: &[CustomerFeatures], scores: &[RfmScore]) -> crate::Result<()> {
    let mut df = rfm_frame(customers, scores)?;
    write_csv_atomic(path, &mut df)?;
    info!("Wrote {} customers to {}", df.height(), path.display());
    Ok(())
}

/// Export RFM features joined with cluster labels
pub fn write_segments_csv(
    path: &Path,
    customers: &[CustomerFeatures],
    scores: &[RfmScore],
    labels: &Array1<usize>,
) -> crate::Result<()> {
    if labels.len() != customers.len() {
        anyhow::bail!(
            "Label count ({}) does not match customer count ({})",
            labels.len(),
            customers.len()
        );
    }
    let mut df = rfm_frame(customers, scores)?;
    let cluster: Vec<i64> = labels.iter().map(|&l| l as i64).collect();
    df.with_column(Series::new("Cluster", cluster))?;
    write_csv_atomic(path, &mut df)?;
    info!("Wrote {} segmented customers to {}", df.height(), path.display());
    Ok(())
}

/// Export per-k quality metrics; skipped k values have empty metric cells
pub fn write_metrics_csv(path: &Path, report: &QualityReport) -> crate::Result<()> {
    let evaluations = &report.evaluations;
    let k: Vec<i64> = evaluations.iter().map(|e| e.k as i64).collect();
    let silhouette: Vec<Option<f64>> = evaluations.iter().map(|e| e.scores.map(|s| s.silhouette)).collect();
    let davies_bouldin: Vec<Option<f64>> =
        evaluations.iter().map(|e| e.scores.map(|s| s.davies_bouldin)).collect();
    let calinski_harabasz: Vec<Option<f64>> =
        evaluations.iter().map(|e| e.scores.map(|s| s.calinski_harabasz)).collect();
    let inertia: Vec<Option<f64>> = evaluations.iter().map(|e| e.inertia).collect();
    let skipped: Vec<String> = evaluations
        .iter()
        .map(|e| e.skipped.clone().unwrap_or_default())
        .collect();

    let mut df = df!(
        "k" => k,
        "silhouette_mean" => silhouette,
        "davies_bouldin_mean" => davies_bouldin,
        "calinski_harabasz_mean" => calinski_harabasz,
        "inertia_mean" => inertia,
        "skipped" => skipped
    )?;
    write_csv_atomic(path, &mut df)
}

/// Export the elbow curve (inertia per k)
pub fn write_elbow_csv(path: &Path, points: &[ElbowPoint]) -> crate::Result<()> {
    let k: Vec<i64> = points.iter().map(|p| p.k as i64).collect();
    let inertia: Vec<f64> = points.iter().map(|p| p.inertia).collect();
    let mut df = df!("k" => k, "inertia" => inertia)?;
    write_csv_atomic(path, &mut df)
}

/// Export the per-cluster summary table
pub fn write_profiles_csv(path: &Path, profiles: &[ClusterProfile]) -> crate::Result<()> {
    let cluster: Vec<i64> = profiles.iter().map(|p| p.cluster as i64).collect();
    let recency: Vec<f64> = profiles.iter().map(|p| p.mean_recency).collect();
    let frequency: Vec<f64> = profiles.iter().map(|p| p.mean_frequency).collect();
    let monetary: Vec<f64> = profiles.iter().map(|p| p.mean_monetary).collect();
    let count: Vec<i64> = profiles.iter().map(|p| p.count as i64).collect();

    let mut df = df!(
        "Cluster" => cluster,
        "RecencyDays" => recency,
        "Frequency" => frequency,
        "Monetary" => monetary,
        "Count" => count
    )?;
    write_csv_atomic(path, &mut df)
}

/// Write to a temporary file next to `path`, then move it into place
fn write_csv_atomic(path: &Path, df: &mut DataFrame) -> crate::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    CsvWriter::new(tmp.as_file_mut())
        .include_header(true)
        .finish(df)?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::{KEvaluation, QualityScores};
    use crate::scoring::score_customers;
    use chrono::NaiveDate;
    use ndarray::array;
    use tempfile::tempdir;

    fn customers() -> Vec<CustomerFeatures> {
        let date = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        [("A", 2, 4, 400.0), ("B", 10, 2, 100.0), ("C", 90, 1, 20.0)]
            .iter()
            .map(|&(id, recency_days, frequency, monetary)| CustomerFeatures {
                customer_id: id.to_string(),
                recency_days,
                frequency,
                monetary,
                avg_order_value: monetary / frequency as f64,
                orders_last_90d: frequency,
                spend_last_90d: monetary,
                first_purchase_date: date,
                last_purchase_date: date,
                days_since_first: recency_days,
            })
            .collect()
    }

    #[test]
    fn test_cluster_profiles() {
        let profiles = cluster_profiles(&customers(), &array![0, 0, 1], 3);

        assert_eq!(profiles.len(), 3);
        assert_eq!(profiles[0].count, 2);
        assert!((profiles[0].mean_recency - 6.0).abs() < 1e-12);
        assert!((profiles[0].mean_frequency - 3.0).abs() < 1e-12);
        assert!((profiles[0].mean_monetary - 250.0).abs() < 1e-12);
        assert_eq!(profiles[1].count, 1);
        assert_eq!(profiles[2].count, 0);
        assert!(profiles[2].mean_monetary.is_nan());
    }

    #[test]
    fn test_write_segments_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("segments.csv");
        let customers = customers();
        let scores = score_customers(&customers);

        write_segments_csv(&path, &customers, &scores, &array![1, 1, 0]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("customer_id,RecencyDays,Frequency,Monetary"));
        assert!(header.ends_with("Cluster"));
        assert_eq!(lines.count(), 3);
    }

    #[test]
    fn test_write_segments_rejects_label_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("segments.csv");
        let customers = customers();
        let scores = score_customers(&customers);

        assert!(write_segments_csv(&path, &customers, &scores, &array![0]).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_write_metrics_csv_with_skipped_k() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        let report = QualityReport {
            evaluations: vec![
                KEvaluation {
                    k: 2,
                    inertia: Some(12.5),
                    scores: Some(QualityScores {
                        silhouette: 0.6,
                        davies_bouldin: 0.4,
                        calinski_harabasz: 30.0,
                    }),
                    scored_seeds: 1,
                    skipped: None,
                },
                KEvaluation {
                    k: 3,
                    inertia: Some(4.0),
                    scores: None,
                    scored_seeds: 0,
                    skipped: Some("singleton cluster".to_string()),
                },
            ],
        };

        write_metrics_csv(&path, &report).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("k,silhouette_mean"));
        assert!(lines[2].starts_with("3,,,"));
        assert!(lines[2].ends_with("singleton cluster"));
    }

    #[test]
    fn test_write_elbow_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("elbow.csv");
        let points = vec![
            ElbowPoint { k: 1, inertia: 30.0 },
            ElbowPoint { k: 2, inertia: 12.0 },
        ];
        write_elbow_csv(&path, &points).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().next(), Some("k,inertia"));
        assert_eq!(content.lines().count(), 3);
    }
}
