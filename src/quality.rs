//! Internal cluster-validity indices and the k sweep built on them

use crate::error::SegmentError;
use crate::model::{count_distinct_rows, euclidean_distance, fit_kmeans, squared_distance, ClusterConfig};
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use tracing::{info, warn};

/// Silhouette, Davies-Bouldin and Calinski-Harabasz scores of one partition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityScores {
    /// In [-1, 1], higher is better
    pub silhouette: f64,
    /// >= 0, lower is better
    pub davies_bouldin: f64,
    /// >= 0, higher is better
    pub calinski_harabasz: f64,
}

/// Points grouped by cluster, with labels compacted to 0..n_clusters
struct Partition<'a> {
    data: &'a Array2<f64>,
    members: Vec<Vec<usize>>,
    /// Compacted cluster index of every point
    assignment: Vec<usize>,
}

impl<'a> Partition<'a> {
    fn new(data: &'a Array2<f64>, labels: &Array1<usize>) -> Result<Self, SegmentError> {
        if labels.len() != data.nrows() {
            return Err(SegmentError::DimensionMismatch {
                expected: data.nrows(),
                found: labels.len(),
            });
        }

        let mut index: BTreeMap<usize, usize> = BTreeMap::new();
        for &label in labels.iter() {
            let next = index.len();
            index.entry(label).or_insert(next);
        }
        if index.len() < 2 {
            return Err(SegmentError::UndefinedMetric(format!(
                "at least 2 clusters are required, found {}",
                index.len()
            )));
        }

        let assignment: Vec<usize> = labels.iter().map(|label| index[label]).collect();
        let mut members = vec![Vec::new(); index.len()];
        for (point, &cluster) in assignment.iter().enumerate() {
            members[cluster].push(point);
        }
        if let Some((label, size)) = index
            .iter()
            .map(|(label, &cluster)| (label, members[cluster].len()))
            .find(|(_, size)| *size < 2)
        {
            return Err(SegmentError::UndefinedMetric(format!(
                "cluster {} has {} point(s); every cluster needs at least 2",
                label, size
            )));
        }

        Ok(Self {
            data,
            members,
            assignment,
        })
    }

    fn n_clusters(&self) -> usize {
        self.members.len()
    }

    fn centroids(&self) -> Array2<f64> {
        let mut centroids = Array2::zeros((self.n_clusters(), self.data.ncols()));
        for (cluster, points) in self.members.iter().enumerate() {
            let mut row = centroids.row_mut(cluster);
            for &p in points {
                row += &self.data.row(p);
            }
            row.mapv_inplace(|v| v / points.len() as f64);
        }
        centroids
    }
}

/// Compute all three indices for a labelled matrix
///
/// Fails with `UndefinedMetric` when there are fewer than 2 clusters or any
/// cluster has fewer than 2 points.
pub fn score(data: &Array2<f64>, labels: &Array1<usize>) -> Result<QualityScores, SegmentError> {
    let partition = Partition::new(data, labels)?;
    Ok(QualityScores {
        silhouette: silhouette(&partition),
        davies_bouldin: davies_bouldin(&partition),
        calinski_harabasz: calinski_harabasz(&partition),
    })
}

/// Mean silhouette coefficient over all points
pub fn silhouette_score(data: &Array2<f64>, labels: &Array1<usize>) -> Result<f64, SegmentError> {
    Ok(silhouette(&Partition::new(data, labels)?))
}

/// Davies-Bouldin index (lower is better)
pub fn davies_bouldin_score(data: &Array2<f64>, labels: &Array1<usize>) -> Result<f64, SegmentError> {
    Ok(davies_bouldin(&Partition::new(data, labels)?))
}

/// Calinski-Harabasz variance ratio (higher is better)
pub fn calinski_harabasz_score(data: &Array2<f64>, labels: &Array1<usize>) -> Result<f64, SegmentError> {
    Ok(calinski_harabasz(&Partition::new(data, labels)?))
}

fn silhouette(partition: &Partition) -> f64 {
    let data = partition.data;
    let n = data.nrows();
    let k = partition.n_clusters();

    let total: f64 = (0..n)
        .map(|i| {
            let point = data.row(i);
            let mut sums = vec![0.0; k];
            for (j, other) in data.outer_iter().enumerate() {
                if i != j {
                    sums[partition.assignment[j]] += euclidean_distance(&point, &other);
                }
            }

            let own = partition.assignment[i];
            let a = sums[own] / (partition.members[own].len() - 1) as f64;
            let b = (0..k)
                .filter(|&c| c != own)
                .map(|c| sums[c] / partition.members[c].len() as f64)
                .fold(f64::INFINITY, f64::min);

            let denom = a.max(b);
            if denom > 0.0 {
                (b - a) / denom
            } else {
                0.0
            }
        })
        .sum();

    total / n as f64
}

fn davies_bouldin(partition: &Partition) -> f64 {
    let data = partition.data;
    let centroids = partition.centroids();
    let k = partition.n_clusters();

    let scatter: Vec<f64> = partition
        .members
        .iter()
        .enumerate()
        .map(|(c, points)| {
            points
                .iter()
                .map(|&p| euclidean_distance(&data.row(p), &centroids.row(c)))
                .sum::<f64>()
                / points.len() as f64
        })
        .collect();

    let worst_ratios: f64 = (0..k)
        .map(|i| {
            (0..k)
                .filter(|&j| j != i)
                .map(|j| {
                    let separation = euclidean_distance(&centroids.row(i), &centroids.row(j));
                    // coincident centroids contribute nothing
                    if separation > 0.0 {
                        (scatter[i] + scatter[j]) / separation
                    } else {
                        0.0
                    }
                })
                .fold(0.0, f64::max)
        })
        .sum();

    worst_ratios / k as f64
}

fn calinski_harabasz(partition: &Partition) -> f64 {
    let data = partition.data;
    let n = data.nrows() as f64;
    let k = partition.n_clusters() as f64;
    let centroids = partition.centroids();
    let overall = data.sum_axis(Axis(0)) / n;

    let mut between = 0.0;
    let mut within = 0.0;
    for (c, points) in partition.members.iter().enumerate() {
        let centroid = centroids.row(c);
        between += points.len() as f64 * squared_distance(&centroid, &overall.view());
        within += points
            .iter()
            .map(|&p| squared_distance(&data.row(p), &centroid))
            .sum::<f64>();
    }

    if within == 0.0 {
        1.0
    } else {
        between * (n - k) / (within * (k - 1.0))
    }
}

/// Settings for evaluating a range of cluster counts
#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    pub k_min: usize,
    pub k_max: usize,
    /// Every k is fitted once per seed and the defined scores are averaged
    pub seeds: Vec<u64>,
    pub n_restarts: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl SweepConfig {
    pub fn new(k_range: RangeInclusive<usize>) -> Self {
        let base = ClusterConfig::new(1);
        Self {
            k_min: *k_range.start(),
            k_max: *k_range.end(),
            seeds: vec![0, 1, 2, 3, 4],
            n_restarts: base.n_restarts,
            max_iterations: base.max_iterations,
            tolerance: base.tolerance,
        }
    }

    pub fn seeds(mut self, seeds: Vec<u64>) -> Self {
        self.seeds = seeds;
        self
    }

    pub fn restarts(mut self, n_restarts: usize) -> Self {
        self.n_restarts = n_restarts;
        self
    }

    pub fn validate(&self) -> Result<(), SegmentError> {
        if self.k_min == 0 || self.k_min > self.k_max {
            return Err(SegmentError::InvalidConfig(format!(
                "invalid k range {}..={}",
                self.k_min, self.k_max
            )));
        }
        if self.seeds.is_empty() {
            return Err(SegmentError::InvalidConfig(
                "a sweep needs at least one seed".to_string(),
            ));
        }
        self.cluster_config(self.k_min, 0).validate()
    }

    fn cluster_config(&self, k: usize, seed: u64) -> ClusterConfig {
        ClusterConfig::new(k)
            .restarts(self.n_restarts)
            .max_iterations(self.max_iterations)
            .tolerance(self.tolerance)
            .seed(seed)
    }
}

/// Sweep outcome for one candidate k
#[derive(Debug, Clone, PartialEq)]
pub struct KEvaluation {
    pub k: usize,
    /// Mean best inertia over the seeds that could be fitted
    pub inertia: Option<f64>,
    /// Mean scores over the seeds where every metric is defined
    pub scores: Option<QualityScores>,
    /// Number of seeds contributing to `scores`
    pub scored_seeds: usize,
    /// Why no scores were recorded
    pub skipped: Option<String>,
}

/// Quality of every candidate k, ascending by k
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QualityReport {
    pub evaluations: Vec<KEvaluation>,
}

impl QualityReport {
    pub fn get(&self, k: usize) -> Option<&KEvaluation> {
        self.evaluations.iter().find(|e| e.k == k)
    }

    pub fn scores(&self, k: usize) -> Option<&QualityScores> {
        self.get(k).and_then(|e| e.scores.as_ref())
    }

    /// Candidates whose metrics were undefined
    pub fn skipped(&self) -> impl Iterator<Item = &KEvaluation> {
        self.evaluations.iter().filter(|e| e.scores.is_none())
    }

    /// k with the highest silhouette; ties go to the smaller k
    pub fn best_k(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for evaluation in &self.evaluations {
            if let Some(scores) = &evaluation.scores {
                match best {
                    Some((_, silhouette)) if scores.silhouette <= silhouette => {}
                    _ => best = Some((evaluation.k, scores.silhouette)),
                }
            }
        }
        best.map(|(k, _)| k)
    }
}

/// Fit and score every k in the configured range
///
/// A k whose metrics are undefined (or that exceeds the number of distinct
/// points) is recorded as skipped instead of failing the sweep.
pub fn sweep(data: &Array2<f64>, config: &SweepConfig) -> Result<QualityReport, SegmentError> {
    config.validate()?;

    let evaluations = (config.k_min..=config.k_max)
        .into_par_iter()
        .map(|k| evaluate_k(data, k, config))
        .collect::<Result<Vec<_>, _>>()?;

    let report = QualityReport { evaluations };
    for skipped in report.skipped() {
        warn!(
            "k={} skipped: {}",
            skipped.k,
            skipped.skipped.as_deref().unwrap_or("undefined metrics")
        );
    }
    if let Some(best) = report.best_k() {
        info!("Best k by silhouette: {}", best);
    }
    Ok(report)
}

fn evaluate_k(data: &Array2<f64>, k: usize, config: &SweepConfig) -> Result<KEvaluation, SegmentError> {
    let mut inertias = Vec::new();
    let mut defined = Vec::new();
    let mut reason = None;

    for &seed in &config.seeds {
        let model = match fit_kmeans(data, &config.cluster_config(k, seed)) {
            Ok(model) => model,
            Err(err @ SegmentError::InvalidClusterCount { .. }) => {
                reason = Some(err.to_string());
                continue;
            }
            Err(err) => return Err(err),
        };
        inertias.push(model.inertia);

        match score(data, &model.labels) {
            Ok(scores) => defined.push(scores),
            Err(err @ SegmentError::UndefinedMetric(_)) => reason = Some(err.to_string()),
            Err(err) => return Err(err),
        }
    }

    let inertia = mean(&inertias);
    let scores = if defined.is_empty() {
        None
    } else {
        let count = defined.len() as f64;
        Some(QualityScores {
            silhouette: defined.iter().map(|s| s.silhouette).sum::<f64>() / count,
            davies_bouldin: defined.iter().map(|s| s.davies_bouldin).sum::<f64>() / count,
            calinski_harabasz: defined.iter().map(|s| s.calinski_harabasz).sum::<f64>() / count,
        })
    };

    Ok(KEvaluation {
        k,
        inertia,
        scored_seeds: defined.len(),
        skipped: if scores.is_none() { reason } else { None },
        scores,
    })
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// One point of the elbow curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElbowPoint {
    pub k: usize,
    pub inertia: f64,
}

/// Best inertia for every k in `k_range` (elbow method)
///
/// Cluster counts above the number of distinct points are left out.
pub fn elbow_curve(
    data: &Array2<f64>,
    k_range: RangeInclusive<usize>,
    base: &ClusterConfig,
) -> Result<Vec<ElbowPoint>, SegmentError> {
    let distinct = count_distinct_rows(data);
    let start = (*k_range.start()).max(1);
    let end = *k_range.end();
    if end > distinct {
        warn!(
            "Elbow curve truncated at k={} ({} distinct points)",
            distinct, distinct
        );
    }

    (start..=end.min(distinct))
        .into_par_iter()
        .map(|k| {
            let config = ClusterConfig {
                n_clusters: k,
                ..base.clone()
            };
            fit_kmeans(data, &config).map(|model| ElbowPoint {
                k,
                inertia: model.inertia,
            })
        })
        .collect()
}
