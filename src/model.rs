//! K-Means clustering engine
//!
//! Lloyd-style refinement with k-means++ seeding and several independent
//! restarts. Each restart draws from its own ChaCha8 stream seeded with
//! `seed + restart`, so a fit is a pure function of its inputs.

use crate::data::RfmData;
use crate::error::SegmentError;
use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

pub const DEFAULT_RESTARTS: usize = 10;
pub const DEFAULT_MAX_ITERATIONS: usize = 300;
pub const DEFAULT_TOLERANCE: f64 = 1e-4;
pub const DEFAULT_SEED: u64 = 42;

/// Parameters of a single clustering run
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    /// Number of clusters (k)
    pub n_clusters: usize,
    /// Independent restarts; the one with the lowest inertia wins
    pub n_restarts: usize,
    pub max_iterations: usize,
    /// Convergence threshold on the summed centroid movement
    pub tolerance: f64,
    pub seed: u64,
}

impl ClusterConfig {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            n_restarts: DEFAULT_RESTARTS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
            seed: DEFAULT_SEED,
        }
    }

    pub fn restarts(mut self, n_restarts: usize) -> Self {
        self.n_restarts = n_restarts;
        self
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check parameters that do not depend on the data
    pub fn validate(&self) -> Result<(), SegmentError> {
        if self.n_clusters == 0 {
            return Err(SegmentError::InvalidConfig(
                "number of clusters must be at least 1".to_string(),
            ));
        }
        if self.n_restarts == 0 {
            return Err(SegmentError::InvalidConfig(
                "number of restarts must be at least 1".to_string(),
            ));
        }
        if self.max_iterations == 0 {
            return Err(SegmentError::InvalidConfig(
                "maximum iterations must be at least 1".to_string(),
            ));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(SegmentError::InvalidConfig(format!(
                "tolerance must be a finite non-negative number, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }
}

/// Fitted partition: centroids, labels and inertia of the best restart
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterModel {
    /// Number of clusters
    pub n_clusters: usize,
    /// Cluster centroids in scaled feature space (k, n_features)
    pub centroids: Array2<f64>,
    /// Cluster assignment of every training point
    pub labels: Array1<usize>,
    /// Within-cluster sum of squares
    pub inertia: f64,
    /// Lloyd iterations run by the winning restart
    pub n_iterations: usize,
    /// Index of the winning restart
    pub best_restart: usize,
}

impl ClusterModel {
    /// Assign a scaled point to its nearest centroid
    pub fn predict(&self, features: &Array1<f64>) -> Result<usize, SegmentError> {
        if features.len() != self.centroids.ncols() {
            return Err(SegmentError::DimensionMismatch {
                expected: self.centroids.ncols(),
                found: features.len(),
            });
        }
        Ok(nearest_centroid(&features.view(), &self.centroids).0)
    }

    /// Get cluster sizes
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for &label in self.labels.iter() {
            if label < self.n_clusters {
                sizes[label] += 1;
            }
        }
        sizes
    }
}

/// Outcome of one restart
#[derive(Debug, Clone)]
struct RestartRun {
    restart: usize,
    centroids: Array2<f64>,
    labels: Array1<usize>,
    inertia: f64,
    iterations: usize,
}

/// Fit K-Means on a (scaled) feature matrix
///
/// # Arguments
/// * `features` - One row per customer, typically standardized
/// * `config` - Cluster count, restarts, iteration cap, tolerance and seed
///
/// # Returns
/// * The restart with the lowest inertia; ties go to the lowest restart index
pub fn fit_kmeans(features: &Array2<f64>, config: &ClusterConfig) -> Result<ClusterModel, SegmentError> {
    config.validate()?;

    if features.ncols() == 0 {
        return Err(SegmentError::InvalidConfig(
            "feature matrix has no columns".to_string(),
        ));
    }

    let distinct = count_distinct_rows(features);
    if config.n_clusters > distinct {
        return Err(SegmentError::InvalidClusterCount {
            k: config.n_clusters,
            distinct,
        });
    }

    let runs: Vec<RestartRun> = (0..config.n_restarts)
        .into_par_iter()
        .map(|restart| run_restart(features, config, restart))
        .collect();

    let best = runs
        .into_iter()
        .fold(None, |best: Option<RestartRun>, run| match best {
            Some(current) if current.inertia <= run.inertia => Some(current),
            _ => Some(run),
        })
        .ok_or_else(|| SegmentError::InvalidConfig("no restart was run".to_string()))?;

    debug!(
        "k={}: best restart {} with inertia {:.4} after {} iterations",
        config.n_clusters, best.restart, best.inertia, best.iterations
    );

    Ok(ClusterModel {
        n_clusters: config.n_clusters,
        centroids: best.centroids,
        labels: best.labels,
        inertia: best.inertia,
        n_iterations: best.iterations,
        best_restart: best.restart,
    })
}

/// Predict the cluster of raw (unscaled) feature values
///
/// # Arguments
/// * `model` - Fitted K-Means model
/// * `rfm_data` - Data the model was fitted on (for its scaler)
/// * `values` - Raw values in the order of `rfm_data.feature_columns`
pub fn predict_cluster(
    model: &ClusterModel,
    rfm_data: &RfmData,
    values: &[f64],
) -> Result<usize, SegmentError> {
    let scaled_features = rfm_data.scale_new_data(values)?;
    model.predict(&scaled_features)
}

fn run_restart(features: &Array2<f64>, config: &ClusterConfig, restart: usize) -> RestartRun {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(restart as u64));
    let mut centroids = kmeans_plus_plus(features, config.n_clusters, &mut rng);
    let mut labels = Array1::zeros(features.nrows());
    let mut iterations = 0;

    while iterations < config.max_iterations {
        iterations += 1;
        assign_labels(features, &centroids, &mut labels);
        let updated = update_centroids(features, &labels, &centroids);
        let shift: f64 = centroids
            .outer_iter()
            .zip(updated.outer_iter())
            .map(|(old, new)| squared_distance(&old, &new).sqrt())
            .sum();
        centroids = updated;
        if shift <= config.tolerance {
            break;
        }
    }

    assign_labels(features, &centroids, &mut labels);
    let inertia = compute_inertia(features, &labels, &centroids);
    debug!(
        "restart {}: inertia {:.4} after {} iterations",
        restart, inertia, iterations
    );

    RestartRun {
        restart,
        centroids,
        labels,
        inertia,
        iterations,
    }
}

/// k-means++ seeding: the first centroid is uniform, each next one is drawn with
/// probability proportional to its squared distance to the closest centroid so far
fn kmeans_plus_plus<R: Rng>(features: &Array2<f64>, k: usize, rng: &mut R) -> Array2<f64> {
    let n = features.nrows();
    let mut centroids = Array2::zeros((k, features.ncols()));

    let first = rng.gen_range(0..n);
    centroids.row_mut(0).assign(&features.row(first));

    let mut closest: Vec<f64> = features
        .outer_iter()
        .map(|point| squared_distance(&point, &centroids.row(0)))
        .collect();

    for c in 1..k {
        let total: f64 = closest.iter().sum();
        let chosen = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            let mut chosen = None;
            for (i, &d) in closest.iter().enumerate() {
                cumulative += d;
                if d > 0.0 && cumulative >= target {
                    chosen = Some(i);
                    break;
                }
            }
            // rounding can leave the target just above the final cumulative sum
            chosen.or_else(|| closest.iter().rposition(|&d| d > 0.0))
        } else {
            None
        };
        let chosen = chosen.unwrap_or_else(|| rng.gen_range(0..n));

        centroids.row_mut(c).assign(&features.row(chosen));
        for (i, point) in features.outer_iter().enumerate() {
            let d = squared_distance(&point, &centroids.row(c));
            if d < closest[i] {
                closest[i] = d;
            }
        }
    }

    centroids
}

fn assign_labels(features: &Array2<f64>, centroids: &Array2<f64>, labels: &mut Array1<usize>) {
    for (i, point) in features.outer_iter().enumerate() {
        labels[i] = nearest_centroid(&point, centroids).0;
    }
}

/// Recompute centroids as member means; an empty cluster keeps its previous centroid
fn update_centroids(features: &Array2<f64>, labels: &Array1<usize>, previous: &Array2<f64>) -> Array2<f64> {
    let k = previous.nrows();
    let mut sums = Array2::<f64>::zeros(previous.raw_dim());
    let mut counts = vec![0usize; k];

    for (point, &label) in features.outer_iter().zip(labels.iter()) {
        let mut row = sums.row_mut(label);
        row += &point;
        counts[label] += 1;
    }

    for (cluster, &count) in counts.iter().enumerate() {
        if count == 0 {
            debug!("cluster {} is empty; keeping its previous centroid", cluster);
            sums.row_mut(cluster).assign(&previous.row(cluster));
        } else {
            sums.row_mut(cluster).mapv_inplace(|v| v / count as f64);
        }
    }

    sums
}

/// Index of and squared distance to the closest centroid; ties go to the lowest index
pub(crate) fn nearest_centroid(point: &ArrayView1<f64>, centroids: &Array2<f64>) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (cluster, centroid) in centroids.outer_iter().enumerate() {
        let d = squared_distance(point, &centroid);
        if d < best.1 {
            best = (cluster, d);
        }
    }
    best
}

/// Compute within-cluster sum of squares (inertia)
pub fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    features
        .outer_iter()
        .zip(labels.iter())
        .filter(|(_, &cluster)| cluster < centroids.nrows())
        .map(|(point, &cluster)| squared_distance(&point, &centroids.row(cluster)))
        .sum()
}

pub(crate) fn squared_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Calculate Euclidean distance between two points
pub(crate) fn euclidean_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    squared_distance(a, b).sqrt()
}

/// Number of distinct rows; -0.0 and 0.0 count as equal
pub fn count_distinct_rows(features: &Array2<f64>) -> usize {
    let mut rows: Vec<Vec<f64>> = features
        .outer_iter()
        .map(|row| row.iter().map(|v| v + 0.0).collect())
        .collect();
    rows.sort_by(|a, b| {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| x.total_cmp(y))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rows.dedup();
    rows.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::collections::HashSet;

    fn two_blobs() -> Array2<f64> {
        array![
            [0.0, 0.0],
            [0.2, 0.1],
            [0.1, 0.3],
            [9.8, 10.0],
            [10.0, 10.2],
            [10.1, 9.9]
        ]
    }

    fn total_sum_of_squares(data: &Array2<f64>) -> f64 {
        let mean = data.mean_axis(ndarray::Axis(0)).unwrap();
        data.outer_iter()
            .map(|row| squared_distance(&row, &mean.view()))
            .sum()
    }

    #[test]
    fn test_fit_kmeans_separates_blobs() {
        let data = two_blobs();
        let model = fit_kmeans(&data, &ClusterConfig::new(2)).unwrap();

        assert_eq!(model.n_clusters, 2);
        assert_eq!(model.labels.len(), 6);
        assert_eq!(model.centroids.shape(), &[2, 2]);
        assert_eq!(model.labels[0], model.labels[1]);
        assert_eq!(model.labels[1], model.labels[2]);
        assert_eq!(model.labels[3], model.labels[4]);
        assert_eq!(model.labels[4], model.labels[5]);
        assert_ne!(model.labels[0], model.labels[3]);
        assert!(model.best_restart < DEFAULT_RESTARTS);
        assert!(model.n_iterations >= 1);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let data = array![
            [1.0, 2.0],
            [1.5, 1.8],
            [5.0, 8.0],
            [8.0, 8.0],
            [1.0, 0.6],
            [9.0, 11.0],
            [8.0, 2.0],
            [10.0, 2.0],
            [9.0, 3.0]
        ];
        let config = ClusterConfig::new(3).restarts(4).seed(7);
        let first = fit_kmeans(&data, &config).unwrap();
        let second = fit_kmeans(&data, &config).unwrap();

        assert_eq!(first.labels, second.labels);
        assert_eq!(first.inertia, second.inertia);
        assert_eq!(first.centroids, second.centroids);
        assert_eq!(first.best_restart, second.best_restart);
    }

    #[test]
    fn test_single_thread_pool_matches_default_pool() {
        let data = array![
            [1.0, 2.0],
            [1.5, 1.8],
            [5.0, 8.0],
            [8.0, 8.0],
            [1.0, 0.6],
            [9.0, 11.0],
            [8.0, 2.0],
            [10.0, 2.0],
            [9.0, 3.0]
        ];
        let config = ClusterConfig::new(3).restarts(6).seed(11);

        let parallel = fit_kmeans(&data, &config).unwrap();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let sequential = pool.install(|| fit_kmeans(&data, &config)).unwrap();

        assert_eq!(parallel.labels, sequential.labels);
        assert_eq!(parallel.centroids, sequential.centroids);
        assert_eq!(parallel.inertia.to_bits(), sequential.inertia.to_bits());
        assert_eq!(parallel.n_iterations, sequential.n_iterations);
        assert_eq!(parallel.best_restart, sequential.best_restart);
    }

    #[test]
    fn test_inertia_ties_go_to_lowest_restart() {
        let data = two_blobs();
        let config = ClusterConfig::new(2).restarts(8).seed(3);

        let inertias: Vec<f64> = (0..config.n_restarts)
            .map(|restart| run_restart(&data, &config, restart).inertia)
            .collect();
        let minimum = inertias.iter().cloned().fold(f64::INFINITY, f64::min);
        let first_at_minimum = inertias.iter().position(|&i| i == minimum).unwrap();
        // every restart separates the two blobs
        assert!(inertias.iter().filter(|&&i| i == minimum).count() > 1);

        let model = fit_kmeans(&data, &config).unwrap();
        assert_eq!(model.best_restart, first_at_minimum);
        assert_eq!(model.inertia, minimum);
    }

    #[test]
    fn test_converged_run_stops_early() {
        let data = two_blobs();
        let model = fit_kmeans(&data, &ClusterConfig::new(2)).unwrap();
        assert!(model.n_iterations <= 10, "ran {} iterations", model.n_iterations);

        // stable centroids satisfy a zero tolerance
        let exact = fit_kmeans(&data, &ClusterConfig::new(2).tolerance(0.0)).unwrap();
        assert!(exact.n_iterations <= 10, "ran {} iterations", exact.n_iterations);
        assert_eq!(exact.labels, model.labels);
    }

    #[test]
    fn test_iteration_cap_is_respected() {
        let data = two_blobs();
        let model = fit_kmeans(&data, &ClusterConfig::new(2).max_iterations(1)).unwrap();
        assert_eq!(model.n_iterations, 1);
        assert_eq!(model.labels.len(), 6);
    }

    #[test]
    fn test_single_cluster_inertia_is_total_sum_of_squares() {
        let data = two_blobs();
        let model = fit_kmeans(&data, &ClusterConfig::new(1)).unwrap();

        assert!(model.labels.iter().all(|&label| label == 0));
        let expected = total_sum_of_squares(&data);
        assert!((model.inertia - expected).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_cluster_count() {
        let data = array![[1.0, 1.0], [1.0, 1.0], [2.0, 2.0]];

        let result = fit_kmeans(&data, &ClusterConfig::new(3));
        assert_eq!(
            result.unwrap_err(),
            SegmentError::InvalidClusterCount { k: 3, distinct: 2 }
        );

        let result = fit_kmeans(&data, &ClusterConfig::new(0));
        assert!(matches!(result, Err(SegmentError::InvalidConfig(_))));

        let result = fit_kmeans(&data, &ClusterConfig::new(2));
        assert!(result.is_ok());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let data = two_blobs();
        assert!(fit_kmeans(&data, &ClusterConfig::new(2).restarts(0)).is_err());
        assert!(fit_kmeans(&data, &ClusterConfig::new(2).max_iterations(0)).is_err());
        assert!(fit_kmeans(&data, &ClusterConfig::new(2).tolerance(-1.0)).is_err());
        assert!(fit_kmeans(&data, &ClusterConfig::new(2).tolerance(f64::NAN)).is_err());
    }

    #[test]
    fn test_empty_cluster_keeps_previous_centroid() {
        let data = array![[0.0, 0.0], [1.0, 0.0]];
        let previous = array![[0.5, 0.0], [100.0, 100.0]];
        let labels = array![0, 0];

        let updated = update_centroids(&data, &labels, &previous);
        assert_eq!(updated.row(0).to_vec(), vec![0.5, 0.0]);
        assert_eq!(updated.row(1).to_vec(), vec![100.0, 100.0]);
        assert!(updated.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_assignment_ties_go_to_lowest_index() {
        let centroids = array![[-1.0, 0.0], [1.0, 0.0]];
        let point = array![0.0, 0.0];
        assert_eq!(nearest_centroid(&point.view(), &centroids).0, 0);
    }

    #[test]
    fn test_kmeans_plus_plus_picks_distinct_points() {
        let data = array![[0.0, 0.0], [0.0, 0.0], [0.0, 0.0], [5.0, 5.0], [9.0, 1.0]];
        for seed in 0..20 {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let centroids = kmeans_plus_plus(&data, 3, &mut rng);
            let unique: HashSet<String> = centroids
                .outer_iter()
                .map(|row| format!("{:?}", row.to_vec()))
                .collect();
            assert_eq!(unique.len(), 3, "seed {} produced duplicate centroids", seed);
        }
    }

    #[test]
    fn test_predict_and_cluster_sizes() {
        let data = two_blobs();
        let model = fit_kmeans(&data, &ClusterConfig::new(2)).unwrap();

        let near_origin = model.predict(&array![0.05, 0.05]).unwrap();
        assert_eq!(near_origin, model.labels[0]);
        assert!(model.predict(&array![1.0]).is_err());

        let sizes = model.cluster_sizes();
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes.iter().sum::<usize>(), 6);
        assert!(sizes.iter().all(|&s| s == 3));
    }

    #[test]
    fn test_count_distinct_rows() {
        let data = array![[0.0, 1.0], [-0.0, 1.0], [2.0, 1.0], [0.0, 1.0]];
        assert_eq!(count_distinct_rows(&data), 2);
    }
}
