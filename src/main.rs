//! SegmentForge: customer segmentation CLI using K-Means clustering on RFM features
//!
//! This is the main entrypoint that orchestrates data loading, model fitting,
//! quality sweeps, table export and prediction.

use anyhow::Result;
use clap::Parser;
use segmentforge::cli::{ELBOW_FILE, METRICS_FILE, PROFILES_FILE, RFM_FILE, SEGMENTS_FILE};
use segmentforge::{
    cluster_profiles, elbow_curve, fit_kmeans, load_with_encoding, predict_cluster, report,
    score_customers, sweep, Args, ClusterConfig, RfmData,
};
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();
    setup_logging(args.verbose)?;

    // Reject bad parameters before touching any data
    let cluster_config = args.cluster_config()?;
    let separator = args.separator_byte()?;

    if let Some(values) = args.parse_predict_values()? {
        run_prediction_mode(&args, &cluster_config, separator, &values)?;
    } else {
        run_full_pipeline(&args, &cluster_config, separator)?;
    }

    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn load(args: &Args, separator: Option<u8>) -> Result<RfmData> {
    info!("Loading transactions from {}", args.input.display());
    load_with_encoding(
        &args.input,
        args.reference_date,
        separator,
        args.encoding,
        &args.features,
    )
}

/// Run prediction mode for a single customer
fn run_prediction_mode(
    args: &Args,
    config: &ClusterConfig,
    separator: Option<u8>,
    values: &[f64],
) -> Result<()> {
    println!("=== Prediction Mode ===");
    println!("Input values: {:?}", values);

    let start_time = Instant::now();
    let rfm_data = load(args, separator)?;
    info!("Loaded {} customers", rfm_data.n_customers());

    let model = fit_kmeans(&rfm_data.features, config)?;
    let cluster = predict_cluster(&model, &rfm_data, values)?;
    let elapsed = start_time.elapsed();

    println!("\n✓ Predicted Cluster: {}", cluster);
    println!("  Processing time: {:.2}s", elapsed.as_secs_f64());

    // Show cluster context
    let cluster_sizes = model.cluster_sizes();
    let total_customers = rfm_data.n_customers();
    let cluster_percentage = (cluster_sizes[cluster] as f64 / total_customers as f64) * 100.0;

    println!("\nCluster {} details:", cluster);
    println!(
        "  Size: {} customers ({:.1}% of total)",
        cluster_sizes[cluster], cluster_percentage
    );
    let centroid: Vec<String> = rfm_data
        .feature_columns
        .iter()
        .zip(model.centroids.row(cluster).iter())
        .map(|(column, value)| format!("{}={:.2}", column.name(), value))
        .collect();
    println!("  Centroid (scaled): {}", centroid.join(", "));

    Ok(())
}

/// Run full segmentation pipeline
fn run_full_pipeline(args: &Args, config: &ClusterConfig, separator: Option<u8>) -> Result<()> {
    println!("=== Full Segmentation Pipeline ===\n");

    let sweep_config = if args.sweep {
        Some(args.sweep_config()?)
    } else {
        None
    };
    let start_time = Instant::now();

    // Step 1: Load transactions and build features
    let rfm_data = load(args, separator)?;
    println!("✓ Data loaded: {} customers", rfm_data.n_customers());
    println!("  Reference date: {}", rfm_data.reference_date);
    if rfm_data.dropped.total() > 0 {
        println!("  {}", rfm_data.dropped);
    }

    // Step 2: Fit K-Means
    let model_start = Instant::now();
    let model = fit_kmeans(&rfm_data.features, config)?;
    println!("✓ Model fitted with {} clusters", model.n_clusters);
    info!(
        "Fitting took {:.2}s; best restart {} of {}",
        model_start.elapsed().as_secs_f64(),
        model.best_restart,
        config.n_restarts
    );

    // Step 3: Cluster statistics
    println!("\n=== Cluster Statistics ===");
    let profiles = cluster_profiles(&rfm_data.customers, &model.labels, model.n_clusters);
    for profile in &profiles {
        let percentage = (profile.count as f64 / rfm_data.n_customers() as f64) * 100.0;
        println!(
            "Cluster {}: {} customers ({:.1}%), recency {:.1}d, frequency {:.2}, monetary {:.2}",
            profile.cluster,
            profile.count,
            percentage,
            profile.mean_recency,
            profile.mean_frequency,
            profile.mean_monetary
        );
    }
    println!("Within-cluster sum of squares: {:.2}", model.inertia);

    // Step 4: Diagnostics
    let elbow = elbow_curve(&rfm_data.features, 1..=args.elbow_max, config)?;
    let quality = match &sweep_config {
        Some(sweep_config) => {
            let quality = sweep(&rfm_data.features, sweep_config)?;
            println!("\n=== Cluster Quality ===");
            for evaluation in &quality.evaluations {
                match (&evaluation.scores, &evaluation.skipped) {
                    (Some(scores), _) => println!(
                        "k={}: silhouette {:.3}, Davies-Bouldin {:.3}, Calinski-Harabasz {:.1}",
                        evaluation.k,
                        scores.silhouette,
                        scores.davies_bouldin,
                        scores.calinski_harabasz
                    ),
                    (None, reason) => println!(
                        "k={}: skipped ({})",
                        evaluation.k,
                        reason.as_deref().unwrap_or("undefined metrics")
                    ),
                }
            }
            if let Some(best) = quality.best_k() {
                println!("Recommended k (max silhouette): {}", best);
            }
            Some(quality)
        }
        None => None,
    };

    // Step 5: Export tables once everything has been computed
    let scores = score_customers(&rfm_data.customers);
    report::write_rfm_csv(&args.output_path(RFM_FILE), &rfm_data.customers, &scores)?;
    report::write_segments_csv(
        &args.output_path(SEGMENTS_FILE),
        &rfm_data.customers,
        &scores,
        &model.labels,
    )?;
    report::write_profiles_csv(&args.output_path(PROFILES_FILE), &profiles)?;
    report::write_elbow_csv(&args.output_path(ELBOW_FILE), &elbow)?;
    if let Some(quality) = &quality {
        report::write_metrics_csv(&args.output_path(METRICS_FILE), quality)?;
    }

    println!("\n=== Pipeline Complete ===");
    println!(
        "Total processing time: {:.2}s",
        start_time.elapsed().as_secs_f64()
    );
    println!("Tables written to: {}", args.output_dir.display());

    Ok(())
}
