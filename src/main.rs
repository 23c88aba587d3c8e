//! Chest X-ray transfer learning CLI
//!
//! Runs the pipeline stages (feature caching, head training, test-set
//! evaluation) individually or end to end.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;
use walkdir::WalkDir;

use xray_transfer::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use xray_transfer::inference::Predictor;
use xray_transfer::pipeline::{self, ExtractionSummary, TrainingSummary};
use xray_transfer::utils::format_duration;
use xray_transfer::utils::logging::{init_logging, LogConfig, LogLevel};
use xray_transfer::{EvaluationReport, PipelineConfig};

/// Pneumonia vs. normal chest X-ray classifier
///
/// Trains a dense head on bottleneck features of a frozen VGG16 base.
#[derive(Parser, Debug)]
#[command(name = "xray_transfer")]
#[command(version)]
#[command(about = "Chest X-ray transfer learning with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Log level (trace, debug, info, warn, error); overrides --verbose/--quiet
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Pipeline configuration (TOML); defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides applied on top of the configuration file
#[derive(Args, Debug)]
struct Overrides {
    /// Dataset root containing train/, val/ and test_set/
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Directory for caches, checkpoint and reports
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,

    /// Maximum number of training epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Batch size for extraction and training
    #[arg(long)]
    batch_size: Option<usize>,

    /// Adam learning rate
    #[arg(long)]
    learning_rate: Option<f64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cache bottleneck features for the train and validation splits
    Extract {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Train the classifier head on cached features
    Train {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Predict the test split and write the evaluation reports
    Evaluate {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Run extraction, training and evaluation in sequence
    Run {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Classify a single image or every image under a directory
    Predict {
        /// Image file or directory
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Show per-class image counts for each split
    Stats {
        #[command(flatten)]
        overrides: Overrides,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };
    if let Some(level) = &cli.log_level {
        log_config.level = LogLevel::from_name(level);
    }

    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Extract { overrides } => {
            let config = load_config(cli.config.as_deref(), &overrides)?;
            cmd_extract(&config)?;
        }
        Commands::Train { overrides } => {
            let config = load_config(cli.config.as_deref(), &overrides)?;
            cmd_train(&config)?;
        }
        Commands::Evaluate { overrides } => {
            let config = load_config(cli.config.as_deref(), &overrides)?;
            cmd_evaluate(&config)?;
        }
        Commands::Run { overrides } => {
            let config = load_config(cli.config.as_deref(), &overrides)?;
            cmd_run(&config)?;
        }
        Commands::Predict { input, overrides } => {
            let config = load_config(cli.config.as_deref(), &overrides)?;
            cmd_predict(&config, &input)?;
        }
        Commands::Stats { overrides } => {
            let config = load_config(cli.config.as_deref(), &overrides)?;
            cmd_stats(&config)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════════════╗
 ║   Chest X-ray Transfer Learning                              ║
 ║   Frozen VGG16 features + dense head, built with Burn        ║
 ╚══════════════════════════════════════════════════════════════╝
  "#
        .green()
    );
}

fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(root) = &overrides.data_dir {
        config.paths = config.paths.with_data_root(root);
    }
    if let Some(dir) = &overrides.artifacts_dir {
        config.paths.artifacts_dir = dir.clone();
    }
    if let Some(epochs) = overrides.epochs {
        config.training.epochs = epochs;
    }
    if let Some(batch_size) = overrides.batch_size {
        config.training.batch_size = batch_size;
        config.extractor.batch_size = batch_size;
    }
    if let Some(lr) = overrides.learning_rate {
        config.training.learning_rate = lr;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn cmd_extract(config: &PipelineConfig) -> Result<ExtractionSummary> {
    println!("{}", "Caching bottleneck features...".cyan().bold());
    println!("  Backend:   {}", backend_name());
    println!("  Train:     {}", config.paths.train_dir.display());
    println!("  Validation: {}", config.paths.validation_dir.display());
    println!();

    let start = Instant::now();
    let summary = pipeline::extract_features::<DefaultBackend>(config, &default_device(), true)
        .context("Feature extraction failed")?;

    println!("{}", "Feature caches written:".green().bold());
    println!("  {} ({} rows)", summary.train_cache.display(), summary.train_rows);
    println!("  {} ({} rows)", summary.validation_cache.display(), summary.validation_rows);
    println!("  Feature shape: {:?}", summary.feature_shape);
    println!("  Extractor:     {} ({:?})", summary.extractor.name, summary.source);
    println!("  Took {}", format_duration(start.elapsed().as_secs_f64()));
    println!();
    Ok(summary)
}

fn cmd_train(config: &PipelineConfig) -> Result<TrainingSummary> {
    let cfg = &config.training;
    println!("{}", "Training classifier head...".cyan().bold());
    println!("  Epochs:        {}", cfg.epochs);
    println!("  Batch size:    {}", cfg.batch_size);
    println!("  Learning rate: {}", cfg.learning_rate);
    println!(
        "  Early stop:    patience {}, min_delta {}",
        cfg.early_stopping.patience, cfg.early_stopping.min_delta
    );
    println!();

    let start = Instant::now();
    let summary = pipeline::train_head::<TrainingBackend>(config, &default_device())
        .context("Training failed")?;

    println!("{}", "Training complete:".green().bold());
    println!("  Epochs run:          {}", summary.epochs_run);
    if let Some(epoch) = summary.stopped_at {
        println!("  Early stopped at:    epoch {}", epoch);
    }
    println!(
        "  Best checkpoint:     epoch {} (val_loss {:.5})",
        summary.best_epoch, summary.best_val_loss
    );
    println!("  Validation accuracy: {:.2}%", summary.final_val_accuracy * 100.0);
    println!("  Validation loss:     {:.5}", summary.final_val_loss);
    println!("  Checkpoint:          {}", summary.checkpoint.display());
    println!("  Took {}", format_duration(start.elapsed().as_secs_f64()));
    println!();
    Ok(summary)
}

fn cmd_evaluate(config: &PipelineConfig) -> Result<EvaluationReport> {
    println!("{}", "Evaluating on the test split...".cyan().bold());
    println!("  Test: {}", config.paths.test_dir.display());
    println!();

    let start = Instant::now();
    let report = pipeline::evaluate_test_set::<DefaultBackend>(config, &default_device(), true)
        .context("Evaluation failed")?;

    println!("{}", report);
    println!();
    println!(
        "  Reports written to {} (took {})",
        config.paths.reports_dir().display(),
        format_duration(start.elapsed().as_secs_f64())
    );
    Ok(report)
}

fn cmd_run(config: &PipelineConfig) -> Result<()> {
    let start = Instant::now();
    info!("Running full pipeline with artifacts in {}", config.paths.artifacts_dir.display());

    cmd_extract(config)?;
    cmd_train(config)?;
    let report = cmd_evaluate(config)?;

    println!();
    println!(
        "{} accuracy {:.2}%, AUC {} in {}",
        "Pipeline finished:".green().bold(),
        report.accuracy() * 100.0,
        report.auc_display(),
        format_duration(start.elapsed().as_secs_f64())
    );
    Ok(())
}

fn cmd_predict(config: &PipelineConfig, input: &Path) -> Result<()> {
    if !input.exists() {
        anyhow::bail!("Input path not found: {}", input.display());
    }

    let predictor = Predictor::<DefaultBackend>::load(config, &default_device())
        .context("Failed to load the trained model")?;
    let class_names = predictor.metadata().class_names.clone();

    let files: Vec<PathBuf> = if input.is_dir() {
        WalkDir::new(input)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| ["jpg", "jpeg", "png", "bmp"].contains(&e.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect()
    } else {
        vec![input.to_path_buf()]
    };

    println!("{}", "Predictions:".cyan().bold());
    for path in &files {
        let (class, probability) = predictor
            .predict_image(path)
            .with_context(|| format!("Failed to classify {}", path.display()))?;
        let name = class_names.get(class).map(String::as_str).unwrap_or("?");
        println!("  {:<60} {:<10} p={:.4}", path.display(), name, probability);
    }
    Ok(())
}

fn cmd_stats(config: &PipelineConfig) -> Result<()> {
    let stats = pipeline::dataset_stats(config).context("Failed to scan dataset")?;
    if stats.is_empty() {
        println!(
            "{} No split directories found under {}",
            "Error:".red(),
            config.paths.train_dir.parent().unwrap_or(Path::new(".")).display()
        );
        return Ok(());
    }

    println!("{}", "Dataset Statistics:".cyan().bold());
    for split in stats {
        print!("{}", split);
    }
    Ok(())
}
