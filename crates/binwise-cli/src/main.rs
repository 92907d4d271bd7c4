//! Binwise CLI
//!
//! Classifies waste photos from disk and prints one JSON disposal decision
//! per image. Logs go to stderr so stdout stays machine-readable.

use anyhow::{bail, Context, Result};
use binwise_core::ImageInput;
use binwise_pipeline::{ClassificationPipeline, PipelineConfig};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.json_logs);

    let metrics_handle = if cli.metrics {
        Some(init_metrics()?)
    } else {
        None
    };

    let config = load_config(&cli)?;

    let outcome = match &cli.command {
        Commands::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Commands::Info => {
            let pipeline = ClassificationPipeline::from_config(&config).await?;
            println!("{}", serde_json::to_string_pretty(&pipeline.get_model_info())?);
            Ok(())
        }
        Commands::Health => {
            let pipeline = ClassificationPipeline::from_config(&config).await?;
            let health = pipeline.health();
            if health.is_degraded() {
                warn!("Pipeline is running in a degraded state");
            }
            println!("{}", serde_json::to_string_pretty(&health)?);
            Ok(())
        }
        Commands::Classify {
            paths,
            placeholder,
            fail_fast,
        } => {
            let pipeline = ClassificationPipeline::from_config(&config).await?;
            if *placeholder {
                classify_placeholder(&pipeline).await
            } else {
                classify_files(&pipeline, paths, *fail_fast).await
            }
        }
    };

    if let Some(handle) = metrics_handle {
        eprint!("{}", handle.render());
    }

    outcome
}

/// Load the config file and apply command-line overrides
fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    if let Some(variant) = cli.classifier {
        config.classifier.variant = variant;
    }
    if let Some(variant) = cli.safety {
        config.safety.variant = variant;
    }
    if let Some(high) = cli.high {
        config.confidence.high = high;
    }
    if let Some(medium) = cli.medium {
        config.confidence.medium = medium;
    }

    config.validate().context("Invalid configuration")?;
    debug!(
        classifier = ?config.classifier.variant,
        safety = ?config.safety.variant,
        "Configuration loaded"
    );
    Ok(config)
}

async fn classify_placeholder(pipeline: &ClassificationPipeline) -> Result<()> {
    let result = pipeline.classify(ImageInput::Missing).await?;
    let hint = pipeline.segregation_engine().disposal_hint(result.bin_type());
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "path": null,
            "result": result,
            "disposal_hint": hint,
        }))?
    );
    Ok(())
}

async fn classify_files(
    pipeline: &ClassificationPipeline,
    paths: &[PathBuf],
    fail_fast: bool,
) -> Result<()> {
    let mut inputs = Vec::with_capacity(paths.len());
    for path in paths {
        inputs.push(read_image(path).await?);
    }
    info!(count = inputs.len(), "Classifying images");

    if fail_fast {
        let results = pipeline.classify_batch(inputs).await?;
        for (path, result) in paths.iter().zip(results) {
            let hint = pipeline.segregation_engine().disposal_hint(result.bin_type());
            print_entry(json!({
                "path": path,
                "result": result,
                "disposal_hint": hint,
            }))?;
        }
        return Ok(());
    }

    let settled = pipeline.classify_batch_settled(inputs).await;
    let mut failed = 0usize;
    for (path, outcome) in paths.iter().zip(settled) {
        match outcome {
            Ok(result) => {
                let hint = pipeline.segregation_engine().disposal_hint(result.bin_type());
                print_entry(json!({
                    "path": path,
                    "result": result,
                    "disposal_hint": hint,
                }))?;
            }
            Err(e) => {
                failed += 1;
                warn!(path = %path.display(), error = %e, "Classification failed");
                print_entry(json!({
                    "path": path,
                    "error": e.to_string(),
                    "retryable": e.is_retryable(),
                }))?;
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} images failed to classify", failed, paths.len());
    }
    Ok(())
}

async fn read_image(path: &Path) -> Result<ImageInput> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(ImageInput::from(bytes))
}

fn print_entry(value: serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// `binwise` matches every `binwise_*` crate target by prefix
fn log_directive(verbose: bool) -> &'static str {
    if verbose {
        "binwise=debug"
    } else {
        "binwise=info"
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new(log_directive(true))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_directive(false)))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Initialize metrics recorder and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "binwise_classifications_total",
        "Classifications completed by category and confidence tier"
    );
    metrics::describe_histogram!(
        "binwise_classification_latency_ms",
        metrics::Unit::Milliseconds,
        "End-to-end classification latency in milliseconds"
    );
    metrics::describe_counter!(
        "binwise_classification_errors_total",
        "Failed classifications by error kind"
    );
    metrics::describe_counter!(
        "binwise_safety_degraded_total",
        "Results returned without a safety verdict"
    );
    metrics::describe_counter!(
        "binwise_safety_load_failures_total",
        "Safety validators that failed to load at startup"
    );
    metrics::describe_counter!(
        "binwise_breaker_transitions_total",
        "Circuit breaker state transitions"
    );
    metrics::describe_counter!(
        "binwise_breaker_rejections_total",
        "Calls rejected by an open circuit breaker"
    );

    debug!("Metrics recorder installed");
    Ok(handle)
}
