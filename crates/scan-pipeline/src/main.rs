use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use scan_pipeline::budget::MeteredLedger;
use scan_pipeline::client::http::HttpInferenceClient;
use scan_pipeline::config::PipelineConfig;
use scan_pipeline::pipeline;

use consensus::planner::Slice;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory of scan slice images, ordered by filename
    slices_dir: PathBuf,

    /// Inference endpoint base URL (overrides SCAN_ENDPOINT_URL)
    #[arg(long)]
    endpoint: Option<String>,

    /// API key for the inference endpoint (overrides SCAN_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Screening model name (overrides SCAN_SCREEN_MODEL)
    #[arg(long)]
    screen_model: Option<String>,

    /// Confirmation model name (overrides SCAN_CONFIRM_MODEL)
    #[arg(long)]
    confirm_model: Option<String>,

    /// Per-scan budget ceiling in USD (overrides SCAN_BUDGET_USD)
    #[arg(long)]
    budget: Option<f64>,

    /// Write the JSON report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

fn load_slices(dir: &PathBuf) -> Result<Vec<Slice>> {
    let mut entries: Vec<(String, PathBuf)> = std::fs::read_dir(dir)
        .with_context(|| format!("reading slice directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .filter_map(|path| {
            path.file_name()
                .map(|name| (name.to_string_lossy().into_owned(), path.clone()))
        })
        .collect();

    if entries.is_empty() {
        bail!("no slice images found in {}", dir.display());
    }
    // Filename order is anatomical order.
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    entries
        .into_iter()
        .enumerate()
        .map(|(index, (filename, path))| {
            let payload = std::fs::read(&path)
                .with_context(|| format!("reading slice image {}", path.display()))?;
            Ok(Slice {
                index,
                payload,
                filename,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_load_in_filename_order_and_skip_non_images() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("slice_0002.png"), b"bbb").unwrap();
        std::fs::write(dir.path().join("slice_0001.png"), b"aaa").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();

        let slices = load_slices(&dir.path().to_path_buf()).unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].filename, "slice_0001.png");
        assert_eq!(slices[0].index, 0);
        assert_eq!(slices[0].payload, b"aaa");
        assert_eq!(slices[1].filename, "slice_0002.png");
        assert_eq!(slices[1].index, 1);
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_slices(&dir.path().to_path_buf()).is_err());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = PipelineConfig::default();
    if let Some(endpoint) = args.endpoint {
        config.endpoint.base_url = endpoint;
    }
    if let Some(api_key) = args.api_key {
        config.endpoint.api_key = api_key;
    }
    if let Some(model) = args.screen_model {
        config.endpoint.screen_model = model;
    }
    if let Some(model) = args.confirm_model {
        config.endpoint.confirm_model = model;
    }
    if let Some(budget) = args.budget {
        config.budget_usd = budget;
    }
    if config.endpoint.api_key.is_empty() {
        bail!("no API key: pass --api-key or set SCAN_API_KEY");
    }

    let slices = load_slices(&args.slices_dir)?;
    info!(
        slices = slices.len(),
        endpoint = %config.endpoint.base_url,
        budget_usd = config.budget_usd,
        "scan loaded"
    );

    let client = Arc::new(HttpInferenceClient::new(&config.endpoint)?);
    let ledger = Arc::new(MeteredLedger::new(config.budget_usd));

    let analysis = pipeline::analyze_scan(slices, client, ledger, config).await?;

    let report = serde_json::to_string_pretty(&analysis)?;
    match args.output {
        Some(path) => {
            std::fs::write(&path, &report)
                .with_context(|| format!("writing report to {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{report}"),
    }

    info!(
        scan_id = %analysis.scan_id,
        primary = %analysis.primary_diagnosis,
        spent_usd = analysis.spent_usd,
        "analysis complete"
    );

    Ok(())
}
