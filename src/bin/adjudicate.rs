use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use rustyclaims::{
    config::Config,
    logging,
    processing::{Pipeline, UploadedFile},
};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "adjudicate",
    about = "Decide an insurance claim query against local policy documents"
)]
struct Cli {
    /// Free-text claim description.
    #[arg(long)]
    query: String,
    /// Policy documents or directories containing them (PDF, DOCX, EML).
    #[arg(required = true)]
    paths: Vec<PathBuf>,
    /// Pretty-print the decision JSON.
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    logging::init_tracing_with_default("warn");

    let config = Config::from_env().context("failed to load configuration from environment")?;
    let pipeline = Pipeline::from_config(&config).context("failed to initialize pipeline")?;

    let files = collect_files(&cli.paths)?;
    tracing::info!(files = files.len(), "Collected input documents");

    let decision = match pipeline.run_pipeline(&cli.query, files).await {
        Ok(decision) => decision,
        Err(error) => {
            if let Some(raw) = error.raw_output() {
                eprintln!("model output:\n{raw}");
            }
            bail!("{} failed ({}): {error}", error.stage(), error.kind());
        }
    };

    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&decision)?
    } else {
        serde_json::to_string(&decision)?
    };
    println!("{rendered}");
    Ok(())
}

/// Read every file named on the command line, walking directories in path order.
fn collect_files(paths: &[PathBuf]) -> Result<Vec<UploadedFile>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
            {
                files.push(read_file(entry.path())?);
            }
        } else {
            files.push(read_file(path)?);
        }
    }
    Ok(files)
}

fn read_file(path: &Path) -> Result<UploadedFile> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(UploadedFile::new(name, bytes))
}
