//! Corpus Validation CLI
//!
//! Translates and validates a directory of configuration documents against a
//! persisted model and key mapping table, with a bounded worker pool and
//! batch checkpointing for restartable runs.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use varimodel::{BatchRunner, FeatureModel, KeyMap, PipelineConfig};

#[derive(Parser)]
#[command(name = "varimodel-validate")]
#[command(about = "Validate a document corpus against a variability model")]
struct Cli {
    /// Path to a config file (varimodel.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Model file
    #[arg(short, long)]
    model: PathBuf,

    /// Key mapping table; derived from the model when omitted
    #[arg(short = 'k', long)]
    keymap: Option<PathBuf>,

    /// Directory (or single file) of YAML/JSON documents
    #[arg(short, long)]
    documents: PathBuf,

    /// Write the full report as JSON to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write summary rows as TSV to this file
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Print every violated rule instead of counts only
    #[arg(long)]
    verbose: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = PipelineConfig::load_from(cli.config.as_deref())?;

    println!("Loading model from {}", cli.model.display());
    let model = FeatureModel::load(&cli.model)?;
    model.verify()?;

    let keymap = match &cli.keymap {
        Some(path) => KeyMap::load(path)?,
        None => KeyMap::derive(&model)?,
    };
    println!(
        "  {} features, {} constraints, {} mapping entries",
        model.feature_count(),
        model.constraints.len(),
        keymap.len()
    );

    let files = collect_documents(&cli.documents);
    println!("  {} document files", files.len());

    let runner = BatchRunner::new(&model, &keymap, config.batch_config());
    let outcome = runner.run(&files)?;

    let valid = outcome.reports.iter().filter(|r| r.valid).count();
    let invalid = outcome.reports.len() - valid;
    println!(
        "\n{} valid, {} invalid, {} skipped ({} batches resumed from checkpoint)",
        valid, invalid, outcome.skipped, outcome.resumed_batches
    );
    if !outcome.size_buckets.is_empty() {
        let buckets: Vec<String> = outcome
            .size_buckets
            .iter()
            .map(|(name, count)| format!("{}: {}", name, count))
            .collect();
        println!("Corpus size buckets: {}", buckets.join(", "));
    }

    if cli.verbose {
        for report in outcome.reports.iter().filter(|r| !r.valid) {
            println!("\n{} INVALID", report.document_id);
            for violation in &report.violations {
                println!("  - {}", violation);
            }
        }
    }

    if !outcome.diagnostics.is_empty() {
        println!(
            "\n{} warning(s), {} note(s) collected",
            outcome.diagnostics.warning_count(),
            outcome.diagnostics.len() - outcome.diagnostics.warning_count()
        );
        if cli.verbose {
            println!("{}", outcome.diagnostics);
        }
    }

    if let Some(path) = &cli.output {
        let report = serde_json::json!({
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "valid": valid,
            "invalid": invalid,
            "skipped": outcome.skipped,
            "reports": outcome.reports,
        });
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        println!("Reports written to {}", path.display());
    }

    if let Some(path) = &cli.summary {
        let mut text = String::from("filename\tsource\tresult\ttime_ms\n");
        for row in &outcome.summary {
            text.push_str(&format!(
                "{}\t{}\t{}\t{}\n",
                row.filename, row.source, row.result, row.time_ms
            ));
        }
        std::fs::write(path, text)?;
        println!("Summary written to {}", path.display());
    }

    if invalid > 0 {
        std::process::exit(2);
    }
    Ok(())
}

fn collect_documents(root: &PathBuf) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.clone()];
    }
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "yaml" || ext == "yml" || ext == "json")
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    // Stable ordering keeps batch checkpoints meaningful across restarts
    files.sort();
    files
}
