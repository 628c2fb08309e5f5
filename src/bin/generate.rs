//! Model Generation CLI
//!
//! Resolves a raw definitions document, synthesizes the feature model, and
//! writes its deterministic text form. Re-running on an unchanged schema is
//! byte-identical, so models diff cleanly across schema versions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use similar::TextDiff;
use tracing_subscriber::EnvFilter;

use varimodel::model::assemble::assemble;
use varimodel::{graph, Diagnostics, FeatureModel, KeyMap, PipelineConfig};

#[derive(Parser)]
#[command(name = "varimodel-generate")]
#[command(about = "Generate a variability model from a schema definitions document")]
struct Cli {
    /// Path to a config file (varimodel.toml)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the schema and write the model file
    Build {
        /// Definitions document (overrides config)
        #[arg(short, long)]
        definitions: Option<PathBuf>,

        /// Output model file (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Top-level kinds to synthesize (default: every definition)
        #[arg(short, long)]
        kind: Vec<String>,

        /// Also derive and write a key mapping table next to the model
        #[arg(long)]
        with_mapping: bool,

        /// Diff the new model against a previous model file
        #[arg(long)]
        diff_against: Option<PathBuf>,
    },

    /// Check an existing model file's invariants
    Check {
        /// Model file
        model: PathBuf,
    },

    /// Diff two model files
    Diff {
        /// Older model file
        old: PathBuf,
        /// Newer model file
        new: PathBuf,
    },
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

    match cli.command {
        Commands::Build {
            definitions,
            output,
            kind,
            with_mapping,
            diff_against,
        } => {
            let definitions = definitions.unwrap_or_else(|| config.model.definitions.clone());
            let output = output.unwrap_or_else(|| config.model.output.clone());
            let kinds = if kind.is_empty() {
                config.model.kinds.clone()
            } else {
                kind
            };
            let schema_version = semver::Version::parse(&config.model.schema_version)?;

            println!("Resolving {}", definitions.display());
            let raw: serde_json::Value =
                serde_json::from_str(&std::fs::read_to_string(&definitions)?)?;

            let mut diagnostics = Diagnostics::new();
            let graph = graph::resolve(&raw, &kinds, &mut diagnostics)?;
            println!(
                "  {} definitions, {} edges, {} cycle groups, {} eliminated (bundle {})",
                graph.definition_count(),
                graph.edge_count(),
                graph.scc_groups().len(),
                graph.eliminated,
                &graph.bundle_hash[..12]
            );

            let model = assemble(
                &config.model.name,
                schema_version,
                &graph,
                &[],
                &mut diagnostics,
            )?;
            println!(
                "  {} features, {} constraints",
                model.feature_count(),
                model.constraints.len()
            );

            if let Some(old_path) = diff_against {
                print_diff(&FeatureModel::load(&old_path)?.to_text(), &model.to_text());
            }

            model.save(&output)?;
            println!("Model written to {}", output.display());

            if with_mapping {
                let mapping_path = output.with_extension("keymap.tsv");
                let keymap = KeyMap::derive(&model)?;
                keymap.save(&mapping_path)?;
                println!(
                    "Key mapping table ({} entries) written to {}",
                    keymap.len(),
                    mapping_path.display()
                );
            }

            // Every recoverable condition is enumerated, never discarded
            if !diagnostics.is_empty() {
                println!("\n{}", diagnostics);
            }
            Ok(())
        }

        Commands::Check { model } => {
            let model = FeatureModel::load(&model)?;
            model.verify()?;
            println!(
                "Model ok: {} features, {} constraints, {} aliases",
                model.feature_count(),
                model.constraints.len(),
                model.aliases.len()
            );
            Ok(())
        }

        Commands::Diff { old, new } => {
            let old_text = FeatureModel::load(&old)?.to_text();
            let new_text = FeatureModel::load(&new)?.to_text();
            if old_text == new_text {
                println!("Models are identical");
            } else {
                print_diff(&old_text, &new_text);
            }
            Ok(())
        }
    }
}

fn print_diff(old: &str, new: &str) {
    let diff = TextDiff::from_lines(old, new);
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            similar::ChangeTag::Delete => "-",
            similar::ChangeTag::Insert => "+",
            similar::ChangeTag::Equal => continue,
        };
        print!("{}{}", sign, change);
    }
}
