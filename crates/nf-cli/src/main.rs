//! nufit CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use nf_config::resources::{self, RESOURCES_ENV};
use nf_config::validate::{validate_constants, validate_pipeline};
use nf_config::{ConfigDocument, ConstantsTable, Hierarchy, PipelineConfig, Report};
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "nufit")]
#[command(about = "nufit - oscillation-analysis configuration loader")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    /// Extra resource root searched before NUFIT_RESOURCES (repeatable)
    #[arg(long, global = true)]
    resources: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a pipeline (or constants) file
    Check {
        /// Config file
        config: PathBuf,

        /// Treat the file as a constants table instead of a pipeline
        #[arg(long)]
        constants: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the fully interpolated document
    Resolve {
        /// Config file
        config: PathBuf,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the merged parameter set of a pipeline
    Params {
        /// Pipeline config file
        config: PathBuf,

        /// Param selections (comma separated). Defaults to [pipeline] param_selections.
        #[arg(long, value_delimiter = ',')]
        selection: Vec<String>,

        /// Only free parameters
        #[arg(long)]
        free_only: bool,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print a constants table
    Constants {
        /// Constants file
        file: PathBuf,

        /// Resolve `_nh` / `_ih` variants for one hierarchy
        #[arg(long)]
        hierarchy: Option<Hierarchy>,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Locate a resource the way #include does
    Find {
        /// Resource path, e.g. settings/osc/nufit_v5.cfg
        resource: String,
    },

    /// Print the parameter-set hash of a pipeline
    Hash {
        /// Pipeline config file
        config: PathBuf,

        /// Param selections (comma separated). Defaults to [pipeline] param_selections.
        #[arg(long, value_delimiter = ',')]
        selection: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if !cli.resources.is_empty() {
        prepend_resources(&cli.resources);
    }

    match cli.command {
        Commands::Check { config, constants, json } => cmd_check(&config, constants, json),
        Commands::Resolve { config, output } => cmd_resolve(&config, output.as_ref()),
        Commands::Params { config, selection, free_only, output } => {
            cmd_params(&config, &selection, free_only, output.as_ref())
        }
        Commands::Constants { file, hierarchy, output } => cmd_constants(&file, hierarchy, output.as_ref()),
        Commands::Find { resource } => cmd_find(&resource),
        Commands::Hash { config, selection } => cmd_hash(&config, &selection),
    }
}

fn prepend_resources(roots: &[PathBuf]) {
    let mut parts: Vec<String> = roots.iter().map(|p| p.display().to_string()).collect();
    if let Ok(existing) = std::env::var(RESOURCES_ENV) {
        if !existing.is_empty() {
            parts.push(existing);
        }
    }
    let joined = parts.join(":");
    tracing::debug!(roots = %joined, "resource path");
    std::env::set_var(RESOURCES_ENV, joined);
}

fn cmd_check(config: &Path, constants: bool, as_json: bool) -> Result<()> {
    let report = if constants {
        let table = ConstantsTable::from_file(config)?;
        tracing::info!(constants = table.len(), "constants loaded");
        validate_constants(&table)
    } else {
        let pipeline = PipelineConfig::from_file(config)?;
        tracing::info!(stages = pipeline.stages.len(), "pipeline loaded");
        validate_pipeline(&pipeline)
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report_json(config, &report))?);
    } else {
        println!("{}: {report}", config.display());
    }
    if !report.is_ok() {
        anyhow::bail!("{} failed validation with {} error(s)", config.display(), report.n_errors());
    }
    Ok(())
}

fn report_json(config: &Path, report: &Report) -> serde_json::Value {
    json!({
        "config": config.display().to_string(),
        "ok": report.is_ok(),
        "n_errors": report.n_errors(),
        "n_warnings": report.n_warnings(),
        "issues": report.issues,
    })
}

fn cmd_resolve(config: &Path, output: Option<&PathBuf>) -> Result<()> {
    let doc = ConfigDocument::from_file(config)?.interpolate()?;
    let section_json = |s: &nf_config::Section| {
        let values: serde_json::Map<String, serde_json::Value> =
            s.entries.iter().map(|e| (e.key.clone(), json!(e.value))).collect();
        json!({ "name": s.name, "values": values })
    };
    let mut sections = Vec::new();
    if !doc.defaults().entries.is_empty() {
        sections.push(section_json(doc.defaults()));
    }
    sections.extend(doc.sections().map(section_json));
    let sources: Vec<String> = doc.sources().iter().map(|p| p.display().to_string()).collect();
    write_json(output, json!({ "sources": sources, "sections": sections }))
}

fn load_pipeline_params(config: &Path, selection: &[String]) -> Result<(Vec<String>, nf_core::ParamSet)> {
    let pipeline = PipelineConfig::from_file(config)?;
    let selections: Vec<String> =
        if selection.is_empty() { pipeline.param_selections.clone() } else { selection.to_vec() };
    let refs: Vec<&str> = selections.iter().map(String::as_str).collect();
    let params = pipeline.params_with(&refs)?;
    Ok((selections, params))
}

fn cmd_params(config: &Path, selection: &[String], free_only: bool, output: Option<&PathBuf>) -> Result<()> {
    let (selections, params) = load_pipeline_params(config, selection)?;
    let hash = params.hash();
    let shown = if free_only { params.free() } else { params };
    tracing::info!(params = shown.len(), "parameters resolved");
    let n_params = shown.len();
    let params_json = serde_json::to_value(shown)?;
    write_json(
        output,
        json!({
            "selections": selections,
            "hash": hash,
            "n_params": n_params,
            "params": params_json,
        }),
    )
}

fn cmd_constants(file: &Path, hierarchy: Option<Hierarchy>, output: Option<&PathBuf>) -> Result<()> {
    let table = ConstantsTable::from_file(file)?;
    let value = match hierarchy {
        Some(h) => {
            let constants = serde_json::to_value(table.select(h))?;
            json!({ "hierarchy": h.tag(), "constants": constants })
        }
        None => {
            let constants = serde_json::to_value(&table)?;
            json!({ "constants": constants })
        }
    };
    write_json(output, value)
}

fn cmd_find(resource: &str) -> Result<()> {
    let path = resources::find_path(resource)?;
    println!("{}", path.display());
    Ok(())
}

fn cmd_hash(config: &Path, selection: &[String]) -> Result<()> {
    let (_, params) = load_pipeline_params(config, selection)?;
    println!("{}", params.hash());
    Ok(())
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
