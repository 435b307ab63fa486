//! Build-time script generation for saga tables.
//!
//! Reads a JSON manifest of saga definitions and writes idempotent create/drop
//! scripts per dialect, laid out as `{Dialect}/Sagas/{Saga}_{Create|Drop}.sql`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::info;

use sagastore_core::SagaDefinition;
use sagastore_sql::publish::check_definitions;
use sagastore_sql::{Dialect, PublishedFile, ScriptBundle, dedupe_published};

#[derive(Parser)]
#[command(name = "sagastore-scripts")]
#[command(about = "Generate SQL scripts for saga tables", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write create/drop scripts for every saga and dialect in the manifest
    Generate {
        /// Saga manifest (JSON)
        #[arg(short, long)]
        input: PathBuf,
        /// Output root directory
        #[arg(short, long)]
        out: PathBuf,
        /// Restrict to these dialects (repeatable); defaults to the manifest's list
        #[arg(short, long = "dialect", value_name = "DIALECT", action = clap::ArgAction::Append)]
        dialects: Vec<Dialect>,
        /// Override the manifest's table prefix
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Validate the manifest against every dialect without writing anything
    Check {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Print repeated shared scripts in a publish list (one relative path per line)
    Dedupe {
        /// File listing staged relative paths
        #[arg(short, long)]
        list: PathBuf,
        /// Only paths below this prefix are considered
        #[arg(short, long, default_value = "SagaStore")]
        prefix: String,
    },
}

/// Saga manifest consumed by the generator.
#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    table_prefix: String,
    /// Empty means every supported dialect.
    #[serde(default)]
    dialects: Vec<Dialect>,
    sagas: Vec<SagaDefinition>,
}

impl Manifest {
    fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    fn parse(raw: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(raw)?;
        if manifest.sagas.is_empty() {
            bail!("manifest declares no sagas");
        }
        Ok(manifest)
    }

    fn dialects(&self, requested: &[Dialect]) -> Vec<Dialect> {
        match (requested, self.dialects.as_slice()) {
            ([], []) => Dialect::ALL.to_vec(),
            ([], listed) => listed.to_vec(),
            (requested, _) => requested.to_vec(),
        }
    }
}

fn generate(input: &Path, out: &Path, dialects: &[Dialect], prefix: Option<String>) -> Result<Vec<PathBuf>> {
    let manifest = Manifest::load(input)?;
    let dialects = manifest.dialects(dialects);
    let prefix = prefix.unwrap_or_else(|| manifest.table_prefix.clone());
    let bundle = ScriptBundle::generate(&manifest.sagas, &dialects, &prefix)?;
    info!(
        sagas = manifest.sagas.len(),
        dialects = dialects.len(),
        duplicates = bundle.duplicates(),
        "generated saga scripts"
    );
    Ok(bundle.write_to(out)?)
}

fn check(input: &Path) -> Result<()> {
    let manifest = Manifest::load(input)?;
    check_definitions(&manifest.sagas, &manifest.dialects(&[]), &manifest.table_prefix)?;
    info!(sagas = manifest.sagas.len(), "manifest is valid");
    Ok(())
}

fn dedupe(list: &Path, prefix: &str) -> Result<Vec<PublishedFile>> {
    let raw = std::fs::read_to_string(list).with_context(|| format!("reading {}", list.display()))?;
    let files: Vec<PublishedFile> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PublishedFile::new)
        .collect();
    Ok(dedupe_published(&files, prefix))
}

fn main() -> Result<()> {
    sagastore_observability::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            input,
            out,
            dialects,
            prefix,
        } => {
            let written = generate(&input, &out, &dialects, prefix)?;
            for path in written {
                println!("{}", path.display());
            }
        }
        Commands::Check { input } => check(&input)?,
        Commands::Dedupe { list, prefix } => {
            for file in dedupe(&list, &prefix)? {
                println!("{}", file.relative_path);
            }
        }
    }
    Ok(())
}
