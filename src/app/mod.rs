use anyhow::{Context, Result};
use clap::Parser;
use rayon::prelude::*;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::{ConvertConfig, FileConfig, OutputFormat};
use overpass_ql::{KeyEscaper, SqlOptions, WrapKeys};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Overpass QL files to convert (`-` reads standard input)
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Configuration file (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// SQL dialect (postgres, duckdb)
    #[arg(short, long, env = "OVERPASS_QL_DIALECT")]
    pub dialect: Option<String>,

    /// Spatial reference id for geometric filters (default: 4326)
    #[arg(long)]
    pub srid: Option<u32>,

    /// Marker placed on both sides of every tag key in SQL
    #[arg(long)]
    pub key_wrap: Option<String>,

    /// Emit SQL regex filters as whole-value matches
    #[arg(long)]
    pub anchor_regexes: bool,

    /// Output format (default: sql)
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Number of threads (default: all cores)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Settings given as flags, applied over the configuration file.
    pub fn overrides(&self) -> FileConfig {
        FileConfig {
            dialect: self.dialect.clone(),
            srid: self.srid,
            key_wrap: self.key_wrap.clone(),
            anchor_regexes: self.anchor_regexes.then_some(true),
            format: self.format,
        }
    }
}

pub fn load_config(cli: &Cli) -> Result<ConvertConfig> {
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)
            .with_context(|| format!("Config: Failed to load {}", path.display()))?,
        None => FileConfig::default(),
    };
    ConvertConfig::try_from(file.merge(cli.overrides()))
}

fn display_name(path: &Path) -> String {
    if path == Path::new("-") {
        "<stdin>".to_string()
    } else {
        path.display().to_string()
    }
}

pub fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("CLI: Failed to read standard input")?;
        Ok(source)
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("CLI: Failed to read {}", path.display()))
    }
}

/// Convert one query according to `config.format`.
pub fn convert(source: &str, config: &ConvertConfig) -> Result<String> {
    let query = overpass_ql::parse(source)?;
    let output = match config.format {
        OutputFormat::Sql => {
            let wrap = config.key_wrap.clone().map(WrapKeys);
            let options = SqlOptions::new(config.dialect, config.srid)
                .with_key_escaper(wrap.as_ref().map(|w| w as &dyn KeyEscaper))
                .with_anchored_regexes(config.anchor_regexes);
            query.to_sql_with(&options)?
        }
        OutputFormat::Overpass => query.to_overpass(),
        OutputFormat::Selectors => query
            .all_selectors()
            .iter()
            .map(|selectors| selectors.to_overpass())
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Json => serde_json::to_string_pretty(&query)?,
    };
    Ok(output)
}

/// Read every input, convert them in parallel and return the outputs in
/// input order. The first failure aborts the run.
pub fn run(cli: &Cli, config: &ConvertConfig) -> Result<Vec<String>> {
    let sources = cli
        .inputs
        .iter()
        .map(|path| Ok((display_name(path), read_input(path)?)))
        .collect::<Result<Vec<_>>>()?;

    sources
        .par_iter()
        .map(|(name, source)| {
            let output =
                convert(source, config).with_context(|| format!("Convert: {}", name))?;
            tracing::info!("Converted {} ({} bytes)", name, output.len());
            Ok(output)
        })
        .collect()
}
