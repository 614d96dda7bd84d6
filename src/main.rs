mod app;
mod config;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;

use app::{Cli, load_config, run};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("CLI: Failed to initialize thread pool")?;
    }

    let config = load_config(&cli)?;
    tracing::info!(
        "Converting {} input(s): format {:?}, dialect {}, srid {}",
        cli.inputs.len(),
        config.format,
        config.dialect,
        config.srid
    );

    let start = std::time::Instant::now();
    let outputs = run(&cli, &config)?;

    let mut stdout = std::io::stdout().lock();
    for output in &outputs {
        writeln!(stdout, "{}", output).context("CLI: Failed to write output")?;
    }

    tracing::info!(
        "Done! Converted {} queries in {:.2}s",
        outputs.len(),
        start.elapsed().as_secs_f64()
    );

    Ok(())
}
