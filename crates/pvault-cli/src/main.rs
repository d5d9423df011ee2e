//! # pvault CLI
//!
//! Command-line interface for the prompt vault: run a telemetry batch through
//! the offload pipeline, or fetch a vaulted payload back by its reference.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pvault_cas::Reference;
use pvault_config::{init_logging, log_cli_error, log_cli_info, log_store_warn, Config, LogLevel};
use pvault_processor::{create_store, JsonLinesExporter, Traces, VaultProcessor};

/// Prompt Vault - offload large or sensitive telemetry attributes into a verified store
#[derive(Parser)]
#[command(name = "pvault")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overrides the configured one
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a JSON traces batch through the vault processor
    Process {
        /// Input batch file, `-` for stdin
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Write the rewritten batch here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fetch and verify the payload behind a vault reference
    Retrieve {
        /// Encoded reference, structured JSON or a bare locator
        #[arg(value_name = "REFERENCE")]
        reference: String,

        /// Write the payload here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the default configuration as TOML
    Config,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        log_cli_error!("command failed", error = tracing::field::display(&e));
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Config = cli.command {
        print!("{}", Config::default_toml()?);
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(cli.log_level.unwrap_or(config.logging.level));

    match cli.command {
        Commands::Process { input, output } => cmd_process(&config, &input, output.as_deref()),
        Commands::Retrieve { reference, output } => {
            cmd_retrieve(&config, &reference, output.as_deref())
        }
        Commands::Config => Ok(()),
    }
}

fn read_input(input: &Path) -> Result<Vec<u8>> {
    if input == Path::new("-") {
        let mut buf = Vec::new();
        io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    fs::read(input).with_context(|| format!("Failed to read {}", input.display()))
}

fn open_output(output: Option<&Path>) -> Result<Box<dyn Write + Send>> {
    Ok(match output {
        Some(path) => Box::new(
            fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    })
}

fn cmd_process(config: &Config, input: &Path, output: Option<&Path>) -> Result<()> {
    let raw = read_input(input)?;
    let traces: Traces = serde_json::from_slice(&raw)
        .with_context(|| format!("Failed to parse traces from {}", input.display()))?;
    let spans = traces.span_count();

    let exporter = Arc::new(JsonLinesExporter::new(open_output(output)?));
    let processor = VaultProcessor::from_config(config, exporter)?;

    processor.start();
    processor.process_batch(traces)?;
    processor.shutdown()?;

    log_cli_info!(
        "batch processed",
        spans = spans,
        input = tracing::field::display(input.display()),
    );
    Ok(())
}

fn cmd_retrieve(config: &Config, encoded: &str, output: Option<&Path>) -> Result<()> {
    let reference = Reference::decode(encoded)?;
    if !reference.is_verifiable() {
        log_store_warn!(
            "legacy reference carries no checksum, content not verified",
            uri = reference.uri.as_str(),
        );
    }

    let store = create_store(&config.storage)?;
    let data = store
        .retrieve(&reference)
        .with_context(|| format!("Failed to retrieve {}", reference.uri))?;
    store.close()?;

    let mut out = open_output(output)?;
    out.write_all(&data)?;
    out.flush()?;

    log_cli_info!(
        "payload retrieved",
        uri = reference.uri.as_str(),
        bytes = data.len(),
    );
    Ok(())
}
