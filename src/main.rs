use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use taintlog::archive::retention;
use taintlog::config::{Config, DEFAULT_CONFIG_PATH};
use taintlog::stream::shared;
use taintlog::{telemetry, EntryReader, Registry, Taint, TaskPool};

#[derive(Parser)]
#[command(name = "taintlog", version, about = "Named log streams with hourly rotation")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy stdin into a named stream, one entry per line
    Write {
        /// Stream name
        name: String,

        /// Do not echo entries to stdout
        #[arg(long)]
        quiet: bool,
    },
    /// Decode log files or archives and print their entries
    Cat {
        /// Live `.log` files or `.log.zst` archives
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print without colours
        #[arg(long)]
        plain: bool,

        /// Only print entries with this taint
        #[arg(long, value_enum)]
        taint: Option<TaintArg>,
    },
    /// Delete compressed archives past the retention period
    Prune {
        /// Override the configured retention in days
        #[arg(long)]
        days: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TaintArg {
    Normal,
    Info,
    Warning,
    Error,
    Fatal,
    Ok,
}

impl From<TaintArg> for Taint {
    fn from(arg: TaintArg) -> Self {
        match arg {
            TaintArg::Normal => Taint::Normal,
            TaintArg::Info => Taint::Info,
            TaintArg::Warning => Taint::Warning,
            TaintArg::Error => Taint::Error,
            TaintArg::Fatal => Taint::Fatal,
            TaintArg::Ok => Taint::Ok,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Command::Write { name, quiet } => write_stream(config, name, quiet).await,
        Command::Cat {
            files,
            plain,
            taint,
        } => {
            telemetry::init_tracing(None)?;
            cat(&files, plain, taint.map(Taint::from))
        }
        Command::Prune { days } => {
            telemetry::init_tracing(None)?;
            let days = days.unwrap_or(config.archive_retention_days);
            let count = retention::prune_archives(&config.archive_dir(), days)?;
            println!("Pruned {} archives", count);
            Ok(())
        }
    }
}

async fn write_stream(config: Config, name: String, quiet: bool) -> Result<()> {
    config.ensure_directories()?;

    let tasks = Arc::new(TaskPool::current()?);
    let registry = Arc::new(Registry::new(config, tasks));

    // the sink's own diagnostics are recorded like any other stream
    telemetry::init_tracing(Some(registry.get("taintlog")))?;

    let stream = registry.get(&name);
    if !quiet {
        stream.set_console(Some(shared(io::stdout())));
    }
    registry.enable_file_output();

    tracing::info!(stream = %name, "Copying stdin");
    let copier = Arc::clone(&stream);
    tokio::task::spawn_blocking(move || copier.stream_lines(io::stdin().lock()))
        .await
        .context("stdin copy task failed")?;

    registry.wait_idle().await;
    Ok(())
}

fn cat(files: &[PathBuf], plain: bool, only: Option<Taint>) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for path in files {
        let reader = EntryReader::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        for entry in reader {
            let entry = entry.with_context(|| format!("Corrupt frame in {}", path.display()))?;
            if only.map_or(false, |taint| taint != entry.taint) {
                continue;
            }
            if plain {
                out.write_all(entry.render_plain().as_bytes())?;
            } else {
                out.write_all(&entry.render_colored())?;
            }
        }
    }

    out.flush()?;
    Ok(())
}
