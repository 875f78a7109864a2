//! xlogwire - log row dumper
//!
//! Decodes write-ahead log and snapshot files, or a live replication feed,
//! and prints their rows.

mod config;
mod output;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use output::{Format, RowPrinter};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use xlogwire_net::Connection;
use xlogwire_xlog::{
    subscribe, BatchOptions, BatchReader, LogReader, NoSchema, RecordSource, SchemaRegistry,
    Schemas,
};

#[derive(Parser)]
#[command(name = "xlogwire")]
#[command(about = "Decode write-ahead log rows into MessagePack or JSON")]
#[command(version)]
struct Cli {
    /// Config file (YAML)
    #[arg(short, long, env = "XLOGWIRE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Row selection shared by `dump` and `replicate`.
#[derive(clap::Args)]
struct RowArgs {
    /// First LSN to print (inclusive)
    #[arg(long, default_value_t = 0)]
    from: u64,

    /// Last LSN to print (inclusive)
    #[arg(long, default_value_t = u64::MAX)]
    to: u64,

    /// Only print rows of this space (repeatable)
    #[arg(long = "space")]
    spaces: Vec<u32>,

    /// Rows decoded per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Field type hints (YAML)
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Stop at the first bad record
    #[arg(long)]
    strict: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Json)]
    format: Format,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the rows of a log or snapshot file
    Dump {
        /// Log file (.xlog or .snap)
        file: PathBuf,

        #[command(flatten)]
        rows: RowArgs,
    },

    /// Summarize a log or snapshot file
    Info {
        /// Log file (.xlog or .snap)
        file: PathBuf,
    },

    /// Stream rows from a replication master
    Replicate {
        /// Master host
        #[arg(long)]
        host: Option<String>,

        /// Master replication port
        #[arg(short, long)]
        port: Option<u16>,

        #[command(flatten)]
        rows: RowArgs,
    },
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Dump { file, rows } => {
            rows.apply(&mut config);
            let reader = LogReader::open(&file)?;
            tracing::info!(
                file = %file.display(),
                kind = ?reader.kind(),
                version = reader.version(),
                "dumping log"
            );
            print_rows(reader, &rows, &config)
        }
        Commands::Info { file } => info(&file),
        Commands::Replicate { host, port, rows } => {
            rows.apply(&mut config);
            if let Some(host) = host {
                config.replication.host = host;
            }
            if let Some(port) = port {
                config.replication.port = port;
            }

            let mut conn = Connection::new(config.replication.connection());
            conn.connect()?;
            tracing::info!(
                host = %config.replication.host,
                port = config.replication.port,
                from = rows.from,
                "connected to replication master"
            );
            let source = subscribe(conn, rows.from)?;
            print_rows(source, &rows, &config)
        }
    }
}

impl RowArgs {
    /// Command-line flags override the config file and environment.
    fn apply(&self, config: &mut Config) {
        if let Some(size) = self.batch_size {
            config.dump.batch_size = size;
        }
        if self.strict {
            config.dump.strict = true;
        }
        if let Some(schema) = &self.schema {
            config.dump.schema = Some(schema.clone());
        }
    }

    fn options(&self, config: &Config) -> BatchOptions {
        let mut options = BatchOptions::new()
            .with_range(self.from, self.to)
            .with_batch_size(config.dump.batch_size);
        if !self.spaces.is_empty() {
            options = options.with_spaces(self.spaces.iter().copied());
        }
        options
    }
}

fn print_rows<S: RecordSource>(
    source: S,
    args: &RowArgs,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let schemas: Box<dyn SchemaRegistry> = match &config.dump.schema {
        Some(path) => Box::new(Schemas::from_file(path)?),
        None => Box::new(NoSchema),
    };

    let stdout = std::io::stdout();
    let mut printer = RowPrinter::new(BufWriter::new(stdout.lock()), args.format, schemas.as_ref());
    let mut reader = BatchReader::new(source, args.options(config));
    let skipped = drain(&mut reader, &mut printer, config.dump.strict)?;

    tracing::info!(
        rows = printer.printed(),
        records = reader.cursor().records_read,
        skipped,
        "done"
    );
    if let Some(err) = reader.source().last_error() {
        tracing::debug!(last_error = err, "source reported errors");
    }
    Ok(())
}

/// Prints every batch; returns the number of bad records skipped.
///
/// Rows accepted before a bad record are printed either way. In strict mode
/// the first bad record then ends the run with its error.
fn drain<S: RecordSource, W: Write>(
    reader: &mut BatchReader<S>,
    printer: &mut RowPrinter<'_, W>,
    strict: bool,
) -> Result<u64, Box<dyn std::error::Error>> {
    let mut skipped = 0u64;
    loop {
        match reader.next_batch() {
            Ok(Some(batch)) => {
                for row in &batch.rows {
                    printer.print(row)?;
                }
                printer.flush()?;
            }
            Ok(None) => break,
            Err(e) if strict => {
                for row in &reader.take_pending() {
                    printer.print(row)?;
                }
                printer.flush()?;
                return Err(e.into());
            }
            Err(e) => {
                skipped += 1;
                tracing::warn!(error = %e, cursor = ?reader.cursor(), "skipping bad record");
            }
        }
    }
    printer.flush()?;
    Ok(skipped)
}

fn info(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = LogReader::open(path)?;
    let mut rows = 0u64;
    let mut corrupted = 0u64;
    let mut first_lsn = None;
    let mut last_lsn = None;

    loop {
        match reader.next_record() {
            Ok(Some(record)) => {
                rows += 1;
                first_lsn.get_or_insert(record.header.lsn);
                last_lsn = Some(record.header.lsn);
            }
            Ok(None) => break,
            Err(e) => {
                corrupted += 1;
                tracing::warn!(error = %e, offset = reader.offset(), "bad record");
                if reader.is_exhausted() {
                    break;
                }
            }
        }
    }

    let mut out = std::io::stdout().lock();
    writeln!(out, "{}: {}", "File".bold(), path.display())?;
    writeln!(out, "{}: {:?}", "Kind".bold(), reader.kind())?;
    writeln!(out, "{}: {}", "Version".bold(), reader.version())?;
    for line in reader.meta() {
        writeln!(out, "{}: {}", "Meta".bold(), line)?;
    }
    writeln!(out, "{}: {}", "Rows".bold(), rows)?;
    match (first_lsn, last_lsn) {
        (Some(first), Some(last)) => writeln!(out, "{}: {}..={}", "LSN".bold(), first, last)?,
        _ => writeln!(out, "{}: -", "LSN".bold())?,
    }
    if corrupted > 0 {
        writeln!(out, "{}: {}", "Bad records".yellow(), corrupted)?;
    }
    if !reader.has_eof_marker() {
        writeln!(out, "{}", "No EOF marker (file may still be written)".dimmed())?;
    }
    Ok(())
}
