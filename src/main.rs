//! fstage - cancellable bulk file operations with rollback.
//!
//! Usage:
//!   fstage delete PATH...                 Delete files and directories
//!   fstage recycle PATH...                Move paths to the trash
//!   fstage copy PATH... --to DIR          Copy into a directory
//!   fstage move PATH... --to DIR          Move into a directory
//!   fstage compress PATH... --to ARCHIVE  Write a zip or tar archive
//!   fstage extract ARCHIVE --to DIR       Unpack a zip archive
//!   fstage duplicates PATH...             Find duplicate files

mod settings;

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

use filestage_analyze::IgnoreOptions;
use filestage_ops::{
    start_process, ArchiveFormat, ChannelDecider, ChannelSink, Decision, DecisionRequest,
    OperationKind, OperationOutput, OperationRegistry, OperationRequest, PendingDecision,
    ProcessEvent, ProcessReport,
};

use settings::{ErrorPolicy, Settings};

#[derive(Parser)]
#[command(
    name = "fstage",
    version,
    about = "Cancellable, resumable bulk file operations with rollback",
    long_about = "fstage runs copy, move, delete, archive and duplicate-scan jobs \
                  item by item. Failures can be retried or skipped; cancelling \
                  undoes every change made so far."
)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Settings file (defaults to <config dir>/filestage/filestage.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// What to do when an item fails
    #[arg(long, value_enum, global = true)]
    on_error: Option<ErrorPolicy>,

    /// Skip an item without asking after this many retries
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// I/O chunk size in bytes
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    /// Follow symbolic links while enumerating
    #[arg(long, global = true)]
    follow_symlinks: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Delete files and directories permanently
    Delete {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Move files and directories to the trash
    Recycle {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Copy paths into a directory
    Copy(TransferArgs),

    /// Move paths into a directory
    Move(TransferArgs),

    /// Write paths into a new archive
    Compress {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Archive to create
        #[arg(long = "to")]
        archive: PathBuf,

        /// Archive format (inferred from the extension by default)
        #[arg(long)]
        archive_format: Option<ArchiveFormat>,
    },

    /// Unpack a zip archive into a directory
    Extract {
        archive: PathBuf,

        /// Destination directory
        #[arg(long = "to")]
        destination: PathBuf,

        /// Replace existing files
        #[arg(long)]
        overwrite: bool,
    },

    /// Find duplicate files
    Duplicates {
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,

        /// Minimum file size to consider (e.g., "1KB", "1MB")
        #[arg(long)]
        min_size: Option<String>,

        /// Maximum file size to consider
        #[arg(long)]
        max_size: Option<String>,

        /// Skip dot-files
        #[arg(long)]
        skip_hidden: bool,

        /// Include empty files
        #[arg(long)]
        include_empty: bool,

        /// File name glob to skip (repeatable)
        #[arg(long = "ignore-name")]
        ignored_names: Vec<String>,

        /// Extension to skip (repeatable)
        #[arg(long = "ignore-ext")]
        ignored_extensions: Vec<String>,

        /// Directory to skip (repeatable)
        #[arg(long = "ignore-path")]
        ignored_prefixes: Vec<PathBuf>,

        /// Maximum number of duplicate groups to show
        #[arg(short = 'n', long, default_value = "20")]
        top: usize,
    },
}

#[derive(Args)]
struct TransferArgs {
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Destination directory
    #[arg(long = "to")]
    destination: PathBuf,

    /// Replace existing files
    #[arg(long)]
    overwrite: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(policy) = cli.on_error {
        settings.on_error = policy;
    }
    if let Some(max_retries) = cli.max_retries {
        settings.engine.max_retries = Some(max_retries);
    }
    if let Some(chunk_size) = cli.chunk_size {
        settings.engine.chunk_size = chunk_size.max(1);
    }
    settings.engine.follow_symlinks |= cli.follow_symlinks;

    let mut top = usize::MAX;
    let request = match cli.command {
        Command::Delete { paths } => OperationRequest::new(OperationKind::Delete, paths),
        Command::Recycle { paths } => OperationRequest::new(OperationKind::Recycle, paths),
        Command::Copy(args) => transfer_request(OperationKind::Copy, args),
        Command::Move(args) => transfer_request(OperationKind::Move, args),
        Command::Compress {
            paths,
            archive,
            archive_format,
        } => {
            let request =
                OperationRequest::new(OperationKind::Compress, paths).destination(archive);
            match archive_format {
                Some(format) => request.archive_format(format),
                None => request,
            }
        }
        Command::Extract {
            archive,
            destination,
            overwrite,
        } => OperationRequest::new(OperationKind::Extract, vec![archive])
            .destination(destination)
            .overwrite(overwrite),
        Command::Duplicates {
            paths,
            min_size,
            max_size,
            skip_hidden,
            include_empty,
            ignored_names,
            ignored_extensions,
            ignored_prefixes,
            top: shown,
        } => {
            top = shown;
            let ignore = IgnoreOptions {
                skip_hidden,
                skip_zero_byte: !include_empty,
                min_size: min_size.as_deref().map(parse_size).transpose()?,
                max_size: max_size.as_deref().map(parse_size).transpose()?,
                ignored_prefixes,
                ignored_names,
                ignored_extensions,
                ..Default::default()
            };
            OperationRequest::new(OperationKind::DuplicateScan, paths).ignore(ignore)
        }
    };

    let report = run(&request, &settings, cli.format).await?;
    match cli.format {
        OutputFormat::Text => print_report(&report, top),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn transfer_request(kind: OperationKind, args: TransferArgs) -> OperationRequest {
    OperationRequest::new(kind, args.paths)
        .destination(args.destination)
        .overwrite(args.overwrite)
}

/// Start the run on a worker and serve its events and prompts until it ends.
async fn run(
    request: &OperationRequest,
    settings: &Settings,
    format: OutputFormat,
) -> Result<ProcessReport> {
    let registry = OperationRegistry::standard();
    let (sink, mut events) = ChannelSink::new();
    let mut engine = registry
        .build_engine(request)
        .with_context(|| format!("Cannot start {}", request.kind))?
        .with_config(settings.engine.clone())
        .with_progress_sink(sink.clone())
        .with_completion_sink(sink);

    let mut requests = match settings.on_error.fixed_decision() {
        Some(decider) => {
            engine = engine.with_decider(decider);
            None
        }
        None => {
            let (decider, requests) = ChannelDecider::new();
            engine = engine.with_decider(decider);
            Some(requests)
        }
    };

    let show_progress = format == OutputFormat::Text && io::stderr().is_terminal();
    let handle = start_process(engine);
    let mut last_percent = None;

    // Ctrl+C cancels the run so that it rolls back instead of dying mid-item
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ProcessEvent::Progress { overall_percent, .. }) => {
                    if show_progress && last_percent != Some(overall_percent) {
                        last_percent = Some(overall_percent);
                        draw_progress(request.kind, overall_percent);
                    }
                }
                Some(ProcessEvent::Log(line)) => tracing::info!("{line}"),
                Some(ProcessEvent::Completed(_)) => {
                    if show_progress {
                        eprintln!();
                    }
                }
                None => break,
            },
            Some(pending) = next_request(&mut requests) => {
                answer(pending).await?;
                last_percent = None;
            }
            signal = &mut interrupt, if !interrupted => {
                interrupted = true;
                match signal {
                    Ok(()) => {
                        if show_progress {
                            eprintln!();
                        }
                        eprintln!("Interrupted, cancelling and rolling back...");
                        handle.cancel();
                    }
                    Err(err) => tracing::warn!("Cannot listen for Ctrl+C: {err}"),
                }
            }
        }
    }

    let report = handle.join().await?;
    Ok(report)
}

async fn next_request(
    requests: &mut Option<UnboundedReceiver<PendingDecision>>,
) -> Option<PendingDecision> {
    match requests {
        Some(rx) => rx.recv().await,
        None => None,
    }
}

/// Ask on the terminal without blocking the runtime.
async fn answer(pending: PendingDecision) -> Result<()> {
    let request = pending.request.clone();
    let decision = tokio::task::spawn_blocking(move || prompt(&request))
        .await
        .context("Prompt task failed")??;
    pending.respond(decision);
    Ok(())
}

fn prompt(request: &DecisionRequest) -> io::Result<Decision> {
    let mut stderr = io::stderr().lock();
    writeln!(stderr)?;
    writeln!(stderr, "{} failed: {}", request.caption, request.message)?;

    loop {
        write!(stderr, "[r]etry, [s]kip, [c]ancel all? ")?;
        stderr.flush()?;

        let mut line = String::new();
        // End of input cancels, a closed terminal cannot answer
        if io::stdin().read_line(&mut line)? == 0 {
            return Ok(Decision::CancelAll);
        }
        let decision = match line.trim().to_ascii_lowercase().as_str() {
            "r" | "retry" => Decision::Retry,
            "s" | "skip" => Decision::Skip,
            "c" | "cancel" => Decision::CancelAll,
            _ => continue,
        };
        if request.options.contains(&decision) {
            return Ok(decision);
        }
    }
}

fn draw_progress(kind: OperationKind, percent: u8) {
    eprint!("\r{kind:<10} {} {percent:>3}%", make_bar(f64::from(percent) / 100.0, 30));
    let _ = io::stderr().flush();
}

fn print_report(report: &ProcessReport, top: usize) {
    println!("{}", report.summary());
    println!(
        " {} processed in {:.2}s",
        format_size(report.bytes_processed),
        report.duration().num_milliseconds() as f64 / 1000.0
    );
    if let Some(cause) = &report.cause {
        println!(" Aborted: {cause}");
    }

    match &report.output {
        OperationOutput::None => {}
        OperationOutput::Recycled { count } => println!(" {count} item(s) moved to the trash"),
        OperationOutput::Archive { path, entries } => {
            println!(" Wrote {entries} entries to {}", path.display());
        }
        OperationOutput::Extracted {
            destination,
            entries,
        } => println!(" Extracted {entries} entries to {}", destination.display()),
        OperationOutput::Duplicates(duplicates) => {
            println!();
            if duplicates.groups.is_empty() {
                println!(" No duplicate files found.");
            } else {
                println!(
                    " Found {} duplicate groups ({} files), {} wasted",
                    duplicates.group_count(),
                    duplicates.files_with_duplicates,
                    format_size(duplicates.total_wasted_space)
                );
                println!();
                for (i, group) in duplicates.groups.iter().take(top).enumerate() {
                    println!(
                        " Group {} ({} files, {} each, {} wasted)",
                        i + 1,
                        group.count(),
                        format_size(group.size),
                        format_size(group.wasted_bytes)
                    );
                    for path in &group.paths {
                        println!("   {}", path.display());
                    }
                }
                let hidden = duplicates.group_count().saturating_sub(top);
                if hidden > 0 {
                    println!(" ... and {hidden} more group(s)");
                }
            }
        }
    }

    if !report.errors.is_empty() {
        println!();
        println!(" {} failure(s):", report.errors.len());
        for entry in &report.errors {
            println!("   {}: {}", entry.path.path().display(), entry.error);
        }
    }
}

/// Create a simple ASCII bar.
fn make_bar(ratio: f64, width: usize) -> String {
    let filled = ((ratio * width as f64).round() as usize).min(width);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(width - filled))
}

fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Parse a size such as "512", "1KB", "1.5M" or "2GB" (binary units).
fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_ascii_uppercase();
    let digits_end = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(digits_end);

    let multiplier: u64 = match unit.trim() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        "T" | "TB" | "TIB" => 1 << 40,
        other => color_eyre::eyre::bail!("Unknown size unit {other:?} in {s:?}"),
    };
    let number: f64 = number
        .parse()
        .with_context(|| format!("Invalid size {s:?}"))?;
    Ok((number * multiplier as f64) as u64)
}
