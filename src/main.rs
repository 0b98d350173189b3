//! CLI entry point for `embedmail`.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{CommandFactory, Parser, Subcommand};

use embedmail::config::{EmbedOptions, MissingPolicy};
use embedmail::embed::{Embedder, RunSummary};

/// Make email messages self-contained by embedding their remote media.
#[derive(Parser)]
#[command(name = "embedmail", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Messages to process (default: every *.eml in the current directory)
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Keep GIFs as images instead of converting large ones to video
    #[arg(long)]
    retain_gif: bool,

    /// Directory for downloaded media
    #[arg(long, value_name = "DIR")]
    media_dir: Option<PathBuf>,

    /// Concurrent downloads
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,

    /// Per-download timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Continue with the next file after a fatal error
    #[arg(long)]
    keep_going: bool,

    /// Mark references that could not be embedded with a data-embed-missing attribute
    #[arg(long)]
    mark_missing: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = embedmail::config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Some(Commands::Completions { shell }) => cmd_completions(shell),
        Some(Commands::Manpage) => cmd_manpage(),
        None => {
            let mut options = EmbedOptions::from_config(&config);
            apply_overrides(&cli, &mut options);
            cmd_embed(&cli.files, options, cli.json).await
        }
    }
}

/// Apply command-line flags on top of the configuration file.
fn apply_overrides(cli: &Cli, options: &mut EmbedOptions) {
    if cli.retain_gif {
        options.transcode.enabled = false;
    }
    if let Some(dir) = &cli.media_dir {
        options.media_dir = dir.clone();
    }
    if let Some(jobs) = cli.jobs {
        options.concurrency = jobs.max(1);
    }
    if let Some(secs) = cli.timeout {
        options.fetch_timeout = Duration::from_secs(secs);
    }
    if cli.keep_going {
        options.keep_going = true;
    }
    if cli.mark_missing {
        options.on_missing = MissingPolicy::Mark;
    }
    options.progress_bar = !cli.json && cli.verbose == 0 && std::io::stderr().is_terminal();
}

fn setup_logging(level: &str, config: &embedmail::config::Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = embedmail::config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "embedmail.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "embedmail", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Embed the media of every input file.
async fn cmd_embed(files: &[PathBuf], options: EmbedOptions, json: bool) -> anyhow::Result<()> {
    let embedder = Embedder::new(options)?;

    let start = Instant::now();
    let summary = embedder.run(files).await?;
    let elapsed = start.elapsed();

    if json {
        print_summary_json(&summary, elapsed)?;
    } else {
        print_summary_table(&summary, elapsed);
    }

    if summary.has_failures() {
        anyhow::bail!("{} file(s) could not be processed", summary.failed.len());
    }
    Ok(())
}

fn print_summary_table(summary: &RunSummary, elapsed: Duration) {
    use humansize::{format_size, BINARY};

    for report in &summary.processed {
        let size = std::fs::metadata(&report.output)
            .map(|m| m.len())
            .unwrap_or(0);
        println!(
            "  {:<40} {:>3} embedded, {:>3} left  ({})",
            report.output.display(),
            report.stats.rewritten,
            report.stats.missing,
            format_size(size, BINARY)
        );
    }
    for skipped in &summary.skipped {
        println!("  {:<40} skipped ({:?})", skipped.input.display(), skipped.reason);
    }
    for failed in &summary.failed {
        println!("  {:<40} FAILED: {}", failed.input.display(), failed.error);
    }

    let totals = summary.totals();
    println!();
    println!("  {:<20} {}", "Processed", summary.processed.len());
    println!("  {:<20} {}", "Skipped", summary.skipped.len());
    println!("  {:<20} {}", "Failed", summary.failed.len());
    println!("  {:<20} {}", "Remote URLs", totals.urls);
    println!(
        "  {:<20} {} fetched, {} reused, {} failed",
        "Downloads", totals.fetched, totals.reused, totals.failed
    );
    println!(
        "  {:<20} {} inline, {} unreachable, {} unsupported",
        "Not fetched", totals.inline, totals.unreachable, totals.unsupported
    );
    println!("  {:<20} {}", "Attached", totals.attached);
    println!("  {:<20} {}", "GIFs converted", totals.transcoded);
    println!("  {:<20} {:.2?}", "Elapsed", elapsed);
}

fn print_summary_json(summary: &RunSummary, elapsed: Duration) -> anyhow::Result<()> {
    let out = serde_json::json!({
        "summary": summary,
        "totals": summary.totals(),
        "elapsed_ms": elapsed.as_millis() as u64,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
