//! CLI entry point for `mail2rmq`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use mail2rmq::broker::amqp::AmqpConnector;
use mail2rmq::config::{self, Config, Settings};
use mail2rmq::error::Mail2RmqError;
use mail2rmq::lock::InstanceLock;
use mail2rmq::pipeline::{MessageReport, Pipeline};

#[derive(Parser)]
#[command(
    name = "mail2rmq",
    version,
    about = "Route email messages to RabbitMQ queues",
    long_about = "Reads one email message from standard input (or archived messages from \
                  files), classifies it by subject, sender and attachments, and publishes \
                  it to a RabbitMQ queue. Messages that cannot be published are archived."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: $MAIL2RMQ_CONFIG, then the user config dir)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Instance lock name (defaults to the exchange name)
    #[arg(short = 'y', long, global = true, value_name = "NAME")]
    flavor: Option<String>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Read one message from standard input and dispatch it
    Capture,
    /// Dispatch messages stored in files, one message per file
    Read {
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },
    /// Validate the configuration and print the effective settings
    CheckConfig,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Completions { shell } => return cmd_completions(*shell),
        Commands::Manpage => return cmd_manpage(),
        Commands::CheckConfig => return cmd_check_config(cli.config.as_deref()),
        Commands::Capture | Commands::Read { .. } => {}
    }

    // Configuration problems skip dispatch entirely, but are not a failed run.
    let settings = match load_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("mail2rmq: {e}");
            eprintln!("mail2rmq: no message was processed");
            return Ok(());
        }
    };

    let log_level = match cli.verbose {
        0 => settings.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let debug_log = setup_logging(log_level, &settings);

    tracing::info!(
        exchange = %settings.broker.exchange_name,
        exchange_type = %settings.broker.exchange_type,
        valid_queues = ?settings.routes.valid_queues,
        archive_dir = %settings.archive_dir.display(),
        "Starting mail2rmq"
    );

    let connector = AmqpConnector::new(settings.broker.clone());
    let mut pipeline = Pipeline::new(&settings, &connector);
    if let Some(dispatch) = debug_log {
        pipeline = pipeline.with_debug_log(dispatch);
    }

    let flavor = cli
        .flavor
        .unwrap_or_else(|| settings.broker.exchange_name.clone());

    match cli.command {
        Commands::Capture => cmd_capture(&pipeline, &settings, &flavor),
        Commands::Read { files } => cmd_read(&pipeline, &files),
        Commands::CheckConfig | Commands::Completions { .. } | Commands::Manpage => Ok(()),
    }
}

/// Load and validate the configuration.
///
/// A missing file at the default location means "use defaults"; a missing
/// file that was asked for explicitly is an error.
fn load_settings(explicit: Option<&Path>) -> Result<Settings, Mail2RmqError> {
    let explicit_given = explicit.is_some() || std::env::var_os(config::CONFIG_ENV_VAR).is_some();
    let config = match config::config_file_path(explicit) {
        Some(path) => match Config::load(&path) {
            Ok(cfg) => cfg,
            Err(Mail2RmqError::FileNotFound(_)) if !explicit_given => Config::default(),
            Err(e) => return Err(e),
        },
        None => Config::default(),
    };
    config.validate()
}

/// Set up tracing with stderr output and the configured log file.
///
/// Returns the subscriber for the debug log, when a debug route is configured.
fn setup_logging(level: &str, settings: &Settings) -> Option<tracing::Dispatch> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let file_layer = file_appender(&settings.log_file).map(|appender| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(appender)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    let debug = settings.debug.as_ref()?;
    let appender = file_appender(&debug.log_file)?;
    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new("debug"))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(appender),
        );
    Some(tracing::Dispatch::new(subscriber))
}

/// Append-only writer for a log file. The directory was created by
/// [`Config::validate`].
fn file_appender(path: &Path) -> Option<tracing_appender::rolling::RollingFileAppender> {
    let file_name = path.file_name()?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    Some(tracing_appender::rolling::never(dir, file_name))
}

/// Process the message on standard input.
fn cmd_capture(pipeline: &Pipeline<'_>, settings: &Settings, flavor: &str) -> anyhow::Result<()> {
    let _lock = match InstanceLock::acquire(&settings.tmp_dir, flavor) {
        Ok(lock) => lock,
        Err(e @ Mail2RmqError::Locked { .. }) => {
            tracing::warn!(error = %e, "Instance already running, skipping");
            return Ok(());
        }
        Err(e) => {
            tracing::error!(error = %e, "Cannot create instance lock");
            return Ok(());
        }
    };

    match pipeline.process_reader(std::io::stdin().lock()) {
        Ok(report) => log_report(&report),
        Err(e) => tracing::error!(error = %e, "Failed to read message from standard input"),
    }
    Ok(())
}

/// Process message files in argument order.
fn cmd_read(pipeline: &Pipeline<'_>, files: &[PathBuf]) -> anyhow::Result<()> {
    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Dispatching [{bar:40.cyan/blue}] {pos}/{len} files")
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let mut summary = BatchSummary::default();

    for (i, path) in files.iter().enumerate() {
        pb.set_position(i as u64);
        match pipeline.process_file(path) {
            Ok(report) => {
                log_report(&report);
                summary.add(&report);
            }
            Err(e) => {
                pb.println(format!("  {}: {e}", path.display()));
                tracing::error!(path = %path.display(), error = %e, "Skipping file");
                summary.unreadable += 1;
            }
        }
    }
    pb.finish_and_clear();

    summary.print(files.len(), start.elapsed());
    Ok(())
}

/// Validate the configuration and show what would be used.
fn cmd_check_config(explicit: Option<&Path>) -> anyhow::Result<()> {
    let settings = load_settings(explicit)?;
    println!();
    println!("  {:<20} {}:{}", "Broker", settings.broker.host, settings.broker.port);
    println!(
        "  {:<20} {} ({})",
        "Exchange", settings.broker.exchange_name, settings.broker.exchange_type
    );
    println!("  {:<20} {}", "Valid queues", settings.routes.valid_queues.join(", "));
    println!("  {:<20} {}", "File queues", settings.routes.file_queues.join(", "));
    println!("  {:<20} {}", "Address routes", settings.routes.address_queues.len());
    println!("  {:<20} {}", "Attachment types", settings.attach_types.join(", "));
    println!("  {:<20} {}", "Temp dir", settings.tmp_dir.display());
    println!("  {:<20} {}", "Archive dir", settings.archive_dir.display());
    println!("  {:<20} {}", "Log file", settings.log_file.display());
    if let Some(debug) = &settings.debug {
        println!("  {:<20} {} → {}", "Debug route", debug.address, debug.log_file.display());
    }
    println!();
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mail2rmq", &mut std::io::stdout());
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

fn log_report(report: &MessageReport) {
    for outcome in &report.outcomes {
        if let Some(archive_error) = &outcome.archive_error {
            tracing::error!(
                queue = %outcome.queue,
                error = ?outcome.error_detail(),
                archive_error = %archive_error,
                "Message lost"
            );
        }
    }
}

#[derive(Default)]
struct BatchSummary {
    messages: usize,
    delivered: usize,
    archived: usize,
    lost: usize,
    unreadable: usize,
}

impl BatchSummary {
    fn add(&mut self, report: &MessageReport) {
        self.messages += 1;
        self.delivered += report.delivered();
        self.archived += report.archived();
        self.lost += report.lost();
    }

    fn print(&self, files: usize, elapsed: std::time::Duration) {
        println!();
        println!("  Batch complete:");
        println!("  {:<25} {}", "Files", files);
        println!("  {:<25} {}", "Messages processed", self.messages);
        println!("  {:<25} {}", "Published", self.delivered);
        println!("  {:<25} {}", "Archived", self.archived);
        if self.lost > 0 {
            println!("  {:<25} {}", "Neither (see log)", self.lost);
        }
        if self.unreadable > 0 {
            println!("  {:<25} {}", "Unreadable files", self.unreadable);
        }
        println!("  {:<25} {:.2?}", "Elapsed", elapsed);
        println!();
    }
}
