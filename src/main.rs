//! CLI entry point for `mailpdf`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use mailpdf::config::Config;
use mailpdf::convert::{ConvertOptions, ConvertRequest, Converter};
use mailpdf::error::ConvertError;
use mailpdf::model::Message;
use mailpdf::parser::Normalizer;

#[derive(Parser)]
#[command(
    name = "mailpdf",
    version,
    about = "Render .eml and .msg messages into archival PDF documents"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert messages to PDF
    Convert {
        /// Input .eml / .msg files
        #[arg(required = true, value_name = "FILES")]
        files: Vec<PathBuf>,
        /// Output file (single input) or directory (several inputs)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Append PDF and image attachments as extra pages
        #[arg(short, long)]
        merge_attachments: bool,
        /// Report failures as JSON lines on stdout
        #[arg(long)]
        json_errors: bool,
    },
    /// Show the normalized message record
    Inspect {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Rewrite a message (typically Outlook .msg) as a MIME .eml file
    ToEml {
        /// Input .msg / .eml file
        input: PathBuf,
        /// Output .eml file
        output: PathBuf,
    },
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

    // Load configuration
    let config = mailpdf::config::load_config();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Convert {
            files,
            output,
            merge_attachments,
            json_errors,
        } => cmd_convert(
            &config,
            &files,
            output.as_deref(),
            ConvertOptions { merge_attachments },
            json_errors,
        ),
        Commands::Inspect { file, json } => cmd_inspect(&config, &file, json),
        Commands::ToEml { input, output } => cmd_to_eml(&config, &input, &output),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_dir = mailpdf::config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailpdf.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailpdf", &mut std::io::stdout());
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

/// Where the PDF for `input` goes.
fn output_path(input: &Path, output: Option<&Path>, batch: bool) -> PathBuf {
    let file_name = PathBuf::from(input.file_name().unwrap_or_default()).with_extension("pdf");
    match output {
        Some(out) if batch || out.is_dir() => out.join(file_name),
        Some(out) => out.to_path_buf(),
        None => input.with_extension("pdf"),
    }
}

/// Convert every input; keep going past failures and report them at the end.
fn cmd_convert(
    config: &Config,
    files: &[PathBuf],
    output: Option<&Path>,
    options: ConvertOptions,
    json_errors: bool,
) -> anyhow::Result<()> {
    let converter = Converter::from_config(config).context("initializing renderer")?;
    let batch = files.len() > 1;
    if let (true, Some(dir)) = (batch, output) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
    }

    let pb = if batch {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} Converting [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let start = Instant::now();
    let mut failures = 0usize;
    for input in files {
        pb.set_message(input.file_name().unwrap_or_default().to_string_lossy().into_owned());
        let target = output_path(input, output, batch);
        match convert_one(&converter, input, &target, options) {
            Ok(size) => {
                pb.suspend(|| {
                    if !batch {
                        use humansize::{format_size, BINARY};
                        println!("  {} -> {} ({})", input.display(), target.display(), format_size(size, BINARY));
                    }
                });
            }
            Err(e) => {
                failures += 1;
                pb.suspend(|| report_failure(input, &e, json_errors));
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    if batch {
        println!(
            "  Converted {} of {} file(s) in {:.2?}",
            files.len() - failures,
            files.len(),
            start.elapsed()
        );
    }
    if failures > 0 {
        anyhow::bail!("{failures} of {} conversion(s) failed", files.len());
    }
    Ok(())
}

fn convert_one(
    converter: &Converter,
    input: &Path,
    target: &Path,
    options: ConvertOptions,
) -> Result<u64, ConvertError> {
    let bytes = std::fs::read(input).map_err(|e| ConvertError::io(input, e))?;
    let filename = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let pdf = converter.convert(&ConvertRequest::new(bytes, filename, options))?;
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConvertError::io(parent, e))?;
    }
    std::fs::write(target, &pdf).map_err(|e| ConvertError::io(target, e))?;
    Ok(pdf.len() as u64)
}

fn report_failure(input: &Path, error: &ConvertError, json: bool) {
    if json {
        let payload = error.payload();
        let line = serde_json::json!({
            "file": input.to_string_lossy(),
            "kind": payload.kind,
            "detail": payload.detail,
        });
        println!("{line}");
    } else {
        eprintln!("  {}: [{}] {}", input.display(), error.kind(), error);
    }
}

/// Print the normalized record of one message.
fn cmd_inspect(config: &Config, path: &Path, json: bool) -> anyhow::Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (message, source) = Normalizer::from_config(&config.msg).normalize_with_source(&bytes, &filename)?;

    if json {
        let out = serde_json::json!({
            "meta": {
                "source": source,
                "has_html": message.body_html.is_some(),
                "attachment_count": message.attachments.len(),
            },
            "message": message,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_message_table(path, &message);
    }
    Ok(())
}

/// Normalize one message and write it back out as MIME.
fn cmd_to_eml(config: &Config, input: &Path, output: &Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let filename = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let message = Normalizer::from_config(&config.msg).normalize(&bytes, &filename)?;
    let eml = mailpdf::eml::to_eml(&message);
    std::fs::write(output, &eml).with_context(|| format!("writing {}", output.display()))?;

    use humansize::{format_size, BINARY};
    println!("  {} -> {} ({})", input.display(), output.display(), format_size(eml.len(), BINARY));
    Ok(())
}

/// Print a message record in a human-readable table.
fn print_message_table(path: &Path, message: &Message) {
    use humansize::{format_size, BINARY};

    let body_size = |body: &Option<String>| {
        body.as_ref()
            .map(|b| format_size(b.len(), BINARY))
            .unwrap_or_else(|| "-".to_string())
    };

    println!();
    println!("  {:<12} {}", "File", path.display());
    println!("  {:<12} {}", "Subject", message.subject);
    for (label, value) in [("From", &message.from), ("To", &message.to), ("Cc", &message.cc)] {
        if !value.is_empty() {
            println!("  {label:<12} {value}");
        }
    }
    if let Some(ref date) = message.date {
        println!("  {:<12} {}", "Date", date);
    }
    println!("  {:<12} {}", "HTML body", body_size(&message.body_html));
    println!("  {:<12} {}", "Text body", body_size(&message.body_text));

    println!();
    println!("  {} attachment(s)", message.attachments.len());
    if message.attachments.is_empty() {
        println!();
        return;
    }
    println!();
    println!(
        "  {:<4} {:<32} {:<24} {:<20} {:<6} {:>8}",
        "#", "Filename", "Type", "Content-ID", "Inline", "Size"
    );
    println!("  {}", "-".repeat(99));
    for (i, att) in message.attachments.iter().enumerate() {
        let name: String = att.filename.chars().take(31).collect();
        let ctype: String = att.content_type.chars().take(23).collect();
        let cid: String = att.content_id.as_deref().unwrap_or("").chars().take(19).collect();
        println!(
            "  {:<4} {:<32} {:<24} {:<20} {:<6} {:>8}",
            i + 1,
            name,
            ctype,
            cid,
            if att.is_inline { "yes" } else { "no" },
            format_size(att.size(), BINARY)
        );
    }
    println!();
}
