//! CLI binary for formatshift.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionOptions` and writes results.

use anyhow::{bail, Context, Result};
use clap::Parser;
use formatshift::{
    detect_format, output_filename, write_output, ConversionEngine, ConversionOptions,
    ConversionOutput, ConverterError, EngineConfig, ErrorResponse, ImageFormat, JsonFileStore,
    MemoryStore, Payload, ResilientConverter, RetryConfig, Telemetry,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Render an SVG to PNG (written to ./logo.png)
  fmtshift logo.svg --to png

  # Exact size, JPEG quality 90
  fmtshift logo.svg --to jpg --width 200 --height 100 --quality 90 -o out/

  # Wrap a raster into an SVG document, printed on stdout
  fmtshift photo.png --to svg

  # SVG to a standalone HTML page that references the image as a data URI
  fmtshift logo.svg --to html --extra embed=img

  # Remote-backed pair with three attempts
  fmtshift drawing.pdf --to svg --remote-url http://localhost:8080 --retries 2

  # List registered pairs / show aggregated statistics
  fmtshift --list
  fmtshift --stats

ENVIRONMENT VARIABLES:
  FMTSHIFT_REMOTE_URL          Base URL of the remote conversion service
  FMTSHIFT_STATS_PATH          Where aggregated statistics are persisted
                               (default: <tmp>/fmtshift-stats.json)
  FORMATSHIFT_REMOTE_URL       Library-level default for the service URL
  FORMATSHIFT_REMOTE_TIMEOUT   Remote request timeout in seconds (default 300)
  FORMATSHIFT_SECURITY_CHECKS  true/false, scan markup inputs (default true)
  FORMATSHIFT_REPAIR           true/false, repair simple corruption (default true)
  FORMATSHIFT_MAX_FILE_SIZE    Global size ceiling in bytes
"#;

/// Convert images and documents between formats.
#[derive(Parser, Debug)]
#[command(
    name = "fmtshift",
    version,
    about = "Convert images and documents between formats",
    long_about = "Convert files between raster, vector and markup formats. Local converters \
handle SVG rendering and raster embedding; other pairs are forwarded to a remote conversion \
service when one is configured.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input file path.
    #[arg(required_unless_present_any = ["list", "stats", "clear_stats"])]
    input: Option<PathBuf>,

    /// Target format (png, jpg, svg, html, …).
    #[arg(short, long, required_unless_present_any = ["list", "stats", "clear_stats"])]
    to: Option<String>,

    /// Source format. Detected from the file contents or extension when omitted.
    #[arg(short, long)]
    from: Option<String>,

    /// Output file or directory. Text results go to stdout when omitted.
    #[arg(short, long, env = "FMTSHIFT_OUTPUT")]
    output: Option<PathBuf>,

    /// Output width in pixels.
    #[arg(long)]
    width: Option<u32>,

    /// Output height in pixels.
    #[arg(long)]
    height: Option<u32>,

    /// Output quality (1–100).
    #[arg(long, env = "FMTSHIFT_QUALITY", value_parser = clap::value_parser!(u32).range(1..=100))]
    quality: Option<u32>,

    /// Background colour as hex (#fff, #ffffff) or "transparent".
    #[arg(long, env = "FMTSHIFT_BACKGROUND")]
    background: Option<String>,

    /// Rendering DPI (72–2400).
    #[arg(long, env = "FMTSHIFT_DPI", value_parser = clap::value_parser!(u32).range(72..=2400))]
    dpi: Option<u32>,

    /// Page number for multi-page sources.
    #[arg(long)]
    page: Option<u32>,

    /// Preserve the aspect ratio when only one side is given, and letterbox
    /// when both are. Pass `--keep-aspect false` to stretch.
    #[arg(long, env = "FMTSHIFT_KEEP_ASPECT", default_value_t = true, action = clap::ArgAction::Set)]
    keep_aspect: bool,

    /// Converter-specific option as KEY=VALUE (repeatable).
    #[arg(long = "extra", value_name = "KEY=VALUE")]
    extras: Vec<String>,

    /// Skip the security scan of markup inputs.
    #[arg(long, env = "FMTSHIFT_NO_SECURITY_CHECKS")]
    no_security_checks: bool,

    /// Base URL of the remote conversion service.
    #[arg(long, env = "FMTSHIFT_REMOTE_URL")]
    remote_url: Option<String>,

    /// Retry failed conversions this many times.
    #[arg(long, env = "FMTSHIFT_RETRIES", default_value_t = 0)]
    retries: u32,

    /// Output structured JSON instead of the converted file.
    #[arg(long)]
    json: bool,

    /// List registered conversion pairs and exit.
    #[arg(long)]
    list: bool,

    /// Print aggregated conversion statistics and exit.
    #[arg(long)]
    stats: bool,

    /// Clear aggregated statistics and exit.
    #[arg(long)]
    clear_stats: bool,

    /// Aggregated statistics file.
    #[arg(long, env = "FMTSHIFT_STATS_PATH")]
    stats_path: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, env = "FMTSHIFT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FMTSHIFT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "FMTSHIFT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && cli.input.is_some();
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Engine ───────────────────────────────────────────────────────────
    let mut config = EngineConfig::from_env().context("Invalid FORMATSHIFT_* environment")?;
    if cli.no_security_checks {
        config.enable_security_checks = false;
    }
    if let Some(url) = cli.remote_url.clone() {
        config.remote_base_url = Some(url);
    }
    let stats_path = cli
        .stats_path
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("fmtshift-stats.json"));
    let telemetry = Telemetry::new(
        Arc::new(MemoryStore::new()),
        Arc::new(JsonFileStore::new(&stats_path)),
    );
    let engine = ConversionEngine::with_telemetry(config, telemetry);

    // ── Informational modes ──────────────────────────────────────────────
    if cli.list {
        return print_pairs(&engine, cli.json);
    }
    if cli.clear_stats {
        engine.telemetry().clear().context("Failed to clear statistics")?;
        if !cli.quiet {
            eprintln!("{} statistics cleared ({})", green("✔"), stats_path.display());
        }
        return Ok(());
    }
    if cli.stats {
        return print_stats(&engine, cli.json);
    }

    // ── Resolve input ────────────────────────────────────────────────────
    let (Some(input_path), Some(to)) = (cli.input.as_ref(), cli.to.as_deref()) else {
        bail!("an input file and --to are required");
    };
    let to: ImageFormat = to.parse().context("Unknown target format")?;
    let data = tokio::fs::read(input_path)
        .await
        .with_context(|| format!("Failed to read {}", input_path.display()))?;
    let from = resolve_source(cli.from.as_deref(), &data, input_path)?;

    let options = build_options(&cli)?;
    let bar = show_progress.then(|| progress_bar(from, to));
    let options = match &bar {
        Some(bar) => {
            let bar = bar.clone();
            options.with_progress(Arc::new(move |p: f64| {
                bar.set_position((p * 100.0).round() as u64)
            }))
        }
        None => options,
    };

    // ── Run conversion ───────────────────────────────────────────────────
    let result = match engine.converter(from, to).await {
        Ok(converter) => {
            let mut resilient = ResilientConverter::new(converter);
            if cli.retries > 0 {
                let bar = bar.clone();
                resilient = resilient.with_retry(
                    RetryConfig::default()
                        .with_max_attempts(cli.retries + 1)
                        .on_retry(move |attempt, err| {
                            let line = format!("  {} attempt {attempt} failed: {err}", cyan("↻"));
                            match &bar {
                                Some(bar) => bar.println(line),
                                None => eprintln!("{line}"),
                            }
                        }),
                );
            }
            resilient.convert(data, &options).await
        }
        Err(e) => Err(e),
    };
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            report_error(&e, cli.json);
            std::process::exit(1);
        }
    };

    // ── Write result ─────────────────────────────────────────────────────
    let original = input_path.to_string_lossy();
    let target = match &cli.output {
        Some(path) if path.is_dir() => Some(path.join(output_filename(&original, from, to))),
        Some(path) => Some(path.clone()),
        None if cli.json => None,
        None => match output.payload {
            Payload::Text(_) => None,
            Payload::Binary(_) => Some(PathBuf::from(output_filename(&original, from, to))),
        },
    };

    if let Some(path) = &target {
        write_output(&output, path)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if target.is_none() {
        if let Payload::Text(text) = &output.payload {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(text.as_bytes())
                .context("Failed to write to stdout")?;
            if !text.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
        }
    }

    if !cli.quiet && !cli.json {
        print_summary(&output, target.as_deref());
    }
    Ok(())
}

/// Explicit `--from`, else magic bytes, else the file extension.
fn resolve_source(explicit: Option<&str>, data: &[u8], path: &Path) -> Result<ImageFormat> {
    if let Some(tag) = explicit {
        return tag.parse().context("Unknown source format");
    }
    if let Some(format) = detect_format(data) {
        return Ok(format);
    }
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(|e| e.parse().ok())
        .with_context(|| {
            format!(
                "Could not detect the format of {}; pass --from",
                path.display()
            )
        })
}

fn build_options(cli: &Cli) -> Result<ConversionOptions> {
    let mut options = ConversionOptions::default().preserve_aspect_ratio(cli.keep_aspect);
    if let Some(q) = cli.quality {
        options = options.with_quality(q);
    }
    if let Some(w) = cli.width {
        options = options.with_width(w);
    }
    if let Some(h) = cli.height {
        options = options.with_height(h);
    }
    if let Some(bg) = &cli.background {
        options = options.with_background(bg.clone());
    }
    if let Some(dpi) = cli.dpi {
        options = options.with_dpi(dpi);
    }
    if let Some(page) = cli.page {
        options = options.with_page(page);
    }
    for kv in &cli.extras {
        let Some((k, v)) = kv.split_once('=') else {
            bail!("--extra expects KEY=VALUE, got {kv:?}");
        };
        options = options.with_extra(k.trim(), v.trim());
    }
    Ok(options)
}

fn progress_bar(from: ImageFormat, to: ImageFormat) -> ProgressBar {
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}%  ⏱ {elapsed_precise}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
    bar.set_style(style);
    bar.set_prefix(format!("{} → {}", from.as_str().to_uppercase(), to.as_str().to_uppercase()));
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn report_error(err: &ConverterError, json: bool) {
    if json {
        let body = ErrorResponse::detailed(err);
        match serde_json::to_string_pretty(&body) {
            Ok(s) => println!("{s}"),
            Err(_) => eprintln!("{err}"),
        }
        return;
    }
    eprintln!("{} {}  {}", red("✘"), bold(&err.to_string()), dim(err.code()));
    if let Some(hint) = err.suggestion() {
        eprintln!("   {}", dim(hint));
    }
}

fn print_summary(output: &ConversionOutput, path: Option<&Path>) {
    let meta = &output.metadata;
    let dims = match (meta.width, meta.height) {
        (Some(w), Some(h)) => format!("{w}x{h}  "),
        _ => String::new(),
    };
    eprintln!(
        "{}  {}{} → {} bytes  {}ms{}",
        green("✔"),
        dims,
        meta.original_size,
        meta.size,
        meta.duration_ms,
        path.map(|p| format!("  →  {}", bold(&p.display().to_string())))
            .unwrap_or_default(),
    );
    if let Some(warning) = &meta.warning {
        eprintln!("   {} {}", cyan("⚠"), warning);
    }
}

fn print_pairs(engine: &ConversionEngine, json: bool) -> Result<()> {
    let descriptors = engine.registry().list_descriptors();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&descriptors).context("Failed to serialise pairs")?
        );
        return Ok(());
    }
    for d in descriptors {
        println!(
            "{:<18} {:<7} {}",
            d.name,
            if d.is_client_side { "local" } else { "remote" },
            dim(&d.description)
        );
    }
    Ok(())
}

fn print_stats(engine: &ConversionEngine, json: bool) -> Result<()> {
    let stats = engine.telemetry().stats().context("Failed to read statistics")?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&stats).context("Failed to serialise statistics")?
        );
        return Ok(());
    }
    if stats.converters.is_empty() && stats.libraries.is_empty() {
        println!("No conversions recorded yet.");
        return Ok(());
    }
    println!("{}", bold("Conversions"));
    for (pair, s) in &stats.converters {
        let avg = if s.total > 0 { s.total_duration_ms / s.total } else { 0 };
        println!(
            "  {:<18} {:>5} total  {} ok  {} failed  {}",
            pair,
            s.total,
            green(&s.successful.to_string()),
            red(&s.failed.to_string()),
            dim(&format!("avg {avg}ms")),
        );
    }
    if !stats.libraries.is_empty() {
        println!("{}", bold("Dependency loads"));
        for (name, s) in &stats.libraries {
            println!(
                "  {:<24} {:>4} loads  {} failed  {}",
                name,
                s.loads,
                red(&s.failed.to_string()),
                dim(&format!("avg {}ms", s.avg_load_time_ms)),
            );
        }
    }
    Ok(())
}
