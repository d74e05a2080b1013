use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chapterscan::config::Config;
use chapterscan::detector;
use chapterscan::models::{RunStatus, ScrapeEvent, ScrapeStage};
use chapterscan::orchestrator::{ScrapeOptions, ScrapeRequest, Scraper};
use chapterscan::url_patterns::UrlPatternManager;

#[derive(Parser)]
#[command(name = "chapterscan")]
#[command(about = "Discover chapter images on manga and comic sites")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "chapterscan.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape one or more chapters starting at a URL
    Scrape {
        /// First chapter URL
        url: String,
        /// Comma separated file types (defaults to the configured ones)
        #[arg(short, long, value_delimiter = ',')]
        types: Vec<String>,
        /// Number of chapters to scrape
        #[arg(long)]
        chapters: Option<u32>,
        /// Consecutive empty batches before a scan gives up (1-3)
        #[arg(long)]
        threshold: Option<u32>,
        /// Check images by loading them instead of HEAD requests
        #[arg(long)]
        no_validate: bool,
        /// Wait between chapter fetches, in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Skip images whose URL contains this text (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// List image URLs discovered on a single page
    Extract {
        url: String,
        /// Append sequential guesses for detected patterns
        #[arg(long)]
        guesses: bool,
    },
    /// Detect sequential filename patterns in a newline separated URL list
    Detect { file: PathBuf },
    /// Manage per-domain chapter URL templates
    Patterns {
        #[command(subcommand)]
        action: PatternAction,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum PatternAction {
    /// List the loaded templates
    Show,
    /// Merge templates from an env-format file into the pattern file
    Import { file: PathBuf },
    /// Write templates in env format to a file or stdout
    Export { file: Option<PathBuf> },
    /// Resolve the URL of chapter `number` relative to `url`
    Resolve { url: String, number: u32 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose)?;

    // Load configuration
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Scrape {
            url,
            types,
            chapters,
            threshold,
            no_validate,
            interval_ms,
            exclude,
            json,
        } => {
            let mut options = ScrapeOptions::from_config(&config.scraper);
            if let Some(chapters) = chapters {
                options.chapter_count = chapters;
            }
            if let Some(threshold) = threshold {
                options.consecutive_miss_threshold = threshold;
            }
            if no_validate {
                options.validate_images = false;
            }
            if let Some(ms) = interval_ms {
                options.fetch_interval = Duration::from_millis(ms);
            }
            if !exclude.is_empty() {
                options = options.with_filter(move |img| !exclude.iter().any(|s| img.url.contains(s.as_str())));
            }
            let file_types = if types.is_empty() { config.scraper.file_types.clone() } else { types };

            run_scrape(&config, ScrapeRequest::new(url, file_types).with_options(options), json).await?;
        }
        Commands::Extract { url, guesses } => {
            run_extract(&config, &url, guesses).await?;
        }
        Commands::Detect { file } => {
            run_detect(&file)?;
        }
        Commands::Patterns { action } => {
            run_patterns(&config, action)?;
        }
        Commands::Config => {
            print!("{}", config.to_toml());
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(format!("chapterscan={}", level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

async fn run_scrape(config: &Config, request: ScrapeRequest, json: bool) -> Result<()> {
    let scraper = Scraper::from_config(config)?;
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current request...");
            ctrl_c.cancel();
        }
    });

    info!("🔍 Scraping {} chapter(s) from {}", request.options.chapter_count, request.root_url);
    let mut handle = scraper.start(request, cancel);

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));

    while let Some(event) = handle.events.recv().await {
        if json {
            pb.suspend(|| -> Result<()> {
                println!("{}", serde_json::to_string(&event)?);
                Ok(())
            })?;
            continue;
        }
        match event {
            ScrapeEvent::Progress(update) => {
                let stage = match update.stage {
                    ScrapeStage::Loading => "📥",
                    ScrapeStage::Scanning => "🔎",
                    ScrapeStage::Analyzing => "🧩",
                    ScrapeStage::Processing => "⚙️",
                };
                pb.set_message(format!(
                    "{} chapter {} ({}/{}) | {} images | {} checked | {}",
                    stage,
                    update.chapter_number,
                    update.chapter_index,
                    update.chapter_count,
                    update.images_found,
                    update.candidates_checked,
                    update.message
                ));
            }
            ScrapeEvent::NewImage(image) => {
                pb.suspend(|| println!("{}", image.url));
            }
            ScrapeEvent::ChapterFinished(result) => {
                pb.suspend(|| match &result.error {
                    None => println!("✅ Chapter {}: {} image(s)", result.chapter_number, result.image_count),
                    Some(e) => println!("❌ Chapter {}: {} [{}]", result.chapter_number, e, e.kind()),
                });
            }
            ScrapeEvent::Finished(summary) => {
                pb.finish_and_clear();
                println!("📚 Run summary:");
                println!("{:<12} {:<10} {:<20} {:<20}", "Status", "Images", "Succeeded", "Failed");
                println!("{}", "-".repeat(62));
                println!(
                    "{:<12} {:<10} {:<20} {:<20}",
                    format!("{:?}", summary.status),
                    summary.images_found,
                    format!("{:?}", summary.successful_chapters),
                    format!("{:?}", summary.failed_chapters)
                );
            }
        }
    }
    pb.finish_and_clear();

    let report = handle.task.await.context("scrape task panicked")??;
    if report.status == RunStatus::Cancelled {
        info!("Run cancelled");
    }
    Ok(())
}

async fn run_extract(config: &Config, url: &str, guesses: bool) -> Result<()> {
    let scraper = Scraper::from_config(config)?;
    let page = scraper.gateway().get(url, &CancellationToken::new()).await?;
    if !page.is_ok() {
        bail!("{} returned HTTP {}", url, page.status);
    }

    let urls = scraper.extractor().extract(&page.body, url, guesses);
    info!("Found {} image URL(s)", urls.len());
    for url in urls {
        println!("{}", url);
    }
    Ok(())
}

fn run_detect(file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let urls: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    let patterns = detector::detect_all(urls.iter().copied());
    if patterns.is_empty() {
        println!("No sequential pattern found in {} URL(s)", urls.len());
        return Ok(());
    }

    println!("{:<60} {:<10} {:<8} {:<8}", "Base path", "Extension", "Width", "Lowest");
    println!("{}", "-".repeat(88));
    for pattern in patterns {
        let lowest = detector::lowest_index(urls.iter().copied(), &pattern)
            .map(|n| n.to_string())
            .unwrap_or_default();
        println!("{:<60} {:<10} {:<8} {:<8}", pattern.base_path, pattern.extension, pattern.pad_width, lowest);
    }
    Ok(())
}

fn pattern_file(config: &Config) -> Result<&str> {
    config
        .patterns
        .file
        .as_deref()
        .context("no pattern file configured (set patterns.file or CHAPTERSCAN__PATTERNS__FILE)")
}

fn load_patterns(config: &Config) -> Result<UrlPatternManager> {
    match config.patterns.file.as_deref() {
        Some(path) if Path::new(path).exists() => Ok(UrlPatternManager::load_file(path)?),
        _ => Ok(UrlPatternManager::new()),
    }
}

fn run_patterns(config: &Config, action: PatternAction) -> Result<()> {
    match action {
        PatternAction::Show => {
            let manager = load_patterns(config)?;
            println!("🗺️ URL patterns ({}):", manager.len());
            println!("{:<30} {:<50}", "Domain", "Template");
            println!("{}", "-".repeat(80));
            for pattern in manager.configs() {
                println!("{:<30} {:<50}", pattern.domain, pattern.url_template);
                for (name, value) in &pattern.variable_bindings {
                    println!("{:<30}   {}={}", "", name, value);
                }
            }
        }
        PatternAction::Import { file } => {
            let target = pattern_file(config)?;
            let mut manager = load_patterns(config)?;
            let text = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let count = manager.import_from_env_format(&text)?;
            manager.save_file(target)?;
            println!("✅ Imported {} pattern(s) into {}", count, target);
        }
        PatternAction::Export { file } => {
            let manager = load_patterns(config)?;
            let text = manager.export_to_env_format();
            match file {
                Some(path) => {
                    std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
                    println!("✅ Exported {} pattern(s) to {}", manager.len(), path.display());
                }
                None => print!("{}", text),
            }
        }
        PatternAction::Resolve { url, number } => {
            let manager = load_patterns(config)?;
            match manager.generate_chapter_url(&url, number) {
                Some(resolved) => println!("{}", resolved),
                None => bail!("no rule produces chapter {} for {}", number, url),
            }
        }
    }
    Ok(())
}
