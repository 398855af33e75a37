//! Imgedge main entry point
//!
//! This is the command-line interface for the Imgedge image pipeline.

use clap::{Parser, Subcommand};
use imgedge::config::{load_config_with_hash, Config};
use imgedge::crawler::CrawlReport;
use imgedge::image::{Fit, FormatNegotiator, ImageRef};
use imgedge::materialize::Materialization;
use imgedge::output;
use imgedge::service::Pipeline;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Imgedge: an edge image-optimization pipeline
///
/// Imgedge crawls pages and sitemaps for images, materializes optimized
/// AVIF/WebP/JPEG variants through a transform service and caches them in
/// a blob store so that no variant is ever produced twice.
#[derive(Parser, Debug)]
#[command(name = "imgedge")]
#[command(version)]
#[command(about = "An edge image-optimization pipeline", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    /// Validate config and show what would be done without doing it
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a crawl of a page or sitemap and wait for it to finish
    Crawl {
        /// Root page or sitemap (index) URL
        root_url: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resume an interrupted, failed or cancelled job
    Resume {
        /// Job to resume; defaults to the latest unfinished job
        job_id: Option<i64>,

        #[arg(long)]
        json: bool,
    },

    /// Show a job's status
    Status {
        job_id: i64,

        #[arg(long)]
        json: bool,
    },

    /// List all jobs, newest first
    Jobs {
        #[arg(long)]
        json: bool,
    },

    /// Request cancellation of a running job
    Cancel { job_id: i64 },

    /// Materialize a single image the way a client would be served
    Materialize {
        /// Absolute URL of the source image
        source_url: String,

        /// Client Accept header used for format negotiation
        #[arg(long, default_value = "image/avif,image/webp,*/*")]
        accept: String,

        /// Client User-Agent, consulted when Accept names no image type
        #[arg(long)]
        user_agent: Option<String>,

        #[arg(long)]
        width: Option<u32>,

        #[arg(long)]
        height: Option<u32>,

        /// scale-down, contain, cover, crop or pad
        #[arg(long)]
        fit: Option<String>,

        #[arg(long)]
        quality: Option<u8>,

        /// Write the bytes to this file
        #[arg(long, short)]
        out: Option<PathBuf>,
    },

    /// List what the blob store holds
    Inventory {
        /// Only list keys under this prefix
        #[arg(long, default_value = "")]
        prefix: String,

        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (cfg, hash)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if cli.dry_run {
        handle_dry_run(&config, &cli.command);
        return Ok(());
    }

    let pipeline = Pipeline::from_config(config, config_hash)?;

    match cli.command {
        Command::Crawl { root_url, json } => {
            let job_id = pipeline.create_job(&root_url)?;
            let report = drive(&pipeline, job_id).await?;
            print_report(&report, json)?;
        }
        Command::Resume { job_id, json } => {
            let job_id = match job_id {
                Some(id) => id,
                None => pipeline
                    .state()
                    .latest_unfinished()?
                    .ok_or("No unfinished job to resume")?,
            };
            let report = drive(&pipeline, job_id).await?;
            print_report(&report, json)?;
        }
        Command::Status { job_id, json } => {
            let summary = pipeline.state().summary(job_id)?;
            if json {
                println!("{}", output::to_json(&summary)?);
            } else {
                output::print_summary(&summary);
            }
        }
        Command::Jobs { json } => {
            let jobs = pipeline.state().list()?;
            if json {
                println!("{}", output::to_json(&jobs)?);
            } else {
                output::print_jobs(&jobs);
            }
        }
        Command::Cancel { job_id } => {
            pipeline.state().request_cancel(job_id)?;
            println!("Cancellation requested for job {}", job_id);
        }
        Command::Materialize {
            source_url,
            accept,
            user_agent,
            width,
            height,
            fit,
            quality,
            out,
        } => {
            let image = ImageRef::parse(&source_url)?;
            let format = FormatNegotiator::negotiate_request(Some(&accept), user_agent.as_deref());
            let mut spec = pipeline.config().transform.spec_for(format);
            spec.width = width;
            spec.height = height;
            if let Some(fit) = fit {
                spec.fit = Fit::from_name(&fit).ok_or_else(|| format!("Unknown fit: {}", fit))?;
            }
            if let Some(quality) = quality {
                spec.quality = quality;
            }

            match pipeline.materialize(image, spec).await?? {
                Materialization::Ready(image) => {
                    println!("Key:          {}", image.key);
                    println!("Outcome:      {}", image.outcome.as_str());
                    println!("Content-Type: {}", image.content_type);
                    println!("Size:         {} bytes", image.bytes.len());
                    if let Some(url) = pipeline.materializer().public_url(&image.key) {
                        println!("Public URL:   {}", url);
                    }
                    if let Some(path) = out {
                        tokio::fs::write(&path, &image.bytes).await?;
                        println!("Written to:   {}", path.display());
                    }
                }
                Materialization::Fallback { source_url, cause } => {
                    tracing::error!(source_url = %source_url, "Original unavailable");
                    return Err(cause.into());
                }
            }
        }
        Command::Inventory { prefix, json } => {
            let inventory =
                output::load_inventory(pipeline.materializer().store().as_ref(), &prefix).await?;
            if json {
                println!("{}", output::to_json(&inventory)?);
            } else {
                output::print_inventory(&inventory);
            }
        }
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("imgedge=info,warn"),
            1 => EnvFilter::new("imgedge=debug,info"),
            2 => EnvFilter::new("imgedge=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Runs a job in the foreground; Ctrl-C requests cancellation
async fn drive(pipeline: &Pipeline, job_id: i64) -> Result<CrawlReport, Box<dyn std::error::Error>> {
    let mut run = pipeline.crawler().spawn(job_id);

    let report = tokio::select! {
        result = &mut run => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(job_id, "Interrupted; cancelling after the current batch");
            pipeline.state().request_cancel(job_id)?;
            run.await?
        }
    };

    Ok(report?)
}

fn print_report(report: &CrawlReport, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", output::to_json(report)?);
    } else {
        output::print_report(report);
    }
    Ok(())
}

/// Handles the --dry-run mode: shows what the command would do
fn handle_dry_run(config: &Config, command: &Command) {
    println!("=== Imgedge Dry Run ===\n");

    println!("Origin:");
    println!("  User agent: {}", config.origin.user_agent());
    println!("  Timeout: {}ms", config.origin.timeout_ms);

    println!("\nTransform Service:");
    println!("  Endpoint: {}", config.transform.endpoint);
    println!("  Variants ({}):", config.transform.variants.len());
    for spec in config.transform.variant_specs() {
        println!(
            "    - {} {}x{} {} q{}",
            spec.format,
            spec.width.map_or("auto".to_string(), |w| w.to_string()),
            spec.height.map_or("auto".to_string(), |h| h.to_string()),
            spec.fit,
            spec.quality
        );
    }

    println!("\nStore:");
    println!("  Backend: {:?}", config.store.backend);
    println!("  Root: {}", config.store.root);
    if let Some(public) = &config.store.public_url {
        println!("  Public URL: {}", public);
    }

    println!("\nCrawler:");
    println!("  Max concurrent tasks: {}", config.scheduler.max_concurrent);
    println!("  Batch size: {}", config.crawler.batch_size);
    println!("  Batch delay: {}ms", config.crawler.batch_delay_ms);
    println!("  Cancel mode: {:?}", config.crawler.cancel_mode);
    println!("  Database: {}", config.crawler.database_path);

    println!("\n✓ Configuration is valid");
    match command {
        Command::Crawl { root_url, .. } => println!(
            "✓ Would crawl {} producing {} variants per image",
            root_url,
            config.transform.variants.len()
        ),
        Command::Resume { job_id, .. } => match job_id {
            Some(id) => println!("✓ Would resume job {}", id),
            None => println!("✓ Would resume the latest unfinished job"),
        },
        Command::Materialize { source_url, accept, .. } => println!(
            "✓ Would materialize {} as {}",
            source_url,
            FormatNegotiator::negotiate(accept)
        ),
        _ => println!("✓ Command has no side effects"),
    }
}
