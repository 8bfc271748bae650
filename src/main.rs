//! siphon - remote file-share mirror and relay.
//!
//! Resolves a share, mirrors its tree locally, downloads every file with
//! resume support, and optionally drains the result into a sink.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use reqwest::header::HeaderMap;
use tracing_subscriber::EnvFilter;

use siphon::batch::{run_transfers, BatchReport};
use siphon::config::FetchConfig;
use siphon::progress;
use siphon::providers::cloudmail::CloudMailClient;
use siphon::providers::gofile::{self, GoFileClient};
use siphon::providers::{detect_provider, Provider, Resolution};
use siphon::sink::{
    drain_files, drain_tree, ArtifactSink, DrainPolicy, DrainReport, OutboxSink, WebhookSink,
};
use siphon::transfer::HttpClient;

#[derive(Parser)]
#[command(name = "siphon")]
#[command(version)]
#[command(about = "Mirror GoFile / Cloud Mail.ru shares locally and relay them to a sink")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Args)]
struct ShareArgs {
    /// Share URL, or path to a text file of `<url> [password]` lines
    target: String,

    /// Password for protected shares
    #[arg(short, long)]
    password: Option<String>,

    /// Download root directory (defaults to the current directory)
    #[arg(short, long, env = "SIPHON_DOWNLOAD_DIR")]
    output: Option<PathBuf>,

    /// Maximum concurrent transfers (defaults to CPU thread count)
    #[arg(short, long)]
    workers: Option<usize>,

    /// GoFile account token (a guest account is created when omitted)
    #[arg(long, env = "GOFILE_TOKEN")]
    gofile_token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a share into a local directory
    Fetch {
        #[command(flatten)]
        share: ShareArgs,
    },

    /// Download a share, hand every file to a sink, then clean up
    Relay {
        #[command(flatten)]
        share: ShareArgs,

        /// Copy finished files into this directory
        #[arg(long, conflicts_with = "webhook")]
        outbox: Option<PathBuf>,

        /// POST finished files to this endpoint
        #[arg(long)]
        webhook: Option<String>,

        /// Destination identifier forwarded with every artifact
        #[arg(long, default_value = "")]
        dest: String,

        /// Remove the mirrored tree even when some artifacts failed to
        /// deliver
        #[arg(long)]
        discard_failed: bool,
    },

    /// Resolve a share and print its manifest without downloading
    Info {
        #[command(flatten)]
        share: ShareArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive(if cli.verbose {
                "siphon=debug".parse()?
            } else {
                "siphon=warn".parse()?
            }))
            .init();
    }

    match cli.command {
        Commands::Fetch { share } => {
            let (config, http) = setup(&share)?;
            for job in share_jobs(&share)? {
                if let Some(fetched) = fetch_share(&http, &config, &job).await? {
                    print_transfer_summary(&fetched.report);
                }
            }
        }

        Commands::Relay {
            share,
            outbox,
            webhook,
            dest,
            discard_failed,
        } => {
            let sink_choice = match (outbox, webhook) {
                (Some(dir), None) => SinkChoice::Outbox(dir),
                (None, Some(url)) => SinkChoice::Webhook(url),
                (None, None) => bail!("relay needs --outbox or --webhook"),
                (Some(_), Some(_)) => bail!("choose either --outbox or --webhook, not both"),
            };
            let policy = if discard_failed {
                DrainPolicy::RemoveAlways
            } else {
                DrainPolicy::KeepOnFailure
            };

            let (config, http) = setup(&share)?;
            for job in share_jobs(&share)? {
                let Some(fetched) = fetch_share(&http, &config, &job).await? else {
                    continue;
                };
                print_transfer_summary(&fetched.report);

                let report = match &sink_choice {
                    SinkChoice::Outbox(dir) => {
                        let sink = OutboxSink::new(dir.clone());
                        deliver_tree(&fetched.resolution, &dest, &sink, policy).await
                    }
                    SinkChoice::Webhook(url) => {
                        let sink = WebhookSink::new(http.inner().clone(), url.clone());
                        deliver_tree(&fetched.resolution, &dest, &sink, policy).await
                    }
                };
                print_drain_summary(&report);
            }
        }

        Commands::Info { share } => {
            let (config, http) = setup(&share)?;
            for job in share_jobs(&share)? {
                let Some((resolution, _headers)) = resolve_share(&http, &config, &job).await?
                else {
                    continue;
                };
                println!("\n=== Manifest for {} ===", job.url);
                for entry in resolution.manifest.entries() {
                    let size = entry
                        .expected_size
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "?".to_string());
                    println!(
                        "{:>4}  {:>12}  {}",
                        entry.index,
                        size,
                        entry.final_path().display()
                    );
                }
                println!("Total: {} file(s)", resolution.manifest.len());
            }
        }
    }

    Ok(())
}

enum SinkChoice {
    Outbox(PathBuf),
    Webhook(String),
}

/// One URL to resolve, with its password.
struct ShareJob {
    url: String,
    password: Option<String>,
}

/// The target is either a single URL or a local text file of
/// `<url> [password]` lines.
fn share_jobs(args: &ShareArgs) -> Result<Vec<ShareJob>> {
    let path = Path::new(&args.target);
    if !path.is_file() {
        return Ok(vec![ShareJob {
            url: args.target.clone(),
            password: args.password.clone(),
        }]);
    }

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read link file {}", path.display()))?;

    let mut jobs = Vec::new();
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        let Some(url) = parts.next() else { continue };
        let password = parts
            .next()
            .map(str::to_string)
            .or_else(|| args.password.clone());
        jobs.push(ShareJob {
            url: url.to_string(),
            password,
        });
    }

    if jobs.is_empty() {
        bail!("no links found in {}", path.display());
    }
    Ok(jobs)
}

fn setup(share: &ShareArgs) -> Result<(FetchConfig, HttpClient)> {
    let thread_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    let config = FetchConfig {
        root_dir: share.output.clone().unwrap_or_else(|| PathBuf::from(".")),
        max_workers: share.workers.unwrap_or(thread_count),
        gofile_token: share.gofile_token.clone(),
    };
    config.validate()?;

    let http = HttpClient::new()?;
    Ok((config, http))
}

struct Fetched {
    resolution: Resolution,
    report: BatchReport,
}

/// Resolve and download one share. `Ok(None)` means the share was skipped
/// (unsupported provider, bad URL, or a resolution failure that should
/// not abort the remaining jobs).
async fn fetch_share(
    http: &HttpClient,
    config: &FetchConfig,
    job: &ShareJob,
) -> Result<Option<Fetched>> {
    let Some((resolution, headers)) = resolve_share(http, config, job).await? else {
        return Ok(None);
    };

    if let Some(dir) = &resolution.content_dir {
        println!("Mirroring into {}", dir.display());
    }
    println!(
        "Downloading {} file(s) with {} worker(s)...",
        resolution.manifest.len(),
        config.max_workers
    );

    let (tx, rx) = progress::channel();
    let renderer = progress::spawn_renderer(resolution.manifest.len() as u64, rx);
    let report = run_transfers(http, &headers, &resolution.manifest, config.max_workers, tx).await;
    let _ = renderer.await;
    println!("Done.");

    Ok(Some(Fetched { resolution, report }))
}

/// Classify the URL and run the matching provider's resolver.
///
/// Credential bootstrap failure is the one fatal error; everything else
/// is reported and skipped so sibling jobs keep going.
async fn resolve_share(
    http: &HttpClient,
    config: &FetchConfig,
    job: &ShareJob,
) -> Result<Option<(Resolution, HeaderMap)>> {
    println!("Resolving {}...", job.url);

    match detect_provider(&job.url) {
        Some(Provider::GoFile) => {
            let Some(container) = gofile::container_id(&job.url) else {
                eprintln!("URL does not look like a GoFile share: {}", job.url);
                return Ok(None);
            };

            let client = GoFileClient::connect(http, config.gofile_token.clone())
                .await
                .context("could not obtain GoFile credentials")?;

            match client
                .resolve(&container, job.password.as_deref(), &config.root_dir)
                .await
            {
                Ok(resolution) => Ok(Some((resolution, client.download_headers()?))),
                Err(err) => {
                    eprintln!("resolution failed for {}: {}", job.url, err);
                    Ok(None)
                }
            }
        }

        Some(Provider::CloudMail) => {
            let client = CloudMailClient::new(http);
            match client.resolve(&job.url, &config.root_dir).await {
                Ok(resolution) => Ok(Some((resolution, client.download_headers()?))),
                Err(err) => {
                    eprintln!("resolution failed for {}: {}", job.url, err);
                    Ok(None)
                }
            }
        }

        None => {
            eprintln!(
                "Unsupported provider: {} (GoFile and Cloud Mail.ru links are supported)",
                job.url
            );
            Ok(None)
        }
    }
}

/// Drain the mirrored tree, or the lone file when the share had no
/// wrapper directory.
async fn deliver_tree<S: ArtifactSink>(
    resolution: &Resolution,
    dest: &str,
    sink: &S,
    policy: DrainPolicy,
) -> DrainReport {
    match &resolution.content_dir {
        Some(root) => drain_tree(root, dest, sink, policy).await,
        None => {
            let files: Vec<PathBuf> = resolution
                .manifest
                .entries()
                .iter()
                .map(|entry| entry.final_path())
                .collect();
            drain_files(&files, dest, sink).await
        }
    }
}

fn print_transfer_summary(report: &BatchReport) {
    println!("\n=== Transfer Summary ===");
    println!("Completed: {}", report.completed.len());
    println!("Skipped:   {}", report.skipped.len());
    println!("Failed:    {}", report.failed.len());
    for failure in &report.failed {
        println!("  {} - {}", failure.filename, failure.error);
    }
}

fn print_drain_summary(report: &DrainReport) {
    println!("\n=== Relay Summary ===");
    println!("Delivered: {}", report.delivered);
    println!("Kept:      {}", report.failed.len());
    for (path, err) in &report.failed {
        println!("  {} - {}", path.display(), err);
    }
    if report.root_removed {
        println!("Mirrored tree removed.");
    }
}
