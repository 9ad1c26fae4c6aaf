#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![allow(clippy::multiple_crate_versions)]

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use m3u::{DEFAULT_EPG_URL, DEFAULT_LOGO_URL, DEFAULT_TVG_ID, PlaylistStyle, render, to_document};
use playlist::{parse_playlist, streams};
use probe::{HttpProber, ProbeConfig};
use scheduler::{Validation, validate_streams};
use tracing::{debug, info};
use util::{init_http_client, init_probe_client, warn_ulimit};

pub mod m3u;
pub mod playlist;
pub mod probe;
pub mod scheduler;
pub mod source;
pub mod util;

/// Turns a `name,url` channel list into an M3U playlist of streams that actually play
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// URL or file path of the channel list
    source: String,

    /// Where the playlist is written
    #[arg(short, long, default_value = "playlist.m3u")]
    output: PathBuf,

    /// The amount of streams probed at once
    #[arg(short, long, default_value_t = 20)]
    parallelism: usize,

    /// Timeout of each probe request, in seconds
    #[arg(short, long, default_value_t = 8)]
    timeout: u64,

    /// Attempts per stream when the network fails
    #[arg(short, long, default_value_t = 1)]
    attempts: u32,

    /// Pause between two attempts, in milliseconds
    #[arg(long, default_value_t = 1000)]
    retry_delay_ms: u64,

    /// Reject streams served with invalid TLS certificates
    #[arg(long)]
    strict_tls: bool,

    /// Write headers of groups left without any working stream
    #[arg(long)]
    keep_empty_groups: bool,

    /// EPG referenced by the playlist header
    #[arg(long, env = "GENRE_SIEVE_EPG_URL", default_value = DEFAULT_EPG_URL)]
    epg_url: String,

    /// `tvg-id` given to every entry
    #[arg(long, env = "GENRE_SIEVE_TVG_ID", default_value = DEFAULT_TVG_ID)]
    tvg_id: String,

    /// `tvg-logo` given to every stream
    #[arg(long, env = "GENRE_SIEVE_LOGO_URL", default_value = DEFAULT_LOGO_URL)]
    logo_url: String,
}

impl Args {
    fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            timeout: Duration::from_secs(self.timeout),
            max_attempts: self.attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    fn playlist_style(&self) -> PlaylistStyle {
        PlaylistStyle {
            epg_url: self.epg_url.clone(),
            tvg_id: self.tvg_id.clone(),
            logo_url: self.logo_url.clone(),
            keep_empty_groups: self.keep_empty_groups,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    warn_ulimit(args.parallelism);

    let started = Instant::now();

    println!("Fetching channel list from {}...", args.source);
    let content = source::load(&init_http_client()?, &args.source).await?;

    let entries = parse_playlist(&content);
    let stream_entries = streams(&entries).cloned().collect::<Vec<_>>();
    let total = stream_entries.len();
    debug!("Parsed {} entries, {total} of them streams", entries.len());

    println!("Checking {total} streams for availability...");
    let prober = Arc::new(HttpProber::new(
        init_probe_client(!args.strict_tls)?,
        args.probe_config(),
    ));

    let pb = ProgressBar::new(u64::try_from(total).unwrap_or(u64::MAX));
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len}")
            .context("Building progress bar style")?,
    );
    let validations = validate_streams(stream_entries, prober.clone(), args.parallelism, &pb).await;
    pb.finish_and_clear();
    info!("{} URLs settled in cache", prober.cache().len());

    let validated = validations
        .into_iter()
        .filter_map(Validation::into_validated)
        .collect::<Vec<_>>();

    let lines = render(&entries, &validated, &args.playlist_style());
    tokio::fs::write(&args.output, to_document(&lines))
        .await
        .with_context(|| format!("Writing playlist to {}", args.output.display()))?;

    println!("\nFound {}/{total} working streams", validated.len());
    println!("Successfully converted to {}", args.output.display());
    println!(
        "\nProcessing completed in {:.2} seconds",
        started.elapsed().as_secs_f64()
    );

    Ok(())
}
