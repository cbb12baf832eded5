//! Command-line consumer for the vidship pipeline.
//!
//! Fetches one URL, renders throttled progress, delivers the finished
//! file(s) into a destination directory and cleans up the scratch space.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vidship::progress::{Phase, Progress, ProgressSink, Throttle};
use vidship::util::format_size;
use vidship::{Delivery, Payload, Pipeline, PipelineConfig};

const COPY_CHUNK_SIZE: usize = 256 * 1024;

#[derive(Parser, Debug)]
#[command(name = "vidship", version, about = "Fetch a video URL and deliver messaging-ready files")]
struct Args {
    /// Source video URL.
    url: String,

    /// Directory that receives the finished file(s).
    #[arg(short, long, default_value = ".")]
    out: PathBuf,

    /// Maximum video height to request from the source.
    #[arg(long, default_value_t = 1080)]
    max_height: u32,

    /// Split threshold in MiB.
    #[arg(long)]
    max_upload_mib: Option<u64>,

    /// Per-job timeout in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vidship=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let args = Args::parse();
    if !vidship::fetch::is_probable_video_url(&args.url) {
        bail!("{:?} does not look like a video URL", args.url);
    }
    tokio::fs::create_dir_all(&args.out)
        .await
        .with_context(|| format!("creating output directory {}", args.out.display()))?;

    let mut config = PipelineConfig::new().with_max_height(args.max_height);
    if let Some(mib) = args.max_upload_mib {
        config = config.with_max_upload_size(mib * 1024 * 1024);
    }
    if let Some(secs) = args.timeout_secs {
        config = config.with_job_timeout(Duration::from_secs(secs));
    }

    let interval = config.progress_interval;
    let min_delta = config.progress_min_delta;
    let pipeline = Pipeline::new(config);

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("[{bar:40.cyan/blue}] {percent:>3}% {wide_msg}")
            .expect("valid template")
            .progress_chars("#>-"),
    );
    let sink = {
        let bar = bar.clone();
        move |p: Progress| {
            bar.set_position(p.percent.clamp(0.0, 100.0) as u64);
            bar.set_message(status_line(&p));
        }
    };

    // Ctrl-C cancels the job; the pipeline kills the active tool and cleans
    // up its scratch directory.
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    let delivery = match pipeline.process_with_cancel(&args.url, &sink, &token).await {
        Ok(delivery) => delivery,
        Err(e) => {
            bar.abandon_with_message("failed");
            bail!("processing failed: {e}");
        }
    };

    let delivered = deliver(&delivery, &args.out, &sink, interval, min_delta).await;
    bar.finish_with_message("done");

    // The scratch directory is no longer needed either way.
    if let Err(e) = delivery.cleanup().await {
        tracing::warn!(error = %e, "cleanup failed");
    }
    let delivered = delivered?;

    print_summary(&delivery, &delivered);
    Ok(())
}

fn status_line(p: &Progress) -> String {
    match p.phase {
        Phase::Acquiring => match (&p.total, &p.speed, &p.eta) {
            (Some(total), Some(speed), Some(eta)) => {
                format!(
                    "downloading {:.0}% of {} at {} (ETA {})",
                    p.percent, total, speed, eta
                )
            }
            _ => format!("downloading {:.0}%", p.percent),
        },
        Phase::Merging => "merging audio and video".to_string(),
        Phase::Transcoding => match &p.codec {
            Some(codec) if p.percent == 0.0 => {
                format!("source is {}, converting to h264", codec)
            }
            _ => format!("converting to h264 {:.0}%", p.percent),
        },
        Phase::Partitioning => format!(
            "splitting part {}/{} ({:.0}%)",
            p.part, p.total_parts, p.percent
        ),
        Phase::Transferring => {
            if p.total_parts > 0 {
                format!("delivering part {}/{} ({:.0}%)", p.part, p.total_parts, p.percent)
            } else {
                format!("delivering {:.0}%", p.percent)
            }
        }
    }
}

/// Copy the finished file(s) into `out`, reporting rate-limited
/// `transferring` progress.
async fn deliver(
    delivery: &Delivery,
    out: &Path,
    sink: &dyn ProgressSink,
    interval: Duration,
    min_delta: f64,
) -> anyhow::Result<Vec<PathBuf>> {
    let throttle = Throttle::new(sink, interval, min_delta);
    let mut delivered = Vec::new();

    match &delivery.payload {
        Payload::Single(path) => {
            let dest = out.join(&delivery.file_name);
            copy_with_progress(path, &dest, 0, 0, &throttle).await?;
            delivered.push(dest);
        }
        Payload::Parts(parts) => {
            let total = parts.len() as u32;
            for part in parts {
                let name = part
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| format!("part{:03}.mp4", part.ordinal));
                let dest = out.join(name);
                copy_with_progress(&part.path, &dest, part.ordinal, total, &throttle).await?;
                delivered.push(dest);
            }
        }
    }

    Ok(delivered)
}

async fn copy_with_progress(
    src: &Path,
    dest: &Path,
    part: u32,
    total_parts: u32,
    sink: &dyn ProgressSink,
) -> anyhow::Result<()> {
    let total = tokio::fs::metadata(src)
        .await
        .with_context(|| format!("reading {}", src.display()))?
        .len();
    let mut reader = tokio::fs::File::open(src)
        .await
        .with_context(|| format!("opening {}", src.display()))?;
    let mut writer = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("creating {}", dest.display()))?;

    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let mut copied = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        copied += n as u64;

        let percent = if total > 0 {
            copied as f64 / total as f64 * 100.0
        } else {
            100.0
        };
        sink.notify(Progress {
            phase: Phase::Transferring,
            percent,
            part,
            total_parts,
            ..Default::default()
        });
    }
    writer.flush().await?;

    Ok(())
}

fn print_summary(delivery: &Delivery, delivered: &[PathBuf]) {
    println!("{}", delivery.title);
    println!(
        "  {}x{}, {:.1}s, {} ({})",
        delivery.width,
        delivery.height,
        delivery.duration,
        format_size(delivery.size_bytes),
        delivery.content_type,
    );
    if delivery.is_split() {
        println!("  split into {} parts:", delivered.len());
    }
    for path in delivered {
        println!("  {}", path.display());
    }
}
