//! CLI command implementations

use crate::output::{self, EntryRow, OutputFormat};
use anyhow::Context;
use console::style;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use marquee_core::{
    ClockBackend, FetchOperation, FetchQueue, FetchRequest, FinishReason, MarqueeConfig, MovieEntry,
    PlaybackController, PlaylistParser,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

fn parse_url(input: &str) -> anyhow::Result<Url> {
    Url::parse(input).with_context(|| format!("invalid URL: {input}"))
}

fn spinner(message: String) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_style(ProgressStyle::with_template("{spinner:.blue} {msg}")?);
    pb.set_message(message);
    Ok(pb)
}

/// Download a URL, showing progress
pub async fn fetch(url: &str, output: Option<PathBuf>, config: &MarqueeConfig) -> anyhow::Result<()> {
    let url = parse_url(url)?;
    let operation = FetchOperation::new(FetchRequest::with_settings(url.clone(), config.fetch.clone()));
    operation.start()?;

    let pb = spinner(url.to_string())?;
    let mut ticker = tokio::time::interval(REFRESH_INTERVAL);

    let result = loop {
        tokio::select! {
            result = operation.wait() => break result,
            _ = ticker.tick() => {
                if pb.length().is_none() {
                    if let Some(length) = operation.content_length().filter(|l| *l > 0) {
                        pb.set_length(length);
                        pb.set_style(ProgressStyle::with_template(
                            "{bar:40.cyan/blue} {bytes}/{total_bytes} {bytes_per_sec} {msg}",
                        )?);
                    }
                }
                pb.set_position(operation.bytes_received());
            }
        }
    };
    pb.finish_and_clear();

    let data = result.with_context(|| format!("failed to fetch {url}"))?;
    let elapsed = match (operation.started_at(), operation.finished_at()) {
        (Some(start), Some(end)) => (end - start).num_milliseconds(),
        _ => 0,
    };

    match output {
        Some(path) => {
            tokio::fs::write(&path, &data)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            output::success(&format!(
                "Saved {} to {} in {elapsed} ms",
                HumanBytes(data.len() as u64),
                path.display()
            ));
        }
        None => output::success(&format!(
            "Fetched {} from {url} in {elapsed} ms",
            HumanBytes(data.len() as u64)
        )),
    }

    Ok(())
}

/// Print the entries of a playlist
pub async fn list(url: &str, posters: bool, config: &MarqueeConfig, format: OutputFormat) -> anyhow::Result<()> {
    let url = parse_url(url)?;
    let entries = load_playlist(&url, config).await?;

    let mut rows: Vec<_> = entries.iter().enumerate().map(|(i, e)| EntryRow::new(i, e)).collect();
    if posters {
        fetch_posters(&url, &entries, &mut rows, config).await?;
    }

    if rows.is_empty() {
        output::warning("Playlist has no entries");
        return Ok(());
    }

    output::print_entries(&rows, format)
}

/// Play one entry on a clock session until it finishes
pub async fn play(url: &str, entry: usize, limit: Option<u64>, config: &MarqueeConfig) -> anyhow::Result<()> {
    let url = parse_url(url)?;
    let entries = load_playlist(&url, config).await?;
    let movie = entries
        .get(entry)
        .with_context(|| format!("playlist has {} entries, there is no entry {entry}", entries.len()))?;

    let media_url = movie.media_url(&url)?;
    let duration = movie.duration_hint();
    if duration.is_none() {
        output::warning(&format!("No usable duration in {:?}; playing as a live stream", movie.duration));
    }

    let backend = Arc::new(ClockBackend::new(duration));
    let controller = PlaybackController::new(media_url.clone(), backend, config.playback.clone())?;
    debug!(controller = %controller.id(), url = %media_url, "Playing entry");

    eprintln!("{} {} {}", style("▶").cyan().bold(), movie.title, style(&media_url).dim());

    let pb = match duration {
        Some(duration) => {
            let pb = ProgressBar::new(duration.as_millis() as u64);
            pb.set_style(ProgressStyle::with_template("{bar:40.cyan/blue} {msg}")?);
            pb
        }
        None => spinner(String::new())?,
    };

    let mut time_rx = controller.subscribe_time();
    let deadline = async {
        match limit {
            Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let outcome = loop {
        tokio::select! {
            reason = controller.wait_finished() => break Some(reason?),
            changed = time_rx.changed() => {
                if changed.is_err() {
                    break None;
                }
                let time = *time_rx.borrow_and_update();
                pb.set_position(time.elapsed.as_millis() as u64);
                pb.set_message(format!("{} {}", time.elapsed_label(), time.remaining_label()));
            }
            _ = &mut deadline => break None,
            _ = tokio::signal::ctrl_c() => break None,
        }
    };
    pb.finish_and_clear();

    match outcome {
        Some(FinishReason::PlaybackEnded) => output::success(&format!("Finished {}", movie.title)),
        Some(FinishReason::PlaybackError) => anyhow::bail!("playback of {media_url} failed"),
        None => output::warning(&format!("Stopped at {}", controller.time().elapsed_label())),
    }

    Ok(())
}

async fn load_playlist(url: &Url, config: &MarqueeConfig) -> anyhow::Result<Vec<MovieEntry>> {
    let parser = PlaylistParser::new(url.clone());
    parser.set_schema(config.schema.clone())?;
    parser.set_fetch_settings(config.fetch.clone())?;

    let pb = spinner(format!("Loading {url}"))?;
    parser.start()?;
    let result = parser.wait().await;
    pb.finish_and_clear();

    let entries = result.with_context(|| format!("failed to load playlist {url}"))?;
    output::success(&format!("Loaded {} entries from {url}", entries.len()));
    Ok(entries)
}

async fn fetch_posters(
    base: &Url,
    entries: &[MovieEntry],
    rows: &mut [EntryRow],
    config: &MarqueeConfig,
) -> anyhow::Result<()> {
    let queue = FetchQueue::new(config.poster_concurrency);
    let mut pending = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        if entry.poster.is_empty() {
            continue;
        }
        match entry.poster_url(base) {
            Ok(poster) => {
                let operation = FetchOperation::new(FetchRequest::with_settings(poster, config.fetch.clone()));
                queue.add(operation.clone())?;
                pending.push((index, operation));
            }
            Err(e) => output::warning(&format!("{}: bad poster URL ({e})", entry.title)),
        }
    }

    let pb = ProgressBar::new(pending.len() as u64);
    pb.set_style(ProgressStyle::with_template("{bar:40.green} {pos}/{len} posters")?);

    for (index, operation) in pending {
        match operation.wait().await {
            Ok(data) => rows[index].poster_bytes = Some(data.len() as u64),
            Err(e) => output::warning(&format!("{}: poster unavailable ({})", entries[index].title, e.error_code())),
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok(())
}
