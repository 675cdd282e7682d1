mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use sensor_poller::config::Config;
use sensor_poller::export::{export_csv, export_file_name};
use sensor_poller::pipeline::{collect_once, PollScheduler, PollerHandle};
use sensor_poller::render::{Fanout, LogRenderer, SnapshotFileRenderer};
use sensor_poller::source::{ActiveSource, SourceAdapter};
use std::sync::atomic::Ordering;

use crate::cli::{Args, Command};

const COMMAND_QUEUE: usize = 32;

fn init_tracing() -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sensor_poller=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing()?;

    let mut config =
        Config::from_env(args.settings.as_deref()).context("failed to load configuration")?;
    if let Some(label) = args.window.as_deref() {
        config.set_window_label(label);
    }

    match args.command() {
        Command::Run => run(config).await,
        Command::Once => once(config).await,
        Command::Export { out_dir, stdout } => export(config, out_dir, stdout).await,
        Command::CheckConfig => {
            print_summary(&config);
            Ok(())
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let source = ActiveSource::new(&config.source, config.http_timeout())
        .context("failed to build data source")?;

    let mut renderers = Fanout::default();
    renderers.push(LogRenderer::new(&config.channels));
    if let Some(path) = &config.snapshot_path {
        tracing::info!(path = %path.display(), "writing snapshots to file");
        renderers.push(SnapshotFileRenderer::new(path));
    }

    let scheduler = PollScheduler::new(
        source,
        renderers,
        config.channels.clone(),
        config.metric_engine(),
        config.scheduler_settings(),
    );
    let (handle, task) = scheduler.spawn(COMMAND_QUEUE);
    let refresh_handle = tokio::spawn(refresh_on_signal(handle.clone()));

    tokio::select! {
        res = task => {
            if let Err(err) = res { tracing::error!(error=%err, "poll scheduler task failed"); }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    refresh_handle.abort();
    let stats = handle.stats();
    tracing::info!(
        started = stats.polls_started.load(Ordering::Relaxed),
        committed = stats.polls_committed.load(Ordering::Relaxed),
        failed = stats.polls_failed.load(Ordering::Relaxed),
        skipped = stats.polls_skipped.load(Ordering::Relaxed),
        dropped_records = stats.records_dropped.load(Ordering::Relaxed),
        "poller stopped"
    );
    Ok(())
}

/// SIGUSR1 acts as the manual refresh trigger.
#[cfg(unix)]
async fn refresh_on_signal(handle: PollerHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut signals = match signal(SignalKind::user_defined1()) {
        Ok(signals) => signals,
        Err(err) => {
            tracing::warn!(error=%err, "failed to install SIGUSR1 handler; manual refresh disabled");
            return;
        }
    };
    while signals.recv().await.is_some() {
        match handle.refresh().await {
            Ok(outcome) => tracing::info!(?outcome, "manual refresh"),
            Err(err) => {
                tracing::warn!(error=%err, "manual refresh failed");
                break;
            }
        }
    }
}

#[cfg(not(unix))]
async fn refresh_on_signal(_handle: PollerHandle) {}

async fn poll_once(config: &Config) -> Result<sensor_poller::pipeline::WindowView> {
    let mut source = ActiveSource::new(&config.source, config.http_timeout())
        .context("failed to build data source")?;
    let view = collect_once(
        &mut source,
        &config.channels,
        &config.metric_engine(),
        &config.scheduler_settings(),
    )
    .await
    .with_context(|| format!("{} poll failed", source.name()))?;
    if view.snapshot.is_none() {
        bail!("{} returned no usable readings", source.name());
    }
    Ok(view)
}

async fn once(config: Config) -> Result<()> {
    let view = poll_once(&config).await?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

async fn export(config: Config, out_dir: std::path::PathBuf, stdout: bool) -> Result<()> {
    let view = poll_once(&config).await?;
    let csv = export_csv(&view.readings, &view.channels, &config.time_label())?;
    if stdout {
        print!("{csv}");
        return Ok(());
    }

    let path = out_dir.join(export_file_name(chrono::Utc::now().date_naive()));
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    std::fs::write(&path, csv).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), rows = view.readings.len(), window = %view.window, "exported CSV");
    Ok(())
}

fn print_summary(config: &Config) {
    println!("source: {}", config.source.kind());
    println!("poll interval: {} ms", config.poll_interval_ms);
    println!("notice duration: {} ms", config.notice_ms);
    println!("window: {}", config.window);
    println!("retention: {:?}", config.retention);
    println!("priming poll: {}", config.prime);
    for spec in &config.channels {
        let bounds = config
            .thresholds
            .get(&spec.name)
            .map(|t| {
                format!(
                    "danger<={} warning<={} warning>={} danger>={}",
                    t.danger_low(),
                    t.warning_low(),
                    t.warning_high(),
                    t.danger_high()
                )
            })
            .unwrap_or_else(|| "no thresholds".to_string());
        println!(
            "channel {} <- {} ({:?}, unit {:?}): {bounds}",
            spec.name, spec.field, spec.parser, spec.unit
        );
    }
    if let Some(band) = &config.comfort {
        println!(
            "comfort: {} {}..={} / {} {}..={}",
            band.temperature_channel,
            band.temperature_low,
            band.temperature_high,
            band.humidity_channel,
            band.humidity_low,
            band.humidity_high
        );
    }
    if let Some(channel) = &config.aqi_channel {
        println!("air quality channel: {channel}");
    }
}
