use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use garmin_connect_client::config::{Config, DEFAULT_ENV_FILE};
use garmin_connect_client::http_client::ReqwestGarminClient;
use garmin_connect_client::{DailyMetrics, GarminClient, WellnessSample};
use serde::Serialize;

const DEFAULT_SYNC_DAYS: u32 = 7;

/// One output line on stdout.
#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record<'a> {
    Daily(&'a DailyMetrics),
    Wellness(&'a WellnessSample),
}

fn sync_days() -> anyhow::Result<u32> {
    match std::env::var("GARMIN_SYNC_DAYS") {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .with_context(|| format!("GARMIN_SYNC_DAYS is not a valid number: {v}")),
        _ => Ok(DEFAULT_SYNC_DAYS),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let env_file = std::env::var("GARMIN_ENV_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_ENV_FILE));
    let dotenv = dotenvy::from_path(&env_file);

    // Configure logging from env var `GARMIN_LOG_LEVEL` (or fallback to `RUST_LOG`, default `info`).
    let log_env = std::env::var("GARMIN_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_new(&log_env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_env_filter(env_filter)
        .init();
    tracing::info!("garmin_sync: log filter: {}", log_env);
    if let Err(e) = dotenv {
        tracing::warn!("No {} file loaded: {}", env_file.display(), e);
    }

    let config = Config::from_env()?;
    let days = sync_days()?;
    let mut client = ReqwestGarminClient::new(config)?;

    match client.establish().await? {
        Some(name) => tracing::info!("garmin_sync: authenticated as {}", name),
        None => tracing::warn!("garmin_sync: authenticated without display name"),
    }

    let metrics = client.get_metrics_for_last_days(days).await?;
    let samples = client.get_wellness_samples_for_last_days(days).await?;

    let mut out = std::io::stdout().lock();
    for m in &metrics {
        serde_json::to_writer(&mut out, &Record::Daily(m))?;
        writeln!(out)?;
    }
    for s in &samples {
        serde_json::to_writer(&mut out, &Record::Wellness(s))?;
        writeln!(out)?;
    }
    out.flush()?;

    tracing::info!(
        "garmin_sync: wrote {} daily records and {} wellness samples",
        metrics.len(),
        samples.len()
    );
    Ok(())
}
