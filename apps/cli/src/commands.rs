//! CLI command implementations

use crate::output::{format_bytes, format_elapsed, format_limit, print_output};
use crate::progress::DownloadProgress;
use crate::{ConfigAction, GetOptions, OutputFormat};
use anyhow::{anyhow, Result};
use console::style;
use fetchline_core::{build_client, probe, DownloadJob, SettingsStore};
use fetchline_types::{JobConfig, Phase, ProbeInfo, Settings, TransferState};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::debug;

// ============================================================================
// Download Command
// ============================================================================

/// Resolve where a download should be written
fn resolve_destination(url: &str, output: Option<PathBuf>, settings: &Settings) -> PathBuf {
    let filename = JobConfig::filename_from_url(url);
    match output {
        Some(path) if path.is_dir() => path.join(filename),
        Some(path) => path,
        None => settings.download_dir.join(filename),
    }
}

fn build_job_config(url: &str, options: GetOptions, settings: &Settings) -> JobConfig {
    let destination = resolve_destination(url, options.output, settings);
    let mut config = JobConfig::from_settings(url, destination, settings);

    if let Some(max_speed) = options.max_speed {
        config.max_bytes_per_second = max_speed;
    }
    if let Some(retries) = options.retries {
        config.retry_limit = retries;
    }
    if let Some(timeout) = options.timeout {
        config.timeout_ms = timeout;
    }
    if let Some(refresh) = options.refresh {
        config.refresh_interval_ms = refresh;
    }
    if options.no_replace {
        config.replace_existing = false;
    }
    config
}

pub async fn get(
    store: &SettingsStore,
    url: &str,
    options: GetOptions,
    format: OutputFormat,
) -> Result<()> {
    let settings = store.load().await?;
    let config = build_job_config(url, options, &settings);
    debug!("Job config: {:?}", config);

    let label = config
        .destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| url.to_string());

    let job = DownloadJob::new(config)?;
    let progress = DownloadProgress::new(&label, !matches!(format, OutputFormat::Json));
    let mut events = job.events().channel();

    let run = job.start();
    tokio::pin!(run);

    let mut interrupted = false;
    let mut events_open = true;
    let phase = loop {
        tokio::select! {
            phase = &mut run => break phase,

            event = events.recv(), if events_open => match event {
                Ok(event) => progress.handle_event(&event),
                Err(RecvError::Lagged(skipped)) => debug!("Progress display skipped {} events", skipped),
                Err(RecvError::Closed) => events_open = false,
            },

            result = tokio::signal::ctrl_c(), if !interrupted => {
                if result.is_ok() {
                    job.pause();
                    progress.pausing();
                }
                interrupted = true;
            }
        }
    };

    // Events emitted after the last poll are still buffered
    loop {
        match events.try_recv() {
            Ok(event) => progress.handle_event(&event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    progress.finish();

    let state = job.state();
    let destination = job.config().destination;
    print_output(&state, format, |state| {
        print_state(state, &destination)
    })?;

    match phase {
        Phase::Failed => Err(anyhow!(state
            .last_error
            .unwrap_or_else(|| "download failed".to_string()))),
        _ => Ok(()),
    }
}

fn print_state(state: &TransferState, destination: &Path) {
    let headline = match state.phase {
        Phase::Completed => format!("{} Saved", style("✓").green().bold()),
        Phase::Paused => format!("{} Paused", style("⏸").yellow().bold()),
        Phase::Failed => format!("{} Failed", style("✗").red().bold()),
        phase => format!("{} {:?}", style("○").dim(), phase),
    };
    println!("{} {}", headline, style(destination.display()).cyan());

    match state.total_size {
        Some(total) => println!(
            "  Downloaded: {} / {} ({:.1}%)",
            format_bytes(state.downloaded),
            format_bytes(total),
            state.progress().unwrap_or(0.0)
        ),
        None => println!("  Downloaded: {}", format_bytes(state.downloaded)),
    }
    println!("  Elapsed: {}", format_elapsed(state.elapsed_ms));
    println!(
        "  Resumable: {}",
        if state.supports_resume {
            style("Yes").green()
        } else {
            style("No").yellow()
        }
    );
    if let Some(ref error) = state.last_error {
        println!("  Error: {}", style(error).red());
    }
    if state.phase == Phase::Paused {
        println!(
            "  {}",
            style("Run again with --no-replace to resume from the partial file").dim()
        );
    }
}

// ============================================================================
// Probe Command
// ============================================================================

#[derive(Serialize)]
struct ProbeReport {
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<ProbeInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub async fn probe_urls(
    store: &SettingsStore,
    urls: Vec<String>,
    format: OutputFormat,
) -> Result<()> {
    if urls.is_empty() {
        return Err(anyhow!("No URLs given"));
    }

    let settings = store.load().await?;
    let client = build_client(&JobConfig::from_settings("", "", &settings))?;
    let timeout = Duration::from_millis(settings.probe_timeout_ms);

    let mut reports = Vec::with_capacity(urls.len());
    for url in urls {
        let report = match probe(&client, &url, timeout).await {
            Ok(info) => ProbeReport {
                url,
                info: Some(info),
                error: None,
            },
            Err(e) => ProbeReport {
                url,
                info: None,
                error: Some(e.to_string()),
            },
        };
        reports.push(report);
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct ProbeRow {
                filename: String,
                size: String,
                resumable: String,
                error: String,
            }

            let rows: Vec<ProbeRow> = reports
                .iter()
                .map(|r| ProbeRow {
                    filename: JobConfig::filename_from_url(&r.url),
                    size: r
                        .info
                        .as_ref()
                        .map(|i| format_bytes(i.size))
                        .unwrap_or_else(|| "?".to_string()),
                    resumable: match &r.info {
                        Some(i) if i.supports_resume => "Yes",
                        Some(_) => "No",
                        None => "?",
                    }
                    .to_string(),
                    error: r.error.clone().unwrap_or_default(),
                })
                .collect();

            println!("{}", Table::new(rows));
        }
        OutputFormat::Human => {
            for report in &reports {
                match (&report.info, &report.error) {
                    (Some(info), _) => {
                        println!(
                            "{} {}",
                            style("✓").green(),
                            JobConfig::filename_from_url(&report.url)
                        );
                        println!("    Size: {}", format_bytes(info.size));
                        if let Some(ref ct) = info.content_type {
                            println!("    Type: {}", ct);
                        }
                        if let Some(ref final_url) = info.final_url {
                            println!("    Redirected to: {}", final_url);
                        }
                        println!(
                            "    Resumable: {}",
                            if info.supports_resume {
                                style("Yes").green()
                            } else {
                                style("No").yellow()
                            }
                        );
                    }
                    (None, error) => {
                        println!(
                            "{} {}: {}",
                            style("✗").red(),
                            report.url,
                            style(error.as_deref().unwrap_or("unknown error")).red()
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn config_action(
    store: &SettingsStore,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> Result<()> {
    match action {
        None | Some(ConfigAction::Show) => {
            let settings = store.load().await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&settings)?);
                }
                OutputFormat::Table => {
                    use tabled::{Table, Tabled};

                    #[derive(Tabled)]
                    struct SettingRow {
                        key: String,
                        value: String,
                    }

                    let rows: Vec<SettingRow> = Settings::KEYS
                        .iter()
                        .map(|key| SettingRow {
                            key: key.to_string(),
                            value: settings.get(key).unwrap_or_default(),
                        })
                        .collect();

                    println!("{}", Table::new(rows));
                }
                OutputFormat::Human => {
                    println!("Fetchline Configuration ({}):", store.path().display());
                    println!();
                    println!("  Download dir: {}", settings.download_dir.display());
                    println!(
                        "  Speed limit: {}",
                        format_limit(settings.max_bytes_per_second)
                    );
                    println!("  Retry limit: {}", settings.retry_limit);
                    println!("  Retry delay: {} ms", settings.retry_delay_ms);
                    println!("  Timeout: {} ms", settings.timeout_ms);
                    println!("  Probe timeout: {} ms", settings.probe_timeout_ms);
                    println!("  Refresh interval: {} ms", settings.refresh_interval_ms);
                    println!("  Replace existing: {}", settings.replace_existing);
                    println!("  User agent: {}", settings.user_agent);
                }
            }
        }

        Some(ConfigAction::Get { key }) => {
            let settings = store.load().await?;
            let value = settings.get(&key).ok_or_else(|| {
                anyhow!(
                    "Unknown config key: {} (expected one of: {})",
                    key,
                    Settings::KEYS.join(", ")
                )
            })?;
            println!("{}", value);
        }

        Some(ConfigAction::Set { key, value }) => {
            let mut settings = store.load().await?;
            settings.set(&key, &value).map_err(|e| anyhow!(e))?;
            store.save(&settings).await?;
            println!("{} Config updated", style("✓").green().bold());
        }

        Some(ConfigAction::Reset { yes }) => {
            use dialoguer::Confirm;

            let confirmed = yes
                || Confirm::new()
                    .with_prompt("Reset all settings to defaults?")
                    .default(false)
                    .interact()?;

            if confirmed {
                store.reset().await?;
                println!("{} Settings reset to defaults", style("✓").green().bold());
            }
        }
    }

    Ok(())
}
