//! One-shot historical import.
//!
//! Pulls the agent's full export, expands daily totals into uniform
//! per-hour samples, skips the current day (live hourly data covers it) and
//! bulk-inserts. Idempotent to the resolution of one hour per day per
//! interface: an hour that already holds any sample is left alone.

use super::client::{export_url, fetch_json};
use super::types::{HistoricalExport, ImportStatus, TrafficEntry};
use crate::core::store::models::MonitorAgent;
use crate::core::store::Store;
use crate::error::Result;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use isahc::HttpClient;

const SECONDS_PER_HOUR: i64 = 3600;

/// An expanded sample ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct HourSample {
    pub hour_start: DateTime<Utc>,
    pub rx_bytes_per_second: i64,
    pub tx_bytes_per_second: i64,
}

/// Expand one interface's export into hourly samples.
///
/// Hour entries map 1:1; day entries fan out into 24 uniform hours. Entries
/// dated `today` are skipped entirely.
pub fn expand_entries(
    hours: &[TrafficEntry],
    days: &[TrafficEntry],
    today: NaiveDate,
) -> Vec<HourSample> {
    let mut samples = Vec::new();

    for entry in hours {
        let Some(date) = entry_date(entry) else { continue };
        if date == today {
            continue;
        }
        let hour = entry.time.as_ref().map(|t| t.hour).unwrap_or(0).min(23);
        let Some(start) = hour_start(date, hour) else { continue };
        samples.push(HourSample {
            hour_start: start,
            rx_bytes_per_second: entry.rx / SECONDS_PER_HOUR,
            tx_bytes_per_second: entry.tx / SECONDS_PER_HOUR,
        });
    }

    let hourly_dates: std::collections::HashSet<NaiveDate> = samples
        .iter()
        .map(|s| s.hour_start.date_naive())
        .collect();

    for entry in days {
        let Some(date) = entry_date(entry) else { continue };
        if date == today || hourly_dates.contains(&date) {
            // Native hourly data wins over an expanded day.
            continue;
        }
        let rx_per_hour = entry.rx / 24;
        let tx_per_hour = entry.tx / 24;
        for hour in 0..24u32 {
            let Some(start) = hour_start(date, hour) else { continue };
            samples.push(HourSample {
                hour_start: start,
                rx_bytes_per_second: rx_per_hour / SECONDS_PER_HOUR,
                tx_bytes_per_second: tx_per_hour / SECONDS_PER_HOUR,
            });
        }
    }

    samples.sort_by_key(|s| s.hour_start);
    samples
}

fn entry_date(entry: &TrafficEntry) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(entry.date.year, entry.date.month, entry.date.day.unwrap_or(1))
}

fn hour_start(date: NaiveDate, hour: u32) -> Option<DateTime<Utc>> {
    date.and_hms_opt(hour, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Run the import, reporting progress through `status`.
pub async fn run(
    store: Store,
    http: HttpClient,
    agent: MonitorAgent,
    mut status: impl FnMut(ImportStatus),
) -> Result<u64> {
    let mut progress = ImportStatus {
        in_progress: true,
        started_at: Some(Utc::now()),
        ..Default::default()
    };
    status(progress.clone());

    let export: HistoricalExport = match fetch_json(
        &http,
        &export_url(&agent.base_url),
        agent.api_key.as_deref(),
    )
    .await
    {
        Ok(export) => export,
        Err(err) => {
            progress.in_progress = false;
            progress.error = Some(err.to_string());
            progress.completed_at = Some(Utc::now());
            status(progress);
            return Err(err);
        }
    };

    let today = Utc::now().date_naive();
    let mut batches = Vec::new();
    for interface in &export.interfaces {
        batches.push(expand_entries(
            &interface.traffic.hour,
            &interface.traffic.day,
            today,
        ));
    }

    progress.total_records = batches.iter().map(|b| b.len() as u64).sum();
    status(progress.clone());

    let mut imported = 0u64;
    for batch in batches {
        for sample in batch {
            match store
                .has_bandwidth_sample_in_hour(agent.id, sample.hour_start)
                .await
            {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(agent = agent.id, %err, "import hour probe failed");
                    continue;
                }
            }

            let insert = store
                .insert_monitor_bandwidth(
                    agent.id,
                    sample.rx_bytes_per_second,
                    sample.tx_bytes_per_second,
                    "",
                    "",
                    sample.hour_start,
                )
                .await;
            match insert {
                Ok(()) => {
                    imported += 1;
                    progress.records_imported = imported;
                    if imported % 100 == 0 {
                        status(progress.clone());
                    }
                }
                Err(err) => {
                    tracing::warn!(agent = agent.id, %err, "import insert failed");
                }
            }
        }
    }

    progress.in_progress = false;
    progress.records_imported = imported;
    progress.completed_at = Some(Utc::now());
    status(progress);

    tracing::info!(agent = agent.id, imported, "historical import finished");
    Ok(imported)
}
