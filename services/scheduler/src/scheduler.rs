//! Per-source scheduling loop (§4.1): tracks the last run_time enqueued for
//! each source and, once a new cycle boundary has passed, enqueues one
//! ingest task per forecast horizon hour.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use ingestion::IngestTask;
use storage::catalog::Catalog;
use storage::Queue;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, instrument, warn};

use crate::config::SourceSchedule;

pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SourceStatus {
    pub source_short_name: String,
    pub last_run_time: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    catalog: Catalog,
    queue: Queue,
    sources: Vec<SourceSchedule>,
    last_run_time: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl Scheduler {
    pub fn new(catalog: Catalog, queue: Queue, sources: Vec<SourceSchedule>) -> Self {
        Self { catalog, queue, sources, last_run_time: RwLock::new(HashMap::new()) }
    }

    pub async fn statuses(&self) -> Vec<SourceStatus> {
        let last_run_time = self.last_run_time.read().await;
        self.sources
            .iter()
            .map(|s| SourceStatus {
                source_short_name: s.source_short_name.clone(),
                last_run_time: last_run_time.get(&s.source_short_name).copied(),
            })
            .collect()
    }

    /// Check every configured source once, enqueueing tasks for any source
    /// whose canonical run_time has advanced since the last check.
    pub async fn poll_once(&self) -> Result<()> {
        let now = Utc::now();
        for source in &self.sources {
            if let Err(e) = self.poll_source(source, now).await {
                error!(source = %source.source_short_name, error = %e, "failed to schedule source");
            }
        }
        Ok(())
    }

    #[instrument(skip(self, source), fields(source = %source.source_short_name))]
    async fn poll_source(&self, source: &SourceSchedule, now: DateTime<Utc>) -> Result<()> {
        let run_time = source.latest_run_time(now);

        {
            let last_run_time = self.last_run_time.read().await;
            if last_run_time.get(&source.source_short_name) == Some(&run_time) {
                return Ok(());
            }
        }

        let Some(db_source) = self.catalog.get_source_by_short_name(&source.source_short_name).await? else {
            warn!("no Source row for configured schedule; skipping");
            return Ok(());
        };

        let acquire_time = run_time + chrono::Duration::hours(source.publish_lag_hours);
        let hours = source.horizon.hours();
        info!(run_time = %run_time, acquire_time = %acquire_time, horizon_count = hours.len(), "enqueueing run");

        for h in hours {
            let task = IngestTask {
                source_id: db_source.id,
                run_time,
                valid_time: run_time + chrono::Duration::hours(h as i64),
                grib_url: source.grib_url(run_time, h),
                idx_url: source.idx_url(run_time, h),
            };
            self.queue.enqueue(&task, acquire_time).await?;
        }

        self.last_run_time.write().await.insert(source.source_short_name.clone(), run_time);
        Ok(())
    }

    pub async fn run_forever(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        loop {
            if let Err(e) = self.poll_once().await {
                error!(error = %e, "scheduler poll failed");
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HorizonConfig;
    use chrono::TimeZone;

    fn gfs_config() -> SourceSchedule {
        SourceSchedule {
            source_short_name: "gfs".into(),
            enabled: true,
            cycles: vec![0, 6, 12, 18],
            publish_lag_hours: 4,
            horizon: HorizonConfig { near_end_hour: 6, far_step: 3, far_end_hour: 6 },
            grib_url_template: "https://x/{date}/{cycle:02}/f{forecast:03}".into(),
            idx_url_template: "{grib_url}.idx".into(),
        }
    }

    #[test]
    fn latest_run_time_floors_to_cycle() {
        let config = gfs_config();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 14, 30, 0).unwrap();
        assert_eq!(config.latest_run_time(now), Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn latest_run_time_before_first_cycle_uses_previous_day() {
        let config = gfs_config();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        assert_eq!(config.latest_run_time(now), Utc.with_ymd_and_hms(2026, 2, 28, 18, 0, 0).unwrap());
    }
}
