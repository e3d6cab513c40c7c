//! Per-source schedule configuration, loaded from YAML files in
//! `config/sources/*.yaml` (§4.1).

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Stepped forecast horizon: step by 1 hour out to `near_end_hour`, then
/// widen to `far_step` (e.g. step by 3 past hour 120 for global models).
#[derive(Debug, Clone, Deserialize)]
pub struct HorizonConfig {
    pub near_end_hour: u32,
    #[serde(default = "default_far_step")]
    pub far_step: u32,
    pub far_end_hour: u32,
}

fn default_far_step() -> u32 {
    3
}

impl HorizonConfig {
    /// The forecast hours `h` this source ingests, per §4.1's "step by 1
    /// early and widen later" rule.
    pub fn hours(&self) -> Vec<u32> {
        let mut hours: Vec<u32> = (0..=self.near_end_hour).collect();
        if self.far_end_hour > self.near_end_hour {
            hours.extend(
                ((self.near_end_hour + self.far_step)..=self.far_end_hour).step_by(self.far_step as usize),
            );
        }
        hours
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSchedule {
    pub source_short_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Model cycle hours, e.g. `[0, 6, 12, 18]`. A single-element list of
    /// every hour (`[0..23]`) models an hourly source such as HRRR.
    pub cycles: Vec<u32>,
    /// Hours after the cycle time that the source actually starts
    /// publishing files (the `publish_lag` of §4.1).
    pub publish_lag_hours: i64,
    pub horizon: HorizonConfig,
    /// Template with `{date}` (YYYYMMDD), `{cycle:02}`, `{forecast:03}`
    /// placeholders.
    pub grib_url_template: String,
    /// Template for the sidecar index; may reference `{grib_url}` in
    /// addition to the placeholders above.
    pub idx_url_template: String,
}

fn default_enabled() -> bool {
    true
}

impl SourceSchedule {
    /// Canonical run_time: the most recent cycle boundary at or before
    /// `now`, floored to the hour.
    pub fn latest_run_time(&self, now: chrono::DateTime<chrono::Utc>) -> chrono::DateTime<chrono::Utc> {
        use chrono::Timelike;
        let today_midnight = now.date_naive().and_hms_opt(0, 0, 0).unwrap();
        let today_midnight = chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(today_midnight, chrono::Utc);
        let current_hour = now.hour();

        let cycle = self
            .cycles
            .iter()
            .filter(|&&c| c <= current_hour)
            .max()
            .copied();

        match cycle {
            Some(c) => today_midnight + chrono::Duration::hours(c as i64),
            None => {
                let yesterday_last = *self.cycles.iter().max().unwrap_or(&0);
                today_midnight - chrono::Duration::days(1) + chrono::Duration::hours(yesterday_last as i64)
            }
        }
    }

    pub fn grib_url(&self, run_time: chrono::DateTime<chrono::Utc>, forecast_hour: u32) -> String {
        render_template(&self.grib_url_template, run_time, forecast_hour)
    }

    pub fn idx_url(&self, run_time: chrono::DateTime<chrono::Utc>, forecast_hour: u32) -> String {
        let grib_url = self.grib_url(run_time, forecast_hour);
        render_template(&self.idx_url_template, run_time, forecast_hour).replace("{grib_url}", &grib_url)
    }
}

fn render_template(template: &str, run_time: chrono::DateTime<chrono::Utc>, forecast_hour: u32) -> String {
    use chrono::Timelike;
    template
        .replace("{date}", &run_time.format("%Y%m%d").to_string())
        .replace("{cycle:02}", &format!("{:02}", run_time.hour()))
        .replace("{forecast:03}", &format!("{:03}", forecast_hour))
        .replace("{forecast:02}", &format!("{:02}", forecast_hour))
}

/// Load all schedule configs from a directory of YAML files.
pub fn load_source_schedules(config_dir: &Path) -> Result<Vec<SourceSchedule>> {
    let sources_dir = config_dir.join("sources");
    if !sources_dir.exists() {
        warn!(path = %sources_dir.display(), "source schedule directory not found");
        return Ok(Vec::new());
    }

    let mut configs = Vec::new();
    for entry in std::fs::read_dir(&sources_dir)
        .with_context(|| format!("reading {}", sources_dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "yaml" && ext != "yml") {
            continue;
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: SourceSchedule = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        if config.enabled {
            debug!(source = %config.source_short_name, "loaded source schedule");
            configs.push(config);
        } else {
            debug!(source = %config.source_short_name, "source disabled, skipping");
        }
    }

    info!(count = configs.len(), "loaded source schedules");
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn horizon_steps_by_one_then_widens() {
        let horizon = HorizonConfig { near_end_hour: 5, far_step: 3, far_end_hour: 11 };
        assert_eq!(horizon.hours(), vec![0, 1, 2, 3, 4, 5, 8, 11]);
    }

    #[test]
    fn horizon_with_no_far_leg_is_just_the_near_run() {
        let horizon = HorizonConfig { near_end_hour: 18, far_step: 3, far_end_hour: 18 };
        assert_eq!(horizon.hours(), (0..=18).collect::<Vec<_>>());
    }

    #[test]
    fn parses_gfs_style_yaml() {
        let yaml = r#"
source_short_name: gfs
cycles: [0, 6, 12, 18]
publish_lag_hours: 4
horizon:
  near_end_hour: 120
  far_step: 3
  far_end_hour: 384
grib_url_template: "https://noaa-gfs-bdp-pds.s3.amazonaws.com/gfs.{date}/{cycle:02}/atmos/gfs.t{cycle:02}z.pgrb2.0p25.f{forecast:03}"
idx_url_template: "{grib_url}.idx"
"#;
        let config: SourceSchedule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.cycles, vec![0, 6, 12, 18]);
        assert_eq!(config.horizon.hours().len(), 121 + (384 - 120) / 3);
    }

    #[test]
    fn renders_url_template() {
        let config = SourceSchedule {
            source_short_name: "gfs".into(),
            enabled: true,
            cycles: vec![0, 6, 12, 18],
            publish_lag_hours: 4,
            horizon: HorizonConfig { near_end_hour: 120, far_step: 3, far_end_hour: 384 },
            grib_url_template: "https://x/gfs.{date}/{cycle:02}/f{forecast:03}".into(),
            idx_url_template: "{grib_url}.idx".into(),
        };
        let run_time = chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(config.grib_url(run_time, 6), "https://x/gfs.20260301/12/f006");
        assert_eq!(config.idx_url(run_time, 6), "https://x/gfs.20260301/12/f006.idx");
    }
}
