//! The §4.8 query algorithm: turn a (lat, lon, time range, metric filter)
//! into a flat, time-ordered list of `DataPointSet`s.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use projection::{Grid, GridCache};
use storage::catalog::{Catalog, DataPointSet, SourceField};
use storage::provider::{BlobProvider, FieldRef};
use weather_common::WeatherError;

/// Bounded fan-out width for the per-projection `get_fields` calls, matching
/// §5's "bounded worker pool (10-32 depending on stage)" guidance.
const PROJECTION_FANOUT: usize = 16;

pub struct QueryEngine {
    catalog: Catalog,
    provider: Arc<BlobProvider>,
    grids: GridCache,
}

impl QueryEngine {
    pub fn new(catalog: Catalog, provider: Arc<BlobProvider>) -> Self {
        Self { catalog, provider, grids: GridCache::new() }
    }

    /// Run the full §4.8 algorithm for one (lat, lon) query point.
    pub async fn query(
        &self,
        lat: f64,
        lon: f64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        metric_ids: &[i64],
    ) -> Result<Vec<DataPointSet>, WeatherError> {
        let (start, end) = clamp_bounds(start, end);

        // Step 1: SourceFields matching the metric filter, projection-resolved
        // and non-intermediate (the Catalog query already applies this filter).
        let fields = self.catalog.source_fields_for_metrics(metric_ids).await?;
        if fields.is_empty() {
            return Ok(Vec::new());
        }

        // Step 2+3: resolve (x,y) per distinct projection, dropping fields
        // whose projection doesn't cover the point.
        let mut by_projection: HashMap<i64, (u32, u32)> = HashMap::new();
        let mut grouped: HashMap<i64, Vec<FieldRef>> = HashMap::new();
        for field in &fields {
            let Some(projection_id) = field.projection_id else { continue };
            let xy = match by_projection.get(&projection_id) {
                Some(xy) => Some(*xy),
                None => {
                    let xy = self.locate(projection_id, lat, lon).await?;
                    if let Some(xy) = xy {
                        by_projection.insert(projection_id, xy);
                    }
                    xy
                }
            };
            if xy.is_none() {
                continue;
            }
            grouped.entry(projection_id).or_default().push(field_ref(field));
        }

        if grouped.is_empty() {
            return Err(WeatherError::NotCovered);
        }

        // Step 4: bounded-concurrency fan-out, one `get_fields` call per
        // projection that still has surviving fields.
        let catalog = &self.catalog;
        let provider = &self.provider;
        let results: Vec<Result<Vec<DataPointSet>, WeatherError>> = stream::iter(grouped.into_iter())
            .map(|(projection_id, field_refs)| {
                let xy = by_projection[&projection_id];
                async move { provider.get_fields(catalog, projection_id, xy, &field_refs, start, end).await }
            })
            .buffer_unordered(PROJECTION_FANOUT)
            .collect()
            .await;

        // Step 5: flatten and order by (valid_time, run_time).
        let mut points = Vec::new();
        for result in results {
            points.extend(result?);
        }
        points.sort_by(|a, b| a.valid_time.cmp(&b.valid_time).then(a.run_time.cmp(&b.run_time)));

        Ok(points)
    }

    /// Memoized `Grid::locate`, rebuilding the grid from the Catalog's stored
    /// lat/lon arrays on first sight of a projection.
    async fn locate(&self, projection_id: i64, lat: f64, lon: f64) -> Result<Option<(u32, u32)>, WeatherError> {
        let grid = match self.grids.get(projection_id) {
            Some(grid) => grid,
            None => {
                let row = self
                    .catalog
                    .get_projection(projection_id)
                    .await?
                    .ok_or_else(|| WeatherError::Internal(format!("projection {projection_id} missing from catalog")))?;
                let grid = Grid::new(row.n_x as u32, row.n_y as u32, row.lats, row.lons)
                    .map_err(|e| WeatherError::Internal(e.to_string()))?;
                self.grids.insert(projection_id, grid)
            }
        };
        Ok(grid.locate(lat, lon))
    }
}

fn field_ref(field: &SourceField) -> FieldRef {
    FieldRef { source_field_id: field.id, metric_id: field.metric_id }
}

/// §4.8's production-mode clamp: queries can't reach further than a day into
/// the past or a week into the future.
fn clamp_bounds(start: DateTime<Utc>, end: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    let earliest = now - chrono::Duration::days(1);
    let latest = now + chrono::Duration::days(7);
    (start.max(earliest), end.min(latest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_bounds_widens_to_allowed_window() {
        let now = Utc::now();
        let (start, end) = clamp_bounds(now - chrono::Duration::days(30), now + chrono::Duration::days(30));
        assert!(start >= now - chrono::Duration::days(1) - chrono::Duration::seconds(1));
        assert!(end <= now + chrono::Duration::days(7) + chrono::Duration::seconds(1));
    }

    #[test]
    fn clamp_bounds_leaves_narrow_window_untouched() {
        let now = Utc::now();
        let start = now - chrono::Duration::hours(1);
        let end = now + chrono::Duration::hours(1);
        let (clamped_start, clamped_end) = clamp_bounds(start, end);
        assert_eq!(clamped_start, start);
        assert_eq!(clamped_end, end);
    }
}
