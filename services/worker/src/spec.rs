//! Builds a `SourceIngestSpec` for a source from its seeded Catalog rows,
//! caching the result since SourceFields rarely change after bootstrap.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use ingestion::{FieldSelector, SourceIngestSpec, WindFieldIds};
use storage::catalog::Catalog;
use tokio::sync::RwLock;

/// Metric names the derived wind generator (§4.4) fills in. A source
/// produces wind if its SourceFields include both, with an empty
/// `index_short_name` marking them as derived-only (never directly
/// downloaded).
const WIND_SPEED_METRIC: &str = "wind_speed_10m";
const WIND_DIRECTION_METRIC: &str = "wind_direction_10m";

pub struct SpecCache {
    catalog: Catalog,
    cache: RwLock<HashMap<i64, Arc<SourceIngestSpec>>>,
}

impl SpecCache {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog, cache: RwLock::new(HashMap::new()) }
    }

    pub async fn get(&self, source_id: i64) -> Result<Arc<SourceIngestSpec>> {
        if let Some(spec) = self.cache.read().await.get(&source_id) {
            return Ok(spec.clone());
        }

        let spec = Arc::new(self.build(source_id).await?);
        self.cache.write().await.insert(source_id, spec.clone());
        Ok(spec)
    }

    async fn build(&self, source_id: i64) -> Result<SourceIngestSpec> {
        let fields = self.catalog.source_fields_for_source(source_id).await?;
        let metrics = self.catalog.list_metrics().await?;
        let metric_by_id: HashMap<i64, &storage::catalog::Metric> = metrics.iter().map(|m| (m.id, m)).collect();

        let mut fetch_selectors = Vec::new();
        let mut selectors = Vec::new();
        let mut speed_field_id = None;
        let mut direction_field_id = None;

        for field in &fields {
            let Some(metric) = metric_by_id.get(&field.metric_id) else { continue };
            if metric.name == WIND_SPEED_METRIC {
                speed_field_id = Some(field.id);
                continue;
            }
            if metric.name == WIND_DIRECTION_METRIC {
                direction_field_id = Some(field.id);
                continue;
            }
            if field.index_short_name.is_empty() {
                continue;
            }

            let selector = FieldSelector { short_name: field.index_short_name.clone(), level: field.index_level.clone() };
            fetch_selectors.push(selector.clone());
            // Intermediate metrics (e.g. raw U/V wind components) are
            // fetched so the derived-field generator can see them, but
            // never written as their own output bands (§3).
            if !metric.intermediate {
                selectors.push((selector, field.id));
            }
        }

        let wind_field_ids = match (speed_field_id, direction_field_id) {
            (Some(speed_field_id), Some(direction_field_id)) => Some(WindFieldIds { speed_field_id, direction_field_id }),
            _ => None,
        };

        Ok(SourceIngestSpec { fetch_selectors, selectors, wind_field_ids })
    }
}
