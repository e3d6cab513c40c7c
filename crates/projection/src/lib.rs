//! Projection grid identity and point lookup.
//!
//! A projection is the full 2-D lat/lon array a decoded message was carried
//! on. Two messages from the same model run (or from different runs of a
//! model whose grid never changes) share a projection; this crate gives that
//! sharing a stable identity and a cheap way to turn a query coordinate into
//! a grid index.
//!
//! Persistence of the registry (looking up or creating a projection row by
//! its hash) lives in `storage::catalog`; this crate only holds the pure
//! grid math, so it has no database dependency.

pub use grib2_parser::sections::{ll_hash, normalize_longitude};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("grid has {expected} points but {lats} lats / {lons} lons were supplied")]
    ShapeMismatch {
        expected: usize,
        lats: usize,
        lons: usize,
    },
}

/// A materialized grid: the lat/lon value at every (x, y) index, row-major
/// with y (latitude axis) varying slowest.
#[derive(Debug, Clone)]
pub struct Grid {
    pub n_x: u32,
    pub n_y: u32,
    lats: Vec<f64>,
    lons: Vec<f64>,
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
}

impl Grid {
    pub fn new(n_x: u32, n_y: u32, lats: Vec<f64>, lons: Vec<f64>) -> Result<Self, ProjectionError> {
        let expected = n_x as usize * n_y as usize;
        if lats.len() != expected || lons.len() != expected {
            return Err(ProjectionError::ShapeMismatch {
                expected,
                lats: lats.len(),
                lons: lons.len(),
            });
        }
        let (min_lat, max_lat) = min_max(&lats);
        let (min_lon, max_lon) = min_max(&lons);
        Ok(Self {
            n_x,
            n_y,
            lats,
            lons,
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        })
    }

    /// Build a grid directly from the row-major (lat, lon) pairs a decoded
    /// message reports, as returned by `Grib2Message::latlon_points`.
    pub fn from_points(n_x: u32, n_y: u32, points: &[(f64, f64)]) -> Result<Self, ProjectionError> {
        let lats = points.iter().map(|p| p.0).collect();
        let lons = points.iter().map(|p| p.1).collect();
        Self::new(n_x, n_y, lats, lons)
    }

    /// Identity hash for this grid, matching the hash a Decoder would
    /// compute from the raw message before the grid is persisted.
    pub fn ll_hash(&self) -> u32 {
        let points: Vec<(f64, f64)> = self
            .lats
            .iter()
            .copied()
            .zip(self.lons.iter().copied())
            .collect();
        ll_hash(&points)
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.n_x as usize + x as usize
    }

    fn point_at(&self, x: u32, y: u32) -> (f64, f64) {
        let idx = self.index(x, y);
        (self.lats[idx], self.lons[idx])
    }

    /// Locate the grid index nearest `(lat, lon)` by a local hill-climb from
    /// the grid center: at each step, check the 8 neighbors of the current
    /// best index and move to whichever reduces squared distance, stopping
    /// when no neighbor improves. The longitude axis wraps (global grids
    /// cross the antimeridian); the latitude axis is clamped, since grids
    /// terminate at the poles rather than wrapping.
    ///
    /// Returns `None` if the query point falls outside this grid's
    /// lat/lon bounding box — the short-circuit the query service relies on
    /// to avoid a backend call for points the projection can't possibly
    /// cover.
    pub fn locate(&self, lat: f64, lon: f64) -> Option<(u32, u32)> {
        if self.n_x == 0 || self.n_y == 0 {
            return None;
        }
        let lon = normalize_longitude(lon);
        if lat < self.min_lat || lat > self.max_lat || lon < self.min_lon || lon > self.max_lon {
            return None;
        }

        let mut x = self.n_x / 2;
        let mut y = self.n_y / 2;
        let mut best = dist2(self.point_at(x, y), (lat, lon));

        loop {
            let mut improved = None;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let ny = y as i64 + dy;
                    if ny < 0 || ny >= self.n_y as i64 {
                        continue;
                    }
                    let nx = (x as i64 + dx).rem_euclid(self.n_x as i64) as u32;
                    let ny = ny as u32;
                    let d = dist2(self.point_at(nx, ny), (lat, lon));
                    if d < best {
                        best = d;
                        improved = Some((nx, ny));
                    }
                }
            }
            match improved {
                Some((nx, ny)) => {
                    x = nx;
                    y = ny;
                }
                None => break,
            }
        }

        Some((x, y))
    }
}

fn dist2(a: (f64, f64), b: (f64, f64)) -> f64 {
    let dlat = a.0 - b.0;
    let dlon = a.1 - b.1;
    dlat * dlat + dlon * dlon
}

fn min_max(values: &[f64]) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in values {
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
        }
    }
    (min, max)
}

/// Process-wide cache of materialized grids keyed by projection id, so the
/// query service and merger don't refetch and rebuild a `Grid` on every
/// lookup. The merger calls `invalidate` after a projection's stored lat/lon
/// arrays change (which in practice never happens post-creation, but the
/// entry point exists so a correction doesn't silently serve a stale grid).
#[derive(Default)]
pub struct GridCache {
    grids: std::sync::RwLock<std::collections::HashMap<i64, std::sync::Arc<Grid>>>,
}

impl GridCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, projection_id: i64) -> Option<std::sync::Arc<Grid>> {
        self.grids.read().unwrap().get(&projection_id).cloned()
    }

    pub fn insert(&self, projection_id: i64, grid: Grid) -> std::sync::Arc<Grid> {
        let grid = std::sync::Arc::new(grid);
        self.grids
            .write()
            .unwrap()
            .insert(projection_id, grid.clone());
        grid
    }

    pub fn invalidate(&self, projection_id: i64) {
        self.grids.write().unwrap().remove(&projection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_grid() -> Grid {
        // 3x3 grid, 1 degree spacing, centered on (40, -100)
        let mut points = Vec::new();
        for y in 0..3 {
            for x in 0..3 {
                let lat = 39.0 + y as f64;
                let lon = -101.0 + x as f64;
                points.push((lat, lon));
            }
        }
        Grid::from_points(3, 3, &points).unwrap()
    }

    #[test]
    fn locate_finds_exact_point() {
        let grid = small_grid();
        assert_eq!(grid.locate(40.0, -100.0), Some((1, 1)));
    }

    #[test]
    fn locate_finds_nearest_off_grid_point() {
        let grid = small_grid();
        assert_eq!(grid.locate(40.4, -100.4), Some((1, 1)));
    }

    #[test]
    fn locate_returns_none_outside_bbox() {
        let grid = small_grid();
        assert_eq!(grid.locate(0.0, 0.0), None);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let err = Grid::new(2, 2, vec![1.0, 2.0, 3.0], vec![1.0, 2.0, 3.0]);
        assert!(err.is_err());
    }

    #[test]
    fn cache_round_trip() {
        let cache = GridCache::new();
        assert!(cache.get(1).is_none());
        let grid = small_grid();
        cache.insert(1, grid);
        assert!(cache.get(1).is_some());
        cache.invalidate(1);
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn locates_real_world_points_on_a_conus_scale_grid() {
        let spec = test_utils::fixtures::grid::HRRR_CONUS;
        let grid = Grid::from_points(spec.width as u32, spec.height as u32, &spec.points()).unwrap();

        let (lat, lon) = test_utils::fixtures::locations::OKLAHOMA_CITY;
        assert!(grid.locate(lat, lon).is_some());

        let (lat, lon) = test_utils::fixtures::locations::TOKYO;
        assert_eq!(grid.locate(lat, lon), None);
    }
}
