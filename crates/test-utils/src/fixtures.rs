//! Common test fixtures shared across the ingest-to-query pipeline's test
//! suites: known grids, cycle schedules, and real lat/lon points worth
//! exercising the hill-climb locate against.

/// Grid specifications matching real NWP model domains (§3's Projection).
pub mod grid {
    /// GFS global grid (0.25 degree resolution).
    pub const GFS_GLOBAL: GridSpec = GridSpec {
        width: 1440,
        height: 721,
        min_lon: 0.0,
        max_lon: 359.75,
        min_lat: -90.0,
        max_lat: 90.0,
    };

    /// HRRR CONUS grid (3km resolution).
    pub const HRRR_CONUS: GridSpec = GridSpec {
        width: 1799,
        height: 1059,
        min_lon: -134.09,
        max_lon: -60.92,
        min_lat: 21.14,
        max_lat: 52.62,
    };

    /// Small grid for fast unit tests.
    pub const SIMPLE_10X10: GridSpec = GridSpec {
        width: 10,
        height: 10,
        min_lon: -10.0,
        max_lon: 10.0,
        min_lat: -10.0,
        max_lat: 10.0,
    };

    #[derive(Debug, Clone, Copy)]
    pub struct GridSpec {
        pub width: usize,
        pub height: usize,
        pub min_lon: f64,
        pub max_lon: f64,
        pub min_lat: f64,
        pub max_lat: f64,
    }

    impl GridSpec {
        pub fn size(&self) -> usize {
            self.width * self.height
        }

        pub fn resolution(&self) -> (f64, f64) {
            let dx = (self.max_lon - self.min_lon) / self.width as f64;
            let dy = (self.max_lat - self.min_lat) / self.height as f64;
            (dx, dy)
        }

        /// Row-major (lat, lon) points for the whole grid, as
        /// `projection::Grid::from_points` expects them.
        pub fn points(&self) -> Vec<(f64, f64)> {
            let (dx, dy) = self.resolution();
            let mut points = Vec::with_capacity(self.size());
            for row in 0..self.height {
                for col in 0..self.width {
                    points.push((self.min_lat + row as f64 * dy, self.min_lon + col as f64 * dx));
                }
            }
            points
        }
    }
}

/// Per-source cycle and horizon constants matching real production models.
pub mod cycles {
    /// GFS model run times (four cycles a day).
    pub const GFS_CYCLES: [u32; 4] = [0, 6, 12, 18];

    /// HRRR model run times (hourly).
    pub const HRRR_CYCLES: [u32; 24] = [
        0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23,
    ];

    /// A spread of forecast hours covering both the dense near-term and
    /// sparse far-horizon parts of a typical schedule (§4.1).
    pub const FORECAST_HOURS: [u32; 8] = [0, 1, 3, 6, 12, 24, 48, 120];
}

/// GRIB2 index short-names and levels for the metrics this system ingests
/// (§3's SourceField), matching the producer-side encoding used by GFS/HRRR.
pub mod params {
    pub const TMP_2M: (&str, &str) = ("TMP", "2 m above ground");
    pub const UGRD_10M: (&str, &str) = ("UGRD", "10 m above ground");
    pub const VGRD_10M: (&str, &str) = ("VGRD", "10 m above ground");
    pub const PRMSL: (&str, &str) = ("PRMSL", "mean sea level");
    pub const APCP: (&str, &str) = ("APCP", "surface");

    /// Standard isobaric levels (hPa) for upper-air fields.
    pub const STANDARD_ISOBARIC_HPA: [f64; 7] = [1000.0, 925.0, 850.0, 700.0, 500.0, 300.0, 250.0];
}

/// Real-world (lat, lon) points worth exercising the query path against:
/// interior, coastal, high-altitude, and out-of-domain locations.
pub mod locations {
    pub const OKLAHOMA_CITY: (f64, f64) = (35.47, -97.52);
    pub const DENVER: (f64, f64) = (39.74, -104.99);
    pub const SAN_FRANCISCO: (f64, f64) = (37.77, -122.42);
    pub const WASHINGTON_DC: (f64, f64) = (38.90, -77.04);
    pub const GULF_OF_MEXICO: (f64, f64) = (26.0, -92.0);

    /// Well outside any CONUS-scale grid's bounding box.
    pub const TOKYO: (f64, f64) = (35.68, 139.69);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_spec_size_and_resolution() {
        assert_eq!(grid::GFS_GLOBAL.size(), 1440 * 721);
        let (dx, dy) = grid::SIMPLE_10X10.resolution();
        assert!((dx - 2.0).abs() < 1e-9);
        assert!((dy - 2.0).abs() < 1e-9);
    }

    #[test]
    fn grid_spec_points_matches_size() {
        let points = grid::SIMPLE_10X10.points();
        assert_eq!(points.len(), grid::SIMPLE_10X10.size());
    }

    #[test]
    fn locations_are_within_expected_hemispheres() {
        let (lat, lon) = locations::OKLAHOMA_CITY;
        assert!(lat > 0.0);
        assert!(lon < 0.0);
    }
}
