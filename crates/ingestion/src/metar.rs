//! METAR station-observation ingest (§6.1, supplemental): parses the
//! aviationweather.gov `metars.cache.xml` feed, normalizes each station's
//! fields to SI units, and girds the scattered reports onto a regular
//! lat/lon grid via Cressman interpolation so the result can be registered
//! as a Projection like any NWP source and flow through the same
//! Writer/Catalog/Query path.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use storage::catalog::Catalog;
use storage::PutBand;

use crate::error::{IngestionError, Result};

/// Degrees between grid points, chosen to approximate the ~10 km spacing
/// the original gridder targets (1 degree of latitude is ~111 km).
const DEFAULT_GRID_SPACING_DEG: f64 = 0.09;

/// Cressman influence radius: a grid point farther than this from every
/// station gets no value rather than an extrapolated one.
const CRESSMAN_RADIUS_DEG: f64 = 1.0;

const FIELD_NAMES: &[&str] = &[
    "temp_c",
    "wind_speed_kt",
    "wind_gust_kt",
    "wind_dir_degrees",
    "visibility_statute_mi",
    "sea_level_pressure_mb",
];

/// One station's fields, already unit-normalized to SI (K, Pa, m/s, m).
#[derive(Debug, Clone, Default)]
pub struct StationObs {
    pub lat: f64,
    pub lon: f64,
    pub fields: HashMap<String, f32>,
}

fn normalize(field: &str, raw: f32) -> f32 {
    match field {
        "temp_c" => raw + 273.15,
        "sea_level_pressure_mb" => raw * 100.0,
        "wind_speed_kt" | "wind_gust_kt" => raw / 1.944,
        "visibility_statute_mi" => raw * 1609.0,
        _ => raw,
    }
}

/// The SourceField short name a raw METAR XML field is registered under.
pub fn short_name_for(field: &str) -> &'static str {
    match field {
        "temp_c" => "TMP",
        "wind_speed_kt" => "WSPD",
        "wind_gust_kt" => "GUST",
        "wind_dir_degrees" => "WDIR",
        "visibility_statute_mi" => "VIS",
        "sea_level_pressure_mb" => "PRMSL",
        _ => "UNKNOWN",
    }
}

/// Parse one `<METAR>` element per station with both a latitude and
/// longitude; a station missing an individual field simply omits it from
/// `fields`, matching the source feed (not every report carries every
/// field).
pub fn parse_metar_xml(xml: &str) -> Result<Vec<StationObs>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut out = Vec::new();
    let mut in_metar = false;
    let mut current_tag: Option<String> = None;
    let mut lat: Option<f64> = None;
    let mut lon: Option<f64> = None;
    let mut fields: HashMap<String, f32> = HashMap::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| IngestionError::Config(format!("metar xml: {e}")))?;
        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "METAR" {
                    in_metar = true;
                    lat = None;
                    lon = None;
                    fields.clear();
                } else if in_metar {
                    current_tag = Some(name);
                }
            }
            Event::Text(t) => {
                if let Some(tag) = &current_tag {
                    let text = t
                        .unescape()
                        .map_err(|e| IngestionError::Config(format!("metar xml: {e}")))?;
                    match tag.as_str() {
                        "latitude" => lat = text.parse().ok(),
                        "longitude" => lon = text.parse().ok(),
                        name if FIELD_NAMES.contains(&name) => {
                            if let Ok(raw) = text.parse::<f32>() {
                                fields.insert(name.to_string(), normalize(name, raw));
                            }
                        }
                        _ => {}
                    }
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "METAR" {
                    in_metar = false;
                    if let (Some(lat), Some(lon)) = (lat, lon) {
                        out.push(StationObs { lat, lon, fields: fields.clone() });
                    }
                }
                current_tag = None;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

/// A regular grid covering the station bounding box at `spacing_deg`
/// between points, in (n_x, n_y, lats, lons) row-major form matching
/// `Grid::from_points`'s layout (y varies slowest).
fn build_grid(stations: &[StationObs], spacing_deg: f64) -> (u32, u32, Vec<f64>, Vec<f64>) {
    let (mut min_lat, mut max_lat, mut min_lon, mut max_lon) =
        (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY);
    for s in stations {
        min_lat = min_lat.min(s.lat);
        max_lat = max_lat.max(s.lat);
        min_lon = min_lon.min(s.lon);
        max_lon = max_lon.max(s.lon);
    }

    let n_y = (((max_lat - min_lat) / spacing_deg).ceil() as u32 + 1).max(1);
    let n_x = (((max_lon - min_lon) / spacing_deg).ceil() as u32 + 1).max(1);

    let mut lats = Vec::with_capacity((n_x * n_y) as usize);
    let mut lons = Vec::with_capacity((n_x * n_y) as usize);
    for y in 0..n_y {
        for x in 0..n_x {
            lats.push(min_lat + y as f64 * spacing_deg);
            lons.push(min_lon + x as f64 * spacing_deg);
        }
    }
    (n_x, n_y, lats, lons)
}

/// Cressman-interpolate one field onto `(grid_lats, grid_lons)`: each grid
/// point's value is the weighted average of every station within
/// `radius_deg`, weighted by `(R^2 - d^2) / (R^2 + d^2)`. A grid point with
/// no station in range gets `None` rather than an extrapolated value.
fn cressman_interpolate(
    stations: &[StationObs],
    field: &str,
    grid_lats: &[f64],
    grid_lons: &[f64],
    radius_deg: f64,
) -> Vec<Option<f32>> {
    let obs: Vec<(f64, f64, f32)> = stations
        .iter()
        .filter_map(|s| s.fields.get(field).map(|&v| (s.lat, s.lon, v)))
        .collect();
    let r2 = radius_deg * radius_deg;

    grid_lats
        .iter()
        .zip(grid_lons)
        .map(|(&glat, &glon)| {
            let mut weight_sum = 0.0;
            let mut value_sum = 0.0;
            for &(slat, slon, v) in &obs {
                let d2 = (glat - slat).powi(2) + (glon - slon).powi(2);
                if d2 >= r2 {
                    continue;
                }
                let w = (r2 - d2) / (r2 + d2);
                weight_sum += w;
                value_sum += w * v as f64;
            }
            (weight_sum > 0.0).then(|| (value_sum / weight_sum) as f32)
        })
        .collect()
}

/// Grid every configured field of `stations`, register the result as a
/// Projection, and produce one `PutBand` per field with at least one
/// station observation in range. `field_ids` maps each field's short name
/// (see `short_name_for`) to the `source_fields.id` the caller resolved
/// from the Catalog, mirroring `WindFieldIds`'s role in
/// `derive::wind_from_uv`. Grid points outside every station's influence
/// radius are written as `f32::NAN`, same as a GRIB2 bitmap's masked
/// points.
pub async fn ingest_metar(
    catalog: &Catalog,
    stations: &[StationObs],
    field_ids: &HashMap<&'static str, i64>,
    run_time: DateTime<Utc>,
) -> Result<(i64, Vec<PutBand>)> {
    if stations.is_empty() {
        return Err(IngestionError::NotYetPublished("metar: no stations parsed".to_string()));
    }

    let (n_x, n_y, lats, lons) = build_grid(stations, DEFAULT_GRID_SPACING_DEG);
    let points: Vec<(f64, f64)> = lats.iter().copied().zip(lons.iter().copied()).collect();
    let ll_hash = projection::ll_hash(&points);
    let projection_id = catalog
        .find_or_create_projection(ll_hash as i64, n_x as i32, n_y as i32, &lats, &lons)
        .await?;

    let mut bands = Vec::new();
    for &field in FIELD_NAMES {
        let Some(&field_id) = field_ids.get(short_name_for(field)) else {
            continue;
        };
        let values = cressman_interpolate(stations, field, &lats, &lons, CRESSMAN_RADIUS_DEG);
        if values.iter().all(Option::is_none) {
            continue;
        }
        let filled: Vec<f32> = values.into_iter().map(|v| v.unwrap_or(f32::NAN)).collect();
        bands.push(PutBand {
            source_field_id: field_id,
            valid_time: run_time,
            run_time,
            vals_per_loc: 1,
            values: filled,
        });
    }

    Ok((projection_id, bands))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_XML: &str = r#"
        <response>
          <data>
            <METAR>
              <latitude>38.0</latitude>
              <longitude>-97.0</longitude>
              <temp_c>20.0</temp_c>
              <wind_speed_kt>10.0</wind_speed_kt>
              <sea_level_pressure_mb>1013.0</sea_level_pressure_mb>
            </METAR>
            <METAR>
              <latitude>39.0</latitude>
              <longitude>-97.0</longitude>
              <temp_c>15.0</temp_c>
            </METAR>
            <METAR>
              <latitude>40.0</latitude>
            </METAR>
          </data>
        </response>
    "#;

    #[test]
    fn parses_stations_and_normalizes_units() {
        let stations = parse_metar_xml(SAMPLE_XML).unwrap();
        // The third METAR has no longitude and is dropped.
        assert_eq!(stations.len(), 2);
        assert!((stations[0].fields["temp_c"] - 293.15).abs() < 1e-3);
        assert!((stations[0].fields["wind_speed_kt"] - 10.0 / 1.944).abs() < 1e-3);
        assert!((stations[0].fields["sea_level_pressure_mb"] - 101300.0).abs() < 1e-3);
        assert!(!stations[1].fields.contains_key("wind_speed_kt"));
    }

    #[test]
    fn build_grid_covers_station_bbox() {
        let stations = parse_metar_xml(SAMPLE_XML).unwrap();
        let (n_x, n_y, lats, lons) = build_grid(&stations, 0.5);
        assert_eq!(lats.len(), (n_x * n_y) as usize);
        assert_eq!(lons.len(), (n_x * n_y) as usize);
        assert!(lats.iter().any(|&l| (l - 38.0).abs() < 1e-9));
        assert!(lats.iter().any(|&l| (l - 39.0).abs() < 1e-9));
    }

    #[test]
    fn cressman_weights_nearer_station_more_heavily() {
        let stations = vec![
            StationObs { lat: 38.0, lon: -97.0, fields: HashMap::from([("temp_c".to_string(), 300.0)]) },
            StationObs { lat: 40.0, lon: -97.0, fields: HashMap::from([("temp_c".to_string(), 280.0)]) },
        ];
        let grid_lats = vec![38.5];
        let grid_lons = vec![-97.0];
        let values = cressman_interpolate(&stations, "temp_c", &grid_lats, &grid_lons, 5.0);
        let v = values[0].expect("within radius");
        // Closer to the 300K station, so the blend should land above the midpoint.
        assert!(v > 290.0);
    }

    #[test]
    fn cressman_returns_none_outside_radius() {
        let stations = vec![StationObs {
            lat: 0.0,
            lon: 0.0,
            fields: HashMap::from([("temp_c".to_string(), 300.0)]),
        }];
        let values = cressman_interpolate(&stations, "temp_c", &[50.0], &[50.0], 1.0);
        assert_eq!(values[0], None);
    }
}
