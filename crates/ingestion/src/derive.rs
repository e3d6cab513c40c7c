//! Derived-field generator (§4.4). Reference case: HRRR 10 m wind
//! speed/direction from the U/V components.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use storage::PutBand;

use crate::decode::DecodedMessage;

const U_COMPONENT_NAME: &str = "10 metre U wind component";
const V_COMPONENT_NAME: &str = "10 metre V wind component";

/// The two derived SourceField ids this generator fills in, resolved by the
/// caller from the Catalog (wind-speed and wind-direction metrics).
#[derive(Debug, Clone, Copy)]
pub struct WindFieldIds {
    pub speed_field_id: i64,
    pub direction_field_id: i64,
}

/// Compute wind speed and direction bands from paired U/V messages sharing a
/// projection. Messages are matched by (valid_time, run_time) after each
/// series is sorted, per spec; a U with no matching V (or vice versa)
/// contributes nothing.
pub fn wind_from_uv(
    messages: &[&DecodedMessage],
    field_ids: WindFieldIds,
) -> Vec<PutBand> {
    let mut u: Vec<&DecodedMessage> = messages
        .iter()
        .copied()
        .filter(|m| m.message.parameter() == U_COMPONENT_NAME)
        .collect();
    let mut v: Vec<&DecodedMessage> = messages
        .iter()
        .copied()
        .filter(|m| m.message.parameter() == V_COMPONENT_NAME)
        .collect();

    u.sort_by_key(|m| (m.message.valid_time(), m.message.identification.reference_time));
    v.sort_by_key(|m| (m.message.valid_time(), m.message.identification.reference_time));

    let v_by_time: HashMap<(DateTime<Utc>, DateTime<Utc>), &DecodedMessage> = v
        .into_iter()
        .map(|m| ((m.message.valid_time(), m.message.identification.reference_time), m))
        .collect();

    let mut bands = Vec::new();
    for u_msg in u {
        let key = (u_msg.message.valid_time(), u_msg.message.identification.reference_time);
        let Some(&v_msg) = v_by_time.get(&key) else {
            continue;
        };
        if u_msg.values.len() != v_msg.values.len() {
            continue;
        }

        let mut speeds = Vec::with_capacity(u_msg.values.len());
        let mut directions = Vec::with_capacity(u_msg.values.len());
        for (&uu, &vv) in u_msg.values.iter().zip(v_msg.values.iter()) {
            let speed = (uu * uu + vv * vv).sqrt();
            // atan2(0, 0) = 0, so calm wind (u=v=0) falls out of this formula
            // as 90.0 rather than an undefined direction — matches the
            // reference numeric library's end-to-end output.
            let angle_deg = vv.atan2(uu).to_degrees();
            let direction = (90.0 - angle_deg).rem_euclid(360.0);
            speeds.push(speed);
            directions.push(direction);
        }

        bands.push(PutBand {
            source_field_id: field_ids.speed_field_id,
            valid_time: key.0,
            run_time: key.1,
            vals_per_loc: 1,
            values: speeds,
        });
        bands.push(PutBand {
            source_field_id: field_ids.direction_field_id,
            valid_time: key.0,
            run_time: key.1,
            vals_per_loc: 1,
            values: directions,
        });
    }

    bands
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direction_only(u: f32, v: f32) -> f32 {
        (90.0 - v.atan2(u).to_degrees()).rem_euclid(360.0)
    }

    #[test]
    fn calm_wind_direction_falls_out_of_atan2_as_ninety() {
        assert_eq!(direction_only(0.0, 0.0), 90.0);
    }

    #[test]
    fn northerly_wind_blows_toward_180() {
        // u=0, v=-1: wind from the north blowing south.
        let dir = direction_only(0.0, -1.0);
        assert!((dir - 180.0).abs() < 1e-4);
    }

    #[test]
    fn easterly_wind_blows_toward_270() {
        // u=-1, v=0: wind from the east blowing west.
        let dir = direction_only(-1.0, 0.0);
        assert!((dir - 270.0).abs() < 1e-4);
    }

    #[test]
    fn speed_is_vector_magnitude() {
        let speed = (3.0f32 * 3.0 + 4.0 * 4.0).sqrt();
        assert_eq!(speed, 5.0);
    }
}
