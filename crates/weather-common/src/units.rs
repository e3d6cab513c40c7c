//! Unit conversion helpers shared by ingestion sources that report in
//! non-SI units (METAR reports temperature in Celsius, wind in knots,
//! pressure in millibars, visibility in statute miles).

/// Celsius to Kelvin.
pub fn celsius_to_kelvin(c: f64) -> f64 {
    c + 273.15
}

/// Knots to meters/second.
pub fn knots_to_mps(kt: f64) -> f64 {
    kt * 0.514444
}

/// Millibars (== hectopascals) to Pascals.
pub fn millibars_to_pascals(mb: f64) -> f64 {
    mb * 100.0
}

/// Statute miles to meters.
pub fn statute_miles_to_meters(mi: f64) -> f64 {
    mi * 1609.344
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn celsius_freezing_point() {
        assert!((celsius_to_kelvin(0.0) - 273.15).abs() < 1e-9);
    }

    #[test]
    fn knots_roundish() {
        assert!((knots_to_mps(10.0) - 5.14444).abs() < 1e-6);
    }
}
