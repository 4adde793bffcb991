//! LV95 → WGS84 coordinate conversion
//!
//! Approximate swisstopo formula (accuracy around 1 m), sufficient for
//! distance checks against a 50 m tolerance. Intermediate values are in
//! units of 10 000 arc seconds; the 100/36 factor rescales to degrees.

/// LV95 easting of the projection origin (Bern)
const ORIGIN_EASTING: f64 = 2_600_000.0;
/// LV95 northing of the projection origin (Bern)
const ORIGIN_NORTHING: f64 = 1_200_000.0;

/// Convert LV95 easting/northing to WGS84 (latitude, longitude)
///
/// Output is rounded to 6 decimal places.
pub fn convert(easting: f64, northing: f64) -> (f64, f64) {
    let y = (easting - ORIGIN_EASTING) / 1_000_000.0;
    let x = (northing - ORIGIN_NORTHING) / 1_000_000.0;

    let lon_aux = 2.677_909_4 + 4.728_982 * y + 0.791_484 * y * x + 0.130_6 * y * x * x
        - 0.043_6 * y * y * y;

    let lat_aux = 16.902_389_2 + 3.238_272 * x
        - 0.270_978 * y * y
        - 0.002_528 * x * x
        - 0.044_7 * y * y * x
        - 0.014_0 * x * x * x;

    (round6(lat_aux * 100.0 / 36.0), round6(lon_aux * 100.0 / 36.0))
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
