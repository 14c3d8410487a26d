//! UV index derivation (§4.5 step 5): solar zenith angle per grid cell,
//! then the Madronich clear-sky approximation.

use crate::grid::{GridField, GridHeader};
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::f64::consts::PI;

/// Normalize longitude to `[-180, 180)`.
fn normalize_lon(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Solar declination from day-of-year via the standard 23.45°·sin formula.
fn solar_declination_deg(day_of_year: u32) -> f64 {
    23.45 * ((360.0 / 365.0) * (284.0 + day_of_year as f64) * PI / 180.0).sin()
}

/// Hour angle in degrees from UTC time and longitude (crude local-solar-time
/// approximation: 15° per hour offset from solar noon at the given meridian).
fn hour_angle_deg(now: DateTime<Utc>, lon: f64) -> f64 {
    let utc_hours = now.hour() as f64 + now.minute() as f64 / 60.0 + now.second() as f64 / 3600.0;
    let local_solar_hours = utc_hours + lon / 15.0;
    (local_solar_hours - 12.0) * 15.0
}

/// Solar zenith angle in degrees for `(lat, lon)` at `now`.
pub fn solar_zenith_deg(lat: f64, lon: f64, now: DateTime<Utc>) -> f64 {
    let lon = normalize_lon(lon);
    let decl = solar_declination_deg(now.ordinal()).to_radians();
    let hour_angle = hour_angle_deg(now, lon).to_radians();
    let lat_rad = lat.to_radians();

    let cos_theta = lat_rad.sin() * decl.sin() + lat_rad.cos() * decl.cos() * hour_angle.cos();
    cos_theta.clamp(-1.0, 1.0).acos().to_degrees()
}

/// Madronich clear-sky UV index: `12.5 · cos(θ)^2.42 · (O₃/300)^-1.23`,
/// clamped to `≥ 0`. Zero for `θ ≥ 90°`; `NaN` for non-positive or
/// non-finite ozone.
pub fn madronich_uv_index(zenith_deg: f64, ozone_dobson: f64) -> f64 {
    if zenith_deg >= 90.0 {
        return 0.0;
    }
    if !ozone_dobson.is_finite() || ozone_dobson <= 0.0 {
        return f64::NAN;
    }
    let cos_theta = zenith_deg.to_radians().cos();
    let uv = 12.5 * cos_theta.powf(2.42) * (ozone_dobson / 300.0).powf(-1.23);
    uv.max(0.0)
}

/// Derive a UV-index `GridField` over `header`'s cells at `now`, sourcing
/// ozone from the matching cell of `ozone` (same dimensions as `header`).
pub fn derive_uv_index_grid(header: GridHeader, ozone: &[f64], now: DateTime<Utc>) -> GridField {
    let mut data = Vec::with_capacity(header.nx * header.ny);
    for row in 0..header.ny {
        let lat = header.la1 - row as f64 * header.dy;
        for col in 0..header.nx {
            let lon = header.lo1 + col as f64 * header.dx;
            let idx = row * header.nx + col;
            let ozone_value = ozone.get(idx).copied().unwrap_or(f64::NAN);
            let zenith = solar_zenith_deg(lat, lon, now);
            data.push(madronich_uv_index(zenith, ozone_value));
        }
    }
    GridField { header, data, unit: "index".to_string(), name: "uv_index".to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn zenith_at_90_degrees_gives_zero_uv() {
        assert_eq!(madronich_uv_index(90.0, 300.0), 0.0);
        assert_eq!(madronich_uv_index(120.0, 300.0), 0.0);
    }

    #[test]
    fn non_positive_ozone_is_nan() {
        assert!(madronich_uv_index(10.0, 0.0).is_nan());
        assert!(madronich_uv_index(10.0, -5.0).is_nan());
        assert!(madronich_uv_index(10.0, f64::NAN).is_nan());
    }

    #[test]
    fn overhead_sun_with_standard_ozone_is_positive_and_bounded() {
        let uv = madronich_uv_index(0.0, 300.0);
        assert!(uv > 0.0 && uv <= 12.5);
    }

    #[test]
    fn longitude_normalizes_into_range() {
        let now = Utc.with_ymd_and_hms(2026, 6, 21, 12, 0, 0).unwrap();
        let a = solar_zenith_deg(0.0, 190.0, now);
        let b = solar_zenith_deg(0.0, -170.0, now);
        assert!((a - b).abs() < 1e-9);
    }
}
