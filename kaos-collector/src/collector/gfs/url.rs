//! NOMADS filter URL synthesis (§4.5 step 1).

use chrono::{DateTime, Duration, Timelike, Utc};

const BASE_URL: &str = "https://nomads.ncep.noaa.gov/cgi-bin/filter_gfs_0p25.pl";

/// Round `hour` down to the nearest multiple of 6 (the GFS cycle grid:
/// 00, 06, 12, 18).
fn floor_to_cycle(hour: u32) -> u32 {
    (hour / 6) * 6
}

/// Latest available model cycle as of `now`: subtract 5h for publication
/// lag, then round the resulting hour down to the nearest 6-hour cycle.
/// Crossing midnight is handled naturally by subtracting a `Duration`
/// before truncating the hour.
pub fn latest_cycle(now: DateTime<Utc>) -> DateTime<Utc> {
    let lagged = now - Duration::hours(5);
    let cycle_hour = floor_to_cycle(lagged.hour());
    lagged
        .with_hour(cycle_hour)
        .and_then(|d| d.with_minute(0))
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(lagged)
}

/// One sub-collection's variable/level selector pair, e.g. `("TMP", "2_m_above_ground")`.
#[derive(Debug, Clone, Copy)]
pub struct VarLevel {
    pub var: &'static str,
    pub level: &'static str,
}

/// Build the NOMADS filter URL for `cycle` at `forecast_hour` (0 for the
/// analysis file, 1 for `f001` — used by precipitation rate, which the
/// analysis file omits) selecting the given variable/level pairs over the
/// 0.25° global grid.
pub fn filter_url(cycle: DateTime<Utc>, forecast_hour: u32, vars: &[VarLevel]) -> String {
    let date = cycle.format("%Y%m%d");
    let hh = cycle.format("%H");
    let file = format!("gfs.t{hh}z.pgrb2.0p25.f{forecast_hour:03}");
    let dir = format!("/gfs.{date}/{hh}/atmos");

    let mut url = format!("{BASE_URL}?file={file}");
    for vl in vars {
        url.push_str(&format!("&var_{}=on&lev_{}=on", vl.var, vl.level));
    }
    url.push_str(&format!("&dir={dir}"));
    url
}
