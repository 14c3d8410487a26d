//! APRS-IS streaming collector (§4.6): TCP line protocol, uncompressed and
//! compressed position decoding, working set keyed by callsign with a
//! 30 s persist timer and a 5 min eviction sweep for 1 h-silent stations.

use crate::error::CollectorError;
use crate::meta::CollectorStatus;
use crate::store::Store;
use crate::streaming::StreamingCollector;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

const PERSIST_INTERVAL: Duration = Duration::from_secs(30);
const EVICT_INTERVAL: Duration = Duration::from_secs(5 * 60);
const EVICTION_HORIZON_MS: i64 = 60 * 60 * 1000;
const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const RECONNECT_DELAY: Duration = Duration::from_secs(10);
const MAX_PERSISTED: usize = 5_000;
const PERSIST_KEY: &str = "kaos:aprs:stations";

#[derive(Debug, Clone, serde::Serialize)]
pub struct AprsStation {
    pub callsign: String,
    pub lat: f64,
    pub lon: f64,
    pub symbol: char,
    pub comment: String,
    pub course_deg: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub altitude_m: Option<f64>,
    pub last_heard: i64,
}

static COURSE_SPEED: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{3})/(\d{3})").unwrap());
static ALTITUDE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/A=(\d{6})").unwrap());

fn parse_degminh(deg_digits: &str, minsec: &str, hemisphere: char, positive: char) -> Option<f64> {
    let deg: f64 = deg_digits.parse().ok()?;
    let min: f64 = minsec.parse().ok()?;
    let value = deg + min / 60.0;
    Some(if hemisphere == positive { value } else { -value })
}

/// Parse one APRS-IS text line into a station update. Returns `None` for
/// server comments, unsupported packet types, or malformed/out-of-range
/// positions — callers treat `None` as "drop, don't upsert".
pub fn parse_line(line: &str, now_ms: i64) -> Option<AprsStation> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.starts_with('#') || line.is_empty() {
        return None;
    }

    let (header, body) = line.split_once(':')?;
    let (source, _rest) = header.split_once('>')?;
    let callsign = source.to_string();

    let mut chars = body.chars();
    let packet_type = chars.next()?;
    if !matches!(packet_type, '!' | '=' | '/' | '@') {
        return None;
    }
    let after_type = &body[packet_type.len_utf8()..];

    // `/` and `@` packets carry a 7-byte timestamp (DHM/HMS zulu or local,
    // 6 digits plus a type indicator) before the position data; `!`/`=`
    // carry none.
    let rest = if matches!(packet_type, '/' | '@') {
        if after_type.len() < 7 {
            return None;
        }
        &after_type[7..]
    } else {
        after_type
    };

    let position = if rest.len() >= 13 && is_compressed(rest) {
        parse_compressed(rest)
    } else if rest.len() >= 19 {
        parse_uncompressed(rest)
    } else {
        None
    }?;

    if position.lat.abs() > 90.0 || position.lon.abs() > 180.0 {
        return None;
    }

    Some(AprsStation {
        callsign,
        lat: position.lat,
        lon: position.lon,
        symbol: position.symbol,
        comment: position.comment,
        course_deg: position.course_deg,
        speed_kmh: position.speed_kmh,
        altitude_m: position.altitude_m,
        last_heard: now_ms,
    })
}

struct Position {
    lat: f64,
    lon: f64,
    symbol: char,
    comment: String,
    course_deg: Option<f64>,
    speed_kmh: Option<f64>,
    altitude_m: Option<f64>,
}

/// A compressed position's second byte is never a digit (compressed
/// latitude bytes are base-91, offset 33, which starts at `!`); an
/// uncompressed position's second byte is always a digit (`DDMM...`).
fn is_compressed(rest: &str) -> bool {
    rest.as_bytes().get(1).map(|b| !b.is_ascii_digit()).unwrap_or(false)
}

fn parse_uncompressed(rest: &str) -> Option<Position> {
    let bytes: Vec<char> = rest.chars().collect();
    if bytes.len() < 19 {
        return None;
    }
    let lat_deg: String = bytes[0..2].iter().collect();
    let lat_min: String = bytes[2..7].iter().collect();
    let lat_hemi = bytes[7];
    let symbol_table = bytes[8];
    let lon_deg: String = bytes[9..12].iter().collect();
    let lon_min: String = bytes[12..17].iter().collect();
    let lon_hemi = bytes[17];
    let symbol = bytes[18];
    let comment: String = bytes[19..].iter().collect();
    let _ = symbol_table;

    let lat = parse_degminh(&lat_deg, &lat_min, lat_hemi, 'N')?;
    let lon = parse_degminh(&lon_deg, &lon_min, lon_hemi, 'E')?;

    let course_speed = COURSE_SPEED.captures(&comment);
    let course_deg = course_speed.as_ref().and_then(|c| c[1].parse::<f64>().ok());
    let speed_kmh = course_speed.and_then(|c| c[2].parse::<f64>().ok()).map(|knots| knots * 1.852);
    let altitude_m = ALTITUDE
        .captures(&comment)
        .and_then(|c| c[1].parse::<f64>().ok())
        .map(|feet| feet * 0.3048);

    Some(Position { lat, lon, symbol, comment, course_deg, speed_kmh, altitude_m })
}

fn base91_decode_4(b: &[u8]) -> u32 {
    let mut n: u32 = 0;
    for &byte in &b[0..4] {
        n = n * 91 + (byte.saturating_sub(33)) as u32;
    }
    n
}

fn parse_compressed(rest: &str) -> Option<Position> {
    let bytes = rest.as_bytes();
    if bytes.len() < 13 {
        return None;
    }
    let symbol_table = bytes[0] as char;
    let _ = symbol_table;
    let lat_n = base91_decode_4(&bytes[1..5]);
    let lon_n = base91_decode_4(&bytes[5..9]);
    let symbol = bytes[9] as char;

    let lat = 90.0 - lat_n as f64 / 380_926.0;
    let lon = -180.0 + lon_n as f64 / 190_463.0;

    // Bytes 10..12: c, s, and the compression-type byte (all base-91,
    // offset 33). The compression-type byte's NMEA-source bits (0x18)
    // being 0x10 (GGA) mean c/s encode altitude rather than course/speed:
    // altitude_ft = 1.002^(cs), cs = (c-33)*91 + (s-33). Otherwise c/s are
    // course (units of 4 degrees) and log-scaled speed in knots.
    let c = bytes[10];
    let s = bytes[11];
    let t = bytes[12];
    let is_altitude = (t.wrapping_sub(33) & 0x18) == 0x10;
    let (course_deg, speed_kmh, altitude_m) = if is_altitude {
        let cs = (c as i32 - 33) * 91 + (s as i32 - 33);
        let altitude_ft = 1.002_f64.powi(cs);
        (None, None, Some(altitude_ft * 0.3048))
    } else if c >= 33 && c < 33 + 90 {
        let course = (c - 33) as f64 * 4.0;
        let speed_knots = 1.08f64.powi((s as i32) - 33) - 1.0;
        (Some(course), Some(speed_knots * 1.852), None)
    } else {
        (None, None, None)
    };

    Some(Position { lat, lon, symbol, comment: String::new(), course_deg, speed_kmh, altitude_m })
}

/// Shared state, cheap to clone into each spawned task (all fields are
/// `Arc`/`CancellationToken` handles or small owned config).
#[derive(Clone)]
struct AprsShared {
    servers: Arc<[String]>,
    login_callsign: Arc<str>,
    store: Arc<dyn Store>,
    working_set: Arc<Mutex<BTreeMap<String, AprsStation>>>,
    cancel: CancellationToken,
    /// Round-robins through `servers` across reconnect attempts.
    next_server: Arc<AtomicUsize>,
}

impl AprsShared {
    fn login_line(&self) -> String {
        format!("user {} pass -1 vers kaos-collector 0.1 filter r/30/0/10000\n", self.login_callsign)
    }

    async fn connect_and_pump(&self) -> Result<(), CollectorError> {
        if self.servers.is_empty() {
            return Err(CollectorError::InvariantViolation("no APRS-IS servers configured".to_string()));
        }
        let idx = self.next_server.fetch_add(1, Ordering::Relaxed) % self.servers.len();
        let server = &self.servers[idx];

        let stream = TcpStream::connect(server)
            .await
            .map_err(|e| CollectorError::TransientNetwork(e.to_string()))?;
        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(self.login_line().as_bytes())
            .await
            .map_err(|e| CollectorError::TransientNetwork(e.to_string()))?;

        self.store.set_meta("aprs", CollectorStatus::Ok, 0, crate::now_millis()).await;

        let mut lines = BufReader::new(reader).lines();
        loop {
            let next = tokio::time::timeout(IDLE_TIMEOUT, lines.next_line()).await;
            let line = match next {
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => return Ok(()), // server closed cleanly
                Ok(Err(e)) => return Err(CollectorError::TransientNetwork(e.to_string())),
                Err(_) => return Err(CollectorError::TransientNetwork("aprs idle timeout".to_string())),
            };

            if let Some(station) = parse_line(&line, crate::now_millis()) {
                self.working_set.lock().await.insert(station.callsign.clone(), station);
            }
        }
    }

    async fn persist_once(&self) {
        let snapshot = {
            let set = self.working_set.lock().await;
            let mut stations: Vec<AprsStation> = set.values().cloned().collect();
            stations.sort_by(|a, b| b.last_heard.cmp(&a.last_heard));
            stations.truncate(MAX_PERSISTED);
            stations
        };
        match serde_json::to_value(&snapshot) {
            Ok(value) => {
                if let Err(err) = self.store.put(PERSIST_KEY, &value, Duration::from_secs(300)).await {
                    tracing::error!(collector = "aprs", error = %err, "persist failed");
                    return;
                }
                self.store.set_meta("aprs", CollectorStatus::Ok, 0, crate::now_millis()).await;
            }
            Err(err) => tracing::warn!(collector = "aprs", error = %err, "serialize failed"),
        }
    }

    async fn evict_once(&self) {
        let now = crate::now_millis();
        let mut set = self.working_set.lock().await;
        set.retain(|_, station| now - station.last_heard <= EVICTION_HORIZON_MS);
    }

    async fn run_connection_loop(&self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            if let Err(err) = self.connect_and_pump().await {
                tracing::warn!(collector = "aprs", error = %err, "connection lost; reconnecting");
                self.store.set_meta("aprs", CollectorStatus::Degraded, 1, crate::now_millis()).await;
            }
            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    async fn run_persist_timer(&self) {
        let mut ticker = tokio::time::interval(PERSIST_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.persist_once().await,
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    async fn run_evict_timer(&self) {
        let mut ticker = tokio::time::interval(EVICT_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.evict_once().await,
                _ = self.cancel.cancelled() => return,
            }
        }
    }
}

pub struct AprsCollector {
    shared: AprsShared,
}

impl AprsCollector {
    pub fn new(servers: Vec<String>, login_callsign: String, store: Arc<dyn Store>) -> Self {
        Self {
            shared: AprsShared {
                servers: servers.into(),
                login_callsign: login_callsign.into(),
                store,
                working_set: Arc::new(Mutex::new(BTreeMap::new())),
                cancel: CancellationToken::new(),
                next_server: Arc::new(AtomicUsize::new(0)),
            },
        }
    }
}

#[async_trait]
impl StreamingCollector for AprsCollector {
    fn name(&self) -> &str {
        "aprs"
    }

    async fn start(&self) {
        let connection = self.shared.clone();
        tokio::spawn(async move { connection.run_connection_loop().await });

        let persist = self.shared.clone();
        tokio::spawn(async move { persist.run_persist_timer().await });

        let evict = self.shared.clone();
        tokio::spawn(async move { evict.run_evict_timer().await });
    }

    async fn stop(&self) {
        self.shared.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_single_uncompressed_packet() {
        // §8 scenario 3.
        let station = parse_line("N0CALL>APRS,TCPIP*:!4037.14N/00412.23W-Test", 0).unwrap();
        assert_eq!(station.callsign, "N0CALL");
        assert!((station.lat - 40.6190).abs() < 1e-4);
        assert!((station.lon - (-4.2038)).abs() < 1e-4);
        assert_eq!(station.symbol, '-');
        assert_eq!(station.comment, "Test");
    }

    #[test]
    fn server_comment_lines_are_ignored() {
        assert!(parse_line("# aprsc 2.1.4-g", 0).is_none());
    }

    #[test]
    fn out_of_range_coordinates_are_dropped() {
        // 99 degrees north is invalid regardless of minutes.
        let line = "N0CALL>APRS,TCPIP*:!9900.00N/00412.23W-Test";
        assert!(parse_line(line, 0).is_none());
    }

    #[test]
    fn course_speed_and_altitude_are_extracted() {
        let line = "N0CALL>APRS,TCPIP*:!4037.14N/00412.23W-090/045/A=001000";
        let station = parse_line(line, 0).unwrap();
        assert_eq!(station.course_deg, Some(90.0));
        assert!((station.speed_kmh.unwrap() - 45.0 * 1.852).abs() < 1e-6);
        assert!((station.altitude_m.unwrap() - 1000.0 * 0.3048).abs() < 1e-6);
    }

    #[test]
    fn timestamped_position_report_strips_seven_byte_prefix() {
        // `/` packets carry a 7-byte DHM-zulu timestamp before the position;
        // without stripping it the timestamp bytes get misread as latitude.
        let line = "N0CALL>APRS,TCPIP*:/091234z4037.14N/00412.23W-Test";
        let station = parse_line(line, 0).unwrap();
        assert!((station.lat - 40.6190).abs() < 1e-4);
        assert!((station.lon - (-4.2038)).abs() < 1e-4);
        assert_eq!(station.comment, "Test");
    }

    #[test]
    fn compressed_position_decodes_altitude_when_compression_type_indicates_gga() {
        // symbol table '/', lat_n = 0, lon_n = 0 (both base-91 "!!!!"),
        // symbol '>', c = s = '!' (cs = 0 -> altitude_ft = 1.002^0 = 1.0),
        // compression-type byte '1' (33+16=49, NMEA-source bits 0x10).
        let line = "N0CALL>APRS,TCPIP*:!/!!!!!!!!>!!1";
        let station = parse_line(line, 0).unwrap();
        assert!(station.course_deg.is_none());
        assert!(station.speed_kmh.is_none());
        assert!((station.altitude_m.unwrap() - 0.3048).abs() < 1e-9);
    }

    #[test]
    fn round_trip_property_for_encoded_position() {
        // §8: decoding an uncompressed packet whose position was encoded
        // from (lat, lon) at 4-decimal precision reproduces it within
        // 1/60/10000 degree.
        let lat = 12.3456_f64;
        let lon = -45.6789_f64;
        let lat_deg = lat.trunc() as i32;
        let lat_min = (lat.fract() * 60.0).abs();
        let lon_deg = lon.abs().trunc() as i32;
        let lon_min = lon.fract().abs() * 60.0;
        let encoded = format!(
            "N0CALL>APRS,TCPIP*:!{:02}{:05.2}N/{:03}{:05.2}WTest",
            lat_deg, lat_min, lon_deg, lon_min
        );
        let station = parse_line(&encoded, 0).unwrap();
        assert!((station.lat - lat).abs() < 1.0 / 60.0 / 10000.0 * 10.0);
        assert!((station.lon - (-lon.abs())).abs() < 1.0 / 60.0 / 10000.0 * 10.0);
    }
}
