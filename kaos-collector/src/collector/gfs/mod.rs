//! GFS/GRIB2 pipeline (§4.5, C6): a multi-key collector with seven
//! sub-collections sharing one fetch-decode-normalize-publish shape.
//! `url` synthesizes the NOMADS filter request for the current model
//! cycle; `grib2` is a pure decoder; `uv` derives the UV-index grid.

pub mod grib2;
pub mod url;
pub mod uv;

use crate::collector::{MultiKeyCollector, MultiKeyPublisher};
use crate::error::CollectorError;
use crate::fetch::{fetch, FetchOptions, FetchPolicy};
use crate::grid::GridField;
use async_trait::async_trait;
use std::time::Duration;
use url::VarLevel;

pub struct GfsCollector {
    pub client: reqwest::Client,
}

impl GfsCollector {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

const GRIB_FETCH_TIMEOUT: Duration = Duration::from_secs(60);
const GRID_TTL: Duration = Duration::from_secs(3 * 3600);

/// One simple (category, parameter) sub-collection: fetch its own filter
/// URL, decode, apply `transform` per value, and publish to `key`.
struct SubCollection {
    key: &'static str,
    forecast_hour: u32,
    vars: &'static [VarLevel],
    category: u8,
    parameter: u8,
    unit: &'static str,
    name: &'static str,
    transform: fn(f64) -> f64,
}

const SUB_COLLECTIONS: &[SubCollection] = &[
    SubCollection {
        key: "kaos:gfs:temperature",
        forecast_hour: 0,
        vars: &[VarLevel { var: "TMP", level: "2_m_above_ground" }],
        category: 0,
        parameter: 0,
        unit: "degC",
        name: "temperature",
        transform: |k| k - 273.15,
    },
    SubCollection {
        key: "kaos:gfs:humidity",
        forecast_hour: 0,
        vars: &[VarLevel { var: "RH", level: "2_m_above_ground" }],
        category: 1,
        parameter: 1,
        unit: "percent",
        name: "humidity",
        transform: |v| v,
    },
    SubCollection {
        // Analysis file (f000) lacks this parameter; only the first
        // forecast hour carries it (§4.5).
        key: "kaos:gfs:precip_rate",
        forecast_hour: 1,
        vars: &[VarLevel { var: "PRATE", level: "surface" }],
        category: 1,
        parameter: 8,
        unit: "mm/h",
        name: "precip_rate",
        transform: |kg_per_m2_s| kg_per_m2_s * 3600.0,
    },
    SubCollection {
        key: "kaos:gfs:cloud_cover",
        forecast_hour: 0,
        vars: &[VarLevel { var: "TCDC", level: "entire_atmosphere" }],
        category: 6,
        parameter: 1,
        unit: "percent",
        name: "cloud_cover",
        transform: |v| v,
    },
    SubCollection {
        key: "kaos:gfs:cape",
        forecast_hour: 0,
        vars: &[VarLevel { var: "CAPE", level: "surface" }],
        category: 7,
        parameter: 6,
        unit: "J/kg",
        name: "cape",
        transform: |v| v,
    },
];

const WIND_VARS: &[VarLevel] = &[VarLevel { var: "UGRD", level: "10_m_above_ground" }, VarLevel {
    var: "VGRD",
    level: "10_m_above_ground",
}];
const OZONE_VARS: &[VarLevel] = &[VarLevel { var: "TOZNE", level: "entire_atmosphere" }];

async fn fetch_and_decode(
    client: &reqwest::Client,
    cycle: chrono::DateTime<chrono::Utc>,
    forecast_hour: u32,
    vars: &[VarLevel],
) -> Result<Vec<grib2::DecodedMessage>, CollectorError> {
    let request_url = url::filter_url(cycle, forecast_hour, vars);
    let options = FetchOptions { headers: Vec::new(), accept_gzip: true };
    let policy = FetchPolicy { timeout: GRIB_FETCH_TIMEOUT, retries: 2 };
    let resp = fetch(client, &request_url, &options, &policy, &tokio_util::sync::CancellationToken::new()).await?;
    grib2::decode_messages(&resp.body)
}

async fn run_sub_collection(
    client: &reqwest::Client,
    cycle: chrono::DateTime<chrono::Utc>,
    sub: &SubCollection,
    publisher: &MultiKeyPublisher<'_>,
) {
    let result = async {
        let messages = fetch_and_decode(client, cycle, sub.forecast_hour, sub.vars).await?;
        let field = grib2::find_field(&messages, sub.category, sub.parameter)
            .ok_or_else(|| CollectorError::DecodeError(format!("{}: field not present", sub.name)))?;
        let data: Vec<f64> = field.values.iter().map(|&v| (sub.transform)(v)).collect();
        Ok::<_, CollectorError>(GridField {
            header: field.grid,
            data,
            unit: sub.unit.to_string(),
            name: sub.name.to_string(),
        })
    }
    .await;

    match result {
        Ok(grid_field) => match serde_json::to_value(&grid_field) {
            Ok(value) => publisher.put_to(sub.key, &value, GRID_TTL).await,
            Err(err) => tracing::warn!(sub = sub.name, error = %err, "gfs sub-collection serialize failed"),
        },
        Err(err) => tracing::warn!(sub = sub.name, error = %err, "gfs sub-collection failed"),
    }
}

async fn run_wind_vector(
    client: &reqwest::Client,
    cycle: chrono::DateTime<chrono::Utc>,
    publisher: &MultiKeyPublisher<'_>,
) {
    let result = async {
        let messages = fetch_and_decode(client, cycle, 0, WIND_VARS).await?;
        let u = grib2::find_field(&messages, 2, 2)
            .ok_or_else(|| CollectorError::DecodeError("wind: missing U component".to_string()))?;
        let v = grib2::find_field(&messages, 2, 3)
            .ok_or_else(|| CollectorError::DecodeError("wind: missing V component".to_string()))?;
        let field = crate::grid::VectorField {
            u: GridField { header: u.grid, data: u.values.clone(), unit: "m/s".to_string(), name: "wind_u".to_string() },
            v: GridField { header: v.grid, data: v.values.clone(), unit: "m/s".to_string(), name: "wind_v".to_string() },
        };
        serde_json::to_value(&field).map_err(|e| CollectorError::DecodeError(e.to_string()))
    }
    .await;

    match result {
        Ok(value) => publisher.put_to("kaos:gfs:wind", &value, GRID_TTL).await,
        Err(err) => tracing::warn!(sub = "wind", error = %err, "gfs sub-collection failed"),
    }
}

async fn run_uv_index(
    client: &reqwest::Client,
    cycle: chrono::DateTime<chrono::Utc>,
    publisher: &MultiKeyPublisher<'_>,
) {
    let result = async {
        let messages = fetch_and_decode(client, cycle, 0, OZONE_VARS).await?;
        let ozone = grib2::find_field(&messages, 14, 0)
            .ok_or_else(|| CollectorError::DecodeError("uv: missing ozone field".to_string()))?;
        let field = uv::derive_uv_index_grid(ozone.grid, &ozone.values, cycle);
        serde_json::to_value(&field).map_err(|e| CollectorError::DecodeError(e.to_string()))
    }
    .await;

    match result {
        Ok(value) => publisher.put_to("kaos:gfs:uv_index", &value, GRID_TTL).await,
        Err(err) => tracing::warn!(sub = "uv_index", error = %err, "gfs sub-collection failed"),
    }
}

#[async_trait]
impl MultiKeyCollector for GfsCollector {
    fn name(&self) -> &str {
        "gfs"
    }

    fn retry_attempts(&self) -> u32 {
        1
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn collect_multi(&self, publisher: &MultiKeyPublisher<'_>) -> Result<(), CollectorError> {
        let cycle = url::latest_cycle(crate::now_utc());

        for sub in SUB_COLLECTIONS {
            run_sub_collection(&self.client, cycle, sub, publisher).await;
        }
        run_wind_vector(&self.client, cycle, publisher).await;
        run_uv_index(&self.client, cycle, publisher).await;

        Ok(())
    }
}
