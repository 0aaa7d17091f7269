//! Client for the New York State Mesonet `timeseries2` API.
//!
//! See <http://www.nysmesonet.org/about/data> to determine whether or not you're allowed to use
//! this data.
//!
//! The response describes every variable with the same loose shape, so each variable's data is
//! decoded by looking at it: `time` coordinates become timestamps, nested numeric arrays become a
//! scaled float series, and anything else is kept as raw JSON.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ConstantBuilder, Retryable};
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Format of the strings in the `time` coordinate.
pub const TIME_FORMAT: &str = "%Y%m%dT%H%M";

#[derive(Debug, Error)]
pub enum MesonetError {
    #[error("do request: {0}")]
    Http(#[from] reqwest::Error),

    #[error("do request: non-OK status: {status}; body: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("request marked as unsuccessful by server")]
    Unsuccessful,

    #[error("unmarshal response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Variable {
    pub id: String,
    pub units: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub dataset: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub stations: Vec<String>,
    pub variables: Vec<Variable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub response: TimeSeries,
    pub success: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeSeries {
    #[serde(default)]
    pub attrs: Attrs,
    #[serde(default)]
    pub coords: BTreeMap<String, DataVar>,
    #[serde(default, rename = "dims")]
    pub dimensions: BTreeMap<String, i64>,
    #[serde(default)]
    pub data_vars: BTreeMap<String, DataVar>,
}

impl TimeSeries {
    /// Timestamps of the `time` coordinate, or an empty slice.
    pub fn times(&self) -> &[DateTime<Utc>] {
        match self.coords.get("time").map(|v| &v.data) {
            Some(DataVarData::Time(t)) => t,
            _ => &[],
        }
    }

    /// Scaled values of `variable`, or an empty slice.
    pub fn floats(&self, variable: &str) -> &[f64] {
        match self.data_vars.get(variable).map(|v| &v.data) {
            Some(DataVarData::Float(f)) => f,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Attrs {
    #[serde(default)]
    pub long_name: String,
    #[serde(default)]
    pub scale_factor: f64,
    #[serde(default)]
    pub units: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataVarData {
    Time(Vec<DateTime<Utc>>),
    Float(Vec<f64>),
    Raw(Vec<serde_json::Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataVar {
    pub attrs: Attrs,
    pub dimensions: Vec<String>,
    pub data: DataVarData,
}

#[derive(Deserialize)]
struct RawDataVar {
    #[serde(default)]
    attrs: Attrs,
    #[serde(default)]
    data: Vec<serde_json::Value>,
    #[serde(default, rename = "dims")]
    dimensions: Vec<String>,
}

impl<'de> Deserialize<'de> for DataVar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawDataVar::deserialize(deserializer)?;
        let data = decode_data(&raw.attrs, raw.data).map_err(serde::de::Error::custom)?;
        Ok(DataVar {
            attrs: raw.attrs,
            dimensions: raw.dimensions,
            data,
        })
    }
}

fn decode_data(attrs: &Attrs, data: Vec<serde_json::Value>) -> Result<DataVarData, String> {
    if data.is_empty() {
        return Ok(DataVarData::Raw(data));
    }
    if attrs.long_name == "time" {
        return data
            .iter()
            .map(|tv| {
                let s = tv
                    .as_str()
                    .ok_or_else(|| format!("invalid time {tv}: not a string"))?;
                NaiveDateTime::parse_from_str(s, TIME_FORMAT)
                    .map(|t| t.and_utc())
                    .map_err(|e| format!("invalid time {s}: {e}"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(DataVarData::Time);
    }
    if let Some(first) = data[0].as_array() {
        if first.first().is_some_and(serde_json::Value::is_number) {
            let scale = attrs.scale_factor;
            return Ok(DataVarData::Float(
                first
                    .iter()
                    .map(|v| v.as_f64().map_or(0.0, |f| f * scale))
                    .collect(),
            ));
        }
    }
    Ok(DataVarData::Raw(data))
}

#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<TimeSeries, MesonetError>;
}

#[derive(Debug, Clone)]
pub struct MesonetClient {
    client: Client,
    endpoint: Url,
}

impl MesonetClient {
    pub fn new(client: Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }

    async fn send(&self, request: &Request) -> Result<ApiResponse, MesonetError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        if status != reqwest::StatusCode::OK {
            return Err(MesonetError::Status {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Whether a failed request is worth repeating straight away.
fn is_transient(err: &MesonetError) -> bool {
    matches!(err, MesonetError::Http(e) if e.is_connect() || e.is_timeout())
}

#[async_trait]
impl WeatherSource for MesonetClient {
    async fn fetch(&self, request: &Request) -> Result<TimeSeries, MesonetError> {
        let retry_builder = ConstantBuilder::default()
            .with_delay(Duration::from_millis(500))
            .with_max_times(2);

        let result = (|| self.send(request))
            .retry(retry_builder)
            .when(is_transient)
            .notify(|e, dur| {
                log::debug!("{e}");
                log::debug!("Retrying mesonet request in {:?}", dur);
            })
            .await?;

        if !result.success {
            return Err(MesonetError::Unsuccessful);
        }
        Ok(result.response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use chrono::TimeZone;

    use super::*;
    use crate::server::tests::serve_local;

    const BROOKLYN: &str = r#"{
        "success": true,
        "response": {
            "attrs": {"long_name": "nysm", "units": ""},
            "dims": {"station": 1, "time": 4},
            "coords": {
                "time": {
                    "attrs": {"long_name": "time"},
                    "dims": ["time"],
                    "data": ["20210919T0230", "20210919T0235", "20210919T0240", "20210919T0245"]
                },
                "station": {
                    "attrs": {"long_name": "station id"},
                    "dims": ["station"],
                    "data": ["bkln"]
                }
            },
            "data_vars": {
                "tair": {
                    "attrs": {"long_name": "air temperature", "scale_factor": 0.1, "units": "degF"},
                    "dims": ["station", "time"],
                    "data": [[784, 702, null, 688]]
                },
                "note": {
                    "attrs": {"long_name": "note"},
                    "dims": ["station"],
                    "data": [{"k": "v"}]
                }
            }
        }
    }"#;

    #[test]
    fn test_decode_response() {
        let result: ApiResponse = serde_json::from_str(BROOKLYN).unwrap();
        assert!(result.success);

        let series = result.response;
        assert_eq!(series.dimensions.get("time"), Some(&4));
        assert_eq!(
            series.times()[0],
            Utc.with_ymd_and_hms(2021, 9, 19, 2, 30, 0).unwrap()
        );

        let tair = series.floats("tair");
        assert_eq!(tair.len(), 4);
        assert!((tair[0] - 78.4).abs() < 1e-9);
        assert_eq!(tair[2], 0.0);
        assert!((tair[3] - 68.8).abs() < 1e-9);

        let station = &series.coords["station"];
        assert_eq!(station.data, DataVarData::Raw(vec!["bkln".into()]));
        assert_eq!(station.dimensions, vec!["station".to_string()]);
        assert!(matches!(series.data_vars["note"].data, DataVarData::Raw(_)));
    }

    #[test]
    fn test_bad_time_fails_decode() {
        let bad = r#"{"attrs": {"long_name": "time"}, "data": [201]}"#;
        assert!(serde_json::from_str::<DataVar>(bad).is_err());
        let bad = r#"{"attrs": {"long_name": "time"}, "data": ["yesterday"]}"#;
        assert!(serde_json::from_str::<DataVar>(bad).is_err());
    }

    #[test]
    fn test_empty_and_missing_variables() {
        let var: DataVar = serde_json::from_str(r#"{"attrs": {"long_name": "time"}}"#).unwrap();
        assert_eq!(var.data, DataVarData::Raw(vec![]));

        let series = TimeSeries::default();
        assert!(series.times().is_empty());
        assert!(series.floats("tair").is_empty());
    }

    #[test]
    fn test_request_body() {
        let body = serde_json::to_value(request()).unwrap();
        assert_eq!(body["dataset"], "nysm");
        assert_eq!(body["start"], "2021-09-19T01:30:00Z");
        assert_eq!(body["end"], "2021-09-19T02:30:00Z");
        assert_eq!(body["stations"][0], "bkln");
        assert_eq!(body["variables"][0]["units"], "degF");
    }

    fn request() -> Request {
        let start = Utc.with_ymd_and_hms(2021, 9, 19, 1, 30, 0).unwrap();
        Request {
            dataset: "nysm".into(),
            start,
            end: start + chrono::Duration::hours(1),
            stations: vec!["bkln".into()],
            variables: vec![Variable {
                id: "tair".into(),
                units: "degF".into(),
            }],
        }
    }

    #[tokio::test]
    async fn test_fetch_posts_request_and_decodes() {
        let seen = Arc::new(Mutex::new(None));
        let app = Router::new().route(
            "/timeseries2",
            post({
                let seen = Arc::clone(&seen);
                move |axum::Json(body): axum::Json<serde_json::Value>| async move {
                    *seen.lock().unwrap() = Some(body);
                    BROOKLYN
                }
            }),
        );
        let endpoint = serve_local(app).await.join("timeseries2").unwrap();
        let client = MesonetClient::new(Client::new(), endpoint);

        let series = client.fetch(&request()).await.unwrap();
        assert_eq!(series.floats("tair").len(), 4);
        assert_eq!(series.attrs.long_name, "nysm");

        let body = seen.lock().unwrap().take().unwrap();
        assert_eq!(body["stations"][0], "bkln");
        assert_eq!(body["variables"][0]["id"], "tair");
    }

    #[tokio::test]
    async fn test_fetch_unsuccessful() {
        let app = Router::new().route(
            "/",
            post(|| async { r#"{"success": false, "response": {}}"# }),
        );
        let client = MesonetClient::new(Client::new(), serve_local(app).await);
        assert!(matches!(
            client.fetch(&request()).await,
            Err(MesonetError::Unsuccessful)
        ));
    }

    #[tokio::test]
    async fn test_fetch_non_ok_status_keeps_body() {
        let app = Router::new().route("/", post(|| async { (StatusCode::BAD_GATEWAY, "down") }));
        let client = MesonetClient::new(Client::new(), serve_local(app).await);
        match client.fetch(&request()).await {
            Err(MesonetError::Status { status, body }) => {
                assert_eq!(status, reqwest::StatusCode::BAD_GATEWAY);
                assert_eq!(body, "down");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_malformed_body() {
        let app = Router::new().route("/", post(|| async { "not json" }));
        let client = MesonetClient::new(Client::new(), serve_local(app).await);
        assert!(matches!(
            client.fetch(&request()).await,
            Err(MesonetError::Decode(_))
        ));
    }
}
