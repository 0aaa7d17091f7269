//! Minimal InfluxDB v2 query client.
//!
//! Only what the display needs: run a Flux query and pull the `_value` of the first record out of
//! the annotated CSV response.

use async_trait::async_trait;
use csv::StringRecord;
use reqwest::{Client, Url, header};
use serde::Serialize;
use thiserror::Error;

use crate::config::InfluxDBConfig;

#[derive(Debug, Error)]
pub enum QueryError {
    /// Transport failure or non-success status.
    #[error("http: {0}")]
    Http(String),

    /// The query ran but produced no records.
    #[error("no rows")]
    NoRows,

    /// The response could not be read as a Flux record.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// The record's value is not the type the caller asked for.
    #[error("type mismatch: expected {expected}, got {got:?}")]
    TypeMismatch {
        expected: &'static str,
        got: FluxValue,
    },
}

impl From<reqwest::Error> for QueryError {
    fn from(err: reqwest::Error) -> Self {
        QueryError::Http(err.to_string())
    }
}

/// A single Flux value, typed by its `#datatype` annotation.
#[derive(Debug, Clone, PartialEq)]
pub enum FluxValue {
    Double(f64),
    Long(i64),
    UnsignedLong(u64),
    Bool(bool),
    String(String),
    /// `dateTime:RFC3339` and any other type this client does not interpret.
    Other { datatype: String, raw: String },
}

impl FluxValue {
    fn parse(datatype: &str, raw: &str) -> Result<Self, QueryError> {
        let bad = |e: String| {
            QueryError::MalformedRecord(format!("value {raw:?} is not a {datatype}: {e}"))
        };
        Ok(match datatype {
            "double" => FluxValue::Double(match raw {
                "+Inf" => f64::INFINITY,
                "-Inf" => f64::NEG_INFINITY,
                _ => raw.parse::<f64>().map_err(|e| bad(e.to_string()))?,
            }),
            "long" => FluxValue::Long(raw.parse::<i64>().map_err(|e| bad(e.to_string()))?),
            "unsignedLong" => {
                FluxValue::UnsignedLong(raw.parse::<u64>().map_err(|e| bad(e.to_string()))?)
            }
            "boolean" => FluxValue::Bool(raw.parse::<bool>().map_err(|e| bad(e.to_string()))?),
            "string" => FluxValue::String(raw.to_string()),
            other => FluxValue::Other {
                datatype: other.to_string(),
                raw: raw.to_string(),
            },
        })
    }

    /// Decoder for numeric measurements.
    pub fn as_f64(self) -> Result<f64, QueryError> {
        match self {
            FluxValue::Double(v) => Ok(v),
            FluxValue::Long(v) => Ok(v as f64),
            FluxValue::UnsignedLong(v) => Ok(v as f64),
            got => Err(QueryError::TypeMismatch {
                expected: "number",
                got,
            }),
        }
    }
}

#[async_trait]
pub trait TimeSeriesSource: Send + Sync {
    /// Runs `query` and returns the value of its first record.
    async fn query_one(&self, query: &str) -> Result<FluxValue, QueryError>;
}

/// Runs `query` and converts its single value with the caller's `decode`.
pub async fn query_as<T>(
    source: &dyn TimeSeriesSource,
    query: &str,
    decode: impl FnOnce(FluxValue) -> Result<T, QueryError>,
) -> Result<T, QueryError> {
    decode(source.query_one(query).await?)
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    dialect: Dialect,
}

#[derive(Debug, Serialize)]
struct Dialect {
    header: bool,
    annotations: [&'static str; 1],
    delimiter: &'static str,
}

#[derive(Debug, Clone)]
pub struct InfluxClient {
    client: Client,
    url: Url,
    token: String,
}

impl InfluxClient {
    pub fn new(client: Client, config: &InfluxDBConfig) -> Result<Self, anyhow::Error> {
        // Without a trailing slash, `join` would replace the last segment of a path prefix.
        let mut base = config.address.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let mut url = base.join("api/v2/query")?;
        url.query_pairs_mut().append_pair("org", &config.org);
        Ok(Self {
            client,
            url,
            token: config.token.clone(),
        })
    }
}

#[async_trait]
impl TimeSeriesSource for InfluxClient {
    async fn query_one(&self, query: &str) -> Result<FluxValue, QueryError> {
        let body = QueryRequest {
            query,
            kind: "flux",
            dialect: Dialect {
                header: true,
                annotations: ["datatype"],
                delimiter: ",",
            },
        };
        let response = self
            .client
            .post(self.url.clone())
            .header(header::AUTHORIZATION, format!("Token {}", self.token))
            .header(header::ACCEPT, "application/csv")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(QueryError::Http(format!("non-OK status: {status}; body: {text}")));
        }
        first_value(&text)
    }
}

/// Extracts the `_value` of the first record in an annotated Flux CSV response.
///
/// Each table starts with a `#datatype` annotation row followed by a header row.
pub fn first_value(body: &str) -> Result<FluxValue, QueryError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut datatypes: Option<StringRecord> = None;
    let mut header: Option<StringRecord> = None;

    for record in reader.records() {
        let row = record.map_err(|e| QueryError::MalformedRecord(e.to_string()))?;
        let first = row.get(0).unwrap_or_default();
        if first == "#datatype" {
            datatypes = Some(row);
            header = None;
            continue;
        }
        if first.starts_with('#') {
            continue;
        }
        let Some(columns) = &header else {
            header = Some(row);
            continue;
        };

        if columns.len() == 3 && columns.get(1) == Some("error") {
            return Err(QueryError::MalformedRecord(format!(
                "query failed: {}",
                row.get(1).unwrap_or_default()
            )));
        }
        let idx = columns
            .iter()
            .position(|c| c == "_value")
            .ok_or_else(|| {
                QueryError::MalformedRecord(format!("no _value column in {columns:?}"))
            })?;
        let raw = row.get(idx).ok_or_else(|| {
            QueryError::MalformedRecord(format!(
                "record has {} fields, header has {}",
                row.len(),
                columns.len()
            ))
        })?;
        let datatype = datatypes
            .as_ref()
            .and_then(|d| d.get(idx))
            .unwrap_or("string");
        return FluxValue::parse(datatype, raw);
    }
    Err(QueryError::NoRows)
}

/// Flux query for the newest value of `field`, converted by `convert`.
pub fn last_query(bucket: &str, field: &str, convert: &str) -> String {
    format!("{} |> last()", base_query(bucket, field, convert))
}

/// Flux query for the mean of `field` over the last hour, converted by `convert`.
pub fn mean_query(bucket: &str, field: &str, convert: &str) -> String {
    format!("{} |> mean() |> last()", base_query(bucket, field, convert))
}

fn base_query(bucket: &str, field: &str, convert: &str) -> String {
    format!(
        r#"from(bucket: "{bucket}")
  |> range(start: -1h, stop: now())
  |> filter(fn: (r) => r._measurement == "environment" and r._field == "{field}")
  {convert}"#
    )
}
