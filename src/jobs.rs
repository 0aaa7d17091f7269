use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::SourceError;
use crate::influx::{self, FluxValue, TimeSeriesSource};
use crate::measurement::{Measurement, MeasurementKind};
use crate::mesonet::{Request, TimeSeries, Variable, WeatherSource};
use crate::snapshot::Snapshot;

/// The Mesonet does not publish new observations more often than this.
pub const MESONET_MIN_INTERVAL: std::time::Duration = std::time::Duration::from_secs(6 * 60);

const TEMPERATURE_TO_FAHRENHEIT: &str = "|> map(fn: (r) => ({ r with _value: float(v: r._value) / 1000000000.0 - 273.15 }))
  |> map(fn: (r) => ({ r with _value: r._value * 1.8 + 32.0 }))";
const HUMIDITY_TO_PERCENT: &str =
    "|> map(fn: (r) => ({ r with _value: float(v: r._value) / 100000.0 }))";

/// One unit of work in a refresh: read from a source and store the result in the snapshot.
#[async_trait]
pub trait FetchJob: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetches and, on success, writes this job's fields. Nothing is written on failure.
    async fn run(&self, snapshot: &Snapshot) -> Result<(), SourceError>;
}

/// Reads the current value and the hourly mean of one InfluxDB field.
pub struct InfluxJob {
    name: &'static str,
    kind: MeasurementKind,
    source: Arc<dyn TimeSeriesSource>,
    last_query: String,
    mean_query: String,
}

impl InfluxJob {
    pub fn new(
        name: &'static str,
        kind: MeasurementKind,
        source: Arc<dyn TimeSeriesSource>,
        bucket: &str,
        field: &str,
        convert: &str,
    ) -> Self {
        Self {
            name,
            kind,
            source,
            last_query: influx::last_query(bucket, field, convert),
            mean_query: influx::mean_query(bucket, field, convert),
        }
    }

    pub fn indoor_temperature(source: Arc<dyn TimeSeriesSource>, bucket: &str) -> Self {
        Self::new(
            "get indoor temperature",
            MeasurementKind::IndoorTemperature,
            source,
            bucket,
            "temperature",
            TEMPERATURE_TO_FAHRENHEIT,
        )
    }

    pub fn relative_humidity(source: Arc<dyn TimeSeriesSource>, bucket: &str) -> Self {
        Self::new(
            "get relative humidity",
            MeasurementKind::IndoorHumidity,
            source,
            bucket,
            "relative_humidity",
            HUMIDITY_TO_PERCENT,
        )
    }
}

#[async_trait]
impl FetchJob for InfluxJob {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, snapshot: &Snapshot) -> Result<(), SourceError> {
        let source = self.source.as_ref();
        let (current, trailing_mean) = tokio::try_join!(
            influx::query_as(source, &self.last_query, FluxValue::as_f64),
            influx::query_as(source, &self.mean_query, FluxValue::as_f64),
        )?;
        log::debug!(
            "{}: {current:.2} (last hour {trailing_mean:.2})",
            self.kind.name()
        );
        snapshot.set(self.kind, Measurement::new(current, trailing_mean));
        Ok(())
    }
}

/// Reads outdoor air temperature from a Mesonet station.
pub struct OutdoorTemperatureJob {
    source: Arc<dyn WeatherSource>,
    station: String,
}

impl OutdoorTemperatureJob {
    pub const VARIABLE: &'static str = "tair";

    pub fn new(source: Arc<dyn WeatherSource>, station: impl Into<String>) -> Self {
        Self {
            source,
            station: station.into(),
        }
    }

    fn request(&self, now: DateTime<Utc>) -> Request {
        Request {
            dataset: "nysm".to_string(),
            start: now - Duration::hours(1),
            end: now,
            stations: vec![self.station.clone()],
            variables: vec![Variable {
                id: Self::VARIABLE.to_string(),
                units: "degF".to_string(),
            }],
        }
    }
}

/// Whether the newest data point is recent enough that asking again would return nothing new.
pub fn is_fresh(last_point: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    last_point.is_some_and(|t| match (now - t).to_std() {
        Ok(age) => age < MESONET_MIN_INTERVAL,
        // A data point from the future is as fresh as it gets.
        Err(_) => true,
    })
}

/// Reduces a series to a measurement, skipping zero entries.
///
/// The most recent point is sometimes reported as exactly 0, so zeros are dropped from both the
/// latest value and the mean. Returns the measurement and the time of its latest point, which is
/// only known when the variable is indexed by the `time` coordinate.
pub fn outdoor_reading(
    series: &TimeSeries,
    variable: &str,
) -> Result<(Measurement, Option<DateTime<Utc>>), SourceError> {
    let values = series.floats(variable);
    if values.is_empty() {
        return Err(SourceError::NoData(format!(
            "no data points returned for {variable} (data_vars: {:?})",
            series.data_vars.keys().collect::<Vec<_>>()
        )));
    }
    let times: &[DateTime<Utc>] = match series.data_vars.get(variable) {
        Some(var) if var.dimensions.iter().any(|d| d == "time") => series.times(),
        _ => &[],
    };

    let mut n = 0usize;
    let mut sum = 0.0;
    let mut last = 0.0;
    let mut last_update = None;
    for (i, &t) in values.iter().enumerate() {
        if t == 0.0 {
            continue;
        }
        n += 1;
        sum += t;
        last = t;
        if let Some(&update) = times.get(i) {
            last_update = Some(update);
        }
    }
    if n == 0 {
        return Err(SourceError::NoData(format!(
            "all {} {variable} data points are zero",
            values.len()
        )));
    }
    Ok((Measurement::new(last, sum / n as f64), last_update))
}

#[async_trait]
impl FetchJob for OutdoorTemperatureJob {
    fn name(&self) -> &'static str {
        "get outdoor temperature"
    }

    async fn run(&self, snapshot: &Snapshot) -> Result<(), SourceError> {
        let last_point = snapshot.last_external_update();
        log::debug!("last mesonet data point: {last_point:?}");
        let now = Utc::now();
        if is_fresh(last_point, now) {
            log::debug!("skipping mesonet query, data is less than {MESONET_MIN_INTERVAL:?} old");
            return Ok(());
        }

        let series = self.source.fetch(&self.request(now)).await?;
        let (measurement, observed) = outdoor_reading(&series, Self::VARIABLE)?;
        log::debug!(
            "{} ({} {}): {:.2} (last hour {:.2}) as of {observed:?}",
            MeasurementKind::OutdoorTemperature.name(),
            series.attrs.long_name,
            self.station,
            measurement.current,
            measurement.trailing_mean
        );
        snapshot.set_external(MeasurementKind::OutdoorTemperature, measurement, observed);
        Ok(())
    }
}
