use std::sync::Arc;

use reqwest::Client;
use tokio::time::Instant;

use crate::aggregator::Aggregator;
use crate::config::{Args, OutputConfig};
use crate::error::{RenderError, UpdateError};
use crate::influx::{InfluxClient, TimeSeriesSource};
use crate::jobs::{FetchJob, InfluxJob, OutdoorTemperatureJob};
use crate::mesonet::{MesonetClient, WeatherSource};
use crate::render;
use crate::snapshot::Snapshot;

/// Everything needed to keep one display up to date.
pub struct Display {
    snapshot: Snapshot,
    aggregator: Aggregator,
    output: OutputConfig,
}

impl Display {
    pub fn new(snapshot: Snapshot, jobs: Vec<Arc<dyn FetchJob>>, output: OutputConfig) -> Self {
        Self {
            aggregator: Aggregator::new(snapshot.clone(), jobs),
            snapshot,
            output,
        }
    }

    /// Wires the InfluxDB and Mesonet jobs described by `args` to a shared HTTP client.
    pub fn from_args(args: &Args, client: Client) -> Result<Self, anyhow::Error> {
        let influx: Arc<dyn TimeSeriesSource> =
            Arc::new(InfluxClient::new(client.clone(), &args.influxdb)?);
        let mesonet: Arc<dyn WeatherSource> =
            Arc::new(MesonetClient::new(client, args.mesonet.endpoint.clone()));
        let bucket = &args.influxdb.bucket;

        let jobs: Vec<Arc<dyn FetchJob>> = vec![
            Arc::new(InfluxJob::indoor_temperature(Arc::clone(&influx), bucket)),
            Arc::new(InfluxJob::relative_humidity(influx, bucket)),
            Arc::new(OutdoorTemperatureJob::new(mesonet, args.mesonet.station.clone())),
        ];
        Ok(Self::new(Snapshot::new(), jobs, args.output))
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.aggregator.job_names()
    }

    /// Re-renders the current readings. The write lock is held for the whole render, and the
    /// previously published frame stays in place if rendering fails.
    pub fn render(&self) -> Result<(), RenderError> {
        let mut state = self.snapshot.write();
        let frame = render::render(&state.readings, &self.output)?;
        state.frame = Some(frame);
        Ok(())
    }

    /// Refreshes every measurement, then renders whatever state that left behind.
    pub async fn update_once(&self, deadline: Instant) -> Result<(), UpdateError> {
        let refreshed = self.aggregator.refresh(deadline).await;
        let rendered = self.render();
        match (refreshed, rendered) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(refresh), Ok(())) => Err(UpdateError::Refresh(refresh)),
            (Ok(()), Err(render)) => Err(UpdateError::Render(render)),
            (Err(refresh), Err(render)) => Err(UpdateError::Both { refresh, render }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::jobs::tests::FakeInflux;
    use crate::measurement::{Measurement, MeasurementKind};

    #[tokio::test]
    async fn test_update_once_renders_despite_failures() {
        let jobs: Vec<Arc<dyn FetchJob>> = vec![
            Arc::new(InfluxJob::indoor_temperature(
                Arc::new(FakeInflux {
                    current: Ok(69.0),
                    mean: Ok(65.0),
                }),
                "b",
            )),
            Arc::new(InfluxJob::relative_humidity(
                Arc::new(FakeInflux {
                    current: Err("timeout"),
                    mean: Err("timeout"),
                }),
                "b",
            )),
        ];
        let display = Display::new(Snapshot::new(), jobs, OutputConfig::default());

        let err = display
            .update_once(Instant::now() + Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            UpdateError::Refresh(agg) => assert_eq!(agg.len(), 1),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(display.snapshot().screen()[0], "69.0\u{18} 0 ");
        assert!(display.snapshot().image().is_some());
    }

    #[test]
    fn test_render_replaces_frame() {
        let display = Display::new(Snapshot::new(), vec![], OutputConfig::default());
        display.render().unwrap();
        let first = display.snapshot().image().unwrap();

        display
            .snapshot()
            .set(MeasurementKind::OutdoorTemperature, Measurement::new(50.0, 48.0));
        display.render().unwrap();
        let second = display.snapshot().image().unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_ne!(first, second);
        assert_eq!(display.snapshot().screen()[1], "50.0\u{18}");
    }

    #[test]
    fn test_from_args_wires_every_job() {
        use clap::Parser;

        let args = Args::try_parse_from(["home-env-display"]).unwrap();
        let display = Display::from_args(&args, Client::new()).unwrap();
        assert_eq!(
            display.job_names(),
            vec![
                "get indoor temperature",
                "get relative humidity",
                "get outdoor temperature"
            ]
        );
    }
}
