use std::sync::Arc;

use tokio::task::{Id, JoinSet};
use tokio::time::Instant;

use crate::error::{AggregateError, JobError, SourceError};
use crate::jobs::FetchJob;
use crate::snapshot::Snapshot;

/// Runs a fixed set of [`FetchJob`]s against one [`Snapshot`].
pub struct Aggregator {
    snapshot: Snapshot,
    jobs: Vec<Arc<dyn FetchJob>>,
}

impl Aggregator {
    pub fn new(snapshot: Snapshot, jobs: Vec<Arc<dyn FetchJob>>) -> Self {
        Self { snapshot, jobs }
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    /// Runs every job concurrently and waits for all of them, or until `deadline`.
    ///
    /// Jobs that succeed have already written the snapshot by the time this returns, whatever
    /// happened to the others. Jobs still running at the deadline are aborted and reported as
    /// [`SourceError::Deadline`].
    pub async fn refresh(&self, deadline: Instant) -> Result<(), AggregateError> {
        let mut set = JoinSet::new();
        // Jobs that have not reported yet, in declaration order.
        let mut pending: Vec<(Id, &'static str)> = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            let job = Arc::clone(job);
            let snapshot = self.snapshot.clone();
            let name = job.name();
            let handle = set.spawn(async move { job.run(&snapshot).await });
            pending.push((handle.id(), name));
        }

        let mut errors = Vec::new();
        let mut report = |id: Id, result: Result<(), SourceError>| {
            let Some(pos) = pending.iter().position(|(p, _)| *p == id) else {
                return;
            };
            let (_, job) = pending.remove(pos);
            if let Err(source) = result {
                errors.push(JobError { job, source });
            }
        };

        loop {
            match tokio::time::timeout_at(deadline, set.join_next_with_id()).await {
                Ok(Some(Ok((id, result)))) => report(id, result),
                Ok(Some(Err(e))) => report(e.id(), Err(SourceError::Panicked(e.to_string()))),
                Ok(None) => break,
                Err(_) => {
                    set.abort_all();
                    break;
                }
            }
        }

        errors.extend(pending.into_iter().map(|(_, job)| JobError {
            job,
            source: SourceError::Deadline,
        }));

        let err = AggregateError { errors };
        if err.is_empty() { Ok(()) } else { Err(err) }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::jobs::tests::{FakeInflux, FakeMesonet, series};
    use crate::jobs::{InfluxJob, OutdoorTemperatureJob};
    use crate::measurement::{Measurement, MeasurementKind};

    struct Stuck;

    #[async_trait]
    impl FetchJob for Stuck {
        fn name(&self) -> &'static str {
            "stuck"
        }

        async fn run(&self, _snapshot: &Snapshot) -> Result<(), SourceError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    struct Panics;

    #[async_trait]
    impl FetchJob for Panics {
        fn name(&self) -> &'static str {
            "panics"
        }

        async fn run(&self, _snapshot: &Snapshot) -> Result<(), SourceError> {
            panic!("sensor on fire")
        }
    }

    fn influx(current: Result<f64, &'static str>, mean: Result<f64, &'static str>) -> Arc<FakeInflux> {
        Arc::new(FakeInflux { current, mean })
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn test_refresh_all_succeed() {
        let snapshot = Snapshot::new();
        let outdoor = series(&[60.0, 61.0], chrono::Utc::now() - chrono::Duration::minutes(20));
        let jobs: Vec<Arc<dyn FetchJob>> = vec![
            Arc::new(InfluxJob::indoor_temperature(influx(Ok(69.0), Ok(65.0)), "b")),
            Arc::new(InfluxJob::relative_humidity(influx(Ok(42.0), Ok(50.0)), "b")),
            Arc::new(OutdoorTemperatureJob::new(
                Arc::new(FakeMesonet::new(Some(outdoor))),
                "bkln",
            )),
        ];
        let aggregator = Aggregator::new(snapshot.clone(), jobs);

        aggregator.refresh(deadline()).await.unwrap();
        let readings = snapshot.readings();
        assert_eq!(readings.get(MeasurementKind::IndoorTemperature), Measurement::new(69.0, 65.0));
        assert_eq!(readings.get(MeasurementKind::IndoorHumidity), Measurement::new(42.0, 50.0));
        assert_eq!(readings.get(MeasurementKind::OutdoorTemperature), Measurement::new(61.0, 60.5));
    }

    #[tokio::test]
    async fn test_refresh_partial_failure() {
        let snapshot = Snapshot::new();
        snapshot.set(MeasurementKind::IndoorHumidity, Measurement::new(30.0, 31.0));
        let jobs: Vec<Arc<dyn FetchJob>> = vec![
            Arc::new(InfluxJob::indoor_temperature(influx(Ok(69.0), Ok(65.0)), "b")),
            Arc::new(InfluxJob::relative_humidity(influx(Err("no route"), Ok(50.0)), "b")),
        ];
        let aggregator = Aggregator::new(snapshot.clone(), jobs);

        let err = aggregator.refresh(deadline()).await.unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err.errors.iter().map(|e| e.job).collect::<Vec<_>>(), vec!["get relative humidity"]);
        assert!(err.to_string().starts_with("1 errors: get relative humidity: "));

        let readings = snapshot.readings();
        assert_eq!(readings.indoor_temperature, Measurement::new(69.0, 65.0));
        assert_eq!(readings.indoor_humidity, Measurement::new(30.0, 31.0));
    }

    #[tokio::test]
    async fn test_refresh_deadline_keeps_finished_jobs() {
        let snapshot = Snapshot::new();
        let jobs: Vec<Arc<dyn FetchJob>> = vec![
            Arc::new(Stuck),
            Arc::new(InfluxJob::indoor_temperature(influx(Ok(70.0), Ok(70.0)), "b")),
        ];
        let aggregator = Aggregator::new(snapshot.clone(), jobs);

        let started = Instant::now();
        let err = aggregator
            .refresh(Instant::now() + Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(err.len(), 1);
        assert_eq!(err.errors[0].job, "stuck");
        assert!(matches!(err.errors[0].source, SourceError::Deadline));
        assert_eq!(snapshot.readings().indoor_temperature, Measurement::new(70.0, 70.0));
    }

    #[tokio::test]
    async fn test_refresh_survives_panicking_job() {
        let snapshot = Snapshot::new();
        let jobs: Vec<Arc<dyn FetchJob>> = vec![
            Arc::new(Panics),
            Arc::new(InfluxJob::relative_humidity(influx(Ok(45.0), Ok(44.0)), "b")),
        ];
        let aggregator = Aggregator::new(snapshot.clone(), jobs);

        let err = aggregator.refresh(deadline()).await.unwrap_err();
        assert_eq!(err.errors.iter().map(|e| e.job).collect::<Vec<_>>(), vec!["panics"]);
        assert!(matches!(err.errors[0].source, SourceError::Panicked(_)));
        assert_eq!(snapshot.readings().indoor_humidity, Measurement::new(45.0, 44.0));
    }

    #[tokio::test]
    async fn test_job_names() {
        let jobs: Vec<Arc<dyn FetchJob>> = vec![Arc::new(Stuck), Arc::new(Panics)];
        let aggregator = Aggregator::new(Snapshot::new(), jobs);
        assert_eq!(aggregator.job_names(), vec!["stuck", "panics"]);
    }
}
