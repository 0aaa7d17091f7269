use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use image::RgbaImage;

use crate::measurement::{Measurement, MeasurementKind};

/// The latest value of every tracked measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Readings {
    pub indoor_temperature: Measurement,
    pub indoor_humidity: Measurement,
    pub outdoor_temperature: Measurement,
    /// Timestamp of the newest outdoor data point seen so far.
    pub last_external_update: Option<DateTime<Utc>>,
}

impl Readings {
    pub fn get(&self, kind: MeasurementKind) -> Measurement {
        match kind {
            MeasurementKind::IndoorTemperature => self.indoor_temperature,
            MeasurementKind::IndoorHumidity => self.indoor_humidity,
            MeasurementKind::OutdoorTemperature => self.outdoor_temperature,
        }
    }

    fn slot(&mut self, kind: MeasurementKind) -> &mut Measurement {
        match kind {
            MeasurementKind::IndoorTemperature => &mut self.indoor_temperature,
            MeasurementKind::IndoorHumidity => &mut self.indoor_humidity,
            MeasurementKind::OutdoorTemperature => &mut self.outdoor_temperature,
        }
    }
}

/// One rendered screen: the pixels and the text lines they were drawn from.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Arc<RgbaImage>,
    pub screen: Vec<String>,
}

#[derive(Debug, Default)]
pub struct State {
    pub readings: Readings,
    pub frame: Option<Frame>,
}

/// Shared handle to the display state.
///
/// All access goes through one reader/writer lock. Writers hold it only while assigning fields,
/// never across a network call.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    inner: Arc<RwLock<State>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    // Poisoning is ignored: every write assigns a whole measurement pair in one statement.
    pub fn read(&self) -> RwLockReadGuard<'_, State> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn readings(&self) -> Readings {
        self.read().readings
    }

    pub fn last_external_update(&self) -> Option<DateTime<Utc>> {
        self.read().readings.last_external_update
    }

    /// Stores both halves of a measurement in one write.
    pub fn set(&self, kind: MeasurementKind, value: Measurement) {
        *self.write().readings.slot(kind) = value;
    }

    /// Stores an externally sourced measurement along with the time of its newest data point.
    pub fn set_external(
        &self,
        kind: MeasurementKind,
        value: Measurement,
        observed: Option<DateTime<Utc>>,
    ) {
        let mut state = self.write();
        *state.readings.slot(kind) = value;
        state.readings.last_external_update = observed;
    }

    /// Text lines of the last rendered frame, empty before the first render.
    pub fn screen(&self) -> Vec<String> {
        self.read()
            .frame
            .as_ref()
            .map(|f| f.screen.clone())
            .unwrap_or_default()
    }

    pub fn image(&self) -> Option<Arc<RgbaImage>> {
        self.read().frame.as_ref().map(|f| Arc::clone(&f.image))
    }
}
