/// Byte drawn for a reading that is higher than its trailing mean.
pub const RISING_GLYPH: u8 = 24;
/// Byte drawn for a reading that is lower than its trailing mean.
pub const FALLING_GLYPH: u8 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementKind {
    IndoorTemperature,
    IndoorHumidity,
    OutdoorTemperature,
}

impl MeasurementKind {
    pub fn name(self) -> &'static str {
        match self {
            MeasurementKind::IndoorTemperature => "indoor temperature",
            MeasurementKind::IndoorHumidity => "relative humidity",
            MeasurementKind::OutdoorTemperature => "outdoor temperature",
        }
    }

    /// How far `current` may drift from the trailing mean before it counts as a trend.
    pub fn trend_threshold(self) -> f64 {
        match self {
            MeasurementKind::IndoorTemperature | MeasurementKind::IndoorHumidity => 0.5,
            MeasurementKind::OutdoorTemperature => 1.0,
        }
    }
}

/// A reading together with its mean over the last hour.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurement {
    pub current: f64,
    pub trailing_mean: f64,
}

impl Measurement {
    pub fn new(current: f64, trailing_mean: f64) -> Self {
        Self {
            current,
            trailing_mean,
        }
    }

    pub fn trend(&self, threshold: f64) -> Trend {
        let change = self.current - self.trailing_mean;
        if change > threshold {
            Trend::Rising
        } else if change < -threshold {
            Trend::Falling
        } else {
            Trend::Flat
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Rising,
    Falling,
    Flat,
}

impl Trend {
    pub fn glyph(self) -> char {
        match self {
            Trend::Rising => char::from(RISING_GLYPH),
            Trend::Falling => char::from(FALLING_GLYPH),
            Trend::Flat => ' ',
        }
    }
}
