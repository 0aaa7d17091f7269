use std::fmt;

use thiserror::Error;

use crate::influx::QueryError;
use crate::mesonet::MesonetError;

/// A single data source failed to produce a reading.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("query: {0}")]
    Query(#[from] QueryError),

    #[error("mesonet: {0}")]
    Weather(#[from] MesonetError),

    /// The source answered, but with nothing usable in it.
    #[error("no data: {0}")]
    NoData(String),

    #[error("deadline exceeded before the job reported")]
    Deadline,

    #[error("job panicked: {0}")]
    Panicked(String),
}

/// A [`SourceError`] tagged with the name of the job that hit it.
#[derive(Debug, Error)]
#[error("{job}: {source}")]
pub struct JobError {
    pub job: &'static str,
    #[source]
    pub source: SourceError,
}

/// Every job failure from one refresh cycle.
#[derive(Debug)]
pub struct AggregateError {
    pub errors: Vec<JobError>,
}

impl AggregateError {
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors: ", self.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("draw line {line}: no glyph for byte {byte:#04x}")]
    UnknownGlyph { line: usize, byte: u8 },
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("image has not been rendered yet")]
    NotRendered,

    #[error("enlarged image would be {width}x{height}, over the {max}px limit")]
    TooLarge { width: u32, height: u32, max: u32 },

    #[error("encode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("encode json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome of one refresh-and-render cycle that did not fully succeed.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("update: {0}")]
    Refresh(AggregateError),

    #[error("render: {0}")]
    Render(#[from] RenderError),

    #[error("update: {refresh}; render: {render}")]
    Both {
        refresh: AggregateError,
        render: RenderError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_error_lists_every_failure() {
        let err = AggregateError {
            errors: vec![
                JobError {
                    job: "get indoor temperature",
                    source: SourceError::Deadline,
                },
                JobError {
                    job: "get outdoor temperature",
                    source: SourceError::NoData("tair".to_string()),
                },
            ],
        };

        assert_eq!(err.len(), 2);
        assert!(!err.is_empty());
        assert_eq!(
            err.to_string(),
            "2 errors: get indoor temperature: deadline exceeded before the job reported\n\
             get outdoor temperature: no data: tair"
        );
        assert_eq!(err.errors[1].job, "get outdoor temperature");
    }
}
