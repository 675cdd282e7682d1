use super::metrics::{DerivedSnapshot, MetricEngine};
use crate::error::PipelineError;
use crate::telemetry::Reading;
use serde::Serialize;
use std::num::NonZeroUsize;

/// How a successful poll's series merges into the retained one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetentionPolicy {
    #[default]
    Replace,
    Accumulate { max_readings: Option<NonZeroUsize> },
}

#[derive(Debug, Default)]
pub struct PipelineState {
    series: Vec<Reading>,
    previous_latest: Option<Reading>,
    snapshot: Option<DerivedSnapshot>,
    retention: RetentionPolicy,
}

impl PipelineState {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            retention,
            ..Self::default()
        }
    }

    pub fn series(&self) -> &[Reading] {
        &self.series
    }

    pub fn previous_latest(&self) -> Option<&Reading> {
        self.previous_latest.as_ref()
    }

    pub fn snapshot(&self) -> Option<&DerivedSnapshot> {
        self.snapshot.as_ref()
    }

    /// Records a reading as the delta baseline for the next commit without committing
    /// any series. Ignored once a series has been committed.
    pub fn set_baseline(&mut self, reading: Reading) {
        if self.series.is_empty() {
            self.previous_latest = Some(reading);
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Merges a freshly normalized, timestamp-ascending series and derives the new
    /// snapshot. Nothing changes when derivation fails.
    pub fn commit(
        &mut self,
        incoming: Vec<Reading>,
        engine: &MetricEngine,
    ) -> Result<&DerivedSnapshot, PipelineError> {
        let baseline = self.series.last().cloned().or_else(|| self.previous_latest.clone());
        let next = match self.retention {
            RetentionPolicy::Replace => incoming,
            RetentionPolicy::Accumulate { max_readings } => {
                let mut merged = self.series.clone();
                let last_ts = merged.last().map(|reading| reading.timestamp);
                merged.extend(
                    incoming
                        .into_iter()
                        .filter(|reading| last_ts.map_or(true, |last| reading.timestamp > last)),
                );
                if let Some(max) = max_readings {
                    let excess = merged.len().saturating_sub(max.get());
                    merged.drain(..excess);
                }
                merged
            }
        };

        let snapshot = engine.derive(&next, baseline.as_ref())?;
        self.previous_latest = baseline;
        self.series = next;
        Ok(self.snapshot.insert(snapshot))
    }
}
