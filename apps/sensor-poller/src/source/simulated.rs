use super::SourceAdapter;
use crate::error::FetchError;
use crate::telemetry::RawRecord;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SPACING_MS: i64 = 10 * 60 * 1000;
const VARIATION: f64 = 2.5;

#[derive(Debug, Clone)]
pub struct SimulatedSettings {
    pub data_points: usize,
    pub seed: Option<u64>,
}

impl Default for SimulatedSettings {
    fn default() -> Self {
        Self {
            data_points: 100,
            seed: None,
        }
    }
}

/// Generates `data_points + 1` records ending at the poll instant. Every poll after the
/// first jitters each value by up to ±2.5 so consecutive snapshots carry deltas.
pub struct SimulatedSource {
    settings: SimulatedSettings,
    rng: StdRng,
    polled: bool,
}

impl SimulatedSource {
    pub fn new(settings: SimulatedSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            settings,
            rng,
            polled: false,
        }
    }

    pub fn generate(&mut self, now_ms: i64) -> Vec<RawRecord> {
        let jitter = self.polled;
        self.polled = true;

        (0..=self.settings.data_points)
            .rev()
            .map(|steps_back| {
                let timestamp = now_ms - steps_back as i64 * SPACING_MS;
                let variation = if jitter {
                    self.rng.gen_range(-VARIATION..VARIATION)
                } else {
                    0.0
                };
                RawRecord::new(timestamp)
                    .with_field("temperature", self.rng.gen_range(10.0..35.0) + variation)
                    .with_field("humidity", self.rng.gen_range(30.0..80.0) + variation)
                    .with_field("waterLevel", self.rng.gen_range(0.0..50.0) + variation)
            })
            .collect()
    }
}

impl SourceAdapter for SimulatedSource {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn fetch_raw(&mut self) -> Result<Vec<RawRecord>, FetchError> {
        Ok(self.generate(Utc::now().timestamp_millis()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::RawValue;

    fn value(record: &RawRecord, field: &str) -> f64 {
        match record.fields.get(field) {
            Some(RawValue::Float(value)) => *value,
            other => panic!("unexpected {field}: {other:?}"),
        }
    }

    #[test]
    fn generates_spaced_ascending_records() {
        let mut source = SimulatedSource::new(SimulatedSettings {
            data_points: 6,
            seed: Some(7),
        });
        let records = source.generate(1_000_000_000);
        assert_eq!(records.len(), 7);
        assert_eq!(records[6].timestamp, Some(RawValue::Int(1_000_000_000)));
        assert_eq!(
            records[0].timestamp,
            Some(RawValue::Int(1_000_000_000 - 6 * SPACING_MS))
        );
        for record in &records {
            assert!((10.0..35.0).contains(&value(record, "temperature")));
            assert!((30.0..80.0).contains(&value(record, "humidity")));
            assert!((0.0..50.0).contains(&value(record, "waterLevel")));
        }
    }

    #[test]
    fn later_polls_stay_within_variation() {
        let mut source = SimulatedSource::new(SimulatedSettings {
            data_points: 50,
            seed: Some(11),
        });
        source.generate(0);
        for record in source.generate(SPACING_MS) {
            let temperature = value(&record, "temperature");
            assert!((10.0 - VARIATION..35.0 + VARIATION).contains(&temperature));
        }
    }

    #[test]
    fn seeded_sources_repeat() {
        let settings = SimulatedSettings {
            data_points: 3,
            seed: Some(42),
        };
        let first = SimulatedSource::new(settings.clone()).generate(0);
        let second = SimulatedSource::new(settings).generate(0);
        assert_eq!(first, second);
    }
}
