use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::config::GeneratorConfig;
use crate::model::Record;
use crate::queue::BoundedQueue;

use super::pause;

pub const INVALID_VALUE: f64 = -1.0;
pub const INVALID_UNIT: &str = "INVALID_UNIT";

/// Synthetic sensor readings, with faults injected at fixed intervals.
#[derive(Debug, Clone)]
pub struct Generator {
    count: usize,
    config: GeneratorConfig,
    start: DateTime<Utc>,
    jitter_ms: u64,
}

impl Generator {
    pub fn new(count: usize, config: GeneratorConfig) -> Self {
        Self {
            count,
            config,
            start: Utc::now(),
            jitter_ms: 0,
        }
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    pub fn with_jitter(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    pub fn count(&self) -> usize {
        self.count
    }

    fn rng(&self) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Builds the record at `index`. Injected faults depend only on the index.
    pub fn record_at(&self, index: usize, rng: &mut impl Rng) -> Record {
        let config = &self.config;
        let mut record = Record::raw(
            format!("rec-{index:04}"),
            self.start + Duration::seconds(index as i64),
            format!("sensor-{}", rng.gen_range(1..=config.sensors)),
            rng.gen_range(config.min_value..config.max_value),
            config.unit.clone(),
            format!("Room-{}", rng.gen_range(1..=config.locations)),
        );

        if injects(index, config.invalid_value_every) {
            record.value = INVALID_VALUE;
        }
        if injects(index, config.invalid_unit_every) {
            record.unit = INVALID_UNIT.to_string();
        }
        record
    }

    /// Every record the generator would emit, in order.
    pub fn records(&self) -> Vec<Record> {
        let mut rng = self.rng();
        (0..self.count)
            .map(|index| self.record_at(index, &mut rng))
            .collect()
    }

    /// Fills `out` with `count` records in sequence order, then closes it.
    pub async fn run(self, out: BoundedQueue<Record>) -> u64 {
        info!(count = self.count, "generator started");
        let mut rng = self.rng();
        let mut emitted = 0u64;

        for index in 0..self.count {
            let record = self.record_at(index, &mut rng);
            debug!(record_id = %record.id, value = record.value, "generated record");
            out.put(record).await;
            emitted += 1;
            pause(self.jitter_ms).await;
        }

        out.close();
        info!(emitted, "generator finished");
        emitted
    }
}

fn injects(index: usize, every: usize) -> bool {
    every != 0 && index % every == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(count: usize) -> Generator {
        Generator::new(
            count,
            GeneratorConfig {
                seed: Some(7),
                ..GeneratorConfig::default()
            },
        )
    }

    #[test]
    fn ids_are_sequential_and_faults_follow_the_index() {
        let records = seeded(23).records();
        assert_eq!(records.len(), 23);

        for (index, record) in records.iter().enumerate() {
            assert_eq!(record.id, format!("rec-{index:04}"));
            assert_eq!(index % 10 == 0, record.value == INVALID_VALUE);
            assert_eq!(index % 11 == 0, record.unit == INVALID_UNIT);
        }
    }

    #[test]
    fn same_seed_same_records() {
        let start = Utc::now();
        let a = seeded(10).with_start(start).records();
        let b = seeded(10).with_start(start).records();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn run_closes_queue_after_last_record() {
        let queue = BoundedQueue::new("raw", 8);
        let emitted = seeded(5).run(queue.clone()).await;
        assert_eq!(emitted, 5);
        assert!(queue.is_closed());

        let mut drained = 0;
        while queue.get().await.is_some() {
            drained += 1;
        }
        assert_eq!(drained, 5);
    }
}
