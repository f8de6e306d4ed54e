//! Random telemetry standing in for a real metrics collector

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use nodefleet_cluster::{Result, TelemetrySample, TelemetrySource};

/// Chance that a node has nothing to report on a given tick
const DROPOUT_PROBABILITY: f64 = 0.05;

pub struct SimulatedTelemetry {
    rng: Mutex<StdRng>,
}

impl SimulatedTelemetry {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_rng(&mut rand::rng())),
        }
    }

    #[cfg(test)]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn draw(&self) -> Option<TelemetrySample> {
        let mut rng = self.rng.lock();
        if rng.random_bool(DROPOUT_PROBABILITY) {
            return None;
        }

        Some(TelemetrySample {
            cpu_usage_pct: rng.random_range(20.0..98.0),
            mem_usage_pct: rng.random_range(30.0..97.0),
            accelerator_usage_pct: rng.random_range(40.0..100.0),
            throughput: rng.random_range(50.0..150.0),
            efficiency_pct: rng.random_range(60.0..100.0),
            uptime_pct: rng.random_range(90.0..100.0),
            sampled_at: Some(Utc::now()),
        })
    }
}

impl Default for SimulatedTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetrySource for SimulatedTelemetry {
    async fn sample(&self, node_id: &str) -> Result<Option<TelemetrySample>> {
        let sample = self.draw();
        if sample.is_none() {
            tracing::trace!(node_id = %node_id, "Simulated telemetry dropout");
        }
        Ok(sample)
    }
}
