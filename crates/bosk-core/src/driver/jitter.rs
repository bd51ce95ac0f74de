use std::sync::{Arc, Mutex};
use std::time::Duration;

use bosk_tree::Node;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::DriverResult;
use crate::update::Update;

use super::{factory, BoskDriver, DriverFactory};

/// Configuration for [`JitterDriver`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JitterConfig {
    /// Mean of the exponentially distributed delay, in microseconds.
    pub mean_delay_us: u64,
    /// Fixed seed for reproducible delays.
    pub seed: Option<u64>,
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            mean_delay_us: 1_000,
            seed: None,
        }
    }
}

impl JitterConfig {
    pub fn with_mean(mean: Duration) -> Self {
        Self {
            mean_delay_us: mean.as_micros().try_into().unwrap_or(u64::MAX),
            ..Self::default()
        }
    }

    pub fn seeded(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Test aid: sleeps a random, exponentially distributed time before
/// forwarding each call, to shake out timing assumptions.
pub struct JitterDriver {
    downstream: Arc<dyn BoskDriver>,
    mean: Duration,
    rng: Mutex<StdRng>,
}

impl JitterDriver {
    pub fn new(downstream: Arc<dyn BoskDriver>, config: &JitterConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            downstream,
            mean: Duration::from_micros(config.mean_delay_us),
            rng: Mutex::new(rng),
        }
    }

    pub fn factory(config: JitterConfig) -> DriverFactory {
        factory(move |_, downstream| Ok(Arc::new(JitterDriver::new(downstream, &config))))
    }

    fn next_delay(&self) -> Duration {
        let u: f64 = self.rng.lock().expect("jitter rng lock poisoned").gen();
        self.mean.mul_f64(-(1.0 - u).ln())
    }

    fn pause(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

impl BoskDriver for JitterDriver {
    fn initial_root(&self) -> DriverResult<Node> {
        self.pause();
        self.downstream.initial_root()
    }

    fn submit(&self, update: Update) -> DriverResult<()> {
        self.pause();
        self.downstream.submit(update)
    }

    fn flush(&self) -> DriverResult<()> {
        self.pause();
        self.downstream.flush()
    }

    fn close(&self) {
        self.downstream.close();
    }
}
