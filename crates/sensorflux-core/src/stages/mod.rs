pub mod fanout;
pub mod generator;
pub mod sink;
pub mod transformer;
pub mod validator;

use std::time::Duration;

use rand::Rng;
use serde::Serialize;

pub use fanout::FanOut;
pub use generator::Generator;
pub use sink::{open_destination, JsonLinesSink, SinkItem, SinkReport};
pub use transformer::TransformerPool;
pub use validator::ValidatorPool;

/// What a single pool worker did before its input closed.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct WorkerReport {
    pub stage: &'static str,
    pub worker: usize,
    pub accepted: u64,
    pub rejected: u64,
}

/// Sleeps for a random fraction of `max_ms`. Used to mimic uneven stage latency.
pub(crate) async fn pause(max_ms: u64) {
    if max_ms == 0 {
        return;
    }
    let delay = rand::thread_rng().gen_range(0..max_ms);
    tokio::time::sleep(Duration::from_millis(delay)).await;
}
