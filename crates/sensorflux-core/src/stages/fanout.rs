use tracing::{debug, info};

use crate::queue::BoundedQueue;

/// Copies every item of one upstream queue onto each downstream queue.
///
/// Each item is put on every output, in order, before the next one is drawn,
/// so the splitter moves at the pace of its slowest consumer. The outputs are
/// closed here and nowhere else, after upstream reports end-of-stream.
#[derive(Debug)]
pub struct FanOut<T> {
    upstream: BoundedQueue<T>,
    outputs: Vec<BoundedQueue<T>>,
}

impl<T: Clone> FanOut<T> {
    pub fn new(upstream: BoundedQueue<T>, outputs: Vec<BoundedQueue<T>>) -> Self {
        assert!(
            !outputs.is_empty(),
            "fan-out of `{}` needs at least one output",
            upstream.name()
        );
        Self { upstream, outputs }
    }

    /// Splits one queue into a sink-bound and a metrics-bound copy.
    pub fn pair(
        upstream: BoundedQueue<T>,
        sink_path: BoundedQueue<T>,
        metrics_path: BoundedQueue<T>,
    ) -> Self {
        Self::new(upstream, vec![sink_path, metrics_path])
    }

    /// Runs until upstream is drained. Returns the number of items forwarded.
    pub async fn run(self) -> u64 {
        let Self { upstream, outputs } = self;
        let Some((last, rest)) = outputs.split_last() else {
            unreachable!("fan-out constructed without outputs");
        };

        let mut forwarded = 0u64;
        while let Some(item) = upstream.get().await {
            for output in rest {
                output.put(item.clone()).await;
            }
            last.put(item).await;
            forwarded += 1;
        }
        debug!(upstream = %upstream.name(), forwarded, "upstream drained");

        for output in &outputs {
            output.close();
        }
        info!(upstream = %upstream.name(), forwarded, "fan-out finished");
        forwarded
    }
}
