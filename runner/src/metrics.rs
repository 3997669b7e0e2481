use hdrhistogram as hdr;
use std::time::Duration;
use tracing::trace;

/// Readiness latencies for one case, in milliseconds.
#[derive(Clone, Debug)]
pub struct Latencies {
    histogram: hdr::Histogram<u64>,
    samples: Vec<Duration>,
}

impl Default for Latencies {
    fn default() -> Self {
        Self {
            histogram: hdr::Histogram::new(3).expect("3 significant figures must be valid"),
            samples: Vec::new(),
        }
    }
}

impl Latencies {
    pub fn record(&mut self, elapsed: Duration) {
        let millis = elapsed.as_millis();
        trace!(%millis);
        if millis < u64::MAX as u128 {
            self.histogram.saturating_record(millis as u64);
        } else {
            self.histogram.saturating_record(u64::MAX);
        }
        self.samples.push(elapsed);
    }

    pub fn histogram(&self) -> &hdr::Histogram<u64> {
        &self.histogram
    }

    /// Samples in the order they were recorded.
    pub fn samples(&self) -> &[Duration] {
        &self.samples
    }
}
