/// Decides when the host should produce a new snapshot.
///
/// Requests fall on a fixed grid of instants, `k * interval`, so irregular
/// frame times do not make the request rate drift. Nothing is requested while
/// no viewer is streaming.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestScheduler {
    interval: f64,
    next_request_time: f64,
}

impl RequestScheduler {
    /// `interval` is in seconds of application time and must be positive.
    pub fn new(interval: f64) -> Self {
        Self {
            interval,
            next_request_time: 0.0,
        }
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    /// Whether a snapshot is due at `app_time`.
    pub fn poll(&mut self, app_time: f64, streaming_clients: usize) -> bool {
        if streaming_clients == 0 || app_time < self.next_request_time {
            return false;
        }
        self.next_request_time = ((app_time / self.interval).floor() + 1.0) * self.interval;
        true
    }
}
