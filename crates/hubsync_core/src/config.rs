//! Timing configuration shared by server and client.

use std::time::Duration;

/// Bounded waits on the transport.
///
/// Every network wait that could otherwise starve uses one of these; an
/// expiry is how loops get a chance to notice they are stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// How long one `accept` waits before reporting a heartbeat tick.
    pub accept: Duration,
    /// How long a read may block.
    pub read: Duration,
    /// How long an outbound connect may take.
    pub connect: Duration,
}

impl Timeouts {
    /// Creates timeouts with the default values.
    pub fn new() -> Self {
        Self {
            accept: Duration::from_millis(250),
            read: Duration::from_millis(5000),
            connect: Duration::from_millis(5000),
        }
    }

    /// Sets the accept heartbeat.
    pub fn with_accept(mut self, accept: Duration) -> Self {
        self.accept = accept;
        self
    }

    /// Sets the read timeout.
    pub fn with_read(mut self, read: Duration) -> Self {
        self.read = read;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect(mut self, connect: Duration) -> Self {
        self.connect = connect;
        self
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the dirty-record poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Time between scans.
    pub interval: Duration,
}

impl PollerConfig {
    /// Creates a poller configuration with the given interval.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(5000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeouts() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.accept, Duration::from_millis(250));
        assert_eq!(timeouts.read, Duration::from_secs(5));
        assert_eq!(timeouts.connect, Duration::from_secs(5));
        assert_eq!(PollerConfig::default().interval, Duration::from_secs(5));
    }

    #[test]
    fn timeouts_builder() {
        let timeouts = Timeouts::new()
            .with_accept(Duration::from_millis(20))
            .with_read(Duration::from_millis(300))
            .with_connect(Duration::from_millis(400));
        assert_eq!(timeouts.accept, Duration::from_millis(20));
        assert_eq!(timeouts.read, Duration::from_millis(300));
        assert_eq!(timeouts.connect, Duration::from_millis(400));
    }
}
