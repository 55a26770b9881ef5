//! Transfer timeouts and buffer sizing.

use std::time::Duration;

/// Timeouts and buffer sizing for one connection.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Capacity of pooled chunk buffers.
    pub buffer_size: usize,
    /// Wait for the acknowledgement of a head frame.
    pub head_timeout: Duration,
    /// Wait for a file status report.
    pub status_timeout: Duration,
    /// Wait for the acknowledgement of a recv-head frame.
    pub recv_head_timeout: Duration,
    /// Minimum wait for the acknowledgement of an end frame.
    pub end_timeout_floor: Duration,
    /// Minimum wait for a pulled file to arrive.
    pub recv_timeout_floor: Duration,
    /// Dial timeout.
    pub connect_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            buffer_size: ferry_protocol::DEFAULT_BUFFER_SIZE,
            head_timeout: Duration::from_secs(10),
            status_timeout: Duration::from_secs(10),
            recv_head_timeout: Duration::from_secs(5),
            end_timeout_floor: Duration::from_secs(10),
            recv_timeout_floor: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl TransferConfig {
    /// Wait for the end acknowledgement of a `size`-byte file.
    pub fn end_timeout(&self, size: u64) -> Duration {
        scaled(size).max(self.end_timeout_floor)
    }

    /// Wait for a pulled `size`-byte file.
    pub fn recv_timeout(&self, size: u64) -> Duration {
        scaled(size).max(self.recv_timeout_floor)
    }
}

/// One second per 10 KiB.
fn scaled(size: u64) -> Duration {
    Duration::from_secs(size / 1024 / 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_have_floor() {
        let config = TransferConfig::default();
        assert_eq!(config.end_timeout(0), Duration::from_secs(10));
        assert_eq!(config.recv_timeout(1024), Duration::from_secs(5));
    }

    #[test]
    fn test_timeouts_scale_with_size() {
        let config = TransferConfig::default();
        let size = 64 * 1024 * 1024;
        assert_eq!(config.end_timeout(size), Duration::from_secs(6553));
        assert_eq!(config.recv_timeout(size), Duration::from_secs(6553));
    }
}
