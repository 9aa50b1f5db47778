//! Reader configuration

use crate::framing::MAX_MESSAGE_LEN;

use std::time::Duration;

use serde::Deserialize;

/// Default bound on a single descriptor poll
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Accessory reader settings
///
/// `poll_timeout` is the shutdown latency of a session: a stop request is
/// observed by a blocked reader after at most one poll.
///
/// Fields loaded through serde skip the builder, so the accessors apply the
/// same normalization as [`ReaderConfigBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Poll timeout in milliseconds
    pub poll_timeout_ms: u64,

    /// Largest accepted message payload
    pub max_message_len: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT.as_millis() as u64,
            max_message_len: MAX_MESSAGE_LEN,
        }
    }
}

impl ReaderConfig {
    pub fn builder() -> ReaderConfigBuilder {
        ReaderConfigBuilder::default()
    }

    /// Poll timeout as a `Duration`; zero means the default
    pub fn poll_timeout(&self) -> Duration {
        normalize_poll_timeout(Duration::from_millis(self.poll_timeout_ms))
    }

    /// Accepted message size, clamped to 1 MiB; zero means the default
    pub fn max_message_len(&self) -> usize {
        normalize_max_message_len(self.max_message_len)
    }
}

fn normalize_poll_timeout(timeout: Duration) -> Duration {
    if timeout.is_zero() {
        DEFAULT_POLL_TIMEOUT
    } else {
        timeout.max(Duration::from_millis(1))
    }
}

fn normalize_max_message_len(len: usize) -> usize {
    if len == 0 {
        MAX_MESSAGE_LEN
    } else {
        len.min(MAX_MESSAGE_LEN)
    }
}

/// Builder for ReaderConfig
#[derive(Default)]
pub struct ReaderConfigBuilder {
    poll_timeout: Option<Duration>,
    max_message_len: usize,
}

impl ReaderConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }

    /// Lower the accepted message size. Values above 1 MiB are clamped.
    pub fn max_message_len(mut self, len: usize) -> Self {
        self.max_message_len = len;
        self
    }

    pub fn build(self) -> ReaderConfig {
        let poll_timeout = normalize_poll_timeout(self.poll_timeout.unwrap_or_default());
        ReaderConfig {
            poll_timeout_ms: poll_timeout.as_millis() as u64,
            max_message_len: normalize_max_message_len(self.max_message_len),
        }
    }
}
