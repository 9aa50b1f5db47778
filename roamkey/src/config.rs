//! Transaction configuration

use roamkey_transport::ReaderConfig;
use roamkey_transport::session::DEFAULT_WORKER_NAME;

use std::time::Duration;

use serde::Deserialize;

/// Default delay between activity start and the first radio request
pub const DEFAULT_BLUETOOTH_ENABLE_DELAY: Duration = Duration::from_millis(500);

/// Settings shared by every transaction an embedding app creates
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Delay armed in `EnableBluetoothWaiting`, in milliseconds
    pub bluetooth_enable_delay_ms: u64,

    /// Accessory reader settings for USB transactions
    pub reader: ReaderConfig,

    /// Name of the accessory reader thread
    pub worker_name: String,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            bluetooth_enable_delay_ms: DEFAULT_BLUETOOTH_ENABLE_DELAY.as_millis() as u64,
            reader: ReaderConfig::default(),
            worker_name: DEFAULT_WORKER_NAME.to_string(),
        }
    }
}

impl TransactionConfig {
    pub fn builder() -> TransactionConfigBuilder {
        TransactionConfigBuilder::default()
    }

    /// Enable delay; zero means the default
    pub fn bluetooth_enable_delay(&self) -> Duration {
        match self.bluetooth_enable_delay_ms {
            0 => DEFAULT_BLUETOOTH_ENABLE_DELAY,
            ms => Duration::from_millis(ms),
        }
    }

    /// Reader thread name; empty means the default
    pub fn worker_name(&self) -> &str {
        if self.worker_name.is_empty() {
            DEFAULT_WORKER_NAME
        } else {
            &self.worker_name
        }
    }
}

/// Builder for TransactionConfig
#[derive(Default)]
pub struct TransactionConfigBuilder {
    bluetooth_enable_delay: Option<Duration>,
    reader: Option<ReaderConfig>,
    worker_name: Option<String>,
}

impl TransactionConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bluetooth_enable_delay(mut self, delay: Duration) -> Self {
        self.bluetooth_enable_delay = Some(delay);
        self
    }

    pub fn reader(mut self, reader: ReaderConfig) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = Some(name.into());
        self
    }

    pub fn build(self) -> TransactionConfig {
        let delay = match self.bluetooth_enable_delay {
            Some(d) if !d.is_zero() => d,
            _ => DEFAULT_BLUETOOTH_ENABLE_DELAY,
        };
        TransactionConfig {
            bluetooth_enable_delay_ms: delay.as_millis() as u64,
            reader: self.reader.unwrap_or_default(),
            worker_name: match self.worker_name {
                Some(name) if !name.is_empty() => name,
                _ => DEFAULT_WORKER_NAME.to_string(),
            },
        }
    }
}
