//! Broker configuration

use burrow_namespace::SpawnConfig;
use serde::{Deserialize, Serialize};
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::time::Duration;

/// Broker configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Executable started as a child broker for new user/PID namespaces
    pub executable: PathBuf,

    /// Arguments passed to the child broker executable
    pub args: Vec<String>,

    /// How long a service loop waits for a request before checking for
    /// cancellation again
    pub receive_deadline: Duration,

    /// How long a client waits for the response to its request
    pub response_deadline: Duration,

    /// Descriptor number of the channel end inherited by child brokers
    pub channel_slot: RawFd,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("/proc/self/exe"),
            args: vec!["serve".to_string()],
            receive_deadline: Duration::from_secs(2),
            response_deadline: Duration::from_secs(5),
            channel_slot: 3,
        }
    }
}

impl BrokerConfig {
    /// Create a new broker configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the child broker executable
    #[must_use]
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    /// Set the arguments of the child broker executable
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the service loop's receive deadline
    #[must_use]
    pub const fn with_receive_deadline(mut self, deadline: Duration) -> Self {
        self.receive_deadline = deadline;
        self
    }

    /// Set the client's response deadline
    #[must_use]
    pub const fn with_response_deadline(mut self, deadline: Duration) -> Self {
        self.response_deadline = deadline;
        self
    }

    /// Set the descriptor slot of the channel end inherited by child brokers
    #[must_use]
    pub const fn with_channel_slot(mut self, slot: RawFd) -> Self {
        self.channel_slot = slot;
        self
    }

    /// How child brokers get spawned
    #[must_use]
    pub fn spawn_config(&self) -> SpawnConfig {
        SpawnConfig {
            executable: self.executable.clone(),
            args: self.args.clone(),
            channel_slot: self.channel_slot,
        }
    }
}
