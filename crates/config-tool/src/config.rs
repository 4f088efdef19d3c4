use std::time::Duration;

use dynconf_coordinator::CoordinatorConfig;

/// Settings of a [`crate::ConfigTool`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ToolConfig {
    /// Settings of the change coordinator
    pub coordinator: CoordinatorConfig,
    /// Delay before a node restarts once asked to (default: 2s)
    pub restart_delay: Duration,
    /// How long to wait for restarted nodes to come back (default: 120s)
    pub restart_wait_time: Duration,
    /// How often restarted nodes are polled (default: 500ms)
    pub restart_poll_interval: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            restart_delay: Duration::from_secs(2),
            restart_wait_time: Duration::from_secs(120),
            restart_poll_interval: Duration::from_millis(500),
        }
    }
}

/// Builder for [`ToolConfig`]
#[derive(Debug)]
pub struct ToolConfigBuilder {
    config: ToolConfig,
}

impl ToolConfigBuilder {
    /// Create a new builder with default values
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ToolConfig::default(),
        }
    }

    /// Set the coordinator settings
    #[must_use]
    pub fn coordinator(mut self, coordinator: CoordinatorConfig) -> Self {
        self.config.coordinator = coordinator;
        self
    }

    /// Set the delay before restarted nodes go down
    #[must_use]
    pub const fn restart_delay(mut self, delay: Duration) -> Self {
        self.config.restart_delay = delay;
        self
    }

    /// Set how long to wait for restarted nodes
    #[must_use]
    pub const fn restart_wait_time(mut self, wait_time: Duration) -> Self {
        self.config.restart_wait_time = wait_time;
        self
    }

    /// Set how often restarted nodes are polled
    #[must_use]
    pub const fn restart_poll_interval(mut self, interval: Duration) -> Self {
        self.config.restart_poll_interval = interval;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> ToolConfig {
        self.config
    }
}

impl Default for ToolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = ToolConfigBuilder::new()
            .restart_delay(Duration::from_millis(10))
            .restart_wait_time(Duration::from_secs(5))
            .build();

        assert_eq!(config.restart_delay, Duration::from_millis(10));
        assert_eq!(config.restart_wait_time, Duration::from_secs(5));
        assert_eq!(config.restart_poll_interval, Duration::from_millis(500));
        assert_eq!(config.coordinator, CoordinatorConfig::default());
    }
}
