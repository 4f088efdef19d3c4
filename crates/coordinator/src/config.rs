use std::time::Duration;

/// Settings of a [`crate::ChangeCoordinator`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoordinatorConfig {
    /// Maximum number of nodes probed at once (default: 8)
    pub concurrency: usize,
    /// Time allowed to connect to a node (default: 10s)
    pub connect_timeout: Duration,
    /// Time allowed for a node to answer once connected (default: 30s)
    pub request_timeout: Duration,
    /// Host stamped on every mutative message
    pub host: String,
    /// User stamped on every mutative message
    pub user: String,
    /// Token of the configuration lock held by this client, if any
    pub lock_token: Option<String>,
}

impl CoordinatorConfig {
    /// Upper bound for one call to one node.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        self.connect_timeout.saturating_add(self.request_timeout)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            user: std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
            lock_token: None,
        }
    }
}

/// Builder for [`CoordinatorConfig`]
#[derive(Debug)]
pub struct CoordinatorConfigBuilder {
    config: CoordinatorConfig,
}

impl CoordinatorConfigBuilder {
    /// Create a new builder with default values
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: CoordinatorConfig::default(),
        }
    }

    /// Set the maximum number of nodes probed at once
    #[must_use]
    pub const fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Set the connect timeout
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the request timeout
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the host stamped on mutative messages
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the user stamped on mutative messages
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = user.into();
        self
    }

    /// Set the token of the configuration lock held by this client
    #[must_use]
    pub fn lock_token(mut self, token: impl Into<String>) -> Self {
        self.config.lock_token = Some(token.into());
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> CoordinatorConfig {
        self.config
    }
}

impl Default for CoordinatorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.call_timeout(), Duration::from_secs(40));
        assert!(config.lock_token.is_none());
    }

    #[test]
    fn test_builder() {
        let config = CoordinatorConfigBuilder::new()
            .concurrency(2)
            .request_timeout(Duration::from_secs(5))
            .host("admin-host")
            .user("admin")
            .lock_token("token")
            .build();

        assert_eq!(config.concurrency, 2);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.host, "admin-host");
        assert_eq!(config.user, "admin");
        assert_eq!(config.lock_token.as_deref(), Some("token"));
    }
}
