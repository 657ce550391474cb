//! Pool configuration.

use crate::error::PoolError;

/// Configuration for a connection pool.
///
/// # Example
///
/// ```rust
/// use evpg_pool::PoolConfig;
///
/// let config = PoolConfig::new("host=localhost dbname=app")
///     .min_connections(8)
///     .min_free_connections(3);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[non_exhaustive]
pub struct PoolConfig {
    /// Connection string handed verbatim to the connector.
    pub conninfo: String,

    /// Connections opened when the pool is created.
    pub min_connections: usize,

    /// Growth is triggered when fewer connections than this are free
    /// (available or still connecting).
    pub min_free_connections: usize,

    /// Upper bound on free connections. Validated but not enforced; the pool
    /// never closes healthy idle connections.
    pub max_free_connections: usize,

    /// Hard cap on the inventory size. `None` lets the pool grow without
    /// bound.
    pub max_connections: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            conninfo: String::new(),
            min_connections: 5,
            min_free_connections: 2,
            max_free_connections: 7,
            max_connections: None,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default sizing for `conninfo`.
    #[must_use]
    pub fn new(conninfo: impl Into<String>) -> Self {
        Self {
            conninfo: conninfo.into(),
            ..Self::default()
        }
    }

    /// Set the connection string.
    #[must_use]
    pub fn conninfo(mut self, conninfo: impl Into<String>) -> Self {
        self.conninfo = conninfo.into();
        self
    }

    /// Set the number of connections opened at startup.
    #[must_use]
    pub fn min_connections(mut self, count: usize) -> Self {
        self.min_connections = count;
        self
    }

    /// Set the free-connection low-water mark.
    #[must_use]
    pub fn min_free_connections(mut self, count: usize) -> Self {
        self.min_free_connections = count;
        self
    }

    /// Set the free-connection high-water mark.
    #[must_use]
    pub fn max_free_connections(mut self, count: usize) -> Self {
        self.max_free_connections = count;
        self
    }

    /// Cap the total number of connection entries.
    #[must_use]
    pub fn max_connections(mut self, count: usize) -> Self {
        self.max_connections = Some(count);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.conninfo.trim().is_empty() {
            return Err(PoolError::Config("conninfo must not be empty".into()));
        }

        if self.max_free_connections < self.min_free_connections {
            return Err(PoolError::Config(format!(
                "max_free_connections ({}) must be at least min_free_connections ({})",
                self.max_free_connections, self.min_free_connections
            )));
        }

        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err(PoolError::Config(
                    "max_connections must be greater than 0".into(),
                ));
            }
            if max < self.min_connections {
                return Err(PoolError::Config(format!(
                    "max_connections ({max}) must be at least min_connections ({})",
                    self.min_connections
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sizing() {
        let config = PoolConfig::new("dbname=test");
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.min_free_connections, 2);
        assert_eq!(config.max_free_connections, 7);
        assert_eq!(config.max_connections, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_conninfo_rejected() {
        let err = PoolConfig::default().validate().unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));
    }

    #[test]
    fn test_free_bounds_must_be_ordered() {
        let config = PoolConfig::new("dbname=test")
            .min_free_connections(4)
            .max_free_connections(3);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_connections_bounds() {
        let base = PoolConfig::new("dbname=test").min_connections(4);
        assert!(base.clone().max_connections(0).validate().is_err());
        assert!(base.clone().max_connections(3).validate().is_err());
        assert!(base.max_connections(4).validate().is_ok());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_deserialize_partial() {
        let config: PoolConfig =
            serde_json::from_str(r#"{"conninfo":"dbname=test","min_connections":3}"#).unwrap();
        assert_eq!(config.min_connections, 3);
        assert_eq!(config.min_free_connections, 2);
    }
}
