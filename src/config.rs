//! Runtime configuration of a consensus node.

use std::ops::Range;
use std::time::Duration;

use thiserror::Error;

/// Configurable parameters of a consensus node.
///
/// Each node in a group must be constructed with the same `Config`. Shorter timeouts allow the group to react
/// quicker to leader failure, but may cause spurious leadership changes when network latency approaches
/// `election_timeout_min`. The heartbeat interval must be well below the minimum election timeout, or followers
/// will start elections while the leader is healthy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The minimum election timeout in milliseconds.
    pub election_timeout_min: u64,

    /// The maximum election timeout in milliseconds. The election timer of each node is re-armed with a duration
    /// drawn uniformly from `election_timeout_min..election_timeout_max`.
    pub election_timeout_max: u64,

    /// The interval in milliseconds at which a leader sends heartbeats to its peers.
    pub heartbeat_interval: u64,

    /// The maximum number of log entries carried by a single append request. A follower further behind than this
    /// is caught up over successive requests.
    pub max_payload_entries: u64,
}

/// Error variants related to [`Config`] validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// The minimum election timeout is not smaller than the maximum election timeout.
    #[error("election timeout: min({min}) must be < max({max})")]
    ElectionTimeoutBounds {
        /// Minimum election timeout value.
        min: u64,
        /// Maximum election timeout value.
        max: u64,
    },

    /// The heartbeat interval is not smaller than the minimum election timeout.
    #[error("heartbeat_interval({heartbeat_interval}) must be < election_timeout_min({election_timeout_min})")]
    HeartbeatNotBelowElection {
        /// Heartbeat interval value.
        heartbeat_interval: u64,
        /// Minimum election timeout value.
        election_timeout_min: u64,
    },

    /// The `max_payload_entries` parameter is zero.
    #[error("max_payload_entries must be > 0")]
    MaxPayloadEntriesIsZero,
}

impl Config {
    /// Validates the parameters of this config, returning it unchanged if they are consistent.
    ///
    /// # Errors
    ///
    /// If any parameter is out of bounds or the parameters are mutually inconsistent, an error is returned.
    pub fn validate(self) -> Result<Config, ConfigError> {
        if self.election_timeout_min >= self.election_timeout_max {
            return Err(ConfigError::ElectionTimeoutBounds {
                min: self.election_timeout_min,
                max: self.election_timeout_max,
            });
        }

        if self.heartbeat_interval >= self.election_timeout_min {
            return Err(ConfigError::HeartbeatNotBelowElection {
                heartbeat_interval: self.heartbeat_interval,
                election_timeout_min: self.election_timeout_min,
            });
        }

        if self.max_payload_entries == 0 {
            return Err(ConfigError::MaxPayloadEntriesIsZero);
        }

        Ok(self)
    }

    pub(crate) fn election_timeout_range(&self) -> Range<u64> {
        self.election_timeout_min..self.election_timeout_max
    }

    pub(crate) fn heartbeat_duration(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
            max_payload_entries: 300,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = Config::default().validate().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_election_timeout_bounds() {
        let config = Config {
            election_timeout_min: 300,
            election_timeout_max: 300,
            ..Config::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ElectionTimeoutBounds { min: 300, max: 300 })
        );
    }

    #[test]
    fn test_heartbeat_below_election_timeout() {
        let config = Config {
            heartbeat_interval: 150,
            ..Config::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::HeartbeatNotBelowElection {
                heartbeat_interval: 150,
                election_timeout_min: 150,
            })
        );
    }

    #[test]
    fn test_max_payload_entries_nonzero() {
        let config = Config {
            max_payload_entries: 0,
            ..Config::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::MaxPayloadEntriesIsZero));
    }
}
