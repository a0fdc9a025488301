//! Configuration for the SPV session.

use std::time::Duration;

use bitcoin::Network;

/// Configuration for the SPV node.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Network the session operates on.
    pub network: Network,

    /// Merkle blocks with header timestamps before this are not downloaded;
    /// only their headers are fetched.
    pub fast_catchup: u32,

    /// Protocol version advertised in `GetHeaders` requests.
    pub protocol_version: u32,

    /// Maximum merkle blocks assigned to one peer per `GetData`.
    pub max_blocks_per_request: usize,

    /// Age after which an unanswered request counts as stalled.
    pub stall_timeout: Duration,

    /// Cadence of the stall-check heartbeat.
    pub heartbeat_interval: Duration,

    /// Capacity of the bounded request channel.
    pub request_channel_capacity: usize,
}

impl ClientConfig {
    /// Configuration with defaults for the given network.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            fast_catchup: 0,
            protocol_version: 70015,
            max_blocks_per_request: 500,
            stall_timeout: Duration::from_secs(120),
            heartbeat_interval: Duration::from_secs(120),
            request_channel_capacity: 256,
        }
    }

    /// Mainnet defaults.
    pub fn mainnet() -> Self {
        Self::new(Network::Bitcoin)
    }

    /// Testnet defaults.
    pub fn testnet() -> Self {
        Self::new(Network::Testnet)
    }

    /// Regtest defaults.
    pub fn regtest() -> Self {
        Self::new(Network::Regtest)
    }

    /// Set the fast-catchup timestamp.
    pub fn with_fast_catchup(mut self, ts: u32) -> Self {
        self.fast_catchup = ts;
        self
    }

    /// Set the stall timeout.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Set the heartbeat cadence.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the per-request merkle block cap.
    pub fn with_max_blocks_per_request(mut self, max: usize) -> Self {
        self.max_blocks_per_request = max;
        self
    }

    /// Set the advertised protocol version.
    pub fn with_protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = version;
        self
    }

    /// Set the request channel capacity.
    pub fn with_request_channel_capacity(mut self, capacity: usize) -> Self {
        self.request_channel_capacity = capacity;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::mainnet()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_expectations() {
        let config = ClientConfig::mainnet();
        assert_eq!(config.max_blocks_per_request, 500);
        assert_eq!(config.stall_timeout, Duration::from_secs(120));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(120));
    }

    #[test]
    fn builders_override_fields() {
        let config = ClientConfig::regtest()
            .with_fast_catchup(1_500_000_000)
            .with_max_blocks_per_request(16)
            .with_stall_timeout(Duration::from_secs(5));
        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.fast_catchup, 1_500_000_000);
        assert_eq!(config.max_blocks_per_request, 16);
        assert_eq!(config.stall_timeout, Duration::from_secs(5));
    }
}
