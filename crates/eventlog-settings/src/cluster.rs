use std::time::Duration;

/// A single gossip seed endpoint, given either as an already-resolved
/// `host:port` or as a hint for DNS resolution by the discoverer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipSeed {
    pub host: String,
    pub port: u16,
}

impl GossipSeed {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Node-state preference used when picking a target out of a gossip
/// response: `Master > PreMaster > Slave > Clone > CatchingUp`, excluding
/// manager-only nodes entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodePreference {
    CatchingUp = 0,
    Clone = 1,
    Slave = 2,
    PreMaster = 3,
    Master = 4,
}

/// Settings governing gossip-based cluster discovery.
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub gossip_seeds: Vec<GossipSeed>,
    pub max_discover_attempts: u32,
    pub gossip_timeout: Duration,
    pub require_master: bool,
}

impl ClusterSettings {
    pub fn builder() -> ClusterSettingsBuilder {
        ClusterSettingsBuilder::default()
    }
}

pub struct ClusterSettingsBuilder {
    gossip_seeds: Vec<GossipSeed>,
    max_discover_attempts: u32,
    gossip_timeout: Duration,
    require_master: bool,
}

impl Default for ClusterSettingsBuilder {
    fn default() -> Self {
        Self {
            gossip_seeds: Vec::new(),
            max_discover_attempts: 10,
            gossip_timeout: Duration::from_secs(1),
            require_master: true,
        }
    }
}

impl ClusterSettingsBuilder {
    pub fn set_gossip_seed_endpoints(mut self, seeds: Vec<GossipSeed>) -> Self {
        self.gossip_seeds = seeds;
        self
    }

    pub fn with_max_discover_attempts(mut self, n: u32) -> Self {
        self.max_discover_attempts = n;
        self
    }

    pub fn with_gossip_timeout(mut self, d: Duration) -> Self {
        self.gossip_timeout = d;
        self
    }

    pub fn require_master(mut self, require: bool) -> Self {
        self.require_master = require;
        self
    }

    pub fn build(self) -> ClusterSettings {
        ClusterSettings {
            gossip_seeds: self.gossip_seeds,
            max_discover_attempts: self.max_discover_attempts,
            gossip_timeout: self.gossip_timeout,
            require_master: self.require_master,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_preference_orders_master_highest() {
        assert!(NodePreference::Master > NodePreference::PreMaster);
        assert!(NodePreference::PreMaster > NodePreference::Slave);
        assert!(NodePreference::Slave > NodePreference::Clone);
        assert!(NodePreference::Clone > NodePreference::CatchingUp);
    }

    #[test]
    fn builder_collects_seeds() {
        let settings = ClusterSettings::builder()
            .set_gossip_seed_endpoints(vec![
                GossipSeed::new("10.0.0.1", 2113),
                GossipSeed::new("10.0.0.2", 2113),
            ])
            .build();
        assert_eq!(settings.gossip_seeds.len(), 2);
        assert_eq!(settings.max_discover_attempts, 10);
    }
}
