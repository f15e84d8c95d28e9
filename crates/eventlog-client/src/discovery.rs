//! Endpoint discovery.
//!
//! The engine never hardcodes how it finds the next endpoint to dial: it
//! asks an [`EndpointDiscoverer`]. [`StaticEndpointDiscoverer`] always
//! returns the same address; [`GossipEndpointDiscoverer`] probes a seed
//! list and picks a node by state preference.

use std::net::SocketAddr;

use async_trait::async_trait;
use eventlog_settings::{ClusterSettings, NodePreference};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("no gossip seeds configured")]
    NoSeeds,
    #[error("no candidate node satisfied the preference order")]
    NoCandidate,
    #[error("gossip request failed: {0}")]
    GossipFailed(String),
}

use thiserror::Error;

/// Member state reported by a cluster gossip response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    Manager,
    CatchingUp,
    Clone,
    Slave,
    PreMaster,
    Master,
}

impl MemberState {
    fn preference(self) -> Option<NodePreference> {
        match self {
            MemberState::Manager => None,
            MemberState::CatchingUp => Some(NodePreference::CatchingUp),
            MemberState::Clone => Some(NodePreference::Clone),
            MemberState::Slave => Some(NodePreference::Slave),
            MemberState::PreMaster => Some(NodePreference::PreMaster),
            MemberState::Master => Some(NodePreference::Master),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterMember {
    pub address: SocketAddr,
    pub state: MemberState,
}

#[async_trait]
pub trait EndpointDiscoverer: Send + Sync {
    async fn discover(&self) -> Result<SocketAddr, DiscoveryError>;
}

/// Always resolves to the same configured endpoint.
pub struct StaticEndpointDiscoverer {
    endpoint: SocketAddr,
}

impl StaticEndpointDiscoverer {
    pub fn new(endpoint: SocketAddr) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl EndpointDiscoverer for StaticEndpointDiscoverer {
    async fn discover(&self) -> Result<SocketAddr, DiscoveryError> {
        Ok(self.endpoint)
    }
}

/// A discoverer whose gossip probing is injected, so tests can supply a
/// canned cluster view without a real gossip endpoint.
pub struct GossipEndpointDiscoverer<F> {
    settings: ClusterSettings,
    fetch_members: F,
}

impl<F> GossipEndpointDiscoverer<F>
where
    F: Fn() -> Result<Vec<ClusterMember>, DiscoveryError> + Send + Sync,
{
    pub fn new(settings: ClusterSettings, fetch_members: F) -> Self {
        Self {
            settings,
            fetch_members,
        }
    }

    /// Choose the highest-preference node out of a gossip response,
    /// excluding manager-only nodes.
    pub fn pick(members: &[ClusterMember], require_master: bool) -> Result<SocketAddr, DiscoveryError> {
        let best = members
            .iter()
            .filter_map(|m| m.state.preference().map(|p| (p, m)))
            .max_by_key(|(p, _)| *p);

        match best {
            Some((NodePreference::Master, m)) => Ok(m.address),
            Some((_, m)) if !require_master => Ok(m.address),
            _ => Err(DiscoveryError::NoCandidate),
        }
    }
}

#[async_trait]
impl<F> EndpointDiscoverer for GossipEndpointDiscoverer<F>
where
    F: Fn() -> Result<Vec<ClusterMember>, DiscoveryError> + Send + Sync,
{
    async fn discover(&self) -> Result<SocketAddr, DiscoveryError> {
        if self.settings.gossip_seeds.is_empty() {
            return Err(DiscoveryError::NoSeeds);
        }
        let members = (self.fetch_members)()?;
        Self::pick(&members, self.settings.require_master)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventlog_settings::GossipSeed;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[tokio::test]
    async fn static_discoverer_always_returns_same_endpoint() {
        let d = StaticEndpointDiscoverer::new(addr(1113));
        assert_eq!(d.discover().await.unwrap(), addr(1113));
    }

    #[test]
    fn picks_master_over_all_other_states() {
        let members = vec![
            ClusterMember {
                address: addr(1),
                state: MemberState::Slave,
            },
            ClusterMember {
                address: addr(2),
                state: MemberState::Master,
            },
            ClusterMember {
                address: addr(3),
                state: MemberState::PreMaster,
            },
        ];
        let chosen =
            GossipEndpointDiscoverer::<fn() -> Result<Vec<ClusterMember>, DiscoveryError>>::pick(
                &members, true,
            )
            .unwrap();
        assert_eq!(chosen, addr(2));
    }

    #[test]
    fn excludes_manager_only_nodes() {
        let members = vec![ClusterMember {
            address: addr(1),
            state: MemberState::Manager,
        }];
        let err = GossipEndpointDiscoverer::<fn() -> Result<Vec<ClusterMember>, DiscoveryError>>::pick(
            &members, false,
        )
        .unwrap_err();
        assert_eq!(err, DiscoveryError::NoCandidate);
    }

    #[tokio::test]
    async fn gossip_discoverer_requires_seeds() {
        let settings = ClusterSettings::builder().build();
        let d = GossipEndpointDiscoverer::new(settings, || Ok(vec![]));
        assert_eq!(d.discover().await.unwrap_err(), DiscoveryError::NoSeeds);
    }

    #[tokio::test]
    async fn gossip_discoverer_picks_preferred_member() {
        let settings = ClusterSettings::builder()
            .set_gossip_seed_endpoints(vec![GossipSeed::new("127.0.0.1", 1113)])
            .build();
        let d = GossipEndpointDiscoverer::new(settings, || {
            Ok(vec![ClusterMember {
                address: addr(1113),
                state: MemberState::Master,
            }])
        });
        assert_eq!(d.discover().await.unwrap(), addr(1113));
    }
}
