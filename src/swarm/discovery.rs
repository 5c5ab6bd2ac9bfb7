//! Peer discovery from static seeds and gossip digests.
//!
//! Discovery populates membership without duplicating announcements: a
//! known-set keyed by node id guarantees the discovery callback fires at
//! most once per remote node per start cycle. Seed and gossip fetch
//! failures are swallowed; an unreachable seed is not fatal.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::swarm::protocol::{GossipPeer, NodeIdentity};
use crate::swarm::transport::PeerTransport;

/// Invoked exactly once per newly seen remote identity per start cycle.
pub type PeerDiscoveredCallback = Arc<dyn Fn(NodeIdentity) + Send + Sync>;

pub struct PeerDiscovery {
    mdns: bool,
    gossip: bool,
    seeds: Vec<String>,
    local: NodeIdentity,
    transport: Arc<PeerTransport>,
    known: Mutex<HashSet<String>>,
    started: AtomicBool,
    on_peer_discovered: PeerDiscoveredCallback,
}

impl PeerDiscovery {
    pub fn new(
        mdns: bool,
        gossip: bool,
        seeds: Vec<String>,
        local: NodeIdentity,
        transport: Arc<PeerTransport>,
        on_peer_discovered: PeerDiscoveredCallback,
    ) -> Self {
        Self {
            mdns,
            gossip,
            seeds,
            local,
            transport,
            known: Mutex::new(HashSet::new()),
            started: AtomicBool::new(false),
            on_peer_discovered,
        }
    }

    /// Start a discovery cycle. Idempotent; a second call while started is
    /// a no-op.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.mark_known(&self.local.node_id);
        if self.mdns {
            tracing::debug!("mDNS discovery flag set but not implemented, ignoring");
        }
        self.discover_from_seeds().await;
    }

    /// Fetch identity documents from every configured seed URL.
    pub async fn discover_from_seeds(&self) {
        for seed in &self.seeds {
            let resp = self.transport.fetch_identity(seed).await;
            if !resp.success {
                tracing::debug!(seed = %seed, "seed unreachable: {:?}", resp.error);
                continue;
            }
            match resp.decode::<NodeIdentity>() {
                Some(identity) => self.surface(identity),
                None => {
                    tracing::warn!(seed = %seed, "seed returned an undecodable identity document");
                }
            }
        }
    }

    /// Feed peer records from a gossip digest. No-op when gossip is
    /// disabled. Each unknown peer's identity is fetched from its own
    /// `api_url` rather than trusted from the digest.
    pub async fn process_gossip(&self, peers: &[GossipPeer]) {
        if !self.gossip {
            return;
        }
        for peer in peers {
            if peer.node_id == self.local.node_id || self.is_known(&peer.node_id) {
                continue;
            }
            let resp = self.transport.fetch_identity(&peer.api_url).await;
            if !resp.success {
                tracing::debug!(
                    node_id = %peer.node_id,
                    "gossip peer identity fetch failed: {:?}",
                    resp.error
                );
                continue;
            }
            if let Some(identity) = resp.decode::<NodeIdentity>() {
                self.surface(identity);
            }
        }
    }

    /// Record and announce a fetched identity. The insert into the known
    /// set decides whether the callback fires, so concurrent digests for
    /// the same peer surface it once.
    fn surface(&self, identity: NodeIdentity) {
        if identity.node_id == self.local.node_id {
            return;
        }
        let newly_known = self
            .known
            .lock()
            .expect("known set lock")
            .insert(identity.node_id.clone());
        if newly_known {
            tracing::info!(node_id = %identity.node_id, api_url = %identity.api_url, "discovered peer");
            (self.on_peer_discovered)(identity);
        }
    }

    pub fn mark_known(&self, node_id: &str) {
        self.known
            .lock()
            .expect("known set lock")
            .insert(node_id.to_string());
    }

    /// Allow a peer to be rediscovered, e.g. after eviction.
    pub fn forget(&self, node_id: &str) {
        self.known.lock().expect("known set lock").remove(node_id);
    }

    pub fn is_known(&self, node_id: &str) -> bool {
        self.known.lock().expect("known set lock").contains(node_id)
    }

    pub fn known_count(&self) -> usize {
        self.known.lock().expect("known set lock").len()
    }

    /// End the current cycle: clear the known set and mark stopped.
    pub fn stop(&self) {
        self.known.lock().expect("known set lock").clear();
        self.started.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::get;
    use axum::{Json, Router};

    use super::*;
    use crate::swarm::protocol::PeerStatus;
    use crate::swarm::transport::DEFAULT_REQUEST_TIMEOUT;

    fn local_identity() -> NodeIdentity {
        NodeIdentity {
            node_id: "local".to_string(),
            display_name: "local".to_string(),
            api_url: "http://127.0.0.1:3100".to_string(),
            capabilities: vec![],
            version: "0.3.0".to_string(),
        }
    }

    async fn serve_identity(identity: NodeIdentity) -> String {
        let router = Router::new().route(
            "/identity",
            get(move || {
                let identity = identity.clone();
                async move { Json(identity) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    fn collecting_callback() -> (PeerDiscoveredCallback, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: PeerDiscoveredCallback = Arc::new(move |identity: NodeIdentity| {
            sink.lock().unwrap().push(identity.node_id);
        });
        (callback, seen)
    }

    fn remote(node_id: &str, api_url: &str) -> NodeIdentity {
        NodeIdentity {
            node_id: node_id.to_string(),
            display_name: node_id.to_string(),
            api_url: api_url.to_string(),
            capabilities: vec!["read-file".to_string()],
            version: "0.3.0".to_string(),
        }
    }

    #[tokio::test]
    async fn start_discovers_seed_once() {
        let seed_url = serve_identity(remote("remote-1", "http://remote-1:3100")).await;
        let (callback, seen) = collecting_callback();
        let transport = Arc::new(PeerTransport::new(None, DEFAULT_REQUEST_TIMEOUT));
        let discovery = PeerDiscovery::new(
            false,
            true,
            vec![seed_url],
            local_identity(),
            transport,
            callback,
        );

        discovery.start().await;
        // Idempotent restart and a manual re-scan stay deduplicated.
        discovery.start().await;
        discovery.discover_from_seeds().await;

        assert_eq!(*seen.lock().unwrap(), vec!["remote-1".to_string()]);
        assert!(discovery.is_known("local"));
        assert!(discovery.is_known("remote-1"));
        assert_eq!(discovery.known_count(), 2);
    }

    #[tokio::test]
    async fn unreachable_seed_is_swallowed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let live = serve_identity(remote("remote-2", "http://remote-2:3100")).await;

        let (callback, seen) = collecting_callback();
        let transport = Arc::new(PeerTransport::new(
            None,
            std::time::Duration::from_millis(500),
        ));
        let discovery = PeerDiscovery::new(
            false,
            true,
            vec![dead, live],
            local_identity(),
            transport,
            callback,
        );

        discovery.start().await;
        assert_eq!(*seen.lock().unwrap(), vec!["remote-2".to_string()]);
    }

    #[tokio::test]
    async fn process_gossip_fetches_identity_and_dedupes() {
        let peer_url = serve_identity(remote("remote-3", "http://remote-3:3100")).await;
        let (callback, seen) = collecting_callback();
        let transport = Arc::new(PeerTransport::new(None, DEFAULT_REQUEST_TIMEOUT));
        let discovery =
            PeerDiscovery::new(false, true, vec![], local_identity(), transport, callback);
        discovery.start().await;

        let digest = vec![GossipPeer {
            node_id: "remote-3".to_string(),
            api_url: peer_url,
            status: PeerStatus::Active,
        }];
        discovery.process_gossip(&digest).await;
        discovery.process_gossip(&digest).await;
        assert_eq!(seen.lock().unwrap().len(), 1);

        // forget() re-opens discovery for that node id.
        discovery.forget("remote-3");
        discovery.process_gossip(&digest).await;
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn gossip_disabled_ignores_digests() {
        let peer_url = serve_identity(remote("remote-4", "http://remote-4:3100")).await;
        let (callback, seen) = collecting_callback();
        let transport = Arc::new(PeerTransport::new(None, DEFAULT_REQUEST_TIMEOUT));
        let discovery =
            PeerDiscovery::new(false, false, vec![], local_identity(), transport, callback);
        discovery.start().await;

        discovery
            .process_gossip(&[GossipPeer {
                node_id: "remote-4".to_string(),
                api_url: peer_url,
                status: PeerStatus::Active,
            }])
            .await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn gossip_about_self_is_ignored() {
        let (callback, seen) = collecting_callback();
        let transport = Arc::new(PeerTransport::new(None, DEFAULT_REQUEST_TIMEOUT));
        let discovery =
            PeerDiscovery::new(false, true, vec![], local_identity(), transport, callback);
        discovery.start().await;

        discovery
            .process_gossip(&[GossipPeer {
                node_id: "local".to_string(),
                api_url: "http://127.0.0.1:3100".to_string(),
                status: PeerStatus::Active,
            }])
            .await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_clears_known_set() {
        let (callback, _seen) = collecting_callback();
        let transport = Arc::new(PeerTransport::new(None, DEFAULT_REQUEST_TIMEOUT));
        let discovery =
            PeerDiscovery::new(false, true, vec![], local_identity(), transport, callback);
        discovery.start().await;
        discovery.mark_known("remote-9");
        assert_eq!(discovery.known_count(), 2);

        discovery.stop();
        assert_eq!(discovery.known_count(), 0);

        // A new cycle records self again.
        discovery.start().await;
        assert!(discovery.is_known("local"));
    }
}
