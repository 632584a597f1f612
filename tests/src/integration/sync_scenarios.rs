//! # End-to-End Synchronization Scenarios
//!
//! Full rounds driven through [`BootstrapApi`] against simulated remote
//! peers: claim solicitation, header quorum, operation fetching, and
//! in-order application, with the peer transport replaced by a message
//! shuttle.

#[cfg(test)]
mod tests {
    use cb_bootstrap::ports::{MockChainStore, MockImporter, MockPeerLink};
    use cb_bootstrap::{BootstrapApi, BootstrapConfig, BootstrapService, SyncPhase};
    use cb_peer_score::PeerScoreConfig;
    use cb_protocol::{Ack, Advertise, Message, ProtocolConfig, Request};
    use shared_types::{
        BlockHeader, BranchId, ChainId, Hash, Height, Operation, OperationSet, PeerId, Timestamp,
    };

    const SELF_ID: PeerId = PeerId(0);

    fn branch() -> BranchId {
        BranchId::new(ChainId(0), 1)
    }

    /// A linked chain 1..=to with matching operation sets.
    fn build_chain(to: Height, timestamp: Timestamp) -> (Vec<BlockHeader>, Vec<OperationSet>) {
        let mut headers = Vec::new();
        let mut ops = Vec::new();
        let mut predecessor = [0u8; 32];
        for height in 1..=to {
            let set = OperationSet {
                branch: branch(),
                height,
                operations: vec![Operation { payload: vec![height as u8] }],
            };
            let header = BlockHeader {
                branch: branch(),
                height,
                predecessor,
                timestamp,
                fitness: height,
                operations_hash: set.compute_hash(),
            };
            predecessor = header.compute_hash();
            headers.push(header);
            ops.push(set);
        }
        (headers, ops)
    }

    fn fresh_chain(to: Height) -> (Vec<BlockHeader>, Vec<OperationSet>) {
        build_chain(to, Timestamp::now())
    }

    type TestService = BootstrapService<MockPeerLink, MockChainStore, MockImporter>;

    fn service(store: MockChainStore) -> (TestService, MockPeerLink, MockImporter) {
        let link = MockPeerLink::default();
        let importer = MockImporter::default();
        let svc = BootstrapService::new(
            SELF_ID,
            BootstrapConfig::for_testing(),
            ProtocolConfig::for_testing(),
            PeerScoreConfig::for_testing(),
            link.clone(),
            store,
            importer.clone(),
        );
        (svc, link, importer)
    }

    /// An honest remote peer holding a full chain copy.
    struct SimPeer {
        id: PeerId,
        headers: Vec<BlockHeader>,
        ops: Vec<OperationSet>,
        /// A silent peer receives but never answers.
        silent: bool,
    }

    impl SimPeer {
        fn new(id: PeerId, headers: Vec<BlockHeader>, ops: Vec<OperationSet>) -> Self {
            Self { id, headers, ops, silent: false }
        }

        fn reply(&self, req: &Request) -> Option<Message> {
            if self.silent {
                return None;
            }
            let adv = match req {
                Request::GetCurrentBranch { .. } => {
                    let head = self.headers.last()?.clone();
                    let history = self
                        .headers
                        .iter()
                        .map(|h| (h.height, h.compute_hash()))
                        .collect();
                    Advertise::current_branch(head, history)
                }
                Request::GetCurrentHead { .. } => {
                    Advertise::current_head(self.headers.last()?.clone())
                }
                Request::GetBlockHeader { height, .. } => Advertise::block_header(
                    self.headers.iter().find(|h| h.height == *height)?.clone(),
                ),
                Request::GetOperations { height, .. } => Advertise::operations(
                    self.ops.iter().find(|o| o.height == *height)?.clone(),
                ),
            };
            Some(Message::Advertise { from: self.id, adv })
        }
    }

    /// Shuttle messages between the service and the simulated peers until
    /// the round reaches a terminal phase, interleaving ticks so retries
    /// fire while the exchange is quiet.
    async fn pump(svc: &TestService, link: &MockPeerLink, peers: &[SimPeer]) {
        for _ in 0..256 {
            let outbox = link.take_delivered();
            if outbox.is_empty() {
                if matches!(svc.phase(), SyncPhase::Synced | SyncPhase::Unsynced) {
                    return;
                }
                svc.tick().await.unwrap();
                continue;
            }
            for (to, message) in outbox {
                let Some(peer) = peers.iter().find(|p| p.id == to) else {
                    continue;
                };
                match &message {
                    Message::Request { req, .. } => {
                        if let Some(reply) = peer.reply(req) {
                            svc.handle_message(reply).await.unwrap();
                        }
                    }
                    Message::Advertise { adv, .. } if !peer.silent => {
                        let ack = match adv {
                            Advertise::CurrentBranch { .. } => Ack::CurrentBranch,
                            Advertise::CurrentHead { .. } => Ack::CurrentHead,
                            Advertise::BlockHeader { .. } => Ack::BlockHeader,
                            Advertise::Operations { .. } => Ack::Operations,
                        };
                        svc.handle_message(Message::Ack { from: to, ack }).await.unwrap();
                    }
                    _ => {}
                }
            }
        }
        panic!("message exchange did not quiesce");
    }

    /// Three unanimous peers at height 10, local chain at 5: the node
    /// fetches and applies 6..=10 in order and ends up synced.
    #[tokio::test]
    async fn test_full_catch_up_to_unanimous_network() {
        let (headers, ops) = fresh_chain(10);
        let store = MockChainStore::with_chain(headers[..5].to_vec(), ops[..5].to_vec());
        let (svc, link, importer) = service(store.clone());

        let peers: Vec<SimPeer> = (1..=3)
            .map(|n| SimPeer::new(PeerId(n), headers.clone(), ops.clone()))
            .collect();
        for peer in &peers {
            assert!(svc.connect_peer(peer.id).await.unwrap());
        }

        svc.start_round().await.unwrap();
        pump(&svc, &link, &peers).await;

        assert_eq!(importer.applied.lock().as_slice(), &[6, 7, 8, 9, 10]);
        assert_eq!(store.head_height(), Some(10));
        assert!(svc.is_synced());
    }

    /// Two honest peers against one forking at height 7: the quorum chain
    /// is applied and the dissenter pays for backing the loser.
    #[tokio::test]
    async fn test_fork_is_outvoted() {
        let (headers, ops) = fresh_chain(8);
        let store = MockChainStore::with_chain(headers[..5].to_vec(), ops[..5].to_vec());
        let (svc, link, importer) = service(store.clone());

        let mut fork_headers = headers.clone();
        fork_headers[6].fitness = 700;
        fork_headers[7].predecessor = fork_headers[6].compute_hash();

        let peers = vec![
            SimPeer::new(PeerId(1), headers.clone(), ops.clone()),
            SimPeer::new(PeerId(2), headers.clone(), ops.clone()),
            SimPeer::new(PeerId(3), fork_headers, ops.clone()),
        ];
        for peer in &peers {
            assert!(svc.connect_peer(peer.id).await.unwrap());
        }

        svc.start_round().await.unwrap();
        pump(&svc, &link, &peers).await;

        assert_eq!(importer.applied.lock().as_slice(), &[6, 7, 8]);
        let committed: Vec<Hash> = store.committed().iter().map(|b| b.hash()).collect();
        assert_eq!(committed.last(), Some(&headers[7].compute_hash()));

        // The dissenter scored below the honest peers (or was escalated away).
        let honest = svc.peer_score(PeerId(1)).expect("honest peer active");
        match svc.peer_score(PeerId(3)) {
            Some(dissenter) => assert!(dissenter < honest),
            None => assert!(svc.active_peers() < 3),
        }
    }

    /// A header nobody asked for is discarded with a penalty and the node
    /// still syncs cleanly afterwards.
    #[tokio::test]
    async fn test_unrequested_header_is_rejected() {
        let (headers, ops) = fresh_chain(10);
        let store = MockChainStore::with_chain(headers[..5].to_vec(), ops[..5].to_vec());
        let (svc, link, importer) = service(store.clone());

        let peers: Vec<SimPeer> = (1..=3)
            .map(|n| SimPeer::new(PeerId(n), headers.clone(), ops.clone()))
            .collect();
        for peer in &peers {
            assert!(svc.connect_peer(peer.id).await.unwrap());
        }

        let before = svc.peer_score(PeerId(2)).unwrap();
        let unrequested = Message::Advertise {
            from: PeerId(2),
            adv: Advertise::block_header(headers[7].clone()),
        };
        svc.handle_message(unrequested).await.unwrap();
        assert!(svc.peer_score(PeerId(2)).unwrap() < before);

        svc.start_round().await.unwrap();
        pump(&svc, &link, &peers).await;
        assert_eq!(store.head_height(), Some(10));
        assert_eq!(importer.applied.lock().len(), 5);
    }

    /// A claim whose history contradicts our chain below the head ends the
    /// relationship permanently.
    #[tokio::test]
    async fn test_below_head_fork_is_blacklisted() {
        let (headers, ops) = fresh_chain(6);
        let store = MockChainStore::with_chain(headers[..5].to_vec(), ops[..5].to_vec());
        let (svc, _link, _importer) = service(store);

        assert!(svc.connect_peer(PeerId(1)).await.unwrap());
        svc.start_round().await.unwrap();

        let mut liar_headers = headers.clone();
        liar_headers[2].fitness = 999;
        let history: Vec<(Height, Hash)> = liar_headers
            .iter()
            .map(|h| (h.height, h.compute_hash()))
            .collect();
        svc.handle_message(Message::Advertise {
            from: PeerId(1),
            adv: Advertise::current_branch(liar_headers[5].clone(), history),
        })
        .await
        .unwrap();

        assert!(svc.is_blacklisted(PeerId(1)));
        assert_eq!(svc.active_peers(), 0);
        assert!(!svc.connect_peer(PeerId(1)).await.unwrap());
    }

    /// One of three peers never answers; ticks reissue its share of the
    /// frontier and the round still completes.
    #[tokio::test]
    async fn test_silent_peer_does_not_stall_the_round() {
        let (headers, ops) = fresh_chain(9);
        let store = MockChainStore::with_chain(headers[..5].to_vec(), ops[..5].to_vec());
        let (svc, link, _importer) = service(store.clone());

        let mut peers: Vec<SimPeer> = (1..=3)
            .map(|n| SimPeer::new(PeerId(n), headers.clone(), ops.clone()))
            .collect();
        peers[2].silent = true;
        for peer in &peers {
            assert!(svc.connect_peer(peer.id).await.unwrap());
        }

        svc.start_round().await.unwrap();
        pump(&svc, &link, &peers).await;

        assert_eq!(store.head_height(), Some(9));
        assert!(svc.is_synced());
    }

    /// Catching up to a chain whose head is far in the past leaves the node
    /// unsynced: it applied everything but the head is still stale.
    #[tokio::test]
    async fn test_stale_network_head_is_not_synced() {
        let (headers, ops) = build_chain(8, Timestamp::from_secs(1));
        let store = MockChainStore::with_chain(headers[..5].to_vec(), ops[..5].to_vec());
        let (svc, link, importer) = service(store.clone());

        let peers: Vec<SimPeer> = (1..=2)
            .map(|n| SimPeer::new(PeerId(n), headers.clone(), ops.clone()))
            .collect();
        for peer in &peers {
            assert!(svc.connect_peer(peer.id).await.unwrap());
        }

        svc.start_round().await.unwrap();
        pump(&svc, &link, &peers).await;

        assert_eq!(importer.applied.lock().as_slice(), &[6, 7, 8]);
        assert!(!svc.is_synced());
    }

    /// The importer rejects a mid-segment block: the round is abandoned with
    /// the head sitting below the rejected height, never past it.
    #[tokio::test]
    async fn test_apply_failure_abandons_round_without_advancing() {
        let (headers, ops) = fresh_chain(8);
        let store = MockChainStore::with_chain(headers[..5].to_vec(), ops[..5].to_vec());
        let link = MockPeerLink::default();
        let importer = MockImporter { fail_from: Some(7), ..Default::default() };
        let svc = BootstrapService::new(
            SELF_ID,
            BootstrapConfig::for_testing(),
            ProtocolConfig::for_testing(),
            PeerScoreConfig::for_testing(),
            link.clone(),
            store.clone(),
            importer.clone(),
        );

        let peers: Vec<SimPeer> = (1..=2)
            .map(|n| SimPeer::new(PeerId(n), headers.clone(), ops.clone()))
            .collect();
        for peer in &peers {
            assert!(svc.connect_peer(peer.id).await.unwrap());
        }

        svc.start_round().await.unwrap();
        pump(&svc, &link, &peers).await;

        // Height 6 went through; the rejection at 7 stopped the round there.
        assert_eq!(importer.applied.lock().as_slice(), &[6]);
        assert_eq!(store.head_height(), Some(6));
        assert_eq!(svc.phase(), SyncPhase::Unsynced);
    }

    /// Per-peer workers poll at their score-derived cadence and carry a
    /// round to completion with no tick driving at all.
    #[tokio::test(flavor = "multi_thread")]
    async fn test_peer_workers_drive_a_round() {
        let (headers, ops) = fresh_chain(9);
        let store = MockChainStore::with_chain(headers[..5].to_vec(), ops[..5].to_vec());
        let (svc, link, importer) = service(store.clone());

        let peers: Vec<SimPeer> = (1..=2)
            .map(|n| SimPeer::new(PeerId(n), headers.clone(), ops.clone()))
            .collect();
        for peer in &peers {
            assert!(svc.connect_peer(peer.id).await.unwrap());
            svc.spawn_peer_worker(peer.id);
        }

        svc.start_round().await.unwrap();
        for _ in 0..500 {
            if svc.is_synced() {
                break;
            }
            for (to, message) in link.take_delivered() {
                let Some(peer) = peers.iter().find(|p| p.id == to) else {
                    continue;
                };
                if let Message::Request { req, .. } = &message {
                    if let Some(reply) = peer.reply(req) {
                        svc.handle_message(reply).await.unwrap();
                    }
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }

        assert!(svc.is_synced());
        assert_eq!(store.head_height(), Some(9));
        assert_eq!(importer.applied.lock().as_slice(), &[6, 7, 8, 9]);
    }

    /// A synced node polls peer heads on its tick; a peer reporting a higher
    /// head makes it stale, and the next round catches up.
    #[tokio::test]
    async fn test_synced_node_notices_network_advance() {
        let (headers, ops) = build_chain(14, Timestamp::now());
        let store = MockChainStore::with_chain(headers[..12].to_vec(), ops[..12].to_vec());
        let (svc, link, _importer) = service(store.clone());

        // The network starts level with us.
        let peers: Vec<SimPeer> = (1..=2)
            .map(|n| SimPeer::new(PeerId(n), headers[..12].to_vec(), ops[..12].to_vec()))
            .collect();
        for peer in &peers {
            assert!(svc.connect_peer(peer.id).await.unwrap());
        }
        svc.start_round().await.unwrap();
        pump(&svc, &link, &peers).await;
        assert!(svc.is_synced());

        // The network advances to 14; our head-poll notices.
        let advanced: Vec<SimPeer> = (1..=2)
            .map(|n| SimPeer::new(PeerId(n), headers.clone(), ops.clone()))
            .collect();
        svc.tick().await.unwrap();
        pump(&svc, &link, &advanced).await;
        assert_eq!(svc.phase(), SyncPhase::Unsynced);

        svc.tick().await.unwrap();
        pump(&svc, &link, &advanced).await;
        assert_eq!(store.head_height(), Some(14));
        assert!(svc.is_synced());
    }

    /// An unsynced node's tick opens a round by soliciting branch claims.
    #[tokio::test]
    async fn test_tick_starts_round_when_unsynced() {
        let (headers, ops) = fresh_chain(5);
        let store = MockChainStore::with_chain(headers, ops);
        let (svc, link, _importer) = service(store);

        assert!(svc.connect_peer(PeerId(1)).await.unwrap());
        assert_eq!(svc.phase(), SyncPhase::Unsynced);

        svc.tick().await.unwrap();
        assert_eq!(svc.phase(), SyncPhase::RequestingBranches);
        let solicitations = link.delivered_to(PeerId(1));
        assert!(matches!(
            solicitations.as_slice(),
            [Message::Request { req: Request::GetCurrentBranch { .. }, .. }]
        ));
    }
}
