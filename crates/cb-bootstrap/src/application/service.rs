//! # Bootstrap Service
//!
//! Application service orchestrating the catch-up cycle: it solicits branch
//! claims, drives header fetching along the frontier, aggregates quorum
//! decisions, fetches operations, and applies blocks in order.
//!
//! ## Locking
//!
//! All mutable state lives behind one `parking_lot` mutex. The lock is never
//! held across an await: message handling splits into a synchronous
//! lock-and-decide step that returns a list of [`Effect`]s, and an
//! asynchronous step that executes them (transport delivery, store lookups,
//! block application). Effects may enqueue further effects; the executor
//! drains the queue to quiescence.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use async_trait::async_trait;
use cb_peer_score::{PeerScoreConfig, PeerScoreManager, Severity, Verdict};
use cb_protocol::{
    Ack, Advertise, ErrorReply, Message, ProtocolConfig, ProtocolError, Request, Sessions,
    SystemEvent,
};
use shared_types::{Block, BlockHeader, BranchId, Hash, Height, PeerId, Timestamp};

use crate::config::BootstrapConfig;
use crate::domain::{
    BootstrapError, BranchClaim, Frontier, HeaderAggregator, PendingOperations, SyncPhase,
};
use crate::ports::{BlockImporter, BootstrapApi, ChainStore, PeerLink};

/// Deferred work produced under the state lock and executed outside it.
#[derive(Debug)]
enum Effect {
    /// Hand a message to the transport.
    Deliver(PeerId, Message),
    /// Check a branch claim against the local chain below the head, then
    /// admit it.
    VerifyClaim {
        peer: PeerId,
        head: BlockHeader,
        history: Vec<(Height, Hash)>,
    },
    /// Answer a peer's request from the local store.
    Serve { peer: PeerId, req: Request },
    /// Assemble, validate, and commit the next ready block.
    ApplyNext,
    /// Begin a new synchronization round.
    StartRound,
}

/// Round-scoped mutable state, all behind one lock.
struct RoundState {
    phase: SyncPhase,
    sessions: Sessions,
    scores: PeerScoreManager,
    aggregator: HeaderAggregator,
    frontier: Frontier,
    operations: PendingOperations,
    /// Operation requests in flight, with their age in ticks.
    ops_requested: HashMap<Height, u32>,
    /// Which peer served the operations stored for a height.
    ops_sources: HashMap<Height, PeerId>,
    claims: HashMap<PeerId, BranchClaim>,
    /// Local head header, cached at round start and updated on commit.
    head: Option<BlockHeader>,
    /// Highest claimed height this round tries to reach.
    target: Option<Height>,
    /// Ticks since the last quorum decision (liveness fallback).
    stall_ticks: u32,
    /// Rotation cursor for spreading operation fetches over supporters.
    rotation: usize,
}

impl RoundState {
    fn head_height(&self) -> Option<Height> {
        self.head.as_ref().map(|h| h.height)
    }
}

struct Inner<L, S, I> {
    self_id: PeerId,
    config: BootstrapConfig,
    link: L,
    store: S,
    importer: I,
    state: Mutex<RoundState>,
}

/// The bootstrap controller.
///
/// Generic over its outbound ports; clones share the same state.
pub struct BootstrapService<L, S, I> {
    inner: Arc<Inner<L, S, I>>,
}

impl<L, S, I> Clone for BootstrapService<L, S, I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L, S, I> BootstrapService<L, S, I>
where
    L: PeerLink + 'static,
    S: ChainStore + 'static,
    I: BlockImporter + 'static,
{
    /// Create a controller in the `Unsynced` phase.
    pub fn new(
        self_id: PeerId,
        config: BootstrapConfig,
        protocol: ProtocolConfig,
        scoring: PeerScoreConfig,
        link: L,
        store: S,
        importer: I,
    ) -> Self {
        let min_endorsements = config.min_endorsements;
        Self {
            inner: Arc::new(Inner {
                self_id,
                config,
                link,
                store,
                importer,
                state: Mutex::new(RoundState {
                    phase: SyncPhase::Unsynced,
                    sessions: Sessions::new(self_id, protocol),
                    scores: PeerScoreManager::new(scoring),
                    aggregator: HeaderAggregator::new(min_endorsements),
                    frontier: Frontier::new(),
                    operations: PendingOperations::new(),
                    ops_requested: HashMap::new(),
                    ops_sources: HashMap::new(),
                    claims: HashMap::new(),
                    head: None,
                    target: None,
                    stall_ticks: 0,
                    rotation: 0,
                }),
            }),
        }
    }

    /// Number of currently active peers.
    pub fn active_peers(&self) -> usize {
        self.inner.state.lock().scores.active_count()
    }

    /// A peer's current score, if it is active.
    pub fn peer_score(&self, peer: PeerId) -> Option<f64> {
        self.inner.state.lock().scores.score(peer)
    }

    /// Whether a peer has been blacklisted.
    pub fn is_blacklisted(&self, peer: PeerId) -> bool {
        self.inner.state.lock().scores.is_blacklisted(peer)
    }

    /// Spawn a worker that polls one peer at its score-derived cadence. The
    /// worker exits when the peer is no longer active.
    pub fn spawn_peer_worker(&self, peer: PeerId) -> tokio::task::JoinHandle<()> {
        let svc = self.clone();
        tokio::spawn(async move {
            loop {
                let cadence = {
                    let state = svc.inner.state.lock();
                    if !state.scores.is_active(peer) {
                        break;
                    }
                    state.scores.request_cadence(peer)
                };
                tokio::time::sleep(cadence).await;
                if let Err(error) = svc.poll_peer(peer).await {
                    tracing::warn!(%peer, %error, "peer poll failed");
                }
            }
            tracing::debug!(%peer, "peer worker stopped");
        })
    }

    /// One poll of a single peer: issue whatever work the current phase has
    /// for it.
    pub async fn poll_peer(&self, peer: PeerId) -> Result<(), BootstrapError> {
        let effects = {
            let mut state = self.inner.state.lock();
            if !state.scores.is_active(peer) {
                return Ok(());
            }
            match state.phase {
                SyncPhase::RequestingHeaders => self.request_headers_for(&mut state, peer),
                SyncPhase::RequestingOperations => self.request_operations(&mut state),
                _ => Vec::new(),
            }
        };
        self.run_effects(effects).await
    }

    // ---- effect executor -------------------------------------------------

    async fn run_effects(&self, effects: Vec<Effect>) -> Result<(), BootstrapError> {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            let produced = match effect {
                Effect::Deliver(to, message) => {
                    self.inner.link.deliver(to, message).await?;
                    Vec::new()
                }
                Effect::VerifyClaim { peer, head, history } => {
                    self.verify_claim(peer, head, history).await?
                }
                Effect::Serve { peer, req } => self.serve(peer, req).await?,
                Effect::ApplyNext => self.apply_next().await?,
                Effect::StartRound => self.do_start_round().await?,
            };
            queue.extend(produced);
        }
        Ok(())
    }

    async fn do_start_round(&self) -> Result<Vec<Effect>, BootstrapError> {
        let chain = self.inner.config.chain;
        let head = self.inner.store.current_head(chain).await?;

        let mut state = self.inner.state.lock();
        self.reset_round(&mut state);
        state.head = Some(head);
        state.phase = SyncPhase::RequestingBranches;
        tracing::info!(%chain, head = state.head_height(), "synchronization round started");

        Ok(self.solicit_claims(&mut state))
    }

    /// Ask every claimless active peer for its current branch.
    fn solicit_claims(&self, state: &mut RoundState) -> Vec<Effect> {
        let chain = self.inner.config.chain;
        let mut effects = Vec::new();
        for peer in state.scores.peers_by_score() {
            if state.claims.contains_key(&peer) || state.sessions.sent_len(peer, chain) > 0 {
                continue;
            }
            let msg = Message::Request {
                from: self.inner.self_id,
                req: Request::GetCurrentBranch { chain },
            };
            match state.sessions.send(peer, chain, msg.clone()) {
                Ok(()) => effects.push(Effect::Deliver(peer, msg)),
                Err(error) => tracing::debug!(%peer, %error, "branch solicitation skipped"),
            }
        }
        effects
    }

    /// Validate a claim's overlap with the local chain, then admit it. A
    /// hash mismatch at or below the accepted head is relationship-fatal.
    async fn verify_claim(
        &self,
        peer: PeerId,
        head: BlockHeader,
        history: Vec<(Height, Hash)>,
    ) -> Result<Vec<Effect>, BootstrapError> {
        let chain = self.inner.config.chain;
        let claim = BranchClaim::new(head, history);
        let Some(base) = self.inner.state.lock().head_height() else {
            return Ok(Vec::new());
        };

        for (height, hash) in claim.at_or_below(base) {
            if let Some(local) = self.inner.store.hash_at(chain, height).await? {
                if local != hash {
                    tracing::warn!(%peer, height, "branch claim deviates below the accepted head");
                    let mut state = self.inner.state.lock();
                    self.penalize(&mut state, peer, Severity::Fatal);
                    return Ok(Vec::new());
                }
            }
        }

        let mut state = self.inner.state.lock();
        Ok(self.admit_claim(&mut state, peer, claim))
    }

    /// Answer one peer request from the local store.
    async fn serve(&self, peer: PeerId, req: Request) -> Result<Vec<Effect>, BootstrapError> {
        let store = &self.inner.store;
        let reply = match req {
            Request::GetCurrentBranch { chain } => {
                let head = store.current_head(chain).await?;
                let from = head
                    .height
                    .saturating_sub(self.inner.config.history_length as Height);
                let mut history = Vec::new();
                for height in from..head.height {
                    if let Some(hash) = store.hash_at(chain, height).await? {
                        history.push((height, hash));
                    }
                }
                Message::Advertise {
                    from: self.inner.self_id,
                    adv: Advertise::current_branch(head, history),
                }
            }
            Request::GetCurrentHead { branch } => {
                let head = store.current_head(branch.chain).await?;
                Message::Advertise {
                    from: self.inner.self_id,
                    adv: Advertise::current_head(head),
                }
            }
            Request::GetBlockHeader { branch, height } => {
                match store.header_at(branch, height).await? {
                    Some(header) => Message::Advertise {
                        from: self.inner.self_id,
                        adv: Advertise::block_header(header),
                    },
                    None => Message::Err {
                        from: self.inner.self_id,
                        err: ErrorReply::BlockHeader { branch, height },
                    },
                }
            }
            Request::GetOperations { branch, height } => {
                match store.operations_at(branch, height).await? {
                    Some(operations) => Message::Advertise {
                        from: self.inner.self_id,
                        adv: Advertise::operations(operations),
                    },
                    None => Message::Err {
                        from: self.inner.self_id,
                        err: ErrorReply::Operations { branch, height },
                    },
                }
            }
        };

        let chain = self.inner.config.chain;
        let mut state = self.inner.state.lock();
        match state.sessions.send(peer, chain, reply.clone()) {
            Ok(()) => Ok(vec![Effect::Deliver(peer, reply)]),
            Err(ProtocolError::QueueFull { .. }) => {
                // Backpressure: the peer retries once it consumes our
                // outstanding messages.
                tracing::debug!(%peer, "outbound queue full, reply withheld");
                Ok(Vec::new())
            }
            Err(ProtocolError::SessionNotFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Assemble and apply the next block at `head + 1`, if its quorum header
    /// and operations are both in hand.
    async fn apply_next(&self) -> Result<Vec<Effect>, BootstrapError> {
        let (block, mut effects) = {
            let mut state = self.inner.state.lock();
            self.take_ready_block(&mut state)
        };
        let Some(block) = block else {
            return Ok(effects);
        };

        let height = block.height();
        if let Err(error) = self.inner.importer.apply(&block).await {
            tracing::error!(height, %error, "block application failed, abandoning round");
            let mut state = self.inner.state.lock();
            self.reset_round(&mut state);
            state.phase = SyncPhase::Unsynced;
            return Ok(effects);
        }
        self.inner.store.commit(block.clone()).await?;

        let mut state = self.inner.state.lock();
        tracing::info!(height, "block applied");
        state.head = Some(block.header.clone());
        if state.target == Some(height) {
            effects.extend(self.round_complete(&mut state));
        } else {
            effects.push(Effect::ApplyNext);
        }
        Ok(effects)
    }

    // ---- in-lock decision logic ------------------------------------------

    /// Feed a received wire message into its session and drain the queue.
    fn ingest(&self, state: &mut RoundState, peer: PeerId, message: Message) -> Vec<Effect> {
        let chain = self.inner.config.chain;
        match state.sessions.receive(peer, chain, message) {
            Ok(()) => self.consume_all(state, peer),
            Err(ProtocolError::QueueFull { .. }) => {
                tracing::warn!(%peer, "inbound queue full, message dropped");
                self.penalize(state, peer, Severity::Minor);
                Vec::new()
            }
            Err(ProtocolError::SystemMessageFromPeer { .. }) => {
                self.penalize(state, peer, Severity::Major);
                Vec::new()
            }
            Err(error) => {
                tracing::debug!(%peer, %error, "message from unknown session ignored");
                Vec::new()
            }
        }
    }

    fn consume_all(&self, state: &mut RoundState, peer: PeerId) -> Vec<Effect> {
        let chain = self.inner.config.chain;
        let mut effects = Vec::new();
        loop {
            match state.sessions.consume(peer, chain) {
                Ok(Some(consumed)) => effects.extend(self.dispatch(state, peer, consumed.message)),
                Ok(None) => break,
                Err(ProtocolError::UnsolicitedResponse { .. }) => {
                    self.penalize(state, peer, Severity::Major);
                }
                Err(_) => break,
            }
        }
        effects
    }

    fn dispatch(&self, state: &mut RoundState, peer: PeerId, message: Message) -> Vec<Effect> {
        match message {
            Message::Request { req, .. } => vec![Effect::Serve { peer, req }],
            Message::Advertise { adv, .. } => {
                // Every advertisement is acknowledged; acks occupy no
                // outbound slot.
                let ack = Message::Ack {
                    from: self.inner.self_id,
                    ack: match adv {
                        Advertise::CurrentBranch { .. } => Ack::CurrentBranch,
                        Advertise::CurrentHead { .. } => Ack::CurrentHead,
                        Advertise::BlockHeader { .. } => Ack::BlockHeader,
                        Advertise::Operations { .. } => Ack::Operations,
                    },
                };
                let mut effects = vec![Effect::Deliver(peer, ack)];
                effects.extend(match adv {
                    Advertise::CurrentBranch { head, history, .. } => {
                        vec![Effect::VerifyClaim { peer, head, history }]
                    }
                    Advertise::CurrentHead { header, .. } => self.on_peer_head(state, peer, header),
                    Advertise::BlockHeader { header, .. } => self.on_header(state, peer, header),
                    Advertise::Operations { height, operations, .. } => {
                        self.on_operations(state, peer, height, operations)
                    }
                });
                effects
            }
            // Positive terminal: the expectation resolution already freed
            // the outbound slot.
            Message::Ack { .. } => Vec::new(),
            Message::Err { err, .. } => self.on_error_reply(state, err),
            Message::System(_) => Vec::new(),
        }
    }

    /// A peer announced its head. The peer's recorded claim moves up when
    /// the new head wins on (height, fitness); a synced node whose own head
    /// falls behind goes stale and the next tick starts a round.
    fn on_peer_head(&self, state: &mut RoundState, peer: PeerId, header: BlockHeader) -> Vec<Effect> {
        if let Some(claim) = state.claims.get_mut(&peer) {
            if (header.height, header.fitness) > (claim.head.height, claim.head.fitness) {
                claim.hashes.insert(header.height, header.compute_hash());
                claim.head = header.clone();
            }
        }
        let ahead = state.head_height().is_some_and(|h| header.height > h);
        if ahead && state.phase == SyncPhase::Synced {
            tracing::info!(peer_head = header.height, "local head is stale");
            state.phase = SyncPhase::Unsynced;
        }
        Vec::new()
    }

    fn admit_claim(&self, state: &mut RoundState, peer: PeerId, claim: BranchClaim) -> Vec<Effect> {
        let Some(base) = state.head_height() else {
            return Vec::new();
        };
        tracing::debug!(%peer, claimed_head = claim.head.height, "branch claim admitted");

        if state.phase == SyncPhase::RequestingHeaders {
            // Late claim: widen the round it joins.
            if claim.head.height > state.target.unwrap_or(0) {
                state.target = Some(claim.head.height);
            }
            if let Some((height, hash)) = claim.next_above(base) {
                state.frontier.insert(claim.head.branch, height, hash);
            }
            state.claims.insert(peer, claim);
            return self.request_headers(state);
        }

        state.claims.insert(peer, claim);
        self.maybe_start_headers(state)
    }

    /// Move from claim collection to header fetching once enough claims are
    /// in to make quorum possible.
    fn maybe_start_headers(&self, state: &mut RoundState) -> Vec<Effect> {
        if state.phase != SyncPhase::RequestingBranches {
            return Vec::new();
        }
        if state.claims.len() < self.inner.config.min_endorsements {
            return Vec::new();
        }
        let Some(base) = state.head_height() else {
            return Vec::new();
        };
        let target = state
            .claims
            .values()
            .map(|c| c.head.height)
            .max()
            .unwrap_or(base);
        if target <= base {
            // The network is no further ahead than we are.
            return self.round_complete(state);
        }

        state.target = Some(target);
        state.phase = SyncPhase::RequestingHeaders;
        state.stall_ticks = 0;
        for claim in state.claims.values() {
            if let Some((height, hash)) = claim.next_above(base) {
                state.frontier.insert(claim.head.branch, height, hash);
            }
        }
        tracing::info!(target, "requesting headers");
        self.request_headers(state)
    }

    fn request_headers(&self, state: &mut RoundState) -> Vec<Effect> {
        let mut effects = Vec::new();
        for peer in state.scores.peers_by_score() {
            effects.extend(self.request_headers_for(state, peer));
        }
        effects
    }

    /// Claim frontier entries for one peer and turn them into requests. A
    /// full outbound queue releases the remaining claims for a later tick.
    fn request_headers_for(&self, state: &mut RoundState, peer: PeerId) -> Vec<Effect> {
        if state.phase != SyncPhase::RequestingHeaders {
            return Vec::new();
        }
        let chain = self.inner.config.chain;
        let mut effects = Vec::new();
        let mut backoff = false;
        for (branch, height, hash) in state.frontier.claim_for(peer) {
            if backoff {
                state.frontier.release(peer, hash);
                continue;
            }
            let msg = Message::Request {
                from: self.inner.self_id,
                req: Request::GetBlockHeader { branch, height },
            };
            match state.sessions.send(peer, chain, msg.clone()) {
                Ok(()) => {
                    state.aggregator.note_requested(peer, branch, height);
                    effects.push(Effect::Deliver(peer, msg));
                }
                Err(_) => {
                    state.frontier.release(peer, hash);
                    backoff = true;
                }
            }
        }
        effects
    }

    fn on_header(&self, state: &mut RoundState, peer: PeerId, header: BlockHeader) -> Vec<Effect> {
        let Some(base) = state.head_height() else {
            return Vec::new();
        };
        let outcome = match state.aggregator.observe(peer, header.clone()) {
            Ok(outcome) => outcome,
            Err(BootstrapError::UnrequestedHeader { height, .. }) => {
                tracing::warn!(%peer, height, "unrequested header discarded");
                self.penalize(state, peer, Severity::Major);
                return Vec::new();
            }
            Err(error) => {
                tracing::warn!(%peer, %error, "header rejected");
                return Vec::new();
            }
        };

        for loser in outcome.losing_supporters {
            self.penalize(state, loser, Severity::Minor);
        }

        // Fill the gap below a sparse claim sample: the header names its own
        // predecessor.
        if header.height > base + 1 && state.aggregator.decided_entry(header.height - 1).is_none() {
            state
                .frontier
                .insert(header.branch, header.height - 1, header.predecessor);
        }

        if !outcome.newly_decided.is_empty() {
            state.stall_ticks = 0;
        }
        for height in outcome.newly_decided {
            state.frontier.remove_height(height);
            let seeds: Vec<(BranchId, Height, Hash)> = state
                .claims
                .values()
                .filter_map(|claim| {
                    claim
                        .next_above(height)
                        .map(|(h, hash)| (claim.head.branch, h, hash))
                })
                .collect();
            for (branch, h, hash) in seeds {
                if state.aggregator.decided_entry(h).is_none() {
                    state.frontier.insert(branch, h, hash);
                }
            }
        }

        let mut effects = self.request_headers(state);
        effects.extend(self.maybe_finish_headers(state));
        effects
    }

    fn maybe_finish_headers(&self, state: &mut RoundState) -> Vec<Effect> {
        if state.phase != SyncPhase::RequestingHeaders {
            return Vec::new();
        }
        let (Some(base), Some(target)) = (state.head_height(), state.target) else {
            return Vec::new();
        };
        if !state.aggregator.segment_complete(base + 1, target) {
            return Vec::new();
        }
        state.phase = SyncPhase::RequestingOperations;
        tracing::info!(from = base + 1, to = target, "segment decided, requesting operations");
        let mut effects = self.request_operations(state);
        effects.push(Effect::ApplyNext);
        effects
    }

    /// Request operations for every decided-but-unfetched height, spreading
    /// the load over each entry's supporters.
    fn request_operations(&self, state: &mut RoundState) -> Vec<Effect> {
        if state.phase != SyncPhase::RequestingOperations {
            return Vec::new();
        }
        let (Some(base), Some(target)) = (state.head_height(), state.target) else {
            return Vec::new();
        };
        let chain = self.inner.config.chain;
        let mut effects = Vec::new();
        for height in base + 1..=target {
            if state.operations.contains(height) || state.ops_requested.contains_key(&height) {
                continue;
            }
            let Some((supporters, branch)) = state.aggregator.decided_entry(height).map(|e| {
                (
                    e.supporters.iter().copied().collect::<Vec<PeerId>>(),
                    e.header.branch,
                )
            }) else {
                continue;
            };
            let count = supporters.len();
            for i in 0..count {
                let peer = supporters[(state.rotation + i) % count];
                if !state.scores.is_active(peer) {
                    continue;
                }
                let msg = Message::Request {
                    from: self.inner.self_id,
                    req: Request::GetOperations { branch, height },
                };
                if state.sessions.send(peer, chain, msg.clone()).is_ok() {
                    state.rotation = state.rotation.wrapping_add(1);
                    state.ops_requested.insert(height, 0);
                    effects.push(Effect::Deliver(peer, msg));
                    break;
                }
            }
        }
        effects
    }

    fn on_operations(
        &self,
        state: &mut RoundState,
        peer: PeerId,
        height: Height,
        operations: shared_types::OperationSet,
    ) -> Vec<Effect> {
        state.operations.insert(height, operations);
        state.ops_requested.remove(&height);
        state.ops_sources.insert(height, peer);
        self.refresh_apply_phase(state);
        let mut effects = self.request_operations(state);
        effects.push(Effect::ApplyNext);
        effects
    }

    fn on_error_reply(&self, state: &mut RoundState, err: ErrorReply) -> Vec<Effect> {
        match err {
            // Header retry runs through the frontier tick.
            ErrorReply::BlockHeader { .. } => Vec::new(),
            ErrorReply::Operations { height, .. } => {
                // The peer cannot serve: clear the in-flight mark so the next
                // supporter is asked.
                state.ops_requested.remove(&height);
                self.request_operations(state)
            }
        }
    }

    /// Enter `Applying` once every remaining height has its operations.
    fn refresh_apply_phase(&self, state: &mut RoundState) {
        if state.phase != SyncPhase::RequestingOperations {
            return;
        }
        let (Some(base), Some(target)) = (state.head_height(), state.target) else {
            return;
        };
        if (base + 1..=target).all(|h| state.operations.contains(h)) {
            state.phase = SyncPhase::Applying;
        }
    }

    /// Take the next assemblable block, penalizing a peer whose operations
    /// do not match the quorum header.
    fn take_ready_block(&self, state: &mut RoundState) -> (Option<Block>, Vec<Effect>) {
        if !matches!(
            state.phase,
            SyncPhase::RequestingOperations | SyncPhase::Applying
        ) {
            return (None, Vec::new());
        }
        let Some(base) = state.head_height() else {
            return (None, Vec::new());
        };
        let next = base + 1;
        let Some(header) = state.aggregator.decided_entry(next).map(|e| e.header.clone()) else {
            return (None, Vec::new());
        };
        let Some(operations) = state.operations.take(next) else {
            return (None, Vec::new());
        };

        match Block::assemble(header, operations) {
            Ok(block) => (Some(block), Vec::new()),
            Err(error) => {
                tracing::warn!(height = next, %error, "operations disagree with quorum header");
                if let Some(source) = state.ops_sources.remove(&next) {
                    self.penalize(state, source, Severity::Major);
                }
                state.ops_requested.remove(&next);
                state.phase = SyncPhase::RequestingOperations;
                (None, self.request_operations(state))
            }
        }
    }

    /// Tear down round state and settle the final phase from head freshness.
    fn round_complete(&self, state: &mut RoundState) -> Vec<Effect> {
        self.reset_round(state);
        let fresh = state.head.as_ref().is_some_and(|h| {
            h.timestamp.age_at(Timestamp::now()) <= self.inner.config.freshness_threshold.as_secs()
        });
        state.phase = if fresh {
            SyncPhase::Synced
        } else {
            SyncPhase::Unsynced
        };
        tracing::info!(head = state.head_height(), phase = ?state.phase, "round complete");
        Vec::new()
    }

    fn reset_round(&self, state: &mut RoundState) {
        state.aggregator.reset();
        state.frontier.clear();
        state.operations.clear();
        state.ops_requested.clear();
        state.ops_sources.clear();
        state.claims.clear();
        state.target = None;
        state.stall_ticks = 0;
        state.sessions.cancel_round();
    }

    /// Apply a penalty and act on the verdict: anything beyond `Keep` tears
    /// the session down.
    fn penalize(&self, state: &mut RoundState, peer: PeerId, severity: Severity) {
        let verdict = state.scores.penalize(peer, severity);
        if verdict != Verdict::Keep {
            state.sessions.close(peer, self.inner.config.chain);
            state.claims.remove(&peer);
            state.scores.on_peer_disconnected(peer);
        }
    }

    async fn on_system(&self, event: SystemEvent) -> Result<(), BootstrapError> {
        match event {
            SystemEvent::NewBlock { block } => {
                // Announce the new head to every active peer.
                let effects = {
                    let mut state = self.inner.state.lock();
                    state.head = Some(block.header.clone());
                    let chain = self.inner.config.chain;
                    let mut effects = Vec::new();
                    for peer in state.scores.peers_by_score() {
                        let msg = Message::Advertise {
                            from: self.inner.self_id,
                            adv: Advertise::current_head(block.header.clone()),
                        };
                        if state.sessions.send(peer, chain, msg.clone()).is_ok() {
                            effects.push(Effect::Deliver(peer, msg));
                        }
                    }
                    effects
                };
                self.run_effects(effects).await
            }
            SystemEvent::NewBranch { branch } => {
                tracing::debug!(%branch, "new branch event");
                Ok(())
            }
            SystemEvent::NewChain { chain } => {
                tracing::debug!(%chain, "new chain event");
                Ok(())
            }
        }
    }

    fn tick_effects(&self, state: &mut RoundState) -> Vec<Effect> {
        let retry = self.inner.config.retry_cycles;
        match state.phase {
            SyncPhase::Unsynced => {
                if state.scores.active_count() >= self.inner.config.min_connections {
                    vec![Effect::StartRound]
                } else {
                    Vec::new()
                }
            }
            SyncPhase::RequestingBranches => {
                state.stall_ticks += 1;
                if state.stall_ticks > retry {
                    state.stall_ticks = 0;
                    self.solicit_claims(state)
                } else {
                    Vec::new()
                }
            }
            SyncPhase::RequestingHeaders => {
                state.frontier.tick(retry);
                state.stall_ticks += 1;
                let mut effects = self.request_headers(state);
                if state.stall_ticks > retry {
                    // Minority claims above the quorum segment can never
                    // decide; settle for the densely decided prefix.
                    if let (Some(base), Some(max)) =
                        (state.head_height(), state.aggregator.max_decided())
                    {
                        if max > base && state.aggregator.segment_complete(base + 1, max) {
                            tracing::info!(target = max, "stalled, reducing round target");
                            state.target = Some(max);
                            effects.extend(self.maybe_finish_headers(state));
                        }
                    }
                }
                effects
            }
            SyncPhase::RequestingOperations | SyncPhase::Applying => {
                state.ops_requested.retain(|_, age| {
                    *age += 1;
                    *age <= retry
                });
                let mut effects = self.request_operations(state);
                effects.push(Effect::ApplyNext);
                effects
            }
            SyncPhase::Synced => {
                let stale = state.head.as_ref().is_some_and(|h| {
                    h.timestamp.age_at(Timestamp::now())
                        > self.inner.config.freshness_threshold.as_secs()
                });
                if stale {
                    state.phase = SyncPhase::Unsynced;
                    return vec![Effect::StartRound];
                }
                // Poll peer heads so a network that moved on is noticed.
                let Some(branch) = state.head.as_ref().map(|h| h.branch) else {
                    return Vec::new();
                };
                let chain = self.inner.config.chain;
                let mut effects = Vec::new();
                for peer in state.scores.peers_by_score() {
                    if state.sessions.sent_len(peer, chain) > 0 {
                        continue;
                    }
                    let msg = Message::Request {
                        from: self.inner.self_id,
                        req: Request::GetCurrentHead { branch },
                    };
                    if state.sessions.send(peer, chain, msg.clone()).is_ok() {
                        effects.push(Effect::Deliver(peer, msg));
                    }
                }
                effects
            }
        }
    }
}

#[async_trait]
impl<L, S, I> BootstrapApi for BootstrapService<L, S, I>
where
    L: PeerLink + 'static,
    S: ChainStore + 'static,
    I: BlockImporter + 'static,
{
    async fn connect_peer(&self, peer: PeerId) -> Result<bool, BootstrapError> {
        let mut state = self.inner.state.lock();
        if state.scores.active_count() >= self.inner.config.max_connections {
            tracing::debug!(%peer, "connection refused, at capacity");
            return Ok(false);
        }
        if !state.scores.on_peer_connected(peer) {
            return Ok(false);
        }
        state.sessions.open(peer, self.inner.config.chain);
        tracing::debug!(%peer, "peer connected");
        Ok(true)
    }

    async fn disconnect_peer(&self, peer: PeerId) -> Result<(), BootstrapError> {
        let mut state = self.inner.state.lock();
        state.sessions.close(peer, self.inner.config.chain);
        state.scores.on_peer_disconnected(peer);
        state.claims.remove(&peer);
        tracing::debug!(%peer, "peer disconnected");
        Ok(())
    }

    async fn handle_message(&self, message: Message) -> Result<(), BootstrapError> {
        if let Message::System(event) = message {
            return self.on_system(event).await;
        }
        let Some(peer) = message.from_peer() else {
            return Ok(());
        };
        let effects = {
            let mut state = self.inner.state.lock();
            self.ingest(&mut state, peer, message)
        };
        self.run_effects(effects).await
    }

    async fn start_round(&self) -> Result<(), BootstrapError> {
        self.run_effects(vec![Effect::StartRound]).await
    }

    async fn tick(&self) -> Result<(), BootstrapError> {
        let effects = {
            let mut state = self.inner.state.lock();
            self.tick_effects(&mut state)
        };
        self.run_effects(effects).await
    }

    fn phase(&self) -> SyncPhase {
        self.inner.state.lock().phase
    }

    fn is_synced(&self) -> bool {
        self.phase() == SyncPhase::Synced
    }
}
