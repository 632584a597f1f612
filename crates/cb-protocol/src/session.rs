//! # Peer Sessions
//!
//! Per-(peer, chain) queues of messages sent-but-unconsumed and
//! received-but-unhandled, bounded by a fixed capacity. A send or receive
//! that would exceed the bound fails with `QueueFull` - backpressure, never
//! silent growth or drop. Sessions are the unit of concurrency: message
//! handling for a single (peer, chain) is strictly sequential through
//! `consume`.

use crate::config::ProtocolConfig;
use crate::error::ProtocolError;
use crate::expectation::ExpectationRegistry;
use crate::messages::{Expect, Message};
use shared_types::{ChainId, PeerId};
use std::collections::{HashMap, VecDeque};

/// Bounded send/receive state for one (peer, chain).
#[derive(Debug)]
pub struct PeerSession {
    capacity: usize,
    /// Sent but not yet answered.
    sent: Vec<Message>,
    /// Received but not yet handled (FIFO).
    received: VecDeque<Message>,
}

impl PeerSession {
    /// Create a session with the given capacity bound.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            sent: Vec::new(),
            received: VecDeque::new(),
        }
    }

    /// Track an outbound message. Fails when the outbound set is full.
    pub fn send(&mut self, peer: PeerId, msg: Message) -> Result<(), ProtocolError> {
        if self.sent.len() >= self.capacity {
            return Err(ProtocolError::QueueFull {
                peer,
                capacity: self.capacity,
            });
        }
        self.sent.push(msg);
        Ok(())
    }

    /// Enqueue an inbound message. Rejects system messages and fails when
    /// the inbound queue is full.
    pub fn receive(&mut self, peer: PeerId, msg: Message) -> Result<(), ProtocolError> {
        if matches!(msg, Message::System(_)) {
            return Err(ProtocolError::SystemMessageFromPeer { peer });
        }
        if self.received.len() >= self.capacity {
            return Err(ProtocolError::QueueFull {
                peer,
                capacity: self.capacity,
            });
        }
        self.received.push_back(msg);
        Ok(())
    }

    /// Pop the head of the inbound queue.
    pub fn pop_received(&mut self) -> Option<Message> {
        self.received.pop_front()
    }

    /// A response resolved `expect`: the sent message that created it is
    /// consumed, freeing outbound capacity.
    pub fn mark_answered(&mut self, responder: PeerId, expect: &Expect) {
        let pos = self.sent.iter().position(|m| {
            m.expected_response(responder)
                .is_some_and(|e| e.kind == expect.kind)
        });
        if let Some(pos) = pos {
            self.sent.remove(pos);
        }
    }

    /// Messages sent and still awaiting an answer.
    pub fn sent_len(&self) -> usize {
        self.sent.len()
    }

    /// Messages received and not yet handled.
    pub fn received_len(&self) -> usize {
        self.received.len()
    }

    /// Drop sent-but-unanswered messages (round cancellation).
    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }
}

/// A consumed inbound message together with the expectation it resolved.
#[derive(Debug)]
pub struct Consumed {
    /// The message popped from the inbound queue.
    pub message: Message,
    /// The resolved expectation; `None` for messages that aren't responses
    /// (i.e. requests from the peer).
    pub expectation: Option<Expect>,
}

/// All sessions of the local node, plus the expectation registry they share.
#[derive(Debug)]
pub struct Sessions {
    self_id: PeerId,
    config: ProtocolConfig,
    sessions: HashMap<(PeerId, ChainId), PeerSession>,
    registry: ExpectationRegistry,
}

impl Sessions {
    /// Create the session table for the local node.
    pub fn new(self_id: PeerId, config: ProtocolConfig) -> Self {
        Self {
            self_id,
            config,
            sessions: HashMap::new(),
            registry: ExpectationRegistry::new(),
        }
    }

    /// Local node id (the `from` of everything we send).
    pub fn self_id(&self) -> PeerId {
        self.self_id
    }

    /// Open a session for (peer, chain). Idempotent.
    pub fn open(&mut self, peer: PeerId, chain: ChainId) {
        self.sessions
            .entry((peer, chain))
            .or_insert_with(|| PeerSession::new(self.config.queue_capacity));
    }

    /// Close a session, cancelling its outstanding expectations.
    pub fn close(&mut self, peer: PeerId, chain: ChainId) -> Vec<Expect> {
        self.sessions.remove(&(peer, chain));
        self.registry.cancel(peer, chain)
    }

    /// Send `msg` to `peer` on `chain`: records it in the outbound set and
    /// registers the response it is owed. Terminal messages (acks, error
    /// replies) are owed nothing and pass through without occupying an
    /// outbound slot.
    ///
    /// # Errors
    /// - `SessionNotFound` if no session is open
    /// - `QueueFull` if the outbound set is at capacity
    pub fn send(&mut self, peer: PeerId, chain: ChainId, msg: Message) -> Result<(), ProtocolError> {
        let session = self
            .sessions
            .get_mut(&(peer, chain))
            .ok_or(ProtocolError::SessionNotFound { peer, chain })?;
        if let Some(expect) = msg.expected_response(peer) {
            session.send(peer, msg)?;
            self.registry.register(peer, chain, expect);
        }
        Ok(())
    }

    /// Enqueue an inbound message from `peer` on `chain`.
    ///
    /// # Errors
    /// - `SessionNotFound` if no session is open
    /// - `SystemMessageFromPeer` for wire-borne system messages
    /// - `QueueFull` if the inbound queue is at capacity
    pub fn receive(
        &mut self,
        peer: PeerId,
        chain: ChainId,
        msg: Message,
    ) -> Result<(), ProtocolError> {
        let session = self
            .sessions
            .get_mut(&(peer, chain))
            .ok_or(ProtocolError::SessionNotFound { peer, chain })?;
        session.receive(peer, msg)
    }

    /// Pop and resolve the head of a session's inbound queue.
    ///
    /// Returns `Ok(None)` when the queue is empty. A response with no
    /// matching expectation is popped, discarded, and reported as
    /// `UnsolicitedResponse` - the anomaly feeds peer scoring upstream.
    pub fn consume(
        &mut self,
        peer: PeerId,
        chain: ChainId,
    ) -> Result<Option<Consumed>, ProtocolError> {
        let session = self
            .sessions
            .get_mut(&(peer, chain))
            .ok_or(ProtocolError::SessionNotFound { peer, chain })?;
        let Some(message) = session.pop_received() else {
            return Ok(None);
        };

        if !message.is_response() {
            return Ok(Some(Consumed {
                message,
                expectation: None,
            }));
        }

        match self.registry.resolve(peer, chain, &message) {
            Some(expect) => {
                session.mark_answered(peer, &expect);
                Ok(Some(Consumed {
                    message,
                    expectation: Some(expect),
                }))
            }
            None => {
                tracing::warn!(%peer, %chain, ?message, "response without matching expectation");
                Err(ProtocolError::UnsolicitedResponse { peer })
            }
        }
    }

    /// Outstanding expectations for one (peer, chain).
    pub fn pending_expectations(&self, peer: PeerId, chain: ChainId) -> usize {
        self.registry.pending(peer, chain)
    }

    /// Outbound slots in use for one (peer, chain).
    pub fn sent_len(&self, peer: PeerId, chain: ChainId) -> usize {
        self.sessions
            .get(&(peer, chain))
            .map_or(0, PeerSession::sent_len)
    }

    /// Inbound messages waiting for one (peer, chain).
    pub fn received_len(&self, peer: PeerId, chain: ChainId) -> usize {
        self.sessions
            .get(&(peer, chain))
            .map_or(0, PeerSession::received_len)
    }

    /// Cancel every outstanding expectation and queued-but-unanswered send
    /// across all sessions. Called on round reset.
    pub fn cancel_round(&mut self) -> usize {
        for session in self.sessions.values_mut() {
            session.clear_sent();
        }
        self.registry.cancel_all()
    }
}
