//! # Message Catalog
//!
//! Every protocol message is a tagged variant carrying exactly the field set
//! its type requires. Constructors derive the redundant key fields from the
//! payload, so a type/params mismatch cannot be built; the decode path
//! re-validates the same rules for bytes arriving off the wire.
//!
//! The request/response pairing is a fixed bijection:
//!
//! | Sent                | Expected reply  |
//! |---------------------|-----------------|
//! | `GetCurrentBranch`  | `CurrentBranch` |
//! | `GetCurrentHead`    | `CurrentHead`   |
//! | `GetBlockHeader`    | `BlockHeader`   |
//! | `GetOperations`     | `Operations`    |
//! | any `Advertise`     | matching `Ack`  |
//!
//! `Ack` and `Err` replies expect nothing.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use shared_types::{Block, BlockHeader, BranchId, ChainId, Hash, Height, OperationSet, PeerId};
use uuid::Uuid;

/// Pull requests sent to a peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Ask for the peer's current branch claim on a chain.
    GetCurrentBranch {
        /// Chain of interest.
        chain: ChainId,
    },
    /// Ask for the peer's current head on a branch.
    GetCurrentHead {
        /// Branch of interest.
        branch: BranchId,
    },
    /// Ask for the header at a given level of a branch.
    GetBlockHeader {
        /// Branch of interest.
        branch: BranchId,
        /// Level of interest.
        height: Height,
    },
    /// Ask for the operations of the block at a given level.
    GetOperations {
        /// Branch of interest.
        branch: BranchId,
        /// Level of interest.
        height: Height,
    },
}

impl Request {
    /// Chain this request is scoped to.
    pub fn chain(&self) -> ChainId {
        match self {
            Request::GetCurrentBranch { chain } => *chain,
            Request::GetCurrentHead { branch }
            | Request::GetBlockHeader { branch, .. }
            | Request::GetOperations { branch, .. } => branch.chain,
        }
    }

    /// The response type this request is owed. One table entry per pairing;
    /// correcting a pairing is a one-line change here.
    pub fn response_kind(&self) -> ExpectKind {
        match self {
            Request::GetCurrentBranch { chain } => ExpectKind::CurrentBranch { chain: *chain },
            Request::GetCurrentHead { branch } => ExpectKind::CurrentHead { branch: *branch },
            Request::GetBlockHeader { branch, height } => ExpectKind::BlockHeader {
                branch: *branch,
                height: *height,
            },
            Request::GetOperations { branch, height } => ExpectKind::Operations {
                branch: *branch,
                height: *height,
            },
        }
    }
}

/// Data advertisements, unsolicited or in reply to a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Advertise {
    /// A peer's branch claim: its head plus the hash history below it.
    CurrentBranch {
        /// The claimed branch.
        branch: BranchId,
        /// The branch head header.
        head: BlockHeader,
        /// (height, hash) samples at and below the head, ascending.
        history: Vec<(Height, Hash)>,
    },
    /// A peer's current head on a branch.
    CurrentHead {
        /// The branch.
        branch: BranchId,
        /// The head header.
        header: BlockHeader,
    },
    /// The header at a level of a branch.
    BlockHeader {
        /// The branch.
        branch: BranchId,
        /// The level.
        height: Height,
        /// The header itself.
        header: BlockHeader,
    },
    /// The operations of the block at a level.
    Operations {
        /// The branch.
        branch: BranchId,
        /// The level.
        height: Height,
        /// The operation set.
        operations: OperationSet,
    },
}

impl Advertise {
    /// Build a `CurrentBranch` claim; branch is derived from the head.
    pub fn current_branch(head: BlockHeader, history: Vec<(Height, Hash)>) -> Self {
        Advertise::CurrentBranch {
            branch: head.branch,
            head,
            history,
        }
    }

    /// Build a `CurrentHead`; branch is derived from the header.
    pub fn current_head(header: BlockHeader) -> Self {
        Advertise::CurrentHead {
            branch: header.branch,
            header,
        }
    }

    /// Build a `BlockHeader` reply; key fields are derived from the header.
    pub fn block_header(header: BlockHeader) -> Self {
        Advertise::BlockHeader {
            branch: header.branch,
            height: header.height,
            header,
        }
    }

    /// Build an `Operations` reply; key fields are derived from the set.
    pub fn operations(operations: OperationSet) -> Self {
        Advertise::Operations {
            branch: operations.branch,
            height: operations.height,
            operations,
        }
    }

    /// Chain this advertisement is scoped to.
    pub fn chain(&self) -> ChainId {
        match self {
            Advertise::CurrentBranch { branch, .. }
            | Advertise::CurrentHead { branch, .. }
            | Advertise::BlockHeader { branch, .. }
            | Advertise::Operations { branch, .. } => branch.chain,
        }
    }

    /// Every advertisement expects the matching acknowledgement.
    pub fn response_kind(&self) -> ExpectKind {
        match self {
            Advertise::CurrentBranch { .. } => ExpectKind::AckCurrentBranch,
            Advertise::CurrentHead { .. } => ExpectKind::AckCurrentHead,
            Advertise::BlockHeader { .. } => ExpectKind::AckBlockHeader,
            Advertise::Operations { .. } => ExpectKind::AckOperations,
        }
    }

    /// Check the derived-field consistency rules. Constructors uphold these;
    /// decode re-checks them for wire input.
    fn validate(&self) -> Result<(), ProtocolError> {
        let ok = match self {
            Advertise::CurrentBranch { branch, head, history } => {
                head.branch == *branch
                    && history.windows(2).all(|w| w[0].0 < w[1].0)
                    && history.iter().all(|(h, _)| *h <= head.height)
            }
            Advertise::CurrentHead { branch, header } => header.branch == *branch,
            Advertise::BlockHeader { branch, height, header } => {
                header.branch == *branch && header.height == *height
            }
            Advertise::Operations { branch, height, operations } => {
                operations.branch == *branch && operations.height == *height
            }
        };
        if ok {
            Ok(())
        } else {
            Err(ProtocolError::MalformedMessage {
                reason: format!("advertise key fields disagree with payload: {self:?}"),
            })
        }
    }
}

/// Terminal positive responses to advertisements. No parameters by design.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ack {
    /// Acknowledges a `CurrentBranch`.
    CurrentBranch,
    /// Acknowledges a `CurrentHead`.
    CurrentHead,
    /// Acknowledges a `BlockHeader`.
    BlockHeader,
    /// Acknowledges an `Operations`.
    Operations,
}

/// Terminal negative responses: the peer cannot serve the requested data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorReply {
    /// No header available at (branch, height).
    BlockHeader {
        /// The branch.
        branch: BranchId,
        /// The level.
        height: Height,
    },
    /// No operations available at (branch, height).
    Operations {
        /// The branch.
        branch: BranchId,
        /// The level.
        height: Height,
    },
}

/// Locally generated events. Never valid on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemEvent {
    /// A block was applied and committed locally.
    NewBlock {
        /// The committed block.
        block: Box<Block>,
    },
    /// A new branch claim became active.
    NewBranch {
        /// The branch.
        branch: BranchId,
    },
    /// A new chain was configured.
    NewChain {
        /// The chain.
        chain: ChainId,
    },
}

/// A protocol message: one of five peer-visible kinds plus local system
/// events. The field set of each variant is fixed by its type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Pull request.
    Request {
        /// Sending peer.
        from: PeerId,
        /// The request.
        req: Request,
    },
    /// Data advertisement.
    Advertise {
        /// Sending peer.
        from: PeerId,
        /// The advertisement.
        adv: Advertise,
    },
    /// Positive terminal response.
    Ack {
        /// Sending peer.
        from: PeerId,
        /// The acknowledgement.
        ack: Ack,
    },
    /// Negative terminal response.
    Err {
        /// Sending peer.
        from: PeerId,
        /// The error reply.
        err: ErrorReply,
    },
    /// Local event, not peer-originated.
    System(SystemEvent),
}

impl Message {
    /// Originating peer, if peer-originated.
    pub fn from_peer(&self) -> Option<PeerId> {
        match self {
            Message::Request { from, .. }
            | Message::Advertise { from, .. }
            | Message::Ack { from, .. }
            | Message::Err { from, .. } => Some(*from),
            Message::System(_) => None,
        }
    }

    /// Chain the message is scoped to, where its params carry one.
    pub fn chain(&self) -> Option<ChainId> {
        match self {
            Message::Request { req, .. } => Some(req.chain()),
            Message::Advertise { adv, .. } => Some(adv.chain()),
            Message::Err { err, .. } => match err {
                ErrorReply::BlockHeader { branch, .. } | ErrorReply::Operations { branch, .. } => {
                    Some(branch.chain)
                }
            },
            Message::Ack { .. } | Message::System(_) => None,
        }
    }

    /// Whether this message is a reply that should resolve an expectation.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Message::Advertise { .. } | Message::Ack { .. } | Message::Err { .. }
        )
    }

    /// The expectation this message creates when sent to `responder`.
    /// `None` for terminal and system messages.
    pub fn expected_response(&self, responder: PeerId) -> Option<Expect> {
        match self {
            Message::Request { req, .. } => Some(Expect::new(responder, req.response_kind())),
            Message::Advertise { adv, .. } => Some(Expect::new(responder, adv.response_kind())),
            Message::Ack { .. } | Message::Err { .. } | Message::System(_) => None,
        }
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(|e| ProtocolError::MalformedMessage {
            reason: format!("encode failed: {e}"),
        })
    }

    /// Decode wire bytes, enforcing the catalog's validity rules: unknown or
    /// truncated shapes, system messages, and key-field mismatches are all
    /// rejected here, before the message can enter any queue.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let msg: Message =
            bincode::deserialize(bytes).map_err(|e| ProtocolError::MalformedMessage {
                reason: format!("decode failed: {e}"),
            })?;
        if matches!(msg, Message::System(_)) {
            return Err(ProtocolError::MalformedMessage {
                reason: "system messages are local-only".to_string(),
            });
        }
        if let Message::Advertise { adv, .. } = &msg {
            adv.validate()?;
        }
        Ok(msg)
    }
}

/// The response type and discriminating parameters an expectation matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectKind {
    /// Awaiting a `CurrentBranch` for a chain.
    CurrentBranch {
        /// The chain.
        chain: ChainId,
    },
    /// Awaiting a `CurrentHead` for a branch.
    CurrentHead {
        /// The branch.
        branch: BranchId,
    },
    /// Awaiting a `BlockHeader` (or its error) for (branch, height).
    BlockHeader {
        /// The branch.
        branch: BranchId,
        /// The level.
        height: Height,
    },
    /// Awaiting an `Operations` (or its error) for (branch, height).
    Operations {
        /// The branch.
        branch: BranchId,
        /// The level.
        height: Height,
    },
    /// Awaiting acknowledgement of a `CurrentBranch` advertisement.
    AckCurrentBranch,
    /// Awaiting acknowledgement of a `CurrentHead` advertisement.
    AckCurrentHead,
    /// Awaiting acknowledgement of a `BlockHeader` advertisement.
    AckBlockHeader,
    /// Awaiting acknowledgement of an `Operations` advertisement.
    AckOperations,
}

impl ExpectKind {
    /// Whether an incoming message satisfies this expectation. Matching is
    /// by type plus the discriminating parameter subset.
    pub fn matches(&self, msg: &Message) -> bool {
        match (self, msg) {
            (
                ExpectKind::CurrentBranch { chain },
                Message::Advertise {
                    adv: Advertise::CurrentBranch { branch, .. },
                    ..
                },
            ) => branch.chain == *chain,
            (
                ExpectKind::CurrentHead { branch: want },
                Message::Advertise {
                    adv: Advertise::CurrentHead { branch, .. },
                    ..
                },
            ) => branch == want,
            (
                ExpectKind::BlockHeader { branch: want, height: want_h },
                Message::Advertise {
                    adv: Advertise::BlockHeader { branch, height, .. },
                    ..
                },
            ) => branch == want && height == want_h,
            (
                ExpectKind::BlockHeader { branch: want, height: want_h },
                Message::Err {
                    err: ErrorReply::BlockHeader { branch, height },
                    ..
                },
            ) => branch == want && height == want_h,
            (
                ExpectKind::Operations { branch: want, height: want_h },
                Message::Advertise {
                    adv: Advertise::Operations { branch, height, .. },
                    ..
                },
            ) => branch == want && height == want_h,
            (
                ExpectKind::Operations { branch: want, height: want_h },
                Message::Err {
                    err: ErrorReply::Operations { branch, height },
                    ..
                },
            ) => branch == want && height == want_h,
            (ExpectKind::AckCurrentBranch, Message::Ack { ack: Ack::CurrentBranch, .. })
            | (ExpectKind::AckCurrentHead, Message::Ack { ack: Ack::CurrentHead, .. })
            | (ExpectKind::AckBlockHeader, Message::Ack { ack: Ack::BlockHeader, .. })
            | (ExpectKind::AckOperations, Message::Ack { ack: Ack::Operations, .. }) => true,
            _ => false,
        }
    }
}

/// A registered promise that a specific response is still owed by a peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expect {
    /// Peer the response is owed by.
    pub from: PeerId,
    /// Response type and discriminating params.
    pub kind: ExpectKind,
    /// Correlation id for observability.
    pub correlation_id: Uuid,
}

impl Expect {
    /// Create an expectation owed by `from`.
    pub fn new(from: PeerId, kind: ExpectKind) -> Self {
        Self {
            from,
            kind,
            correlation_id: Uuid::new_v4(),
        }
    }

    /// Whether `msg` (already known to come from `self.from`'s session)
    /// satisfies this expectation.
    pub fn matches(&self, msg: &Message) -> bool {
        msg.from_peer() == Some(self.from) && self.kind.matches(msg)
    }
}
