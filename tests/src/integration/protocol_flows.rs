//! # Protocol Flow Tests
//!
//! The wire catalog, expectation registry, and bounded sessions working
//! together the way a transport adapter would drive them: bytes in, decoded
//! message into the session, consume, reply.

#[cfg(test)]
mod tests {
    use cb_protocol::{
        Ack, Advertise, ErrorReply, Message, ProtocolConfig, ProtocolError, Request, Sessions,
    };
    use shared_types::{BlockHeader, BranchId, ChainId, Operation, OperationSet, PeerId, Timestamp};

    const CHAIN: ChainId = ChainId(0);
    const SELF_ID: PeerId = PeerId(0);
    const PEER: PeerId = PeerId(7);

    fn branch() -> BranchId {
        BranchId::new(CHAIN, 1)
    }

    fn header_at(height: u64) -> BlockHeader {
        BlockHeader {
            branch: branch(),
            height,
            predecessor: [0u8; 32],
            timestamp: Timestamp::from_secs(height),
            fitness: height,
            operations_hash: [0u8; 32],
        }
    }

    fn sessions() -> Sessions {
        let mut s = Sessions::new(SELF_ID, ProtocolConfig::for_testing());
        s.open(PEER, CHAIN);
        s
    }

    /// Simulate the receive path of a transport adapter: wire bytes are
    /// decoded, enqueued, and consumed against the expectation registry.
    #[test]
    fn test_request_reply_over_the_wire() {
        let mut s = sessions();
        let request = Message::Request {
            from: SELF_ID,
            req: Request::GetBlockHeader { branch: branch(), height: 4 },
        };
        s.send(PEER, CHAIN, request).unwrap();

        // The peer answers; its reply travels as bytes.
        let reply = Message::Advertise {
            from: PEER,
            adv: Advertise::block_header(header_at(4)),
        };
        let wire = reply.encode().unwrap();

        let decoded = Message::decode(&wire).unwrap();
        s.receive(PEER, CHAIN, decoded).unwrap();
        let consumed = s.consume(PEER, CHAIN).unwrap().unwrap();

        assert!(consumed.expectation.is_some());
        assert_eq!(s.pending_expectations(PEER, CHAIN), 0);
        assert_eq!(s.sent_len(PEER, CHAIN), 0);
    }

    /// The third unacknowledged outbound message must be rejected, not
    /// queued or silently dropped (testing capacity is 2).
    #[test]
    fn test_third_unacknowledged_send_is_rejected() {
        let mut s = sessions();
        for height in [6, 7] {
            s.send(
                PEER,
                CHAIN,
                Message::Request {
                    from: SELF_ID,
                    req: Request::GetBlockHeader { branch: branch(), height },
                },
            )
            .unwrap();
        }

        let third = s.send(
            PEER,
            CHAIN,
            Message::Request {
                from: SELF_ID,
                req: Request::GetBlockHeader { branch: branch(), height: 8 },
            },
        );
        assert!(matches!(third, Err(ProtocolError::QueueFull { capacity: 2, .. })));

        // An answer frees the slot and the send goes through.
        s.receive(
            PEER,
            CHAIN,
            Message::Advertise { from: PEER, adv: Advertise::block_header(header_at(6)) },
        )
        .unwrap();
        s.consume(PEER, CHAIN).unwrap().unwrap();
        s.send(
            PEER,
            CHAIN,
            Message::Request {
                from: SELF_ID,
                req: Request::GetBlockHeader { branch: branch(), height: 8 },
            },
        )
        .unwrap();
    }

    /// One request, two copies of the answer: the first resolves the
    /// expectation, the duplicate is an anomaly.
    #[test]
    fn test_expectation_consumed_exactly_once() {
        let mut s = sessions();
        s.send(
            PEER,
            CHAIN,
            Message::Request {
                from: SELF_ID,
                req: Request::GetOperations { branch: branch(), height: 3 },
            },
        )
        .unwrap();

        let reply = Message::Advertise {
            from: PEER,
            adv: Advertise::operations(OperationSet {
                branch: branch(),
                height: 3,
                operations: vec![Operation { payload: vec![3] }],
            }),
        };
        s.receive(PEER, CHAIN, reply.clone()).unwrap();
        s.receive(PEER, CHAIN, reply).unwrap();

        assert!(s.consume(PEER, CHAIN).unwrap().is_some());
        assert!(matches!(
            s.consume(PEER, CHAIN),
            Err(ProtocolError::UnsolicitedResponse { peer: PEER })
        ));
    }

    /// A negative reply resolves the same expectation a positive one would.
    #[test]
    fn test_error_reply_closes_the_exchange() {
        let mut s = sessions();
        s.send(
            PEER,
            CHAIN,
            Message::Request {
                from: SELF_ID,
                req: Request::GetBlockHeader { branch: branch(), height: 42 },
            },
        )
        .unwrap();

        let err = Message::Err {
            from: PEER,
            err: ErrorReply::BlockHeader { branch: branch(), height: 42 },
        };
        s.receive(PEER, CHAIN, err).unwrap();
        let consumed = s.consume(PEER, CHAIN).unwrap().unwrap();

        assert!(consumed.expectation.is_some());
        assert_eq!(s.sent_len(PEER, CHAIN), 0);
    }

    /// Advertise/ack in the other direction: we advertise, the peer acks.
    #[test]
    fn test_advertise_ack_exchange() {
        let mut s = sessions();
        s.send(
            PEER,
            CHAIN,
            Message::Advertise { from: SELF_ID, adv: Advertise::current_head(header_at(9)) },
        )
        .unwrap();
        assert_eq!(s.sent_len(PEER, CHAIN), 1);

        s.receive(PEER, CHAIN, Message::Ack { from: PEER, ack: Ack::CurrentHead })
            .unwrap();
        let consumed = s.consume(PEER, CHAIN).unwrap().unwrap();
        assert!(consumed.expectation.is_some());
        assert_eq!(s.sent_len(PEER, CHAIN), 0);
    }

    /// Malformed bytes and key-field mismatches never reach a queue.
    #[test]
    fn test_decode_guards_the_queue() {
        assert!(Message::decode(&[0u8; 3]).is_err());

        let mismatched = Message::Advertise {
            from: PEER,
            adv: Advertise::BlockHeader {
                branch: branch(),
                height: 8,
                header: header_at(4),
            },
        };
        let wire = mismatched.encode().unwrap();
        assert!(matches!(
            Message::decode(&wire),
            Err(ProtocolError::MalformedMessage { .. })
        ));
    }
}
