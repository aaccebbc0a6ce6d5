// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MSRP wire codec: talker/listener/domain messages, FourPackedEvents,
//! AttributeListLength bounds and malformed-message recovery.

mod common;

use common::{peer, station, RecordingPort};
use mrpd::config::MrpConfig;
use mrpd::core::types::StreamId;
use mrpd::fsm::{MrpEvent, RegistrarState};
use mrpd::msrp::{
    ListenerSubstate, Msrp, MsrpValue, DOMAIN_TYPE, LISTENER_TYPE, MSRP_ADDR, MSRP_ETYPE,
    TALKER_ADV_TYPE,
};

fn new_msrp() -> Msrp<RecordingPort> {
    Msrp::new(MrpConfig::default(), station(), RecordingPort::default())
}

fn eth_header() -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(MSRP_ADDR.as_bytes());
    frame.extend_from_slice(peer().as_bytes());
    frame.extend_from_slice(&MSRP_ETYPE.to_be_bytes());
    frame.push(0x00); // ProtocolVersion
    frame
}

/// One listener message: 2-byte list length, vectors, end-mark.
fn listener_message(vectors: &[u8]) -> Vec<u8> {
    let mut msg = vec![LISTENER_TYPE, 8];
    let list_len = (vectors.len() + 2) as u16;
    msg.extend_from_slice(&list_len.to_be_bytes());
    msg.extend_from_slice(vectors);
    msg.extend_from_slice(&[0x00, 0x00]);
    msg
}

#[test]
fn test_talker_pdu_roundtrip_between_instances() {
    let mut sender = new_msrp();
    sender.recv_cmd(
        "S++:S=0050c24edb0a0001,A=91e0f0000e01,V=2,Z=576,I=1,P=96,L=1000",
        common::client(),
    );
    sender.recv_cmd(
        "S++:S=0050c24edb0a0002,A=91e0f0000e02,V=2,Z=576,I=1,P=96,L=1000",
        common::client(),
    );
    sender.event(MrpEvent::Tx, None).expect("tx dispatches");

    let frames = &sender.port().frames;
    assert_eq!(frames.len(), 1);
    let frame = &frames[0];

    // One talker-advertise message: both declarations coalesce into a
    // single two-value vector (stream and destination both advance by one).
    assert_eq!(frame[14], 0x00); // version
    assert_eq!(frame[15], TALKER_ADV_TYPE);
    assert_eq!(frame[16], 25);
    // list length: vector header + FirstValue + one packed byte + end-mark
    assert_eq!(&frame[17..19], &[0x00, 0x1E]);
    assert_eq!(&frame[19..21], &[0x00, 0x02]); // numvalues=2
    let expected_len = 14 + 1 + (2 + 2 + 2 + 25 + 1 + 2) + 2;
    assert_eq!(frame.len(), expected_len);

    let mut receiver = new_msrp();
    receiver.decode_pdu(frame).expect("own PDU decodes cleanly");
    assert_eq!(receiver.store().len(), 2);
    for (i, attr) in receiver.store().iter().enumerate() {
        assert_eq!(attr.registrar.state, RegistrarState::In);
        match &attr.value {
            MsrpValue::Talker(t) => {
                assert_eq!(t.stream_id.as_bytes()[7], (i + 1) as u8);
                assert_eq!(t.dest_addr.as_bytes()[5], (i + 1) as u8);
                assert_eq!(t.vlan_id, 2);
                assert_eq!(t.max_frame_size, 576);
                assert_eq!(t.max_interval_frames, 1);
                assert_eq!(t.priority_and_rank, 96);
                assert_eq!(t.accumulated_latency, 1000);
                assert!(t.failure.is_none());
            }
            other => panic!("unexpected value {:?}", other),
        }
    }
}

#[test]
fn test_listener_pdu_decodes_substates() {
    let stream = StreamId::from_bytes([0, 0x50, 0xC2, 0x4E, 0xDB, 0x0A, 0, 0x10]);

    let mut vectors = vec![0x00, 0x03]; // numvalues=3
    vectors.extend_from_slice(stream.as_bytes());
    vectors.push(36 * 1 + 6 * 1 + 1); // JoinIn, JoinIn, JoinIn
    vectors.push((2 << 6) | (1 << 4) | (2 << 2)); // Ready, AskFailed, Ready

    let mut frame = eth_header();
    frame.extend_from_slice(&listener_message(&vectors));
    frame.extend_from_slice(&[0x00, 0x00]);

    let mut msrp = new_msrp();
    msrp.decode_pdu(&frame).expect("well-formed PDU decodes");

    assert_eq!(msrp.store().len(), 3);
    let substates: Vec<ListenerSubstate> = msrp
        .store()
        .iter()
        .map(|a| match &a.value {
            MsrpValue::Listener(l) => l.substate,
            other => panic!("unexpected value {:?}", other),
        })
        .collect();
    assert_eq!(
        substates,
        vec![
            ListenerSubstate::Ready,
            ListenerSubstate::AskFailed,
            ListenerSubstate::Ready,
        ]
    );
}

#[test]
fn test_listener_ignore_substate_declares_nothing() {
    let stream = StreamId::from_bytes([0, 0, 0, 0, 0, 0, 0, 0x20]);

    let mut vectors = vec![0x00, 0x02]; // numvalues=2
    vectors.extend_from_slice(stream.as_bytes());
    vectors.push(36 * 1 + 6 * 1); // JoinIn, JoinIn, -
    vectors.push(2 << 4); // Ignore, Ready, -, -

    let mut frame = eth_header();
    frame.extend_from_slice(&listener_message(&vectors));
    frame.extend_from_slice(&[0x00, 0x00]);

    let mut msrp = new_msrp();
    msrp.decode_pdu(&frame).expect("well-formed PDU decodes");

    // Only the second value carries a declaration; its key advanced past
    // the ignored one.
    assert_eq!(msrp.store().len(), 1);
    match &msrp.store().get(0).expect("record").value {
        MsrpValue::Listener(l) => {
            assert_eq!(l.stream_id.as_bytes()[7], 0x21);
            assert_eq!(l.substate, ListenerSubstate::Ready);
        }
        other => panic!("unexpected value {:?}", other),
    }
}

#[test]
fn test_domain_roundtrip_between_instances() {
    let mut sender = new_msrp();
    sender.recv_cmd("S+D:C=6,P=3,V=0002", common::client());
    sender.event(MrpEvent::Tx, None).expect("tx dispatches");

    let frame = sender.port().frames.last().expect("PDU sent").clone();
    assert_eq!(frame[15], DOMAIN_TYPE);
    assert_eq!(frame[16], 4);

    let mut receiver = new_msrp();
    receiver.decode_pdu(&frame).expect("own PDU decodes cleanly");
    assert_eq!(receiver.store().len(), 1);
    match &receiver.store().get(0).expect("record").value {
        MsrpValue::Domain(d) => {
            assert_eq!(d.class_id, 6);
            assert_eq!(d.class_vid, 0x0002);
            // A received domain declaration is the neighbor's view.
            assert_eq!(d.neighbor_priority, 3);
        }
        other => panic!("unexpected value {:?}", other),
    }
}

#[test]
fn test_malformed_message_skipped_via_list_length() {
    // First message: listener whose vector claims more values than its
    // region can hold. Second message: a valid domain declaration.
    let mut bad_vectors = vec![0x01, 0x00]; // numvalues=256
    bad_vectors.extend_from_slice(&[0u8; 8]);
    bad_vectors.push(0);

    let mut frame = eth_header();
    frame.extend_from_slice(&listener_message(&bad_vectors));

    frame.extend_from_slice(&[DOMAIN_TYPE, 4]);
    let domain_vectors: &[u8] = &[0x00, 0x01, 6, 3, 0x00, 0x02, 36]; // one JoinIn
    frame.extend_from_slice(&((domain_vectors.len() + 2) as u16).to_be_bytes());
    frame.extend_from_slice(domain_vectors);
    frame.extend_from_slice(&[0x00, 0x00]);
    frame.extend_from_slice(&[0x00, 0x00]);

    let mut msrp = new_msrp();
    msrp.decode_pdu(&frame)
        .expect("recovery is local to the malformed message");

    // The listener message was dropped whole; the domain survived.
    assert_eq!(msrp.store().len(), 1);
    match &msrp.store().get(0).expect("record").value {
        MsrpValue::Domain(d) => assert_eq!(d.class_id, 6),
        other => panic!("unexpected value {:?}", other),
    }
}

#[test]
fn test_inconsistent_list_length_drops_packet() {
    let mut frame = eth_header();
    frame.extend_from_slice(&[LISTENER_TYPE, 8, 0xFF, 0xFF]); // length > PDU
    frame.extend_from_slice(&[0u8; 4]);

    let mut msrp = new_msrp();
    assert!(msrp.decode_pdu(&frame).is_err());
    assert!(msrp.store().is_empty());
}

#[test]
fn test_empty_leave_all_covers_each_partition() {
    let mut msrp = new_msrp();
    msrp.event(MrpEvent::LeaveAllTimer, None)
        .expect("timer event dispatches");

    let frames = &msrp.port().frames;
    assert_eq!(frames.len(), 1);
    let frame = &frames[0];

    // Talker-advertise, listener and domain each carry one empty LeaveAll
    // vector; the failed-talker type rides on the advertise partition.
    let mut msg_types = Vec::new();
    let mut at = 15;
    while at + 4 <= frame.len() {
        let msg_type = frame[at];
        if msg_type == 0 {
            break;
        }
        msg_types.push(msg_type);
        let list_len = u16::from_be_bytes([frame[at + 2], frame[at + 3]]) as usize;
        at += 4 + list_len;
    }
    assert_eq!(msg_types, vec![TALKER_ADV_TYPE, LISTENER_TYPE, DOMAIN_TYPE]);

    // Feeding it back triggers peer-LeaveAll handling, not an error.
    let mut receiver = new_msrp();
    receiver.decode_pdu(frame).expect("empty LeaveAll decodes");
    assert!(receiver.store().is_empty());
}

#[test]
fn test_truncated_pdu_never_reads_past_end() {
    let mut sender = new_msrp();
    sender.recv_cmd(
        "S++:S=0050c24edb0a0001,A=91e0f0000e01,V=2,Z=576,I=1,P=96,L=1000",
        common::client(),
    );
    sender.recv_cmd("S+D:C=6,P=3,V=0002", common::client());
    sender.event(MrpEvent::Tx, None).expect("tx dispatches");
    let frame = sender.port().frames.last().expect("PDU sent").clone();

    for len in 0..frame.len() {
        let mut msrp = new_msrp();
        let _ = msrp.decode_pdu(&frame[..len]);
    }
}

#[test]
fn test_corrupted_pdu_never_panics() {
    let mut sender = new_msrp();
    sender.recv_cmd(
        "S++:S=0050c24edb0a0001,A=91e0f0000e01,V=2,Z=576,I=1,P=96,L=1000",
        common::client(),
    );
    sender.event(MrpEvent::Tx, None).expect("tx dispatches");
    let base = sender.port().frames.last().expect("PDU sent").clone();

    fastrand::seed(0x22EA);
    for _ in 0..500 {
        let mut frame = base.clone();
        for _ in 0..3 {
            let at = fastrand::usize(..frame.len());
            frame[at] = fastrand::u8(..);
        }
        let len = fastrand::usize(..=frame.len());
        let mut msrp = new_msrp();
        let _ = msrp.decode_pdu(&frame[..len]);
    }
}
