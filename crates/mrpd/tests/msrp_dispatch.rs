// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MSRP dispatcher behavior: talker advertise/failed merges, listener
//! substate gating, domain neighbor merges, store invariants.

mod common;

use common::{client, peer, station, RecordingPort};
use mrpd::config::MrpConfig;
use mrpd::core::types::{BridgeId, MacAddr, StreamId};
use mrpd::fsm::MrpEvent;
use mrpd::msrp::{
    failure_code, ListenerDeclaration, ListenerSubstate, Msrp, MsrpDeclaration, MsrpValue,
    SrClassDomain, TalkerDeclaration, TalkerFailure, TALKER_ADV_TYPE, TALKER_FAILED_TYPE,
};
use mrpd::store::AttributeValue;

fn new_msrp() -> Msrp<RecordingPort> {
    Msrp::new(MrpConfig::default(), station(), RecordingPort::default())
}

fn stream(tail: u8) -> StreamId {
    StreamId::from_bytes([0x00, 0x50, 0xC2, 0x4E, 0xDB, 0x0A, 0x00, tail])
}

fn talker(tail: u8) -> TalkerDeclaration {
    TalkerDeclaration {
        stream_id: stream(tail),
        dest_addr: MacAddr::from_bytes([0x91, 0xE0, 0xF0, 0x00, 0x0E, tail]),
        vlan_id: 2,
        max_frame_size: 576,
        max_interval_frames: 1,
        priority_and_rank: 96,
        accumulated_latency: 1000,
        failure: None,
    }
}

#[test]
fn test_talker_failed_merge_flips_type_and_notifies() {
    let mut msrp = new_msrp();
    msrp.recv_cmd("S??", client()); // registers the client
    msrp.recv_cmd(
        "S++:S=0050c24edb0a0001,A=91e0f0000e01,V=2,Z=576,I=1,P=96,L=1000",
        client(),
    );
    assert_eq!(msrp.store().len(), 1);
    msrp.port_mut().ctl.clear();

    // The bridge reports the reservation failed.
    let mut failed = talker(1);
    failed.failure = Some(TalkerFailure {
        bridge_id: BridgeId::from_bytes([0x10, 0, 0, 0, 0, 0, 0, 0x01]),
        failure_code: failure_code::INSUFFICIENT_BANDWIDTH,
    });
    msrp.event(
        MrpEvent::RemoteJoinIn,
        Some(MsrpDeclaration::remote(MsrpValue::Talker(failed), peer())),
    )
    .expect("remote failed dispatches");

    // Still one logical declaration; its wire type flipped.
    assert_eq!(msrp.store().len(), 1);
    let attr = msrp.store().get(0).expect("record kept");
    assert_eq!(attr.value.wire_type(), TALKER_FAILED_TYPE);

    // The forced registrar reset guarantees a client-visible notification.
    let lines = msrp.port().ctl_lines().join("");
    assert!(
        lines.contains("SJO T:S=0050c24edb0a0001") && lines.contains(",C=1"),
        "missing failed-talker notify: {:?}",
        lines
    );
}

#[test]
fn test_talker_recovery_flips_back() {
    let mut msrp = new_msrp();
    let mut failed = talker(1);
    failed.failure = Some(TalkerFailure {
        bridge_id: BridgeId::zero(),
        failure_code: failure_code::STREAM_ID_IN_USE,
    });
    msrp.event(
        MrpEvent::RemoteJoinIn,
        Some(MsrpDeclaration::remote(MsrpValue::Talker(failed), peer())),
    )
    .expect("failed registration dispatches");
    assert_eq!(
        msrp.store().get(0).expect("record").value.wire_type(),
        TALKER_FAILED_TYPE
    );

    msrp.event(
        MrpEvent::RemoteJoinIn,
        Some(MsrpDeclaration::remote(MsrpValue::Talker(talker(1)), peer())),
    )
    .expect("recovered registration dispatches");
    assert_eq!(msrp.store().len(), 1);
    assert_eq!(
        msrp.store().get(0).expect("record").value.wire_type(),
        TALKER_ADV_TYPE
    );
}

#[test]
fn test_listener_ready_gated_until_talker_known() {
    let mut msrp = new_msrp();
    let ask = MsrpValue::Listener(ListenerDeclaration {
        stream_id: stream(7),
        substate: ListenerSubstate::AskFailed,
    });
    let ready = MsrpValue::Listener(ListenerDeclaration {
        stream_id: stream(7),
        substate: ListenerSubstate::Ready,
    });

    msrp.event(
        MrpEvent::RemoteJoinIn,
        Some(MsrpDeclaration::remote(ask.clone(), peer())),
    )
    .expect("initial listener registration dispatches");

    // No talker for this stream: the substate change is silently dropped.
    msrp.event(
        MrpEvent::RemoteJoinIn,
        Some(MsrpDeclaration::remote(ready.clone(), peer())),
    )
    .expect("gated update dispatches");
    let attr = msrp.store().find(&ask).expect("listener kept");
    match &attr.value {
        MsrpValue::Listener(l) => assert_eq!(l.substate, ListenerSubstate::AskFailed),
        other => panic!("unexpected value {:?}", other),
    }

    // Once the talker is known, the same update applies.
    msrp.event(
        MrpEvent::RemoteJoinIn,
        Some(MsrpDeclaration::remote(MsrpValue::Talker(talker(7)), peer())),
    )
    .expect("talker registration dispatches");
    msrp.event(
        MrpEvent::RemoteJoinIn,
        Some(MsrpDeclaration::remote(ready.clone(), peer())),
    )
    .expect("ungated update dispatches");
    let attr = msrp.store().find(&ready).expect("listener kept");
    match &attr.value {
        MsrpValue::Listener(l) => assert_eq!(l.substate, ListenerSubstate::Ready),
        other => panic!("unexpected value {:?}", other),
    }
}

#[test]
fn test_local_listener_update_is_not_gated() {
    let mut msrp = new_msrp();
    msrp.recv_cmd("S+L:L=0050c24edb0a0007,D=1", client());
    msrp.recv_cmd("S+L:L=0050c24edb0a0007,D=2", client());

    assert_eq!(msrp.store().len(), 1);
    match &msrp.store().get(0).expect("listener").value {
        MsrpValue::Listener(l) => assert_eq!(l.substate, ListenerSubstate::Ready),
        other => panic!("unexpected value {:?}", other),
    }
}

#[test]
fn test_domain_merge_updates_neighbor_fields() {
    let mut msrp = new_msrp();
    msrp.recv_cmd("S+D:C=6,P=3,V=0002", client());

    let remote_domain = SrClassDomain {
        class_id: 6,
        class_priority: 5,
        neighbor_priority: 5,
        class_vid: 0x0003,
    };
    msrp.event(
        MrpEvent::RemoteJoinIn,
        Some(MsrpDeclaration::remote(
            MsrpValue::Domain(remote_domain),
            peer(),
        )),
    )
    .expect("remote domain dispatches");

    assert_eq!(msrp.store().len(), 1);
    match &msrp.store().get(0).expect("domain").value {
        MsrpValue::Domain(d) => {
            assert_eq!(d.neighbor_priority, 5);
            assert_eq!(d.class_vid, 0x0003);
            // Not mirroring: the advertised priority stays local.
            assert_eq!(d.class_priority, 3);
        }
        other => panic!("unexpected value {:?}", other),
    }
}

#[test]
fn test_domain_merge_mirrors_priority_when_configured() {
    let config = MrpConfig {
        mirror_neighbor_priority: true,
        ..MrpConfig::default()
    };
    let mut msrp = Msrp::new(config, station(), RecordingPort::default());
    msrp.recv_cmd("S+D:C=6,P=3,V=0002", client());

    msrp.event(
        MrpEvent::RemoteJoinIn,
        Some(MsrpDeclaration::remote(
            MsrpValue::Domain(SrClassDomain {
                class_id: 6,
                class_priority: 5,
                neighbor_priority: 5,
                class_vid: 0x0002,
            }),
            peer(),
        )),
    )
    .expect("remote domain dispatches");

    match &msrp.store().get(0).expect("domain").value {
        MsrpValue::Domain(d) => assert_eq!(d.class_priority, 5),
        other => panic!("unexpected value {:?}", other),
    }
}

#[test]
fn test_partitions_stay_sorted_across_mixed_inserts() {
    let mut msrp = new_msrp();
    let declarations = [
        MsrpValue::Domain(SrClassDomain::class_a_default()),
        MsrpValue::Talker(talker(9)),
        MsrpValue::Listener(ListenerDeclaration {
            stream_id: stream(4),
            substate: ListenerSubstate::AskFailed,
        }),
        MsrpValue::Talker(talker(2)),
        MsrpValue::Listener(ListenerDeclaration {
            stream_id: stream(1),
            substate: ListenerSubstate::AskFailed,
        }),
        MsrpValue::Talker(talker(5)),
    ];
    for value in declarations {
        msrp.event(
            MrpEvent::RemoteJoinIn,
            Some(MsrpDeclaration::remote(value, peer())),
        )
        .expect("insert dispatches");
    }

    let snapshot: Vec<(u8, Vec<u8>)> = msrp
        .store()
        .iter()
        .map(|a| {
            let key = match &a.value {
                MsrpValue::Talker(t) => t.stream_id.as_bytes().to_vec(),
                MsrpValue::Listener(l) => l.stream_id.as_bytes().to_vec(),
                MsrpValue::Domain(d) => vec![d.class_id],
            };
            (a.value.class(), key)
        })
        .collect();

    let mut sorted = snapshot.clone();
    sorted.sort();
    assert_eq!(snapshot, sorted);
    assert_eq!(msrp.store().len(), 6);
}

#[test]
fn test_reclaim_is_idempotent() {
    let mut msrp = new_msrp();
    // RemoteMt leaves an idle record (registrar MT, applicant VO).
    msrp.event(
        MrpEvent::RemoteMt,
        Some(MsrpDeclaration::remote(MsrpValue::Talker(talker(3)), peer())),
    )
    .expect("remote Mt dispatches");
    assert_eq!(msrp.store().len(), 1);

    msrp.reclaim();
    assert!(msrp.store().is_empty());
    msrp.reclaim();
    assert!(msrp.store().is_empty());
}

#[test]
fn test_leave_stream_command_targets_existing_declaration() {
    let mut msrp = new_msrp();
    msrp.recv_cmd(
        "S++:S=0050c24edb0a0001,A=91e0f0000e01,V=2,Z=576,I=1,P=96,L=1000",
        client(),
    );
    assert_eq!(msrp.store().len(), 1);

    // Leaving needs only the stream ID; the record is found by key.
    msrp.recv_cmd("S--:S=0050c24edb0a0001", client());
    assert_eq!(msrp.store().len(), 1);
    let attr = msrp.store().get(0).expect("record kept until reclaim");
    // The merge must not have wiped the declared parameters.
    match &attr.value {
        MsrpValue::Talker(t) => assert_eq!(t.max_frame_size, 576),
        other => panic!("unexpected value {:?}", other),
    }
}
