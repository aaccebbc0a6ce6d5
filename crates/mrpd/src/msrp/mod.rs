// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MSRP: AVB stream reservation (802.1Q-2011 clause 35).
//!
//! Four wire attribute types: talker-advertise (25-byte FirstValue),
//! talker-failed (34 bytes: advertise plus bridge ID and failure code),
//! listener (8-byte stream ID plus a FourPackedEvents substate per value)
//! and domain (4 bytes of SR class/priority/VID). A talker-advertise and a
//! talker-failed for the same stream ID are one logical declaration whose
//! type flips when a bridge reports or clears a failure.
//!
//! Unlike MMRP, every MSRP message carries an AttributeListLength, which
//! also bounds the region discarded when a message is malformed.

use crate::cmd;
use crate::config::{MrpConfig, MAX_FRAME_SIZE};
use crate::context::MrpContext;
use crate::core::ser::{Cursor, CursorMut, SerError, SerResult};
use crate::core::types::{BridgeId, MacAddr, StreamId};
use crate::error::{MrpError, MrpResult};
use crate::fsm::{
    applicant_fsm, registrar_fsm, remote_event, transition_implies_tx, wire_send_event,
    EncodeHint, MrpEvent, NotifyKind,
};
use crate::port::{ClientId, MrpPort};
use crate::protocol::vector::check_vector_fits;
use crate::protocol::{
    four_packed_len, read_four_packed, read_three_packed, three_packed_len, write_four_packed,
    write_three_packed, VectorHeader, ENDMARK, ENDMARK_SIZE, PROTOCOL_VERSION,
};
use crate::store::{Attribute, AttributeStore, AttributeValue};
use std::cmp::Ordering;

pub const MSRP_ETYPE: u16 = 0x22EA;
pub const MSRP_PROT_VER: u8 = PROTOCOL_VERSION;

/// MSRP group destination address.
pub const MSRP_ADDR: MacAddr = MacAddr::from_bytes([0x01, 0x80, 0xC2, 0x00, 0x00, 0x0E]);

/// Wire attribute types.
pub const TALKER_ADV_TYPE: u8 = 1;
pub const TALKER_FAILED_TYPE: u8 = 2;
pub const LISTENER_TYPE: u8 = 3;
pub const DOMAIN_TYPE: u8 = 4;

const TALKER_ADV_ATTR_LEN: usize = 25;
const TALKER_FAILED_ATTR_LEN: usize = 34;
const LISTENER_ATTR_LEN: usize = 8;
const DOMAIN_ATTR_LEN: usize = 4;

/// SR class identifiers and default priorities (802.1Q-2011 Table 6-6).
pub const SR_CLASS_A: u8 = 6;
pub const SR_CLASS_B: u8 = 5;
pub const SR_CLASS_A_PRIO: u8 = 3;
pub const SR_CLASS_B_PRIO: u8 = 2;
pub const SR_PVID_DEFAULT: u16 = 2;

/// Talker-failed failure codes (802.1Q-2011 Table 35-6).
pub mod failure_code {
    pub const INSUFFICIENT_BANDWIDTH: u8 = 1;
    pub const INSUFFICIENT_BRIDGE_RESOURCES: u8 = 2;
    pub const INSUFFICIENT_TC_BANDWIDTH: u8 = 3;
    pub const STREAM_ID_IN_USE: u8 = 4;
    pub const STREAM_DESTADDR_IN_USE: u8 = 5;
    pub const STREAM_PREEMPTED: u8 = 6;
    pub const LATENCY_CHANGED: u8 = 7;
    pub const PORT_NOT_AVB_CAPABLE: u8 = 8;
    pub const USE_DIFFERENT_DESTADDR: u8 = 9;
    pub const OUT_OF_MSRP_RESOURCES: u8 = 10;
    pub const OUT_OF_MMRP_RESOURCES: u8 = 11;
    pub const CANNOT_STORE_DESTADDR: u8 = 12;
    pub const PRIORITY_IS_NOT_SR_CLASS: u8 = 13;
    pub const FRAME_SIZE_TOO_LARGE: u8 = 14;
    pub const FANIN_PORTS_EXCEEDED: u8 = 15;
    pub const STREAM_CHANGED: u8 = 16;
    pub const VLAN_BLOCKED_ON_PORT: u8 = 17;
    pub const VLAN_TAGGING_DISABLED: u8 = 18;
    pub const SR_CLASS_PRIORITY_MISMATCH: u8 = 19;
}

/// Listener declaration substate, carried four to a byte on the wire.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ListenerSubstate {
    Ignore,
    AskFailed,
    Ready,
    ReadyFailed,
}

impl ListenerSubstate {
    pub fn code(&self) -> u8 {
        match self {
            ListenerSubstate::Ignore => 0,
            ListenerSubstate::AskFailed => 1,
            ListenerSubstate::Ready => 2,
            ListenerSubstate::ReadyFailed => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ListenerSubstate::Ignore),
            1 => Some(ListenerSubstate::AskFailed),
            2 => Some(ListenerSubstate::Ready),
            3 => Some(ListenerSubstate::ReadyFailed),
            _ => None,
        }
    }
}

/// Bridge failure report carried only by talker-failed declarations.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TalkerFailure {
    pub bridge_id: BridgeId,
    pub failure_code: u8,
}

/// Talker stream declaration. `failure` present means the declaration is a
/// talker-failed on the wire; absent means talker-advertise.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TalkerDeclaration {
    pub stream_id: StreamId,
    pub dest_addr: MacAddr,
    pub vlan_id: u16,
    pub max_frame_size: u16,
    pub max_interval_frames: u16,
    /// 3-bit priority | 1-bit rank (0 = emergency) | 4 bits reserved.
    pub priority_and_rank: u8,
    /// Accumulated latency in nanoseconds.
    pub accumulated_latency: u32,
    pub failure: Option<TalkerFailure>,
}

impl TalkerDeclaration {
    /// A lookup probe carrying only the stream ID (the talker key).
    pub fn probe(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            dest_addr: MacAddr::zero(),
            vlan_id: 0,
            max_frame_size: 0,
            max_interval_frames: 0,
            priority_and_rank: 0,
            accumulated_latency: 0,
            failure: None,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ListenerDeclaration {
    pub stream_id: StreamId,
    pub substate: ListenerSubstate,
}

/// SR class to priority/VID mapping advertised by domain declarations.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SrClassDomain {
    pub class_id: u8,
    pub class_priority: u8,
    /// Priority the neighbor bridge advertises for this class.
    pub neighbor_priority: u8,
    pub class_vid: u16,
}

impl SrClassDomain {
    pub fn class_a_default() -> Self {
        Self {
            class_id: SR_CLASS_A,
            class_priority: SR_CLASS_A_PRIO,
            neighbor_priority: 0,
            class_vid: SR_PVID_DEFAULT,
        }
    }
}

/// One MSRP attribute value.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum MsrpValue {
    Talker(TalkerDeclaration),
    Listener(ListenerDeclaration),
    Domain(SrClassDomain),
}

impl MsrpValue {
    pub fn wire_type(&self) -> u8 {
        match self {
            MsrpValue::Talker(t) if t.failure.is_some() => TALKER_FAILED_TYPE,
            MsrpValue::Talker(_) => TALKER_ADV_TYPE,
            MsrpValue::Listener(_) => LISTENER_TYPE,
            MsrpValue::Domain(_) => DOMAIN_TYPE,
        }
    }
}

impl AttributeValue for MsrpValue {
    /// Talker-advertise and talker-failed share one partition: a stream's
    /// declaration flips between them without moving.
    fn class(&self) -> u8 {
        match self {
            MsrpValue::Talker(_) => TALKER_ADV_TYPE,
            MsrpValue::Listener(_) => LISTENER_TYPE,
            MsrpValue::Domain(_) => DOMAIN_TYPE,
        }
    }

    fn key_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (MsrpValue::Talker(a), MsrpValue::Talker(b)) => a.stream_id.cmp(&b.stream_id),
            (MsrpValue::Listener(a), MsrpValue::Listener(b)) => a.stream_id.cmp(&b.stream_id),
            (MsrpValue::Domain(a), MsrpValue::Domain(b)) => a.class_id.cmp(&b.class_id),
            // Only called within one partition.
            _ => Ordering::Equal,
        }
    }

    fn follows(&self, prev: &Self) -> bool {
        match (self, prev) {
            (MsrpValue::Talker(a), MsrpValue::Talker(b)) => {
                // A talker run reconstructs every field but the keys from the
                // FirstValue, so only declarations whose stream and
                // destination both advance and whose parameters agree can
                // share a vector.
                a.stream_id.follows(&b.stream_id)
                    && a.dest_addr.follows(&b.dest_addr)
                    && a.vlan_id == b.vlan_id
                    && a.max_frame_size == b.max_frame_size
                    && a.max_interval_frames == b.max_interval_frames
                    && a.priority_and_rank == b.priority_and_rank
                    && a.accumulated_latency == b.accumulated_latency
                    && a.failure == b.failure
            }
            (MsrpValue::Listener(a), MsrpValue::Listener(b)) => a.stream_id.follows(&b.stream_id),
            (MsrpValue::Domain(a), MsrpValue::Domain(b)) => {
                a.class_id == b.class_id.wrapping_add(1)
                    && a.class_priority == b.class_priority.wrapping_add(1)
                    && a.class_vid == b.class_vid
            }
            _ => false,
        }
    }
}

/// A declaration delivered to the dispatcher.
#[derive(Debug, Clone)]
pub struct MsrpDeclaration {
    pub value: MsrpValue,
    pub source: MacAddr,
}

impl MsrpDeclaration {
    pub fn local(value: MsrpValue) -> Self {
        Self {
            value,
            source: MacAddr::zero(),
        }
    }

    pub fn remote(value: MsrpValue, source: MacAddr) -> Self {
        Self { value, source }
    }
}

fn is_remote(event: MrpEvent) -> bool {
    matches!(
        event,
        MrpEvent::RemoteNew
            | MrpEvent::RemoteJoinIn
            | MrpEvent::RemoteIn
            | MrpEvent::RemoteJoinMt
            | MrpEvent::RemoteMt
            | MrpEvent::RemoteLeave
            | MrpEvent::RemoteLeaveAll
    )
}

/// Which MSRP message an assembly pass is building.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum MsrpKind {
    TalkerAdvertise,
    TalkerFailed,
    Listener,
    Domain,
}

impl MsrpKind {
    fn wire_type(self) -> u8 {
        match self {
            MsrpKind::TalkerAdvertise => TALKER_ADV_TYPE,
            MsrpKind::TalkerFailed => TALKER_FAILED_TYPE,
            MsrpKind::Listener => LISTENER_TYPE,
            MsrpKind::Domain => DOMAIN_TYPE,
        }
    }

    fn attr_len(self) -> usize {
        match self {
            MsrpKind::TalkerAdvertise => TALKER_ADV_ATTR_LEN,
            MsrpKind::TalkerFailed => TALKER_FAILED_ATTR_LEN,
            MsrpKind::Listener => LISTENER_ATTR_LEN,
            MsrpKind::Domain => DOMAIN_ATTR_LEN,
        }
    }

    fn matches(self, value: &MsrpValue) -> bool {
        value.wire_type() == self.wire_type()
    }
}

/// One MSRP protocol instance.
pub struct Msrp<P: MrpPort> {
    store: AttributeStore<MsrpValue>,
    ctx: MrpContext,
    port: P,
    station: MacAddr,
    send_empty_leave_all: bool,
}

impl<P: MrpPort> Msrp<P> {
    pub fn new(config: MrpConfig, station: MacAddr, port: P) -> Self {
        let mut msrp = Self {
            store: AttributeStore::new(),
            ctx: MrpContext::new(config),
            port,
            station,
            send_empty_leave_all: false,
        };
        msrp.ctx.leave_all_event(MrpEvent::Begin, &mut msrp.port);
        msrp
    }

    pub fn store(&self) -> &AttributeStore<MsrpValue> {
        &self.store
    }

    /// Management access to the database (dumps, diagnostics, tests).
    pub fn store_mut(&mut self) -> &mut AttributeStore<MsrpValue> {
        &mut self.store
    }

    pub fn context(&self) -> &MrpContext {
        &self.ctx
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    // ==================================================================
    // Event dispatch
    // ==================================================================

    /// Process one event against the database; see [`crate::mmrp::Mmrp::event`]
    /// for the shared contract. MSRP differences: a peer LeaveAll ticks the
    /// whole database (no per-type candidate needed), and merges carry the
    /// talker/listener/domain semantics described on [`MsrpValue`].
    pub fn event(&mut self, event: MrpEvent, declaration: Option<MsrpDeclaration>) -> MrpResult<()> {
        let p2p = self.ctx.config.point_to_point_mac;

        match event {
            MrpEvent::LeaveAllTimer => {
                self.ctx.leave_all_timer_stop(&mut self.port);
                self.ctx.join_timer_stop(&mut self.port);

                let mut arm_leave = false;
                for attr in self.store.iter_mut() {
                    let reg_in = attr.registrar.is_in();
                    applicant_fsm(&mut attr.applicant, MrpEvent::TxLeaveAll, reg_in, p2p)?;
                    arm_leave |= registrar_fsm(&mut attr.registrar, MrpEvent::TxLeaveAll)?;
                }
                if arm_leave {
                    self.ctx.leave_timer_start(&mut self.port);
                }

                self.ctx
                    .leave_all_event(MrpEvent::LeaveAllTimer, &mut self.port);

                self.send_empty_leave_all = true;
                self.ctx.leave_all_event(MrpEvent::Tx, &mut self.port);
                if let Err(e) = self.txpdu() {
                    log::warn!("MSRP: LeaveAll transmit failed: {}", e);
                }
                self.send_empty_leave_all = false;
            }
            MrpEvent::RemoteLeaveAll => {
                self.ctx.join_timer_start(&mut self.port);

                let mut arm_leave = false;
                for attr in self.store.iter_mut() {
                    let reg_in = attr.registrar.is_in();
                    applicant_fsm(&mut attr.applicant, MrpEvent::RemoteLeaveAll, reg_in, p2p)?;
                    arm_leave |= registrar_fsm(&mut attr.registrar, MrpEvent::RemoteLeaveAll)?;
                }
                if arm_leave {
                    self.ctx.leave_timer_start(&mut self.port);
                }

                self.ctx
                    .leave_all_event(MrpEvent::RemoteLeaveAll, &mut self.port);
            }
            MrpEvent::Tx => {
                self.ctx.join_timer_stop(&mut self.port);

                let mut retransmit = 0;
                for attr in self.store.iter_mut() {
                    let reg_in = attr.registrar.is_in();
                    applicant_fsm(&mut attr.applicant, MrpEvent::Tx, reg_in, p2p)?;
                    if transition_implies_tx(&attr.applicant) {
                        retransmit += 1;
                    }
                }

                // Consume any LeaveAll left pending from a failed earlier pass.
                self.ctx.leave_all_event(MrpEvent::Tx, &mut self.port);

                if let Err(e) = self.txpdu() {
                    log::warn!("MSRP: transmit failed: {}", e);
                }

                if retransmit > 0 {
                    self.ctx.join_timer_start(&mut self.port);
                }
            }
            MrpEvent::LeaveTimer => {
                self.ctx.leave_timer_stop(&mut self.port);
                for attr in self.store.iter_mut() {
                    registrar_fsm(&mut attr.registrar, MrpEvent::LeaveTimer)?;
                }
                self.flush_notifications();
                self.reclaim();
                return Ok(());
            }
            MrpEvent::Periodic => {
                if !self.store.is_empty() {
                    self.ctx.join_timer_start(&mut self.port);
                }
                for attr in self.store.iter_mut() {
                    let reg_in = attr.registrar.is_in();
                    applicant_fsm(&mut attr.applicant, MrpEvent::Periodic, reg_in, p2p)?;
                }
            }
            MrpEvent::New
            | MrpEvent::Join
            | MrpEvent::Leave
            | MrpEvent::RemoteNew
            | MrpEvent::RemoteJoinIn
            | MrpEvent::RemoteJoinMt
            | MrpEvent::RemoteIn
            | MrpEvent::RemoteMt
            | MrpEvent::RemoteLeave => {
                self.ctx.join_timer_start(&mut self.port);
                let decl = declaration.ok_or_else(|| MrpError::InternalFault {
                    reason: "declaration event without a candidate".into(),
                })?;
                self.declaration_event(event, decl)?;
            }
            _ => {}
        }

        self.flush_notifications();
        Ok(())
    }

    fn declaration_event(&mut self, event: MrpEvent, decl: MsrpDeclaration) -> MrpResult<()> {
        let p2p = self.ctx.config.point_to_point_mac;
        let remote = is_remote(event);

        // Listener substate changes away from AskFailed are only accepted
        // once the talker is known; resolve that before borrowing a record.
        let talker_known = match &decl.value {
            MsrpValue::Listener(l) => self
                .store
                .contains(&MsrpValue::Talker(TalkerDeclaration::probe(l.stream_id))),
            _ => false,
        };

        let index = match self.store.find_index(&decl.value) {
            Some(i) => {
                if let Some(attr) = self.store.get_mut(i) {
                    merge(
                        attr,
                        &decl,
                        remote,
                        self.ctx.config.mirror_neighbor_priority,
                        talker_known,
                    );
                }
                i
            }
            None => {
                let mut attr = Attribute::new(decl.value);
                attr.registrar.source = decl.source;
                self.store.insert(attr)
            }
        };

        let attr = self
            .store
            .get_mut(index)
            .ok_or_else(|| MrpError::InternalFault {
                reason: "resolved record vanished".into(),
            })?;

        let reg_in = attr.registrar.is_in();
        applicant_fsm(&mut attr.applicant, event, reg_in, p2p)?;

        // Remap local intent into registrar events.
        let arm_leave = match event {
            MrpEvent::New => {
                registrar_fsm(&mut attr.registrar, MrpEvent::Begin)?;
                attr.registrar.notify = NotifyKind::New;
                false
            }
            MrpEvent::Join => {
                let mapped = if attr.registrar.is_in() {
                    MrpEvent::RemoteJoinIn
                } else {
                    MrpEvent::RemoteJoinMt
                };
                registrar_fsm(&mut attr.registrar, mapped)?
            }
            MrpEvent::Leave => registrar_fsm(&mut attr.registrar, MrpEvent::RemoteLeave)?,
            other => registrar_fsm(&mut attr.registrar, other)?,
        };
        if arm_leave {
            self.ctx.leave_timer_start(&mut self.port);
        }
        Ok(())
    }

    fn flush_notifications(&mut self) {
        let mut outbox = Vec::new();
        for attr in self.store.iter_mut() {
            if attr.registrar.notify != NotifyKind::None {
                if let Some(line) = notification_line(attr, attr.registrar.notify) {
                    outbox.push(line);
                }
                attr.registrar.notify = NotifyKind::None;
            }
        }
        for line in &outbox {
            for client in self.ctx.clients().to_vec() {
                self.port.send_ctl(&client, line);
            }
        }
    }

    /// Garbage-collect idle records, reporting each as a Leave first.
    pub fn reclaim(&mut self) {
        let mut leaving = Vec::new();
        self.store.reclaim(|attr| leaving.push(attr.clone()));
        for attr in &leaving {
            if let Some(line) = notification_line(attr, NotifyKind::Leave) {
                for client in self.ctx.clients().to_vec() {
                    self.port.send_ctl(&client, &line);
                }
            }
        }
    }

    /// Drop all records without leave notifications (daemon restart path).
    pub fn reset(&mut self) {
        self.store.clear();
    }

    pub fn bye(&mut self, client: &ClientId) {
        self.ctx.client_delete(client);
    }

    // ==================================================================
    // Control channel
    // ==================================================================

    pub fn recv_cmd(&mut self, line: &str, client: ClientId) {
        self.ctx.client_add(client);
        let (verb, fields) = cmd::split_verb(line);

        let parsed = match verb {
            "S??" => {
                self.dump_table(&client);
                return;
            }
            "S++" => talker_from_fields(fields).map(|t| (MrpEvent::New, MsrpValue::Talker(t))),
            "S+?" => talker_from_fields(fields).map(|t| (MrpEvent::Join, MsrpValue::Talker(t))),
            "S--" => cmd::field(fields, "S")
                .and_then(StreamId::parse_hex)
                .map(|s| {
                    (
                        MrpEvent::Leave,
                        MsrpValue::Talker(TalkerDeclaration::probe(s)),
                    )
                }),
            "S+L" => listener_from_fields(fields).map(|l| (MrpEvent::Join, MsrpValue::Listener(l))),
            "S-L" => cmd::field(fields, "L")
                .and_then(StreamId::parse_hex)
                .map(|s| {
                    (
                        MrpEvent::Leave,
                        MsrpValue::Listener(ListenerDeclaration {
                            stream_id: s,
                            substate: ListenerSubstate::Ignore,
                        }),
                    )
                }),
            "S+D" => domain_from_fields(fields).map(|d| (MrpEvent::Join, MsrpValue::Domain(d))),
            "S-D" => domain_from_fields(fields).map(|d| (MrpEvent::Leave, MsrpValue::Domain(d))),
            _ => {
                self.port
                    .send_ctl(&client, &format!("ERC MSRP {}\n", line.trim_end()));
                return;
            }
        };

        let Some((event, value)) = parsed else {
            self.port
                .send_ctl(&client, &format!("ERP MSRP {}\n", line.trim_end()));
            return;
        };

        if let Err(e) = self.event(event, Some(MsrpDeclaration::local(value))) {
            log::debug!("MSRP: command failed: {}", e);
            self.port
                .send_ctl(&client, &format!("ERI MSRP {}\n", line.trim_end()));
        }
    }

    /// Render the whole table for a `S??` query.
    pub fn dump_table(&mut self, client: &ClientId) {
        let mut out = String::new();
        if self.store.is_empty() {
            out.push_str("MSRP:Empty\n");
        }
        for attr in self.store.iter() {
            out.push_str(&format!(
                "{} R={} {}/{}\n",
                variant_text(&attr.value),
                attr.registrar.source,
                attr.applicant.state.code(),
                attr.registrar.state.code(),
            ));
        }
        self.port.send_ctl(client, &out);
    }

    // ==================================================================
    // PDU decode
    // ==================================================================

    /// Decode one received frame. A malformed message region is skipped
    /// using its AttributeListLength when that length is trustworthy;
    /// otherwise the rest of the PDU is dropped. Either way the error is
    /// reported, never fatal.
    pub fn decode_pdu(&mut self, frame: &[u8]) -> MrpResult<()> {
        let mut cur = Cursor::new(frame);

        let _dest = read_mac(&mut cur)?;
        let src = read_mac(&mut cur)?;
        if cur.read_u16_be()? != MSRP_ETYPE {
            return Err(MrpError::MalformedPdu {
                reason: "not an MSRP EtherType".into(),
            });
        }
        let _version = cur.read_u8()?;

        let mut endmarks = 0;
        while cur.remaining() >= ENDMARK_SIZE {
            if cur.peek_u16_be()? == ENDMARK {
                cur.skip(ENDMARK_SIZE)?;
                endmarks += 1;
                if endmarks >= 2 {
                    break;
                }
                continue;
            }
            endmarks = 0;

            let attr_type = cur.read_u8()?;
            let attr_len = cur.read_u8()? as usize;
            let list_len = cur.read_u16_be()? as usize;
            if list_len < ENDMARK_SIZE || list_len > cur.remaining() {
                return Err(MrpError::MalformedPdu {
                    reason: "AttributeListLength inconsistent with PDU".into(),
                });
            }
            let region_end = cur.offset() + list_len;

            let expected_len = match attr_type {
                TALKER_ADV_TYPE => TALKER_ADV_ATTR_LEN,
                TALKER_FAILED_TYPE => TALKER_FAILED_ATTR_LEN,
                LISTENER_TYPE => LISTENER_ATTR_LEN,
                DOMAIN_TYPE => DOMAIN_ATTR_LEN,
                other => {
                    // Unrecognized type: drop just this message.
                    log::warn!("MSRP: unrecognized attribute type {}", other);
                    cur.skip(list_len)?;
                    continue;
                }
            };
            if attr_len != expected_len {
                log::warn!(
                    "MSRP: bad AttributeLength {} for type {}",
                    attr_len,
                    attr_type
                );
                cur.skip(list_len)?;
                continue;
            }

            let result = match attr_type {
                TALKER_ADV_TYPE => self.decode_talker_vectors(&mut cur, src, region_end, false),
                TALKER_FAILED_TYPE => self.decode_talker_vectors(&mut cur, src, region_end, true),
                LISTENER_TYPE => self.decode_listener_vectors(&mut cur, src, region_end),
                DOMAIN_TYPE => self.decode_domain_vectors(&mut cur, src, region_end),
                _ => unreachable!(),
            };
            if let Err(e) = result {
                // The list length bounds the damage: resume at the next
                // message.
                log::warn!("MSRP: dropping malformed message: {}", e);
                if cur.offset() > region_end {
                    return Err(MrpError::MalformedPdu {
                        reason: "message overran its AttributeListLength".into(),
                    });
                }
                cur.skip(region_end - cur.offset())?;
            }
            // A cleanly parsed message stops at its end-mark; the outer loop
            // consumes it.
        }
        Ok(())
    }

    fn vector_preamble(
        &mut self,
        cur: &mut Cursor<'_>,
        region_end: usize,
        saw_leave_all: &mut bool,
    ) -> MrpResult<Option<VectorHeader>> {
        if cur.offset() + ENDMARK_SIZE > region_end {
            return Err(MrpError::MalformedPdu {
                reason: "vector list without end-mark".into(),
            });
        }
        if cur.peek_u16_be()? == ENDMARK {
            return Ok(None);
        }
        let header = VectorHeader::decode(cur.read_u16_be()?);
        if header.leave_all && !*saw_leave_all {
            *saw_leave_all = true;
            // One peer LeaveAll per message; it sweeps the whole database.
            self.event(MrpEvent::RemoteLeaveAll, None)?;
        }
        Ok(Some(header))
    }

    fn check_region(
        cur: &Cursor<'_>,
        region_end: usize,
        first_value_len: usize,
        num_values: u16,
        four_packed: bool,
    ) -> MrpResult<()> {
        let n = num_values as usize;
        let mut need = first_value_len + three_packed_len(n);
        if four_packed {
            need += four_packed_len(n);
        }
        if cur.offset() + need > region_end {
            return Err(MrpError::MalformedPdu {
                reason: "vector runs past AttributeListLength".into(),
            });
        }
        check_vector_fits(cur, first_value_len, num_values, four_packed)?;
        Ok(())
    }

    fn decode_talker_vectors(
        &mut self,
        cur: &mut Cursor<'_>,
        src: MacAddr,
        region_end: usize,
        failed: bool,
    ) -> MrpResult<()> {
        let attr_len = if failed {
            TALKER_FAILED_ATTR_LEN
        } else {
            TALKER_ADV_ATTR_LEN
        };
        let mut saw_leave_all = false;
        while let Some(header) = self.vector_preamble(cur, region_end, &mut saw_leave_all)? {
            if header.num_values == 0 {
                // Null vectors happen; some switches generate them.
                cur.skip(attr_len)?;
                continue;
            }
            Self::check_region(cur, region_end, attr_len, header.num_values, false)?;

            let mut talker = read_talker_first_value(cur, failed)?;
            let events = read_three_packed(cur, header.num_values)?;
            for event in events {
                if let Some(event) = event {
                    self.event(
                        remote_event(event),
                        Some(MsrpDeclaration::remote(
                            MsrpValue::Talker(talker.clone()),
                            src,
                        )),
                    )?;
                }
                talker.stream_id.increment();
                talker.dest_addr.increment();
            }
        }
        Ok(())
    }

    fn decode_listener_vectors(
        &mut self,
        cur: &mut Cursor<'_>,
        src: MacAddr,
        region_end: usize,
    ) -> MrpResult<()> {
        let mut saw_leave_all = false;
        while let Some(header) = self.vector_preamble(cur, region_end, &mut saw_leave_all)? {
            if header.num_values == 0 {
                cur.skip(LISTENER_ATTR_LEN)?;
                continue;
            }
            Self::check_region(cur, region_end, LISTENER_ATTR_LEN, header.num_values, true)?;

            let mut stream = read_stream_id(cur)?;
            let events = read_three_packed(cur, header.num_values)?;
            let substates = read_four_packed(cur, header.num_values)?;
            for (event, code) in events.into_iter().zip(substates) {
                let substate =
                    ListenerSubstate::from_code(code).unwrap_or(ListenerSubstate::Ignore);
                // Ignore means "no declaration for this stream".
                if substate != ListenerSubstate::Ignore {
                    if let Some(event) = event {
                        self.event(
                            remote_event(event),
                            Some(MsrpDeclaration::remote(
                                MsrpValue::Listener(ListenerDeclaration {
                                    stream_id: stream,
                                    substate,
                                }),
                                src,
                            )),
                        )?;
                    }
                }
                stream.increment();
            }
        }
        Ok(())
    }

    fn decode_domain_vectors(
        &mut self,
        cur: &mut Cursor<'_>,
        src: MacAddr,
        region_end: usize,
    ) -> MrpResult<()> {
        let mut saw_leave_all = false;
        while let Some(header) = self.vector_preamble(cur, region_end, &mut saw_leave_all)? {
            if header.num_values == 0 {
                cur.skip(DOMAIN_ATTR_LEN)?;
                continue;
            }
            Self::check_region(cur, region_end, DOMAIN_ATTR_LEN, header.num_values, false)?;

            let mut class_id = cur.read_u8()?;
            let mut class_priority = cur.read_u8()?;
            let class_vid = cur.read_u16_be()?;
            let events = read_three_packed(cur, header.num_values)?;
            for event in events {
                if let Some(event) = event {
                    self.event(
                        remote_event(event),
                        Some(MsrpDeclaration::remote(
                            MsrpValue::Domain(SrClassDomain {
                                class_id,
                                class_priority,
                                neighbor_priority: class_priority,
                                class_vid,
                            }),
                            src,
                        )),
                    )?;
                }
                class_id = class_id.wrapping_add(1);
                class_priority = class_priority.wrapping_add(1);
            }
        }
        Ok(())
    }

    // ==================================================================
    // PDU assembly
    // ==================================================================

    /// Assemble and transmit one PDU, one message per attribute type with
    /// pending declarations.
    pub fn txpdu(&mut self) -> MrpResult<()> {
        let mut frame = vec![0u8; MAX_FRAME_SIZE];
        let written;
        {
            let mut cur = CursorMut::new(&mut frame);
            cur.write_bytes(MSRP_ADDR.as_bytes())
                .map_err(encode_failed)?;
            cur.write_bytes(self.station.as_bytes())
                .map_err(encode_failed)?;
            cur.write_u16_be(MSRP_ETYPE).map_err(encode_failed)?;
            cur.write_u8(MSRP_PROT_VER).map_err(encode_failed)?;

            let leave_all = self.ctx.leave_all.tx;
            self.ctx.leave_all.tx = false;

            let body_start = cur.offset();
            for kind in [
                MsrpKind::TalkerAdvertise,
                MsrpKind::TalkerFailed,
                MsrpKind::Listener,
                MsrpKind::Domain,
            ] {
                let capacity = cur.remaining().saturating_sub(ENDMARK_SIZE);
                let message = self.emit_vectors(kind, leave_all, capacity)?;
                cur.write_bytes(&message).map_err(encode_failed)?;
            }

            if cur.offset() == body_start {
                return Ok(()); // nothing to send
            }
            cur.write_u16_be(ENDMARK).map_err(encode_failed)?;
            written = cur.offset();
        }
        frame.truncate(written);
        log::debug!("MSRP: send PDU ({} bytes)", written);
        self.port.send_pdu(&frame)
    }

    /// Build one attribute-type message, AttributeListLength included.
    fn emit_vectors(
        &mut self,
        kind: MsrpKind,
        leave_all: bool,
        capacity: usize,
    ) -> MrpResult<Vec<u8>> {
        let attr_len = kind.attr_len();
        let four_packed = kind == MsrpKind::Listener;
        let min_vector = 2 + attr_len + 1 + usize::from(four_packed);
        // Header + list length + one vector + end-mark.
        if capacity < 2 + 2 + min_vector + ENDMARK_SIZE {
            return Err(MrpError::EncodeFailed {
                reason: "no room for a single vector".into(),
            });
        }

        let mut buf = vec![0u8; capacity];
        let written;
        {
            let mut cur = CursorMut::new(&mut buf);
            cur.write_u8(kind.wire_type()).map_err(encode_failed)?;
            cur.write_u8(attr_len as u8).map_err(encode_failed)?;
            let list_len_at = cur.offset();
            cur.write_u16_be(0).map_err(encode_failed)?; // backfilled below

            let mut wrote_vector = false;
            let mut lva_pending = leave_all;
            let mut i = 0;
            while i < self.store.len() {
                if cur.remaining() < min_vector + ENDMARK_SIZE {
                    break;
                }

                let (first, ev0) = {
                    let attr = match self.store.get_mut(i) {
                        Some(a) => a,
                        None => break,
                    };
                    if !kind.matches(&attr.value) || !attr.applicant.tx {
                        i += 1;
                        continue;
                    }
                    attr.applicant.tx = false;
                    if attr.applicant.encode == EncodeHint::Optional {
                        i += 1;
                        continue;
                    }
                    let ev = wire_send_event(attr.applicant.sndmsg, attr.registrar.is_in())
                        .ok_or_else(|| MrpError::EncodeFailed {
                            reason: "pending transmit without an encodable event".into(),
                        })?;
                    (attr.value.clone(), ev)
                };

                let mut events = vec![ev0];
                let mut substates = vec![listener_substate(&first)];
                let mut last = first.clone();
                let mut j = i + 1;
                while let Some(next) = self.store.get(j) {
                    if !kind.matches(&next.value) || !next.applicant.tx {
                        break;
                    }
                    if !next.value.follows(&last) {
                        break;
                    }
                    let grown = events.len() + 1;
                    let mut need = 2 + attr_len + three_packed_len(grown) + ENDMARK_SIZE;
                    if four_packed {
                        need += four_packed_len(grown);
                    }
                    if need > cur.remaining() {
                        break;
                    }
                    let ev = wire_send_event(next.applicant.sndmsg, next.registrar.is_in())
                        .ok_or_else(|| MrpError::EncodeFailed {
                            reason: "pending transmit without an encodable event".into(),
                        })?;
                    last = next.value.clone();
                    substates.push(listener_substate(&next.value));
                    events.push(ev);
                    if let Some(next) = self.store.get_mut(j) {
                        next.applicant.tx = false;
                    }
                    j += 1;
                }

                let header = VectorHeader::new(lva_pending, events.len() as u16);
                lva_pending = false;
                cur.write_u16_be(header.encode()).map_err(encode_failed)?;
                write_first_value(&mut cur, &first).map_err(encode_failed)?;
                write_three_packed(&mut cur, &events).map_err(encode_failed)?;
                if four_packed {
                    write_four_packed(&mut cur, &substates).map_err(encode_failed)?;
                }
                wrote_vector = true;
                i = j;
            }

            if !wrote_vector {
                // The talker partition's LeaveAll rides on the advertise
                // message; an empty failed message would double it up.
                if self.send_empty_leave_all && kind != MsrpKind::TalkerFailed {
                    cur.write_u16_be(VectorHeader::new(true, 0).encode())
                        .map_err(encode_failed)?;
                    cur.write_bytes(&[0u8; TALKER_FAILED_ATTR_LEN][..attr_len])
                        .map_err(encode_failed)?;
                } else {
                    return Ok(Vec::new());
                }
            }

            cur.write_u16_be(ENDMARK).map_err(encode_failed)?;
            let list_len = cur.offset() - (list_len_at + 2);
            cur.patch_u16_be(list_len_at, list_len as u16)
                .map_err(encode_failed)?;
            written = cur.offset();
        }
        buf.truncate(written);
        Ok(buf)
    }
}

// ======================================================================
// Merge semantics
// ======================================================================

/// Fold an incoming duplicate declaration into its existing record.
///
/// The last-heard source MAC always updates. Talkers absorb the peer's
/// failure/latency report and flip advertise<->failed, forcing a
/// re-notification when the type changed. Listener substate changes into
/// Ready/ReadyFailed from a peer are accepted only when the talker is
/// already known ("can't report Ready without a known Talker"). Domain
/// declarations from a peer update the neighbor priority and VID; the local
/// priority follows only when configured to mirror.
fn merge(
    attr: &mut Attribute<MsrpValue>,
    decl: &MsrpDeclaration,
    remote: bool,
    mirror_priority: bool,
    talker_known: bool,
) {
    attr.registrar.source = decl.source;

    match (&mut attr.value, &decl.value) {
        (MsrpValue::Talker(current), MsrpValue::Talker(incoming)) => {
            // Fault and latency reports come from bridges on the wire; local
            // commands carry none and must not clear one.
            if remote {
                current.accumulated_latency = incoming.accumulated_latency;
                let flipped = current.failure.is_some() != incoming.failure.is_some();
                current.failure = incoming.failure.clone();
                if flipped {
                    attr.registrar.force_renotify();
                }
            }
        }
        (MsrpValue::Listener(current), MsrpValue::Listener(incoming)) => {
            if current.substate != incoming.substate {
                let gated = remote
                    && matches!(
                        incoming.substate,
                        ListenerSubstate::Ready | ListenerSubstate::ReadyFailed
                    )
                    && !talker_known;
                if !gated {
                    current.substate = incoming.substate;
                    attr.registrar.force_renotify();
                }
            }
        }
        (MsrpValue::Domain(current), MsrpValue::Domain(incoming)) => {
            if remote {
                current.neighbor_priority = incoming.class_priority;
                current.class_vid = incoming.class_vid;
                if mirror_priority {
                    current.class_priority = incoming.class_priority;
                }
            }
        }
        _ => {}
    }
}

// ======================================================================
// FirstValue codecs
// ======================================================================

fn read_mac(cur: &mut Cursor<'_>) -> SerResult<MacAddr> {
    MacAddr::from_slice(cur.read_bytes(MacAddr::LEN)?).ok_or_else(|| SerError::InvalidData {
        reason: "short MAC address".into(),
    })
}

fn read_stream_id(cur: &mut Cursor<'_>) -> SerResult<StreamId> {
    StreamId::from_slice(cur.read_bytes(StreamId::LEN)?).ok_or_else(|| SerError::InvalidData {
        reason: "short stream ID".into(),
    })
}

fn read_bridge_id(cur: &mut Cursor<'_>) -> SerResult<BridgeId> {
    BridgeId::from_slice(cur.read_bytes(BridgeId::LEN)?).ok_or_else(|| SerError::InvalidData {
        reason: "short bridge ID".into(),
    })
}

fn read_talker_first_value(cur: &mut Cursor<'_>, failed: bool) -> SerResult<TalkerDeclaration> {
    let stream_id = read_stream_id(cur)?;
    let dest_addr = read_mac(cur)?;
    let vlan_id = cur.read_u16_be()?;
    let max_frame_size = cur.read_u16_be()?;
    let max_interval_frames = cur.read_u16_be()?;
    let priority_and_rank = cur.read_u8()?;
    let accumulated_latency = cur.read_u32_be()?;
    let failure = if failed {
        let bridge_id = read_bridge_id(cur)?;
        let failure_code = cur.read_u8()?;
        Some(TalkerFailure {
            bridge_id,
            failure_code,
        })
    } else {
        None
    };
    Ok(TalkerDeclaration {
        stream_id,
        dest_addr,
        vlan_id,
        max_frame_size,
        max_interval_frames,
        priority_and_rank,
        accumulated_latency,
        failure,
    })
}

fn write_first_value(cur: &mut CursorMut<'_>, value: &MsrpValue) -> SerResult<()> {
    match value {
        MsrpValue::Talker(t) => {
            cur.write_bytes(t.stream_id.as_bytes())?;
            cur.write_bytes(t.dest_addr.as_bytes())?;
            cur.write_u16_be(t.vlan_id)?;
            cur.write_u16_be(t.max_frame_size)?;
            cur.write_u16_be(t.max_interval_frames)?;
            cur.write_u8(t.priority_and_rank)?;
            cur.write_u32_be(t.accumulated_latency)?;
            if let Some(failure) = &t.failure {
                cur.write_bytes(failure.bridge_id.as_bytes())?;
                cur.write_u8(failure.failure_code)?;
            }
            Ok(())
        }
        MsrpValue::Listener(l) => cur.write_bytes(l.stream_id.as_bytes()),
        MsrpValue::Domain(d) => {
            cur.write_u8(d.class_id)?;
            cur.write_u8(d.class_priority)?;
            cur.write_u16_be(d.class_vid)
        }
    }
}

fn listener_substate(value: &MsrpValue) -> u8 {
    match value {
        MsrpValue::Listener(l) => l.substate.code(),
        _ => 0,
    }
}

// ======================================================================
// Control-channel rendering and parsing
// ======================================================================

fn variant_text(value: &MsrpValue) -> String {
    match value {
        MsrpValue::Talker(t) => {
            let mut text = format!(
                "T:S={},A={},V={:04x},Z={},I={},P={},L={}",
                t.stream_id,
                t.dest_addr,
                t.vlan_id,
                t.max_frame_size,
                t.max_interval_frames,
                t.priority_and_rank,
                t.accumulated_latency,
            );
            if let Some(failure) = &t.failure {
                text.push_str(&format!(
                    ",B={},C={}",
                    failure.bridge_id, failure.failure_code
                ));
            }
            text
        }
        MsrpValue::Listener(l) => format!("L:D={},S={}", l.substate.code(), l.stream_id),
        MsrpValue::Domain(d) => format!(
            "D:C={},P={},V={:04x},N={}",
            d.class_id, d.class_priority, d.class_vid, d.neighbor_priority
        ),
    }
}

fn notification_line(attr: &Attribute<MsrpValue>, kind: NotifyKind) -> Option<String> {
    let prefix = match kind {
        NotifyKind::New => "SNE",
        NotifyKind::Join => "SJO",
        NotifyKind::Leave => "SLE",
        NotifyKind::None => return None,
    };
    Some(format!(
        "{} {} R={} {}/{}\n",
        prefix,
        variant_text(&attr.value),
        attr.registrar.source,
        attr.applicant.state.code(),
        attr.registrar.state.code(),
    ))
}

fn talker_from_fields(fields: &str) -> Option<TalkerDeclaration> {
    Some(TalkerDeclaration {
        stream_id: cmd::field(fields, "S").and_then(StreamId::parse_hex)?,
        dest_addr: cmd::field(fields, "A").and_then(MacAddr::parse_hex)?,
        vlan_id: cmd::field_hex(fields, "V")? as u16,
        max_frame_size: cmd::field_dec(fields, "Z")?,
        max_interval_frames: cmd::field_dec(fields, "I")?,
        priority_and_rank: cmd::field_dec(fields, "P")?,
        accumulated_latency: cmd::field_dec(fields, "L")?,
        failure: None,
    })
}

fn listener_from_fields(fields: &str) -> Option<ListenerDeclaration> {
    Some(ListenerDeclaration {
        stream_id: cmd::field(fields, "L").and_then(StreamId::parse_hex)?,
        substate: ListenerSubstate::from_code(cmd::field_dec(fields, "D")?)?,
    })
}

fn domain_from_fields(fields: &str) -> Option<SrClassDomain> {
    Some(SrClassDomain {
        class_id: cmd::field_dec(fields, "C")?,
        class_priority: cmd::field_dec(fields, "P")?,
        neighbor_priority: 0,
        class_vid: cmd::field_hex(fields, "V")? as u16,
    })
}

fn encode_failed(e: SerError) -> MrpError {
    MrpError::EncodeFailed {
        reason: e.to_string(),
    }
}
