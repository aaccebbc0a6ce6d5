// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MMRP: MAC address and service-requirement registration (802.1Q-2011
//! clause 10.9).
//!
//! Two attribute types: a 6-byte MAC-vector and a 1-byte service
//! requirement. Both encode with ThreePackedEvents only; MMRP messages carry
//! no AttributeListLength.

use crate::cmd;
use crate::config::{MrpConfig, MAX_FRAME_SIZE};
use crate::context::MrpContext;
use crate::core::ser::{Cursor, CursorMut, SerError, SerResult};
use crate::core::types::MacAddr;
use crate::error::{MrpError, MrpResult};
use crate::fsm::{
    applicant_fsm, registrar_fsm, remote_event, transition_implies_tx, wire_send_event,
    EncodeHint, MrpEvent, NotifyKind, RegistrarState,
};
use crate::port::{ClientId, MrpPort};
use crate::protocol::{
    read_three_packed, three_packed_len, write_three_packed, VectorHeader, ENDMARK, ENDMARK_SIZE,
    PROTOCOL_VERSION,
};
use crate::store::{Attribute, AttributeStore, AttributeValue};
use std::cmp::Ordering;

pub const MMRP_ETYPE: u16 = 0x88F6;
pub const MMRP_PROT_VER: u8 = PROTOCOL_VERSION;

/// MMRP group destination address.
pub const MMRP_ADDR: MacAddr = MacAddr::from_bytes([0x01, 0x80, 0xC2, 0x00, 0x00, 0x20]);

/// Wire attribute types.
pub const SVCREQ_TYPE: u8 = 1;
pub const MACVEC_TYPE: u8 = 2;

/// Service requirement values; anything above is peer junk and discarded.
pub const SVCREQ_FORWARD_ALL: u8 = 0;
pub const SVCREQ_FORWARD_UNREGISTERED: u8 = 1;

const SVCREQ_ATTR_LEN: usize = 1;
const MACVEC_ATTR_LEN: usize = 6;

/// One MMRP attribute value.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum MmrpValue {
    ServiceRequirement(u8),
    MacVector(MacAddr),
}

impl MmrpValue {
    pub fn wire_type(&self) -> u8 {
        match self {
            MmrpValue::ServiceRequirement(_) => SVCREQ_TYPE,
            MmrpValue::MacVector(_) => MACVEC_TYPE,
        }
    }
}

impl AttributeValue for MmrpValue {
    fn class(&self) -> u8 {
        self.wire_type()
    }

    fn key_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (MmrpValue::ServiceRequirement(a), MmrpValue::ServiceRequirement(b)) => a.cmp(b),
            (MmrpValue::MacVector(a), MmrpValue::MacVector(b)) => a.cmp(b),
            // Only called within one partition.
            _ => Ordering::Equal,
        }
    }

    fn follows(&self, prev: &Self) -> bool {
        match (self, prev) {
            (MmrpValue::ServiceRequirement(a), MmrpValue::ServiceRequirement(b)) => {
                *a == b.wrapping_add(1)
            }
            (MmrpValue::MacVector(a), MmrpValue::MacVector(b)) => a.follows(b),
            _ => false,
        }
    }
}

/// A declaration delivered to the dispatcher: the value plus the MAC it was
/// last heard from (zero for local commands).
#[derive(Debug, Clone)]
pub struct MmrpDeclaration {
    pub value: MmrpValue,
    pub source: MacAddr,
}

impl MmrpDeclaration {
    pub fn local(value: MmrpValue) -> Self {
        Self {
            value,
            source: MacAddr::zero(),
        }
    }

    pub fn remote(value: MmrpValue, source: MacAddr) -> Self {
        Self { value, source }
    }
}

/// Which MMRP message a PDU assembly pass is building.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum MmrpKind {
    MacVector,
    ServiceRequirement,
}

impl MmrpKind {
    fn wire_type(self) -> u8 {
        match self {
            MmrpKind::MacVector => MACVEC_TYPE,
            MmrpKind::ServiceRequirement => SVCREQ_TYPE,
        }
    }

    fn attr_len(self) -> usize {
        match self {
            MmrpKind::MacVector => MACVEC_ATTR_LEN,
            MmrpKind::ServiceRequirement => SVCREQ_ATTR_LEN,
        }
    }

    fn matches(self, value: &MmrpValue) -> bool {
        value.wire_type() == self.wire_type()
    }
}

/// One MMRP protocol instance: the attribute database, its timers and
/// clients, and the I/O port it talks through.
pub struct Mmrp<P: MrpPort> {
    store: AttributeStore<MmrpValue>,
    ctx: MrpContext,
    port: P,
    station: MacAddr,
    send_empty_leave_all: bool,
}

impl<P: MrpPort> Mmrp<P> {
    pub fn new(config: MrpConfig, station: MacAddr, port: P) -> Self {
        let mut mmrp = Self {
            store: AttributeStore::new(),
            ctx: MrpContext::new(config),
            port,
            station,
            send_empty_leave_all: false,
        };
        mmrp.ctx.leave_all_event(MrpEvent::Begin, &mut mmrp.port);
        mmrp
    }

    pub fn store(&self) -> &AttributeStore<MmrpValue> {
        &self.store
    }

    /// Management access to the database (dumps, diagnostics, tests).
    pub fn store_mut(&mut self) -> &mut AttributeStore<MmrpValue> {
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

    /// Process one event against the database.
    ///
    /// Declaration events (`New`/`Join`/`Leave`/`Remote*`) must carry a
    /// candidate; the candidate is merged into an existing record or
    /// inserted. After every event the whole database is scanned for
    /// pending registrar notifications.
    pub fn event(&mut self, event: MrpEvent, declaration: Option<MmrpDeclaration>) -> MrpResult<()> {
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

                // Force one LeaveAll transmission even with an empty database
                // so peers observe the LeaveAll.
                self.send_empty_leave_all = true;
                self.ctx.leave_all_event(MrpEvent::Tx, &mut self.port);
                if let Err(e) = self.txpdu() {
                    log::warn!("MMRP: LeaveAll transmit failed: {}", e);
                }
                self.send_empty_leave_all = false;
            }
            MrpEvent::RemoteLeaveAll => {
                self.ctx.join_timer_start(&mut self.port);
                let decl = declaration.ok_or_else(|| MrpError::InternalFault {
                    reason: "peer LeaveAll without a candidate".into(),
                })?;

                // A peer LeaveAll covers one attribute type.
                let class = decl.value.class();
                let mut arm_leave = false;
                for attr in self.store.iter_mut() {
                    if attr.value.class() != class {
                        continue;
                    }
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

                if let Err(e) = self.txpdu() {
                    log::warn!("MMRP: transmit failed: {}", e);
                }

                // Certain transitions imply we need another tx opportunity.
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

    fn declaration_event(&mut self, event: MrpEvent, decl: MmrpDeclaration) -> MrpResult<()> {
        let p2p = self.ctx.config.point_to_point_mac;

        let index = match self.store.find_index(&decl.value) {
            Some(i) => {
                // Merge: the last-heard source is diagnostic state.
                if let Some(attr) = self.store.get_mut(i) {
                    attr.registrar.source = decl.source;
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

    /// Emit and clear every pending registrar notification.
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

    /// Garbage-collect records whose applicant and registrar are both idle,
    /// reporting each as a Leave to the clients first.
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

    /// Handle one control command. The sender is registered for
    /// notifications; malformed commands are answered with `ERC`/`ERP`/`ERI`.
    pub fn recv_cmd(&mut self, line: &str, client: ClientId) {
        self.ctx.client_add(client);
        let (verb, fields) = cmd::split_verb(line);

        let event = match verb {
            "M??" => {
                self.dump_table(&client);
                return;
            }
            "M++" => MrpEvent::New,
            "M+?" => MrpEvent::Join,
            "M--" => MrpEvent::Leave,
            _ => {
                self.port
                    .send_ctl(&client, &format!("ERC MMRP {}\n", line.trim_end()));
                return;
            }
        };

        let value = if let Some(service) = cmd::field_dec::<u8>(fields, "S") {
            MmrpValue::ServiceRequirement(service)
        } else if let Some(mac) = cmd::field(fields, "M").and_then(MacAddr::parse_hex) {
            MmrpValue::MacVector(mac)
        } else {
            self.port
                .send_ctl(&client, &format!("ERP MMRP {}\n", line.trim_end()));
            return;
        };

        if let Err(e) = self.event(event, Some(MmrpDeclaration::local(value))) {
            log::debug!("MMRP: command failed: {}", e);
            self.port
                .send_ctl(&client, &format!("ERI MMRP {}\n", line.trim_end()));
        }
    }

    /// Render the whole table for a `M??` query.
    pub fn dump_table(&mut self, client: &ClientId) {
        let mut out = String::new();
        if self.store.is_empty() {
            out.push_str("MMRP:Empty\n");
        }
        for attr in self.store.iter() {
            let stage = match attr.registrar.state {
                RegistrarState::In => "MIN",
                RegistrarState::Lv => "MLV",
                RegistrarState::Mt => "MMT",
            };
            out.push_str(&format!(
                "{} {} R={}\n",
                stage,
                variant_text(&attr.value),
                attr.registrar.source
            ));
        }
        self.port.send_ctl(client, &out);
    }

    // ==================================================================
    // PDU decode
    // ==================================================================

    /// Decode one received frame and feed each declared value through the
    /// dispatcher. A framing violation drops the rest of the PDU (MMRP
    /// messages carry no AttributeListLength to resynchronize on) and is
    /// reported, not fatal.
    pub fn decode_pdu(&mut self, frame: &[u8]) -> MrpResult<()> {
        let mut cur = Cursor::new(frame);

        let dest = read_mac(&mut cur)?;
        let src = read_mac(&mut cur)?;
        if cur.read_u16_be()? != MMRP_ETYPE {
            return Err(MrpError::MalformedPdu {
                reason: "not an MMRP EtherType".into(),
            });
        }
        if dest != MMRP_ADDR {
            return Err(MrpError::MalformedPdu {
                reason: "not the MMRP group address".into(),
            });
        }

        // Newer protocol versions are still parsed; unknown attribute types
        // below take care of anything we cannot understand.
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
            match attr_type {
                SVCREQ_TYPE => {
                    if attr_len != SVCREQ_ATTR_LEN {
                        return Err(MrpError::MalformedPdu {
                            reason: "bad service-requirement AttributeLength".into(),
                        });
                    }
                    self.decode_svc_vectors(&mut cur, src)?;
                }
                MACVEC_TYPE => {
                    if attr_len != MACVEC_ATTR_LEN {
                        return Err(MrpError::MalformedPdu {
                            reason: "bad MAC-vector AttributeLength".into(),
                        });
                    }
                    self.decode_mac_vectors(&mut cur, src)?;
                }
                other => {
                    log::warn!("MMRP: unrecognized attribute type {}", other);
                    return Err(MrpError::MalformedPdu {
                        reason: "unrecognized attribute type".into(),
                    });
                }
            }
        }
        Ok(())
    }

    fn decode_mac_vectors(&mut self, cur: &mut Cursor<'_>, src: MacAddr) -> MrpResult<()> {
        let mut saw_leave_all = false;
        loop {
            if cur.remaining() < 2 {
                return Err(MrpError::MalformedPdu {
                    reason: "vector list without end-mark".into(),
                });
            }
            if cur.peek_u16_be()? == ENDMARK {
                // Outer loop consumes the end-mark.
                return Ok(());
            }

            let header = VectorHeader::decode(cur.read_u16_be()?);
            if header.leave_all && !saw_leave_all {
                saw_leave_all = true;
                self.event(
                    MrpEvent::RemoteLeaveAll,
                    Some(MmrpDeclaration::remote(
                        MmrpValue::MacVector(MacAddr::zero()),
                        src,
                    )),
                )?;
            }
            if header.num_values == 0 {
                // Cannot tell how long the trailing vectors are.
                return Err(MrpError::MalformedPdu {
                    reason: "zero-valued MAC vector".into(),
                });
            }
            crate::protocol::vector::check_vector_fits(
                cur,
                MACVEC_ATTR_LEN,
                header.num_values,
                false,
            )?;

            let mut key = read_mac(cur)?;
            let events = read_three_packed(cur, header.num_values)?;
            for event in events {
                if let Some(event) = event {
                    self.event(
                        remote_event(event),
                        Some(MmrpDeclaration::remote(MmrpValue::MacVector(key), src)),
                    )?;
                }
                key.increment();
            }
        }
    }

    fn decode_svc_vectors(&mut self, cur: &mut Cursor<'_>, src: MacAddr) -> MrpResult<()> {
        let mut saw_leave_all = false;
        loop {
            if cur.remaining() < 2 {
                return Err(MrpError::MalformedPdu {
                    reason: "vector list without end-mark".into(),
                });
            }
            if cur.peek_u16_be()? == ENDMARK {
                return Ok(());
            }

            let header = VectorHeader::decode(cur.read_u16_be()?);
            if header.leave_all && !saw_leave_all {
                saw_leave_all = true;
                self.event(
                    MrpEvent::RemoteLeaveAll,
                    Some(MmrpDeclaration::remote(
                        MmrpValue::ServiceRequirement(0),
                        src,
                    )),
                )?;
            }
            if header.num_values == 0 {
                return Err(MrpError::MalformedPdu {
                    reason: "zero-valued service vector".into(),
                });
            }
            crate::protocol::vector::check_vector_fits(
                cur,
                SVCREQ_ATTR_LEN,
                header.num_values,
                false,
            )?;

            let mut value = cur.read_u8()?;
            let events = read_three_packed(cur, header.num_values)?;
            for event in events {
                // Values above ForwardUnregistered are peer junk.
                if value > SVCREQ_FORWARD_UNREGISTERED {
                    continue;
                }
                let this = value;
                value = value.wrapping_add(1);
                if let Some(event) = event {
                    self.event(
                        remote_event(event),
                        Some(MmrpDeclaration::remote(
                            MmrpValue::ServiceRequirement(this),
                            src,
                        )),
                    )?;
                }
            }
        }
    }

    // ==================================================================
    // PDU assembly
    // ==================================================================

    /// Assemble and transmit one PDU carrying every pending declaration,
    /// coalescing contiguous runs into single vectors.
    pub fn txpdu(&mut self) -> MrpResult<()> {
        let mut frame = vec![0u8; MAX_FRAME_SIZE];
        let written;
        {
            let mut cur = CursorMut::new(&mut frame);
            cur.write_bytes(MMRP_ADDR.as_bytes())
                .map_err(encode_failed)?;
            cur.write_bytes(self.station.as_bytes())
                .map_err(encode_failed)?;
            cur.write_u16_be(MMRP_ETYPE).map_err(encode_failed)?;
            cur.write_u8(MMRP_PROT_VER).map_err(encode_failed)?;

            let leave_all = self.ctx.leave_all.tx;
            self.ctx.leave_all.tx = false;

            let body_start = cur.offset();
            for kind in [MmrpKind::MacVector, MmrpKind::ServiceRequirement] {
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
        log::debug!("MMRP: send PDU ({} bytes)", written);
        self.port.send_pdu(&frame)
    }

    /// Build one attribute-type message. Returns an empty buffer when the
    /// type has nothing to transmit (and no empty LeaveAll is owed).
    fn emit_vectors(
        &mut self,
        kind: MmrpKind,
        leave_all: bool,
        capacity: usize,
    ) -> MrpResult<Vec<u8>> {
        let attr_len = kind.attr_len();
        // Smallest useful message: header + vector header + FirstValue +
        // one packed byte + end-mark.
        if capacity < 2 + 2 + attr_len + 1 + ENDMARK_SIZE {
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

            let mut wrote_vector = false;
            let mut lva_pending = leave_all;
            let mut i = 0;
            while i < self.store.len() {
                if cur.remaining() < 2 + attr_len + 1 + ENDMARK_SIZE {
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
                let mut last = first.clone();
                let mut j = i + 1;
                while let Some(next) = self.store.get(j) {
                    if !kind.matches(&next.value) || !next.applicant.tx {
                        break;
                    }
                    if !next.value.follows(&last) {
                        break;
                    }
                    // Stop extending once another packed byte cannot fit.
                    if 2 + attr_len + three_packed_len(events.len() + 1) + ENDMARK_SIZE
                        > cur.remaining()
                    {
                        break;
                    }
                    let ev = wire_send_event(next.applicant.sndmsg, next.registrar.is_in())
                        .ok_or_else(|| MrpError::EncodeFailed {
                            reason: "pending transmit without an encodable event".into(),
                        })?;
                    last = next.value.clone();
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
                wrote_vector = true;
                i = j;
            }

            if !wrote_vector {
                if self.send_empty_leave_all {
                    // No declarations: a LeaveAll still goes out as a
                    // zero-FirstValue, zero-count vector.
                    cur.write_u16_be(VectorHeader::new(true, 0).encode())
                        .map_err(encode_failed)?;
                    cur.write_bytes(&[0u8; MACVEC_ATTR_LEN][..attr_len])
                        .map_err(encode_failed)?;
                } else {
                    return Ok(Vec::new());
                }
            }

            cur.write_u16_be(ENDMARK).map_err(encode_failed)?;
            written = cur.offset();
        }
        buf.truncate(written);
        Ok(buf)
    }
}

fn read_mac(cur: &mut Cursor<'_>) -> SerResult<MacAddr> {
    MacAddr::from_slice(cur.read_bytes(MacAddr::LEN)?).ok_or_else(|| SerError::InvalidData {
        reason: "short MAC address".into(),
    })
}

fn write_first_value(cur: &mut CursorMut<'_>, value: &MmrpValue) -> SerResult<()> {
    match value {
        MmrpValue::ServiceRequirement(s) => cur.write_u8(*s),
        MmrpValue::MacVector(mac) => cur.write_bytes(mac.as_bytes()),
    }
}

fn variant_text(value: &MmrpValue) -> String {
    match value {
        MmrpValue::ServiceRequirement(s) => format!("S={}", s),
        MmrpValue::MacVector(mac) => format!("M={}", mac),
    }
}

fn notification_line(attr: &Attribute<MmrpValue>, kind: NotifyKind) -> Option<String> {
    let prefix = match kind {
        NotifyKind::New => "MNE",
        NotifyKind::Join => "MJO",
        NotifyKind::Leave => "MLE",
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

fn encode_failed(e: SerError) -> MrpError {
    MrpError::EncodeFailed {
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_ordering_and_contiguity() {
        let a = MmrpValue::MacVector(MacAddr::from_bytes([0, 0, 0, 0, 0, 1]));
        let b = MmrpValue::MacVector(MacAddr::from_bytes([0, 0, 0, 0, 0, 2]));
        assert_eq!(a.key_cmp(&b), Ordering::Less);
        assert!(b.follows(&a));

        let s0 = MmrpValue::ServiceRequirement(0);
        let s1 = MmrpValue::ServiceRequirement(1);
        assert!(s1.follows(&s0));
        assert!(!s1.follows(&b));
        assert_ne!(s0.class(), a.class());
    }

    #[test]
    fn test_wire_types() {
        assert_eq!(MmrpValue::ServiceRequirement(0).wire_type(), 1);
        assert_eq!(MmrpValue::MacVector(MacAddr::zero()).wire_type(), 2);
    }
}
