// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-attribute MRP state machines (802.1Q-2011 clause 10.7).
//!
//! The Applicant drives local declaration/withdrawal intent and
//! retransmission; the Registrar tracks the locally believed registration
//! state from received declarations. Both are pure transition functions over
//! an [`Applicant`]/[`Registrar`] record: they set the state plus the
//! tx/sndmsg/notify side outputs and never touch timers or sockets
//! themselves. The one timer interaction (Registrar IN -> LV arms the leave
//! timer) is returned to the caller as a flag.

use crate::core::types::MacAddr;
use crate::error::{MrpError, MrpResult};

/// Protocol events delivered to the state machines.
///
/// `Tx` is a transmit opportunity without a LeaveAll; `TxLeaveAll` overrides
/// it when the LeaveAll state machine has a pending LeaveAll; `TxLeaveAllFull`
/// signals the opportunity was lost because the PDU had no room.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MrpEvent {
    Begin,
    /// Local new-declaration request (10.7.5.4).
    New,
    /// Local declaration request (10.7.5.5).
    Join,
    /// Local withdrawal request (10.7.5.6).
    Leave,
    Tx,
    TxLeaveAll,
    TxLeaveAllFull,
    RemoteNew,
    RemoteJoinIn,
    RemoteIn,
    RemoteJoinMt,
    RemoteMt,
    RemoteLeave,
    RemoteLeaveAll,
    /// Port role change: flush registered state (10.7.5.2).
    Flush,
    /// Port role change: re-declare registered attributes (10.7.5.3).
    Redeclare,
    Periodic,
    LeaveTimer,
    LeaveAllTimer,
}

/// Applicant states (802.1Q-2011 Table 10-3).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ApplicantState {
    /// Very anxious observer
    Vo,
    /// Very anxious passive
    Vp,
    /// Very anxious new
    Vn,
    /// Anxious new
    An,
    /// Anxious active
    Aa,
    /// Quiet active
    Qa,
    /// Leaving active
    La,
    /// Anxious observer
    Ao,
    /// Quiet observer
    Qo,
    /// Anxious passive
    Ap,
    /// Quiet passive
    Qp,
    /// Leaving observer
    Lo,
}

impl ApplicantState {
    pub fn code(&self) -> &'static str {
        match self {
            ApplicantState::Vo => "VO",
            ApplicantState::Vp => "VP",
            ApplicantState::Vn => "VN",
            ApplicantState::An => "AN",
            ApplicantState::Aa => "AA",
            ApplicantState::Qa => "QA",
            ApplicantState::La => "LA",
            ApplicantState::Ao => "AO",
            ApplicantState::Qo => "QO",
            ApplicantState::Ap => "AP",
            ApplicantState::Qp => "QP",
            ApplicantState::Lo => "LO",
        }
    }
}

/// Registrar states (802.1Q-2011 Table 10-4).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegistrarState {
    In,
    /// Leaving: the leave timer is running for this attribute.
    Lv,
    /// Empty.
    Mt,
}

impl RegistrarState {
    pub fn code(&self) -> &'static str {
        match self {
            RegistrarState::In => "IN",
            RegistrarState::Lv => "LV",
            RegistrarState::Mt => "MT",
        }
    }
}

/// Message the applicant wants on the wire at the next transmit opportunity.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SndMsg {
    New,
    Join,
    In,
    Lv,
    /// Sent as an ignorable placeholder to improve encoding.
    Null,
    None,
}

/// Whether a pending transmit must be encoded or may be skipped.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EncodeHint {
    Yes,
    /// Send only if it improves the encoding (fills out a packed byte).
    Optional,
}

/// Registration-change notification owed to local clients.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum NotifyKind {
    None,
    New,
    Join,
    Leave,
}

/// Applicant half of a per-attribute record.
#[derive(Debug, Clone)]
pub struct Applicant {
    pub state: ApplicantState,
    /// Transmit on the next TX event.
    pub tx: bool,
    pub sndmsg: SndMsg,
    pub encode: EncodeHint,
    /// For identifying state transitions after a tick.
    pub previous_state: ApplicantState,
}

impl Default for Applicant {
    fn default() -> Self {
        Self {
            state: ApplicantState::Vo,
            tx: false,
            sndmsg: SndMsg::Null,
            encode: EncodeHint::Optional,
            previous_state: ApplicantState::Vo,
        }
    }
}

/// Registrar half of a per-attribute record.
#[derive(Debug, Clone, Default)]
pub struct Registrar {
    pub state: RegistrarState,
    pub notify: NotifyKind,
    /// MAC address of the last registration source (diagnostic).
    pub source: MacAddr,
}

impl Default for RegistrarState {
    fn default() -> Self {
        RegistrarState::Mt
    }
}

impl Default for NotifyKind {
    fn default() -> Self {
        NotifyKind::None
    }
}

impl Registrar {
    pub fn is_in(&self) -> bool {
        self.state == RegistrarState::In
    }

    /// Drop the registered state to MT so the next registration event is
    /// reported to clients again. Used when a merge changes a record in a
    /// way clients must observe (listener substate change, talker
    /// advertise/failed flip).
    pub fn force_renotify(&mut self) {
        self.state = RegistrarState::Mt;
    }
}

/// Tick the Applicant state machine.
///
/// `registrar_in` is the auxiliary input of Table 10-3 ("Note 8");
/// `point_to_point` is operPointToPointMAC.
pub fn applicant_fsm(
    app: &mut Applicant,
    event: MrpEvent,
    registrar_in: bool,
    point_to_point: bool,
) -> MrpResult<()> {
    use ApplicantState::*;

    let mut tx = false;
    let mut optional = false;
    let mut sndmsg = SndMsg::Null;
    let mut state = app.state;

    match event {
        MrpEvent::Begin => {
            state = Vo;
        }
        MrpEvent::New => {
            // New declaration (publish) from a local join request.
            state = match state {
                Vn | An => state,
                _ => Vn,
            };
        }
        MrpEvent::Join => {
            state = match state {
                Lo | Vo => Vp,
                La => Aa,
                Ao => Ap,
                Qo => Qp,
                _ => state,
            };
        }
        MrpEvent::Leave => {
            state = match state {
                Vn | An | Aa | Qa => La,
                Vp => Vo,
                Ap => Ao,
                Qp => Qo,
                _ => state,
            };
        }
        MrpEvent::TxLeaveAll => {
            // Transmit opportunity carrying a LeaveAll (overrides plain TX).
            match state {
                Vo => {
                    optional = true;
                    tx = true;
                    sndmsg = SndMsg::In;
                    state = Lo;
                }
                Vp => {
                    tx = true;
                    sndmsg = SndMsg::In;
                    state = Aa;
                }
                Vn => {
                    tx = true;
                    sndmsg = SndMsg::New;
                    state = An;
                }
                An => {
                    tx = true;
                    sndmsg = SndMsg::New;
                    state = Qa;
                }
                Qp | Ap | Aa => {
                    tx = true;
                    sndmsg = SndMsg::Join;
                    state = Qa;
                }
                Qa => {
                    tx = true;
                    sndmsg = SndMsg::Join;
                }
                La | Ao | Qo => {
                    optional = true;
                    tx = true;
                    sndmsg = SndMsg::In;
                    state = Lo;
                }
                Lo => {
                    optional = true;
                    tx = true;
                    sndmsg = SndMsg::In;
                    state = Vo;
                }
            }
        }
        MrpEvent::TxLeaveAllFull => {
            // LeaveAll was due but the PDU had no room.
            state = match state {
                Vo => Lo,
                Lo | Vp | Vn => state,
                An => Vn,
                Qp | Ap | Aa | Qa => Vp,
                Qo | Ao | La => Lo,
            };
        }
        MrpEvent::Tx => {
            match state {
                Vo => {
                    tx = true;
                    optional = true;
                    sndmsg = SndMsg::In;
                }
                Vp => {
                    tx = true;
                    sndmsg = SndMsg::Join;
                    state = Aa;
                }
                Vn => {
                    tx = true;
                    sndmsg = SndMsg::New;
                    state = An;
                }
                An => {
                    tx = true;
                    sndmsg = SndMsg::New;
                    // Note 8 for tx! in Table 10-3 of IEEE 802.1Q-2011.
                    state = if registrar_in { Qa } else { Aa };
                }
                Ap | Aa => {
                    tx = true;
                    sndmsg = SndMsg::Join;
                    state = Qa;
                }
                Qa => {
                    tx = true;
                    optional = true;
                    sndmsg = SndMsg::Join;
                }
                La => {
                    tx = true;
                    sndmsg = SndMsg::Lv;
                    state = Vo;
                }
                Ao | Qo | Qp => {
                    tx = true;
                    optional = true;
                    sndmsg = SndMsg::In;
                }
                Lo => {
                    tx = true;
                    sndmsg = SndMsg::In;
                    state = Vo;
                }
            }
        }
        MrpEvent::RemoteNew => {}
        MrpEvent::RemoteJoinIn => {
            state = match state {
                Vo if !point_to_point => Ao,
                Vp if !point_to_point => Ap,
                Aa => Qa,
                Ao => Qo,
                Ap => Qp,
                _ => state,
            };
        }
        MrpEvent::RemoteIn => {
            state = match state {
                Aa if point_to_point => Qa,
                _ => state,
            };
        }
        MrpEvent::RemoteJoinMt | MrpEvent::RemoteMt => {
            state = match state {
                Qa => Aa,
                Qo => Ao,
                Qp => Ap,
                Lo => Vo,
                _ => state,
            };
        }
        MrpEvent::RemoteLeave | MrpEvent::RemoteLeaveAll | MrpEvent::Redeclare => {
            state = match state {
                Vo => Lo,
                An => Vn,
                Qa | Aa => Vp,
                Ao | Qo => Lo,
                Ap | Qp => Vp,
                _ => state,
            };
        }
        MrpEvent::Periodic => {
            state = match state {
                Qa => Aa,
                Qp => Ap,
                _ => state,
            };
        }
        _ => {
            log::debug!("applicant_fsm: unexpected event {:?}", event);
            return Err(MrpError::UnsupportedEvent);
        }
    }

    app.previous_state = app.state;
    app.tx = tx;
    app.state = state;
    app.sndmsg = sndmsg;
    app.encode = if optional {
        EncodeHint::Optional
    } else {
        EncodeHint::Yes
    };
    Ok(())
}

/// True when the last applicant tick moved into a state that implies a
/// further transmit opportunity must be requested.
pub fn transition_implies_tx(app: &Applicant) -> bool {
    if app.previous_state == app.state {
        return false;
    }
    matches!(
        app.state,
        ApplicantState::Vp
            | ApplicantState::Vn
            | ApplicantState::An
            | ApplicantState::Aa
            | ApplicantState::La
    )
}

/// Tick the Registrar state machine.
///
/// Returns `true` when the IN -> LV transition occurred and the caller must
/// arm the leave timer (there is one leave timer per database, not per
/// attribute, so the FSM cannot own it).
pub fn registrar_fsm(reg: &mut Registrar, event: MrpEvent) -> MrpResult<bool> {
    let mut state = reg.state;
    let mut notify = NotifyKind::None;
    let mut start_leave_timer = false;

    match event {
        MrpEvent::Begin => {
            state = RegistrarState::Mt;
        }
        MrpEvent::RemoteLeave
        | MrpEvent::TxLeaveAll
        | MrpEvent::RemoteLeaveAll
        | MrpEvent::Redeclare => {
            if event == MrpEvent::RemoteLeave {
                notify = NotifyKind::Leave;
            }
            if state == RegistrarState::In {
                start_leave_timer = true;
                state = RegistrarState::Lv;
            }
        }
        MrpEvent::RemoteNew => {
            // The single shared leave timer keeps running; a LeaveTimer
            // event is a don't-care for attributes back in the IN state.
            notify = NotifyKind::New;
            state = RegistrarState::In;
        }
        MrpEvent::RemoteJoinIn | MrpEvent::RemoteJoinMt => match state {
            RegistrarState::Mt | RegistrarState::Lv => {
                notify = NotifyKind::Join;
                state = RegistrarState::In;
            }
            RegistrarState::In => {}
        },
        MrpEvent::LeaveTimer => {
            if state == RegistrarState::Lv {
                notify = NotifyKind::Leave;
                state = RegistrarState::Mt;
            }
        }
        MrpEvent::Flush => {
            notify = NotifyKind::Leave;
            state = RegistrarState::Mt;
        }
        MrpEvent::RemoteMt => {
            // Ignore on soon-to-be-deleted attributes.
        }
        MrpEvent::RemoteIn => {
            // rIn! processing is not specified in Table 10-4; ignore.
        }
        _ => {
            log::debug!("registrar_fsm: unexpected event {:?}", event);
            return Err(MrpError::UnsupportedEvent);
        }
    }

    reg.state = state;
    reg.notify = notify;
    Ok(start_leave_timer)
}

/// Classify a pending transmit into its wire attribute event.
///
/// An applicant `In` rides as `In` only when the registrar also has the
/// attribute registered, `Mt` otherwise; same split turns `Join` into
/// `JoinIn`/`JoinMt`. `None` means the applicant has nothing encodable
/// pending (a caller-contract violation in the assembler).
pub fn wire_send_event(
    sndmsg: SndMsg,
    registrar_in: bool,
) -> Option<crate::protocol::AttributeEvent> {
    use crate::protocol::AttributeEvent;
    match sndmsg {
        SndMsg::In => Some(if registrar_in {
            AttributeEvent::In
        } else {
            AttributeEvent::Mt
        }),
        SndMsg::New => Some(AttributeEvent::New),
        SndMsg::Lv => Some(AttributeEvent::Lv),
        SndMsg::Join => Some(if registrar_in {
            AttributeEvent::JoinIn
        } else {
            AttributeEvent::JoinMt
        }),
        SndMsg::Null | SndMsg::None => None,
    }
}

/// Map a received per-value attribute event onto the dispatcher event it
/// raises for the matching record.
pub fn remote_event(event: crate::protocol::AttributeEvent) -> MrpEvent {
    use crate::protocol::AttributeEvent;
    match event {
        AttributeEvent::New => MrpEvent::RemoteNew,
        AttributeEvent::JoinIn => MrpEvent::RemoteJoinIn,
        AttributeEvent::In => MrpEvent::RemoteIn,
        AttributeEvent::JoinMt => MrpEvent::RemoteJoinMt,
        AttributeEvent::Mt => MrpEvent::RemoteMt,
        AttributeEvent::Lv => MrpEvent::RemoteLeave,
    }
}

// ============================================================================
// LeaveAll state machine
// ============================================================================

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LeaveAllState {
    Passive,
    Active,
}

/// Timer action the caller must apply after a LeaveAll tick.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LeaveAllTimerOp {
    None,
    Start,
    Restart,
}

/// Per-database LeaveAll state machine (802.1Q-2011 10.7.5.22).
///
/// One instance per application and port; its expiry ticks every attribute
/// of the database individually.
#[derive(Debug, Clone)]
pub struct LeaveAll {
    pub state: LeaveAllState,
    /// A LeaveAll must go out with the next PDU.
    pub tx: bool,
    pub sndmsg: SndMsg,
}

impl Default for LeaveAll {
    fn default() -> Self {
        Self {
            state: LeaveAllState::Passive,
            tx: false,
            sndmsg: SndMsg::None,
        }
    }
}

impl LeaveAll {
    pub fn handle(&mut self, event: MrpEvent) -> MrpResult<LeaveAllTimerOp> {
        let mut op = LeaveAllTimerOp::None;
        let mut tx = false;
        let mut sndmsg = SndMsg::None;

        match event {
            MrpEvent::Begin => {
                self.state = LeaveAllState::Passive;
                op = LeaveAllTimerOp::Start;
            }
            MrpEvent::Tx => {
                if self.state == LeaveAllState::Active {
                    tx = true;
                    sndmsg = SndMsg::None;
                    self.state = LeaveAllState::Passive;
                }
            }
            MrpEvent::RemoteLeaveAll => {
                self.state = LeaveAllState::Passive;
                op = LeaveAllTimerOp::Restart;
            }
            MrpEvent::LeaveAllTimer => {
                self.state = LeaveAllState::Active;
                op = LeaveAllTimerOp::Restart;
            }
            _ => {
                log::debug!("leaveall fsm: unexpected event {:?}", event);
                return Err(MrpError::UnsupportedEvent);
            }
        }

        self.tx = tx;
        self.sndmsg = sndmsg;
        Ok(op)
    }
}
