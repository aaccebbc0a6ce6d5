// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The engine's I/O boundary.
//!
//! The core never opens sockets or owns timers: raw frame transmission, the
//! local control channel and timer scheduling are byte-in/byte-out services
//! provided by the surrounding daemon through [`MrpPort`]. The daemon feeds
//! expirations back in as `LeaveTimer`/`LeaveAllTimer`/`Tx` events.

use crate::error::MrpResult;
use std::net::SocketAddr;

/// A registered control-channel client.
pub type ClientId = SocketAddr;

/// Timers the engine starts and stops; one set per protocol instance.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TimerId {
    /// Interval between transmit opportunities for the applicants.
    Join,
    /// Registrar LV -> MT holdoff.
    Leave,
    /// Periodic full re-declaration.
    LeaveAll,
}

/// Services the surrounding daemon provides to a protocol instance.
pub trait MrpPort {
    /// Transmit an assembled MRPDU (Ethernet header included).
    fn send_pdu(&mut self, frame: &[u8]) -> MrpResult<()>;

    /// Deliver one control-channel message to one registered client.
    fn send_ctl(&mut self, client: &ClientId, msg: &str);

    fn timer_start(&mut self, timer: TimerId, duration_ms: u32);

    fn timer_stop(&mut self, timer: TimerId);

    /// Draw the next LeaveAll interval.
    ///
    /// 802.1Q-2011 wants a value uniform in `[base, 1.5 * base)`; keeping the
    /// draw out here keeps the engine deterministic under test.
    fn leave_all_interval_ms(&mut self, base_ms: u32) -> u32 {
        base_ms + base_ms / 2
    }
}
