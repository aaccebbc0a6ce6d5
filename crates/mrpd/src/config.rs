// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MRP Global Configuration - Single Source of Truth
//!
//! This module centralizes the protocol constants and runtime configuration.
//! **NEVER hardcode elsewhere!**
//!
//! - **Level 1 (Static)**: Compile-time constants (802.1Q-2011 timer table,
//!   frame size cap, control port)
//! - **Level 2 (Dynamic)**: `MrpConfig` for per-instance knobs
//!   (operPointToPointMAC, timer overrides, neighbor-priority mirroring)

// =======================================================================
// Timers (802.1Q-2011 Table 10-7)
// =======================================================================

/// Join timer default (milliseconds).
///
/// 802.1Q-2011: the join timer may only fire 3 times in 300 msec; the
/// standard default is 200 msec. We use 300/3 msec, the tightest spacing the
/// rate limit allows.
pub const JOIN_TIMER_MS: u32 = 100;

/// Leave timer default (milliseconds).
///
/// Controls how long a Registrar stays in the LV state before transitioning
/// to MT (802.1Q-2011 10.7.5.21).
pub const LEAVE_TIMER_MS: u32 = 1_000;

/// LeaveAll timer default (milliseconds).
///
/// On expiry all attributes are re-declared. The running value is drawn
/// uniformly from `[LEAVE_ALL_TIMER_MS, 1.5 * LEAVE_ALL_TIMER_MS)`
/// (802.1Q-2011 10.7.5.22); the draw happens behind the port so the engine
/// stays deterministic.
pub const LEAVE_ALL_TIMER_MS: u32 = 10_000;

/// Periodic transmission timer default (milliseconds).
pub const PERIODIC_TIMER_MS: u32 = 1_000;

// =======================================================================
// Framing
// =======================================================================

/// Largest frame the PDU assembler will produce, Ethernet header included.
pub const MAX_FRAME_SIZE: usize = 2_000;

/// Largest control-channel message (commands, notifications, dumps).
pub const MAX_CTL_MSG_SIZE: usize = 1_500;

/// UDP port of the local control channel.
pub const CTL_PORT_DEFAULT: u16 = 7500;

// =======================================================================
// Runtime configuration
// =======================================================================

/// Per-instance protocol knobs.
///
/// One `MrpConfig` per protocol instantiation; instances never share state.
#[derive(Debug, Clone)]
pub struct MrpConfig {
    /// operPointToPointMAC: conditions the applicant's handling of rJoinIn
    /// and rIn (802.1Q-2011 Table 10-3 notes).
    pub point_to_point_mac: bool,

    /// When set, a remote domain declaration also overwrites the locally
    /// advertised SR class priority, not just the neighbor copy.
    pub mirror_neighbor_priority: bool,

    pub join_timer_ms: u32,
    pub leave_timer_ms: u32,
    pub leave_all_timer_ms: u32,
    pub periodic_timer_ms: u32,
}

impl Default for MrpConfig {
    fn default() -> Self {
        Self {
            point_to_point_mac: true,
            mirror_neighbor_priority: false,
            join_timer_ms: JOIN_TIMER_MS,
            leave_timer_ms: LEAVE_TIMER_MS,
            leave_all_timer_ms: LEAVE_ALL_TIMER_MS,
            periodic_timer_ms: PERIODIC_TIMER_MS,
        }
    }
}
