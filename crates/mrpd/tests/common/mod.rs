// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared test double for the engine's I/O boundary.
#![allow(dead_code)] // each test binary uses a different subset

use mrpd::core::types::MacAddr;
use mrpd::error::MrpResult;
use mrpd::port::{ClientId, MrpPort, TimerId};

/// Records everything the engine pushes over the boundary.
#[derive(Default)]
pub struct RecordingPort {
    pub frames: Vec<Vec<u8>>,
    pub ctl: Vec<(ClientId, String)>,
    pub timer_starts: Vec<(TimerId, u32)>,
    pub timer_stops: Vec<TimerId>,
}

impl RecordingPort {
    pub fn ctl_lines(&self) -> Vec<&str> {
        self.ctl.iter().map(|(_, line)| line.as_str()).collect()
    }
}

impl MrpPort for RecordingPort {
    fn send_pdu(&mut self, frame: &[u8]) -> MrpResult<()> {
        self.frames.push(frame.to_vec());
        Ok(())
    }

    fn send_ctl(&mut self, client: &ClientId, msg: &str) {
        self.ctl.push((*client, msg.to_string()));
    }

    fn timer_start(&mut self, timer: TimerId, duration_ms: u32) {
        self.timer_starts.push((timer, duration_ms));
    }

    fn timer_stop(&mut self, timer: TimerId) {
        self.timer_stops.push(timer);
    }

    // Deterministic LeaveAll interval for tests.
    fn leave_all_interval_ms(&mut self, base_ms: u32) -> u32 {
        base_ms
    }
}

pub fn station() -> MacAddr {
    MacAddr::from_bytes([0x00, 0x1B, 0x21, 0x00, 0x00, 0x01])
}

pub fn peer() -> MacAddr {
    MacAddr::from_bytes([0x00, 0x1B, 0x21, 0x00, 0x00, 0x02])
}

pub fn client() -> ClientId {
    "127.0.0.1:7500".parse().expect("valid socket address")
}
