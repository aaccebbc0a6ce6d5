// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-database protocol context shared by both instantiations.
//!
//! Bundles the LeaveAll state machine, the running-state of the three
//! per-database timers, and the registered control-channel clients. Each
//! protocol instance (MMRP, MSRP) owns exactly one context; instances never
//! share one.

use crate::config::MrpConfig;
use crate::fsm::{LeaveAll, LeaveAllTimerOp, MrpEvent};
use crate::port::{ClientId, MrpPort, TimerId};

#[derive(Debug, Clone)]
pub struct MrpContext {
    pub config: MrpConfig,
    pub leave_all: LeaveAll,
    join_timer_running: bool,
    leave_timer_running: bool,
    leave_all_timer_running: bool,
    clients: Vec<ClientId>,
}

impl MrpContext {
    pub fn new(config: MrpConfig) -> Self {
        Self {
            config,
            leave_all: LeaveAll::default(),
            join_timer_running: false,
            leave_timer_running: false,
            leave_all_timer_running: false,
            clients: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Timers (10.7.4): start is idempotent while a timer is running so a
    // burst of events arms one interval, not one per event.
    // ------------------------------------------------------------------

    pub fn join_timer_start<P: MrpPort>(&mut self, port: &mut P) {
        if !self.join_timer_running {
            port.timer_start(TimerId::Join, self.config.join_timer_ms);
        }
        self.join_timer_running = true;
    }

    pub fn join_timer_stop<P: MrpPort>(&mut self, port: &mut P) {
        self.join_timer_running = false;
        port.timer_stop(TimerId::Join);
    }

    pub fn leave_timer_start<P: MrpPort>(&mut self, port: &mut P) {
        port.timer_start(TimerId::Leave, self.config.leave_timer_ms);
        self.leave_timer_running = true;
    }

    pub fn leave_timer_stop<P: MrpPort>(&mut self, port: &mut P) {
        self.leave_timer_running = false;
        port.timer_stop(TimerId::Leave);
    }

    pub fn leave_all_timer_start<P: MrpPort>(&mut self, port: &mut P) {
        if !self.leave_all_timer_running {
            let interval = port.leave_all_interval_ms(self.config.leave_all_timer_ms);
            port.timer_start(TimerId::LeaveAll, interval);
        }
        self.leave_all_timer_running = true;
    }

    pub fn leave_all_timer_stop<P: MrpPort>(&mut self, port: &mut P) {
        self.leave_all_timer_running = false;
        port.timer_stop(TimerId::LeaveAll);
    }

    /// Tick the LeaveAll machine and apply whatever timer action it asks for.
    pub fn leave_all_event<P: MrpPort>(&mut self, event: MrpEvent, port: &mut P) {
        match self.leave_all.handle(event) {
            Ok(LeaveAllTimerOp::Start) => self.leave_all_timer_start(port),
            Ok(LeaveAllTimerOp::Restart) => {
                self.leave_all_timer_stop(port);
                self.leave_all_timer_start(port);
            }
            Ok(LeaveAllTimerOp::None) => {}
            Err(_) => log::debug!("leaveall fsm ignored event {:?}", event),
        }
    }

    // ------------------------------------------------------------------
    // Control-channel clients
    // ------------------------------------------------------------------

    /// Register a client for notification fan-out. Duplicates are ignored.
    pub fn client_add(&mut self, client: ClientId) {
        if !self.clients.contains(&client) {
            self.clients.push(client);
        }
    }

    /// Remove a client; unknown clients are not an error.
    pub fn client_delete(&mut self, client: &ClientId) {
        self.clients.retain(|c| c != client);
    }

    pub fn clients(&self) -> &[ClientId] {
        &self.clients
    }
}
