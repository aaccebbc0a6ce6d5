// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine error taxonomy.
//!
//! Malformed PDUs are recovered locally and reported, never fatal; internal
//! faults mean protocol logic assumed a record or candidate that is absent.

use std::fmt;

#[derive(Debug, Clone)]
pub enum MrpError {
    /// Received bytes violate MRPDU framing; the offending region was dropped.
    MalformedPdu { reason: String },
    /// A required record or candidate attribute is absent.
    InternalFault { reason: String },
    /// An event was delivered to a state machine that has no transition for it.
    UnsupportedEvent,
    /// Outgoing PDU could not be assembled; caller should assume a
    /// transmit-opportunity-needed (TXLAF) fallback.
    EncodeFailed { reason: String },
}

impl fmt::Display for MrpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MrpError::MalformedPdu { reason } => write!(f, "malformed PDU: {}", reason),
            MrpError::InternalFault { reason } => write!(f, "internal fault: {}", reason),
            MrpError::UnsupportedEvent => write!(f, "unsupported event"),
            MrpError::EncodeFailed { reason } => write!(f, "PDU encode failed: {}", reason),
        }
    }
}

impl std::error::Error for MrpError {}

pub type MrpResult<T> = Result<T, MrpError>;
