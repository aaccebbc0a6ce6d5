// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MRPDU wire protocol.
//!
//! This module contains the protocol-neutral pieces of the codec:
//! - Constants: end-marks, vector header bits, protocol version
//! - Vector attribute header and ThreePacked/FourPacked event packing
//!
//! Attribute-specific FirstValue layouts live with their application
//! (`mmrp`, `msrp`).

pub mod constants;
pub mod vector;

pub use constants::*;
pub use vector::{
    four_packed_len, read_four_packed, read_three_packed, three_packed_len, write_four_packed,
    write_three_packed, AttributeEvent, VectorHeader,
};
