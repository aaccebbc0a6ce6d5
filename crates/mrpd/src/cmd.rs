// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control-channel command scanning.
//!
//! Commands are a 3-character verb (`M++`, `S-L`, ...) optionally followed
//! by `:` and `key=value` fields separated by `,` or `:`. This is a plain
//! scanner; field interpretation stays with each application.

/// Split a command into its verb and the raw field region.
pub fn split_verb(line: &str) -> (&str, &str) {
    let line = line.trim_end();
    if line.len() <= 3 || !line.is_char_boundary(3) {
        return (line, "");
    }
    let (verb, rest) = line.split_at(3);
    (verb, rest.strip_prefix(':').unwrap_or(rest))
}

/// Find the value of `key` among `key=value` fields.
pub fn field<'a>(fields: &'a str, key: &str) -> Option<&'a str> {
    fields
        .split([',', ':'])
        .filter_map(|f| f.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

/// Parse a decimal field.
pub fn field_dec<T: std::str::FromStr>(fields: &str, key: &str) -> Option<T> {
    field(fields, key)?.parse().ok()
}

/// Parse a hex field (no 0x prefix, control-channel convention).
pub fn field_hex(fields: &str, key: &str) -> Option<u32> {
    u32::from_str_radix(field(fields, key)?, 16).ok()
}
