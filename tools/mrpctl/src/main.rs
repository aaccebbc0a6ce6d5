// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! mrpctl: interactive client for the mrpd control channel.
//!
//! Reads command lines from stdin (`M??`, `M+?:M=010203040506`,
//! `S++:S=deadbeefbadfca11,A=112233445566,V=0002,Z=576,I=8000,P=96,L=1000`,
//! `S+L:L=deadbeefbadfca11,D=2`, ...), sends them to the daemon over UDP,
//! and prints responses and asynchronous `MNE`/`MJO`/`MLE` /
//! `SNE`/`SJO`/`SLE` notifications as they arrive.

use mrpd::config::{CTL_PORT_DEFAULT, MAX_CTL_MSG_SIZE};
use std::io::{self, BufRead, Write};
use std::net::UdpSocket;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

fn usage() -> ExitCode {
    eprintln!();
    eprintln!("usage: mrpctl [-h] [-p PORT]");
    eprintln!();
    eprintln!("options:");
    eprintln!("    -h       show this message");
    eprintln!("    -p PORT  daemon control port (default {})", CTL_PORT_DEFAULT);
    eprintln!();
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    let mut port = CTL_PORT_DEFAULT;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" => return usage(),
            "-p" => {
                let Some(value) = args.next().and_then(|v| v.parse().ok()) else {
                    return usage();
                };
                port = value;
            }
            _ => return usage(),
        }
    }

    let socket = match UdpSocket::bind("127.0.0.1:0") {
        Ok(s) => s,
        Err(e) => {
            eprintln!("mrpctl: bind failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = socket.connect(("127.0.0.1", port)) {
        eprintln!("mrpctl: connect failed: {}", e);
        return ExitCode::FAILURE;
    }
    let socket = Arc::new(socket);

    // Print daemon traffic as it arrives, interleaved with the prompt.
    let receiver = Arc::clone(&socket);
    thread::spawn(move || {
        let mut buf = vec![0u8; MAX_CTL_MSG_SIZE];
        loop {
            match receiver.recv(&mut buf) {
                Ok(len) => {
                    let text = String::from_utf8_lossy(&buf[..len]);
                    print!("MRPD ---> {}", text);
                    if !text.ends_with('\n') {
                        println!();
                    }
                    let _ = io::stdout().flush();
                }
                Err(_) => break,
            }
        }
    });

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "quit" || trimmed == "exit" {
            break;
        }
        if let Err(e) = socket.send(trimmed.as_bytes()) {
            eprintln!("mrpctl: send failed: {}", e);
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
