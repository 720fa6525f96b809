// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Icecast handshake against a local mock server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::time::Duration;

use aircast_core::StudioConfig;
use aircast_nodes::IcecastClient;

/// Accept one connection, capture its request head, send `response`.
fn mock_icecast(response: &'static str) -> Option<(String, mpsc::Receiver<Vec<u8>>)> {
    let listener = match TcpListener::bind("127.0.0.1:0") {
        Ok(listener) => listener,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => return None,
        Err(e) => panic!("failed to bind mock listener: {e}"),
    };
    let addr = listener.local_addr().unwrap();
    let (request_tx, request_rx) = mpsc::channel();

    std::thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => head.extend_from_slice(&buf[..n]),
            }
        }
        socket.write_all(response.as_bytes()).unwrap();
        let _ = request_tx.send(head);
        // Hold the socket open briefly so post-handshake writes succeed.
        std::thread::sleep(Duration::from_millis(300));
    });

    Some((format!("http://127.0.0.1:{}/stream", addr.port()), request_rx))
}

#[test]
fn test_handshake_accepted_on_100_continue() {
    let Some((endpoint, request_rx)) = mock_icecast("HTTP/1.1 100 Continue\r\n\r\n") else {
        eprintln!("skipping: local TCP bind not permitted");
        return;
    };

    let client = IcecastClient::new(7, 64, &StudioConfig::default()).unwrap();
    assert!(client.connect(&endpoint, "secret").unwrap());
    assert!(client.is_connected());
    assert_eq!(client.endpoint().as_deref(), Some(endpoint.as_str()));

    let head = request_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let head = String::from_utf8(head).unwrap();
    let mut lines = head.split("\r\n");
    assert_eq!(lines.next(), Some("PUT /stream HTTP/1.1"));
    assert!(head.contains("Content-Type: audio/mpeg"));
    assert!(head.contains("Expect: 100-continue"));

    use base64::Engine as _;
    let auth = head
        .split("\r\n")
        .find(|line| line.starts_with("Authorization: Basic "))
        .expect("Authorization header");
    let token = auth.trim_start_matches("Authorization: Basic ");
    let decoded = base64::engine::general_purpose::STANDARD.decode(token).unwrap();
    assert_eq!(decoded, b"source:secret");

    client.close();
    assert!(!client.is_connected());
}

#[test]
fn test_handshake_refused_without_100() {
    let Some((endpoint, _request_rx)) = mock_icecast("HTTP/1.1 401 Unauthorized\r\n\r\n") else {
        eprintln!("skipping: local TCP bind not permitted");
        return;
    };

    let client = IcecastClient::new(7, 64, &StudioConfig::default()).unwrap();
    assert!(!client.connect(&endpoint, "wrong").unwrap());
    assert!(!client.is_connected());
}

#[test]
fn test_connection_refused_returns_false() {
    // A port nothing listens on; bind-then-drop reserves a dead one.
    let port = {
        let listener = match TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener,
            Err(_) => {
                eprintln!("skipping: local TCP bind not permitted");
                return;
            },
        };
        listener.local_addr().unwrap().port()
    };

    let client = IcecastClient::new(7, 64, &StudioConfig::default()).unwrap();
    let endpoint = format!("http://127.0.0.1:{port}/stream");
    assert!(!client.connect(&endpoint, "secret").unwrap());
}

#[test]
fn test_bad_scheme_is_an_error() {
    let client = IcecastClient::new(7, 64, &StudioConfig::default()).unwrap();
    assert!(client.connect("ftp://example.org/stream", "secret").is_err());
}
