// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::time::Duration;

fn t() -> Duration {
    Duration::from_secs(1)
}

#[tokio::test]
async fn roundtrip_request_over_duplex() {
    let (mut client, mut server) = tokio::io::duplex(1024);
    let request = Request::GetAgent { id: "agt-1".into() };

    write_message(&mut client, &request, t()).await.unwrap();
    let received = read_request(&mut server, t()).await.unwrap();
    assert_eq!(received, request);
}

#[tokio::test]
async fn roundtrip_response() {
    let (mut client, mut server) = tokio::io::duplex(1024);
    let response = Response::Error { kind: "not_found".to_string(), message: "agent not found".to_string() };

    write_response(&mut server, &response, t()).await.unwrap();
    let received: Response = read_message(&mut client, t()).await.unwrap();
    assert_eq!(received, response);
}

#[tokio::test]
async fn closed_stream_reads_as_connection_closed() {
    let (client, mut server) = tokio::io::duplex(1024);
    drop(client);
    let err = read_request(&mut server, t()).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
}

#[tokio::test]
async fn truncated_frame_is_connection_closed() {
    let (mut client, mut server) = tokio::io::duplex(1024);
    // Prefix promises 100 bytes, then the peer goes away.
    tokio::io::AsyncWriteExt::write_all(&mut client, &100u32.to_be_bytes()).await.unwrap();
    drop(client);
    let err = read_request(&mut server, t()).await.unwrap_err();
    assert!(matches!(err, ProtocolError::ConnectionClosed));
}

#[tokio::test]
async fn oversized_prefix_is_rejected_without_allocating() {
    let (mut client, mut server) = tokio::io::duplex(1024);
    tokio::io::AsyncWriteExt::write_all(&mut client, &u32::MAX.to_be_bytes()).await.unwrap();
    let err = read_request(&mut server, t()).await.unwrap_err();
    assert!(matches!(err, ProtocolError::TooLarge(_)));
}

#[tokio::test]
async fn slow_peer_times_out() {
    let (_client, mut server) = tokio::io::duplex(1024);
    let err = read_request(&mut server, Duration::from_millis(20)).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Timeout));
}

#[test]
fn frame_prefix_is_big_endian_length() {
    let frame = encode(&Request::Ping).unwrap();
    let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
    assert_eq!(len as usize, frame.len() - 4);
    let decoded: Request = decode(&frame[4..]).unwrap();
    assert_eq!(decoded, Request::Ping);
}
