//! Exchange-engine tests against loopback UDP responders.
//!
//! Each test stands up a responder thread on an ephemeral port, points a
//! [`Resolver`] at it, and asserts on the structured report or error. No
//! external network access is required.

use std::io::Cursor;
use std::net::UdpSocket;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dnsq::dns::{pack_domain_name, Flags, Header, QueryType};
use dnsq::resolver::{DnsError, Outcome, Resolver, ResolverConfig};

/// Spawns a UDP responder on an ephemeral loopback port.
///
/// The handler is invoked per received datagram; returning `Some` sends the
/// reply and stops the responder. The thread stops on its own read timeout
/// otherwise, and the join handle yields how many datagrams arrived.
fn udp_responder<F>(handler: F) -> (u16, JoinHandle<usize>)
where
    F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
{
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = socket.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let mut handler = handler;
        socket
            .set_read_timeout(Some(Duration::from_millis(1500)))
            .unwrap();
        let mut buffer = [0u8; 512];
        let mut received = 0usize;
        while let Ok((len, peer)) = socket.recv_from(&mut buffer) {
            received += 1;
            if let Some(reply) = handler(&buffer[..len]) {
                socket.send_to(&reply, peer).unwrap();
                break;
            }
        }
        received
    });

    (port, handle)
}

fn test_config(port: u16) -> ResolverConfig {
    ResolverConfig {
        server: "127.0.0.1".parse().unwrap(),
        port,
        timeout: Duration::from_millis(250),
        max_retries: 2,
    }
}

/// Builds a response datagram: header, the request's echoed question, then
/// any record bytes the caller appends.
fn reply_bytes(
    id: u16,
    request: &[u8],
    rcode: u8,
    aa: bool,
    an_count: u16,
    ar_count: u16,
    records: &[u8],
) -> Vec<u8> {
    let mut cursor = Cursor::new(request);
    let request_header = Header::from_bytes(&mut cursor).unwrap();

    let header = Header {
        id,
        flags: Flags {
            qr: true,
            opcode: 0,
            aa,
            tc: false,
            rd: true,
            ra: true,
            z: 0,
            rcode,
        },
        qd_count: request_header.qd_count,
        an_count,
        ns_count: 0,
        ar_count,
    };

    let mut message = Vec::new();
    header.pack(&mut message);
    message.extend_from_slice(&request[12..]);
    message.extend_from_slice(records);
    message
}

fn request_id(request: &[u8]) -> u16 {
    u16::from_be_bytes([request[0], request[1]])
}

#[test]
fn test_resolves_answer_and_additional_records() {
    let (port, _handle) = udp_responder(|request| {
        let mut records = Vec::new();

        // Answer: A record whose owner name is a pointer to the echoed
        // question name at offset 12.
        records.extend_from_slice(&[0xC0, 0x0C]);
        records.extend_from_slice(&1u16.to_be_bytes());
        records.extend_from_slice(&1u16.to_be_bytes());
        records.extend_from_slice(&300u32.to_be_bytes());
        records.extend_from_slice(&4u16.to_be_bytes());
        records.extend_from_slice(&[93, 184, 216, 34]);

        // Additional: A record with a literal owner name.
        pack_domain_name(&mut records, "ns1.example.com").unwrap();
        records.extend_from_slice(&1u16.to_be_bytes());
        records.extend_from_slice(&1u16.to_be_bytes());
        records.extend_from_slice(&7200u32.to_be_bytes());
        records.extend_from_slice(&4u16.to_be_bytes());
        records.extend_from_slice(&[198, 51, 100, 7]);

        Some(reply_bytes(
            request_id(request),
            request,
            0,
            true,
            1,
            1,
            &records,
        ))
    });

    let mut resolver = Resolver::new(test_config(port));
    let report = resolver.lookup("www.example.com", QueryType::A).unwrap();

    assert_eq!(report.outcome, Outcome::Resolved);
    assert_eq!(report.retries, 0);
    assert!(report.authoritative);
    assert!(report.recursion_available);
    assert_eq!(report.answers[0].name, "www.example.com");
    assert_eq!(
        report.render_answers(),
        vec!["IP\t93.184.216.34\t300\tauth"]
    );
    assert_eq!(
        report.render_additionals(),
        vec!["IP\t198.51.100.7\t7200\tauth"]
    );
}

#[test]
fn test_rejects_mismatched_transaction_id() {
    let (port, _handle) = udp_responder(|request| {
        // Claim an answer is present; the client must bail on the ID before
        // ever reaching the sections.
        Some(reply_bytes(
            request_id(request) ^ 0xFFFF,
            request,
            0,
            false,
            1,
            0,
            &[],
        ))
    });

    let mut resolver =
        Resolver::with_id_source(test_config(port), Box::new(|| 0x4242));
    let err = resolver.lookup("www.example.com", QueryType::A).unwrap_err();
    assert!(matches!(err, DnsError::TransactionIdMismatch));
}

#[test]
fn test_reports_server_refusal() {
    let (port, _handle) = udp_responder(|request| {
        Some(reply_bytes(request_id(request), request, 5, false, 0, 0, &[]))
    });

    let mut resolver = Resolver::new(test_config(port));
    let err = resolver.lookup("www.example.com", QueryType::A).unwrap_err();
    match err {
        DnsError::ServerReported(code) => {
            assert_eq!(code, dnsq::dns::ResponseCode::Refused);
        }
        other => panic!("expected ServerReported, got {other:?}"),
    }
}

#[test]
fn test_nxdomain_is_reported_not_found() {
    let (port, _handle) = udp_responder(|request| {
        Some(reply_bytes(request_id(request), request, 3, false, 0, 0, &[]))
    });

    let mut resolver = Resolver::new(test_config(port));
    let report = resolver
        .lookup("nonexistent.invalid", QueryType::A)
        .unwrap();
    assert_eq!(report.outcome, Outcome::NotFound);
    assert!(report.answers.is_empty());
}

#[test]
fn test_empty_answer_section_is_reported_not_found() {
    let (port, _handle) = udp_responder(|request| {
        Some(reply_bytes(request_id(request), request, 0, false, 0, 0, &[]))
    });

    let mut resolver = Resolver::new(test_config(port));
    let report = resolver.lookup("www.example.com", QueryType::NS).unwrap();
    assert_eq!(report.outcome, Outcome::NotFound);
}

#[test]
fn test_exhausts_retries_against_silent_server() {
    let (port, handle) = udp_responder(|_| None);

    let mut resolver = Resolver::new(test_config(port));
    let err = resolver.lookup("www.example.com", QueryType::A).unwrap_err();
    assert!(matches!(err, DnsError::RetriesExhausted(2)));

    // One initial send plus two retries.
    assert_eq!(handle.join().unwrap(), 3);
}

#[test]
fn test_succeeds_after_timed_out_attempt() {
    let mut seen = 0usize;
    let (port, _handle) = udp_responder(move |request| {
        seen += 1;
        if seen == 1 {
            // Swallow the first attempt so the client retries.
            return None;
        }
        let mut records = Vec::new();
        records.extend_from_slice(&[0xC0, 0x0C]);
        records.extend_from_slice(&1u16.to_be_bytes());
        records.extend_from_slice(&1u16.to_be_bytes());
        records.extend_from_slice(&60u32.to_be_bytes());
        records.extend_from_slice(&4u16.to_be_bytes());
        records.extend_from_slice(&[192, 0, 2, 1]);
        Some(reply_bytes(
            request_id(request),
            request,
            0,
            false,
            1,
            0,
            &records,
        ))
    });

    let mut resolver = Resolver::new(test_config(port));
    let report = resolver.lookup("www.example.com", QueryType::A).unwrap();
    assert_eq!(report.outcome, Outcome::Resolved);
    assert_eq!(report.retries, 1);
    assert_eq!(report.render_answers(), vec!["IP\t192.0.2.1\t60\tnonauth"]);
}

#[test]
fn test_malformed_response_is_fatal_without_retry() {
    let (port, handle) = udp_responder(|request| {
        // Well-formed header claiming one answer, then garbage where the
        // record should be.
        let mut reply = reply_bytes(request_id(request), request, 0, false, 1, 0, &[]);
        reply.extend_from_slice(&[0xFF]);
        Some(reply)
    });

    let mut resolver = Resolver::new(test_config(port));
    let err = resolver.lookup("www.example.com", QueryType::A).unwrap_err();
    assert!(matches!(err, DnsError::Malformed(_)));

    // Fatal on the first response: no retry datagrams were sent.
    assert_eq!(handle.join().unwrap(), 1);
}
