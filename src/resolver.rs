//! Query exchange engine.
//!
//! Drives the full lifecycle of one DNS lookup: build the query datagram,
//! send it over UDP, wait for the response with a timeout, retry on timeout
//! up to a bound, validate the transaction ID, and decode the answer and
//! additional sections into a [`QueryReport`].
//!
//! The exchange is strictly sequential. Each attempt owns its own socket,
//! bound for the duration of that attempt and released when it concludes,
//! whatever the outcome. Only timeouts are retried; a transaction-ID
//! mismatch, a server-reported error, or a malformed response terminates the
//! lookup immediately.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dnsq::dns::QueryType;
//! use dnsq::resolver::{Resolver, ResolverConfig};
//!
//! let config = ResolverConfig::new("8.8.8.8".parse().unwrap());
//! let mut resolver = Resolver::new(config);
//! let report = resolver.lookup("www.example.com", QueryType::A)?;
//! for line in report.render_answers() {
//!     println!("{line}");
//! }
//! # Ok::<(), dnsq::resolver::DnsError>(())
//! ```

use std::io;
use std::io::Cursor;
use std::net::{Ipv4Addr, UdpSocket};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::dns::{
    Flags, Header, Question, QueryType, ResourceRecord, ResponseCode, WireError,
};

/// Largest datagram this client sends or accepts (RFC 1035 UDP limit).
pub const MAX_DATAGRAM_SIZE: usize = 512;

/// Errors that terminate a DNS lookup.
#[derive(Debug, Error)]
pub enum DnsError {
    /// The server operand is not a dotted-decimal IPv4 address.
    #[error("Invalid DNS server provided. The server should be a valid IPv4 address.")]
    InvalidServerAddress(String),

    /// A single attempt received no response in time.
    ///
    /// Internal to the retry loop; callers of [`Resolver::lookup`] see
    /// [`DnsError::RetriesExhausted`] once the retry bound is spent.
    #[error("Request timed out")]
    Timeout,

    /// Every attempt timed out.
    #[error("Maximum number of retries {0} exceeded")]
    RetriesExhausted(u32),

    /// The response carries a different transaction ID than the query.
    #[error("Unexpected response: Request ID and Response ID do not match.")]
    TransactionIdMismatch,

    /// The server reported an error RCODE (format error, server failure,
    /// not implemented, or refused).
    #[error("{0}")]
    ServerReported(ResponseCode),

    /// The response could not be decoded.
    #[error("Invalid DNS response: {0}")]
    Malformed(#[from] WireError),

    /// A socket-level failure other than a timeout.
    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),
}

/// Configuration for a [`Resolver`].
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// The DNS server to query.
    pub server: Ipv4Addr,
    /// The server port; 53 unless overridden.
    pub port: u16,
    /// How long each attempt waits for a response.
    pub timeout: Duration,
    /// How many times a timed-out query is retried before giving up.
    pub max_retries: u32,
}

impl ResolverConfig {
    /// Configuration with the protocol defaults: port 53, a 5-second
    /// timeout, and 3 retries.
    pub fn new(server: Ipv4Addr) -> Self {
        ResolverConfig {
            server,
            port: 53,
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

/// How a completed lookup ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The response carried at least one answer record.
    Resolved,
    /// The name does not exist (RCODE 3) or the answer section was empty.
    /// Reported as a result, not an error.
    NotFound,
}

/// The structured result of a successful exchange.
#[derive(Debug)]
pub struct QueryReport {
    /// Whether answers were found.
    pub outcome: Outcome,
    /// Time between sending the datagram and receiving the response, for
    /// the attempt that succeeded.
    pub elapsed: Duration,
    /// Number of retries consumed before the successful attempt.
    pub retries: u32,
    /// The response's AA bit.
    pub authoritative: bool,
    /// The response's RA bit.
    pub recursion_available: bool,
    /// Decoded answer records, in response order.
    pub answers: Vec<ResourceRecord>,
    /// Decoded additional records, in response order.
    pub additionals: Vec<ResourceRecord>,
}

impl QueryReport {
    fn not_found(flags: Flags, elapsed: Duration) -> Self {
        QueryReport {
            outcome: Outcome::NotFound,
            elapsed,
            retries: 0,
            authoritative: flags.aa,
            recursion_available: flags.ra,
            answers: Vec::new(),
            additionals: Vec::new(),
        }
    }

    /// Renders the answer section with this response's AA bit.
    pub fn render_answers(&self) -> Vec<String> {
        self.answers
            .iter()
            .map(|record| record.render(self.authoritative))
            .collect()
    }

    /// Renders the additional section with this response's AA bit.
    pub fn render_additionals(&self) -> Vec<String> {
        self.additionals
            .iter()
            .map(|record| record.render(self.authoritative))
            .collect()
    }
}

/// Source of 16-bit transaction IDs.
///
/// Randomness is an explicit collaborator so tests can pin the ID and
/// assert on responses; the default draws from [`fastrand`].
pub type IdSource = Box<dyn FnMut() -> u16 + Send>;

/// A stub resolver bound to one DNS server.
///
/// Holds no connection state between lookups; every lookup, and every retry
/// within a lookup, sends a fresh datagram from a fresh socket.
pub struct Resolver {
    config: ResolverConfig,
    id_source: IdSource,
}

impl Resolver {
    /// Creates a resolver that draws transaction IDs from [`fastrand`].
    pub fn new(config: ResolverConfig) -> Self {
        Self::with_id_source(config, Box::new(|| fastrand::u16(..)))
    }

    /// Creates a resolver with an injected transaction-ID source.
    pub fn with_id_source(config: ResolverConfig, id_source: IdSource) -> Self {
        Resolver { config, id_source }
    }

    /// The configuration this resolver was built with.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Performs one DNS lookup, retrying timed-out attempts.
    ///
    /// Retries stop after `max_retries`; any failure other than a timeout
    /// is terminal on the spot. On success the report carries the number of
    /// retries that were consumed and the elapsed time of the winning
    /// attempt.
    pub fn lookup(&mut self, name: &str, qtype: QueryType) -> Result<QueryReport, DnsError> {
        let mut retries = 0u32;

        loop {
            match self.attempt(name, qtype) {
                Ok(mut report) => {
                    report.retries = retries;
                    return Ok(report);
                }
                Err(DnsError::Timeout) => {
                    retries += 1;
                    if retries > self.config.max_retries {
                        return Err(DnsError::RetriesExhausted(self.config.max_retries));
                    }
                    warn!(
                        retries,
                        max_retries = self.config.max_retries,
                        "timeout occurred, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Runs a single send/receive attempt.
    ///
    /// The socket lives in this scope only; it is dropped on every exit
    /// path before the caller can start another attempt.
    fn attempt(&mut self, name: &str, qtype: QueryType) -> Result<QueryReport, DnsError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_read_timeout(Some(self.config.timeout))?;

        // A fresh ID per datagram; the response is validated against the ID
        // of the datagram just sent, never an earlier attempt's.
        let id = (self.id_source)();
        let header = Header::query(id);
        let question = Question::new(name, qtype);

        let mut datagram = Vec::with_capacity(MAX_DATAGRAM_SIZE);
        header.pack(&mut datagram);
        question.pack(&mut datagram)?;

        info!(
            server = %self.config.server,
            port = self.config.port,
            domain = name,
            qtype = %qtype,
            "sending request"
        );

        let start = Instant::now();
        socket.send_to(&datagram, (self.config.server, self.config.port))?;

        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        let (received, _) = socket.recv_from(&mut buffer).map_err(|err| {
            if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::TimedOut {
                DnsError::Timeout
            } else {
                DnsError::Transport(err)
            }
        })?;
        let elapsed = start.elapsed();

        debug!(bytes = received, ?elapsed, "response received");
        parse_response(&buffer[..received], id, elapsed)
    }
}

/// Decodes and validates one response datagram.
fn parse_response(
    message: &[u8],
    expected_id: u16,
    elapsed: Duration,
) -> Result<QueryReport, DnsError> {
    let mut cursor = Cursor::new(message);
    let header = Header::from_bytes(&mut cursor)?;

    if header.id != expected_id {
        return Err(DnsError::TransactionIdMismatch);
    }

    let flags = header.flags;
    match flags.response_code() {
        Some(ResponseCode::NameError) => return Ok(QueryReport::not_found(flags, elapsed)),
        Some(
            code @ (ResponseCode::FormatError
            | ResponseCode::ServerFailure
            | ResponseCode::NotImplemented
            | ResponseCode::Refused),
        ) => return Err(DnsError::ServerReported(code)),
        // NoError, or a reserved RCODE value: parse the sections.
        _ => {}
    }

    if !flags.ra {
        warn!("DNS server does not support recursive queries");
    }

    // The echoed question is skipped, not re-validated.
    for _ in 0..header.qd_count {
        Question::from_bytes(&mut cursor)?;
    }

    let mut answers = Vec::with_capacity(header.an_count as usize);
    for _ in 0..header.an_count {
        answers.push(ResourceRecord::from_bytes(&mut cursor)?);
    }

    if answers.is_empty() {
        return Ok(QueryReport::not_found(flags, elapsed));
    }

    let mut additionals = Vec::with_capacity(header.ar_count as usize);
    for _ in 0..header.ar_count {
        additionals.push(ResourceRecord::from_bytes(&mut cursor)?);
    }

    Ok(QueryReport {
        outcome: Outcome::Resolved,
        elapsed,
        retries: 0,
        authoritative: flags.aa,
        recursion_available: flags.ra,
        answers,
        additionals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ResolverConfig::new(Ipv4Addr::new(8, 8, 8, 8));
        assert_eq!(config.port, 53);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 3);
    }

    fn response(id: u16, flags: Flags, body: impl FnOnce(&mut Vec<u8>) -> (u16, u16)) -> Vec<u8> {
        let mut sections = Vec::new();
        let (an_count, ar_count) = body(&mut sections);
        let header = Header {
            id,
            flags,
            qd_count: 0,
            an_count,
            ns_count: 0,
            ar_count,
        };
        let mut message = Vec::new();
        header.pack(&mut message);
        message.extend_from_slice(&sections);
        message
    }

    fn response_flags(rcode: u8) -> Flags {
        Flags {
            qr: true,
            opcode: 0,
            aa: false,
            tc: false,
            rd: true,
            ra: true,
            z: 0,
            rcode,
        }
    }

    #[test]
    fn test_parse_rejects_mismatched_id() {
        let message = response(0x1111, response_flags(0), |_| (0, 0));
        let err = parse_response(&message, 0x2222, Duration::ZERO).unwrap_err();
        assert!(matches!(err, DnsError::TransactionIdMismatch));
    }

    #[test]
    fn test_parse_maps_error_rcodes() {
        for (rcode, expected) in [
            (1, ResponseCode::FormatError),
            (2, ResponseCode::ServerFailure),
            (4, ResponseCode::NotImplemented),
            (5, ResponseCode::Refused),
        ] {
            let message = response(7, response_flags(rcode), |_| (0, 0));
            let err = parse_response(&message, 7, Duration::ZERO).unwrap_err();
            match err {
                DnsError::ServerReported(code) => assert_eq!(code, expected),
                other => panic!("expected ServerReported, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_name_error_is_not_found() {
        let message = response(7, response_flags(3), |_| (0, 0));
        let report = parse_response(&message, 7, Duration::ZERO).unwrap();
        assert_eq!(report.outcome, Outcome::NotFound);
        assert!(report.answers.is_empty());
    }

    #[test]
    fn test_parse_empty_answer_section_is_not_found() {
        let message = response(7, response_flags(0), |_| (0, 0));
        let report = parse_response(&message, 7, Duration::ZERO).unwrap();
        assert_eq!(report.outcome, Outcome::NotFound);
    }

    #[test]
    fn test_parse_answer_section() {
        let message = response(7, response_flags(0), |sections| {
            crate::dns::pack_domain_name(sections, "example.com").unwrap();
            sections.extend_from_slice(&1u16.to_be_bytes()); // TYPE A
            sections.extend_from_slice(&1u16.to_be_bytes()); // CLASS IN
            sections.extend_from_slice(&300u32.to_be_bytes()); // TTL
            sections.extend_from_slice(&4u16.to_be_bytes()); // RDLENGTH
            sections.extend_from_slice(&[93, 184, 216, 34]);
            (1, 0)
        });
        let report = parse_response(&message, 7, Duration::ZERO).unwrap();
        assert_eq!(report.outcome, Outcome::Resolved);
        assert_eq!(report.render_answers(), vec!["IP\t93.184.216.34\t300\tnonauth"]);
        assert!(report.additionals.is_empty());
    }

    #[test]
    fn test_parse_truncated_answer_is_malformed() {
        let message = response(7, response_flags(0), |sections| {
            sections.extend_from_slice(&[3, b'w', b'w', b'w']); // cut off mid-name
            (1, 0)
        });
        let err = parse_response(&message, 7, Duration::ZERO).unwrap_err();
        assert!(matches!(err, DnsError::Malformed(_)));
    }
}
