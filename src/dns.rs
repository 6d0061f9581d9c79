//! DNS wire-format codec.
//!
//! Types and functions for encoding DNS queries and decoding DNS responses
//! according to the RFC 1035 subset this client speaks: the 12-byte message
//! header and its flags bitfield, the question section, resource records with
//! type-specific RDATA, and length-prefixed domain names with message
//! compression.
//!
//! All multi-byte integers are network byte order (big-endian). Decoding
//! operates on a [`Cursor`] over the complete response datagram, because
//! compressed names contain absolute offsets into the message and can only be
//! resolved against the full buffer.
//!
//! # Core Types
//!
//! - [`QueryType`] - the record types this client queries for (A, NS, MX)
//! - [`Flags`] / [`Header`] - the 16-bit flags bitfield and 12-byte header
//! - [`Question`] - a single QNAME/QTYPE/QCLASS entry
//! - [`ResourceRecord`] / [`RData`] - decoded answer and additional records
//!
//! # Examples
//!
//! ```rust
//! use dnsq::dns::{Header, QueryType, Question};
//!
//! let mut datagram = Vec::new();
//! Header::query(0x1234).pack(&mut datagram);
//! Question::new("www.example.com", QueryType::A)
//!     .pack(&mut datagram)
//!     .unwrap();
//! assert_eq!(datagram.len(), 12 + 17 + 4);
//! ```

use core::fmt;
use std::io::{Cursor, Read};
use std::net::Ipv4Addr;

use thiserror::Error;

/// Errors raised while encoding or decoding DNS wire data.
///
/// These are value-level failures: the codec never panics on untrusted
/// input, it reports the violation and lets the caller classify it.
#[derive(Debug, Error)]
pub enum WireError {
    /// A read ran past the end of the message buffer.
    #[error("message truncated: {0}")]
    Truncated(#[from] std::io::Error),

    /// A domain-name label exceeds the 63-byte limit of RFC 1035.
    #[error("label '{0}' exceeds the maximum length of 63 bytes")]
    LabelTooLong(String),

    /// A domain-name label contains bytes outside the ASCII range.
    #[error("label '{0}' is not ASCII")]
    NonAsciiLabel(String),

    /// A compressed name followed more pointers than the message has bytes.
    ///
    /// Caps the work done on a message whose pointers form a cycle; a
    /// legitimate name can never need that many hops.
    #[error("too many compression pointers while decoding a name")]
    PointerLimit,

    /// A record's RDLENGTH runs past the end of the message.
    #[error("record data length {0} exceeds the remaining message")]
    RdataOutOfBounds(usize),

    /// A record's RDLENGTH is impossible for its type.
    #[error("invalid record data length {rdlength} for {rtype} record")]
    InvalidRdataLength {
        /// Record type name ("A" or "MX").
        rtype: &'static str,
        /// The declared RDATA length.
        rdlength: usize,
    },
}

/// The DNS record types this client can ask for.
///
/// The numeric values are the RFC 1035 TYPE codes used on the wire.
/// Unrecognized type strings fall back to [`QueryType::A`] when building a
/// query (see [`QueryType::from_name`]); unrecognized numeric codes in a
/// response are kept as raw numbers and render as `UNKNOWN` (see
/// [`type_name`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum QueryType {
    /// IPv4 host address record.
    A = 1,
    /// Authoritative name server record.
    NS = 2,
    /// Mail exchange record.
    MX = 15,
}

impl QueryType {
    /// Maps a record type string to a `QueryType`, case-insensitively.
    ///
    /// Any string that is not `A`, `NS`, or `MX` maps to [`QueryType::A`].
    /// The fallback is deliberate and pinned by a test; it is not reported
    /// as an error.
    ///
    /// ```rust
    /// use dnsq::dns::QueryType;
    ///
    /// assert_eq!(QueryType::from_name("mx"), QueryType::MX);
    /// assert_eq!(QueryType::from_name("TXT"), QueryType::A);
    /// ```
    pub fn from_name(name: &str) -> Self {
        match name.to_uppercase().as_str() {
            "NS" => QueryType::NS,
            "MX" => QueryType::MX,
            _ => QueryType::A,
        }
    }

    /// The numeric TYPE code sent on the wire.
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryType::A => write!(f, "A"),
            QueryType::NS => write!(f, "NS"),
            QueryType::MX => write!(f, "MX"),
        }
    }
}

/// Maps a numeric record type code to its display name.
///
/// Codes outside the supported set render as `UNKNOWN`; the numeric value
/// itself is preserved wherever dispatch on it matters.
pub fn type_name(code: u16) -> &'static str {
    match code {
        1 => "A",
        2 => "NS",
        15 => "MX",
        _ => "UNKNOWN",
    }
}

/// The 4-bit response code (RCODE) carried in the header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    /// No error condition.
    NoError = 0,
    /// The name server was unable to interpret the query.
    FormatError = 1,
    /// The name server was unable to process the query.
    ServerFailure = 2,
    /// The domain name referenced in the query does not exist (NXDOMAIN).
    NameError = 3,
    /// The name server does not support the requested kind of query.
    NotImplemented = 4,
    /// The name server refuses to perform the operation.
    Refused = 5,
}

impl ResponseCode {
    /// Maps the 4-bit RCODE value to a `ResponseCode`.
    ///
    /// Returns `None` for the reserved values 6-15, which the exchange
    /// engine treats like a successful response and parses normally.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ResponseCode::NoError),
            1 => Some(ResponseCode::FormatError),
            2 => Some(ResponseCode::ServerFailure),
            3 => Some(ResponseCode::NameError),
            4 => Some(ResponseCode::NotImplemented),
            5 => Some(ResponseCode::Refused),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            ResponseCode::NoError => "No error",
            ResponseCode::FormatError => {
                "Format error: the name server was unable to interpret the query"
            }
            ResponseCode::ServerFailure => {
                "Server failure: the name server was unable to process this query \
                 due to a problem with the name server"
            }
            ResponseCode::NameError => {
                "Name error: the domain name referenced in the query does not exist"
            }
            ResponseCode::NotImplemented => {
                "Not implemented: the name server does not support the requested kind of query"
            }
            ResponseCode::Refused => {
                "Refused: the name server refuses to perform the requested operation \
                 for policy reasons"
            }
        };
        f.write_str(message)
    }
}

/// The 16-bit flags bitfield of the DNS header.
///
/// Bit layout, most significant first:
/// `QR (1) | OPCODE (4) | AA (1) | TC (1) | RD (1) | RA (1) | Z (3) | RCODE (4)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    /// Query (false) or response (true).
    pub qr: bool,
    /// Kind of query; 0 for a standard query.
    pub opcode: u8,
    /// The responding server is authoritative for the queried name.
    pub aa: bool,
    /// The message was truncated by the transport.
    pub tc: bool,
    /// Recursion desired.
    pub rd: bool,
    /// Recursion available.
    pub ra: bool,
    /// Reserved bits; zero on anything this client creates.
    pub z: u8,
    /// Raw 4-bit response code. See [`Flags::response_code`].
    pub rcode: u8,
}

impl Flags {
    /// Flags for an outgoing standard query: recursion desired, everything
    /// else zero. `tc` is caller-supplied for completeness.
    pub fn query(tc: bool) -> Self {
        Flags {
            qr: false,
            opcode: 0,
            aa: false,
            tc,
            rd: true,
            ra: false,
            z: 0,
            rcode: 0,
        }
    }

    /// Packs the flag fields into their 16-bit wire representation.
    pub fn to_u16(self) -> u16 {
        (u16::from(self.qr) << 15)
            | (u16::from(self.opcode) << 11)
            | (u16::from(self.aa) << 10)
            | (u16::from(self.tc) << 9)
            | (u16::from(self.rd) << 8)
            | (u16::from(self.ra) << 7)
            | (u16::from(self.z) << 4)
            | u16::from(self.rcode)
    }

    /// Reconstructs the flag fields from their 16-bit wire representation.
    pub fn from_u16(bits: u16) -> Self {
        Flags {
            qr: (bits >> 15) & 0x1 == 1,
            opcode: ((bits >> 11) & 0xF) as u8,
            aa: (bits >> 10) & 0x1 == 1,
            tc: (bits >> 9) & 0x1 == 1,
            rd: (bits >> 8) & 0x1 == 1,
            ra: (bits >> 7) & 0x1 == 1,
            z: ((bits >> 4) & 0x7) as u8,
            rcode: (bits & 0xF) as u8,
        }
    }

    /// The RCODE as a [`ResponseCode`], or `None` for reserved values.
    pub fn response_code(self) -> Option<ResponseCode> {
        ResponseCode::from_code(self.rcode)
    }
}

/// The 12-byte header of a DNS message.
///
/// Field order on the wire: transaction ID, flags, then the four section
/// counts (question, answer, authority, additional), each 16 bits.
///
/// # Examples
///
/// ```rust
/// use dnsq::dns::Header;
///
/// let mut buffer = Vec::new();
/// Header::query(0xBEEF).pack(&mut buffer);
/// assert_eq!(buffer.len(), 12);
/// assert_eq!(&buffer[0..2], &[0xBE, 0xEF]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Transaction identifier matching responses to their query.
    pub id: u16,
    /// The flags bitfield.
    pub flags: Flags,
    /// Number of entries in the question section.
    pub qd_count: u16,
    /// Number of records in the answer section.
    pub an_count: u16,
    /// Number of records in the authority section.
    pub ns_count: u16,
    /// Number of records in the additional section.
    pub ar_count: u16,
}

impl Header {
    /// Builds the header for an outgoing single-question query.
    pub fn query(id: u16) -> Self {
        Header {
            id,
            flags: Flags::query(false),
            qd_count: 1,
            an_count: 0,
            ns_count: 0,
            ar_count: 0,
        }
    }

    /// Appends the 12-byte big-endian wire form to `buffer`.
    pub fn pack(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.id.to_be_bytes());
        buffer.extend_from_slice(&self.flags.to_u16().to_be_bytes());
        buffer.extend_from_slice(&self.qd_count.to_be_bytes());
        buffer.extend_from_slice(&self.an_count.to_be_bytes());
        buffer.extend_from_slice(&self.ns_count.to_be_bytes());
        buffer.extend_from_slice(&self.ar_count.to_be_bytes());
    }

    /// Reads a header from the cursor, advancing it by 12 bytes.
    ///
    /// Fails with [`WireError::Truncated`] if fewer than 12 bytes remain.
    pub fn from_bytes(cursor: &mut Cursor<&[u8]>) -> Result<Self, WireError> {
        let id = read_u16(cursor)?;
        let flags = Flags::from_u16(read_u16(cursor)?);
        let qd_count = read_u16(cursor)?;
        let an_count = read_u16(cursor)?;
        let ns_count = read_u16(cursor)?;
        let ar_count = read_u16(cursor)?;

        Ok(Header {
            id,
            flags,
            qd_count,
            an_count,
            ns_count,
            ar_count,
        })
    }
}

/// A single entry of the question section.
///
/// The type is kept as the raw numeric code so that a response echoing an
/// unknown QTYPE still round-trips; [`Question::type_name`] renders it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// The domain name being queried.
    pub name: String,
    /// Numeric query type code.
    pub qtype: u16,
    /// Query class; always 1 (IN) for anything this client sends.
    pub qclass: u16,
}

impl Question {
    /// Builds an Internet-class question for `name`.
    pub fn new(name: &str, qtype: QueryType) -> Self {
        Question {
            name: name.to_string(),
            qtype: qtype.code(),
            qclass: 1,
        }
    }

    /// The display name of the question's type, `UNKNOWN` if unmapped.
    pub fn type_name(&self) -> &'static str {
        type_name(self.qtype)
    }

    /// Appends the wire form to `buffer`: the encoded QNAME followed by
    /// big-endian QTYPE and QCLASS.
    pub fn pack(&self, buffer: &mut Vec<u8>) -> Result<(), WireError> {
        pack_domain_name(buffer, &self.name)?;
        buffer.extend_from_slice(&self.qtype.to_be_bytes());
        buffer.extend_from_slice(&self.qclass.to_be_bytes());
        Ok(())
    }

    /// Reads a question from the cursor, advancing it past QNAME, QTYPE and
    /// QCLASS.
    pub fn from_bytes(cursor: &mut Cursor<&[u8]>) -> Result<Self, WireError> {
        let name = unpack_domain_name(cursor)?;
        let qtype = read_u16(cursor)?;
        let qclass = read_u16(cursor)?;

        Ok(Question {
            name,
            qtype,
            qclass,
        })
    }
}

/// Type-specific payload of a resource record.
///
/// The set is closed: every record decodes into exactly one of these
/// variants, chosen once by the record's TYPE code at decode time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    /// A record: an IPv4 host address.
    A(Ipv4Addr),
    /// NS or CNAME record: a (possibly compressed) domain name.
    Name(String),
    /// MX record: preference value and exchange host name.
    Mx {
        /// Lower values are preferred.
        preference: u16,
        /// The mail exchange host.
        exchange: String,
    },
    /// Any other record type: the raw RDATA bytes, opaque to this client.
    Other(Vec<u8>),
}

/// A decoded resource record from the answer or additional section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    /// The owner name this record belongs to.
    pub name: String,
    /// Numeric record type code.
    pub rtype: u16,
    /// Record class.
    pub class: u16,
    /// Time-to-live in seconds.
    pub ttl: u32,
    /// The type-specific payload.
    pub data: RData,
}

impl ResourceRecord {
    /// Reads one resource record from the cursor.
    ///
    /// The cursor must sit over the complete message so compressed names in
    /// the owner or RDATA can be resolved. On return the cursor is
    /// positioned directly after the record's RDATA, regardless of how much
    /// of it the type-specific decoding consumed.
    ///
    /// # Errors
    ///
    /// - [`WireError::Truncated`] if the fixed fields run past the buffer
    /// - [`WireError::RdataOutOfBounds`] if RDLENGTH exceeds the remaining
    ///   message
    /// - [`WireError::InvalidRdataLength`] for an A record whose RDLENGTH is
    ///   not 4, or an MX record shorter than 3 bytes
    pub fn from_bytes(cursor: &mut Cursor<&[u8]>) -> Result<Self, WireError> {
        let name = unpack_domain_name(cursor)?;

        let rtype = read_u16(cursor)?;
        let class = read_u16(cursor)?;
        let ttl = read_u32(cursor)?;
        let rdlength = read_u16(cursor)? as usize;

        let rdata_start = cursor.position() as usize;
        let rdata_end = rdata_start + rdlength;
        if rdata_end > cursor.get_ref().len() {
            return Err(WireError::RdataOutOfBounds(rdlength));
        }

        let data = match rtype {
            1 => {
                if rdlength != 4 {
                    return Err(WireError::InvalidRdataLength {
                        rtype: "A",
                        rdlength,
                    });
                }
                let mut octets = [0u8; 4];
                cursor.read_exact(&mut octets)?;
                RData::A(Ipv4Addr::from(octets))
            }
            2 | 5 => {
                // May point back into earlier parts of the message.
                let target = unpack_domain_name(cursor)?;
                RData::Name(target)
            }
            15 => {
                if rdlength < 3 {
                    return Err(WireError::InvalidRdataLength {
                        rtype: "MX",
                        rdlength,
                    });
                }
                let preference = read_u16(cursor)?;
                let exchange = unpack_domain_name(cursor)?;
                RData::Mx {
                    preference,
                    exchange,
                }
            }
            _ => {
                let mut raw = vec![0u8; rdlength];
                cursor.read_exact(&mut raw)?;
                RData::Other(raw)
            }
        };

        // Parsing resumes after the declared RDATA, whatever the variant
        // decoding consumed.
        cursor.set_position(rdata_end as u64);

        Ok(ResourceRecord {
            name,
            rtype,
            class,
            ttl,
            data,
        })
    }

    /// Renders the record as a tab-separated report line.
    ///
    /// `authoritative` is the AA bit of the response the record arrived in;
    /// it is a property of the response, not of the record.
    ///
    /// ```rust
    /// use dnsq::dns::{RData, ResourceRecord};
    ///
    /// let record = ResourceRecord {
    ///     name: "example.com".to_string(),
    ///     rtype: 15,
    ///     class: 1,
    ///     ttl: 300,
    ///     data: RData::Mx {
    ///         preference: 10,
    ///         exchange: "mail.example.com".to_string(),
    ///     },
    /// };
    /// assert_eq!(record.render(true), "MX\tmail.example.com\t10\t300\tauth");
    /// ```
    pub fn render(&self, authoritative: bool) -> String {
        let auth = if authoritative { "auth" } else { "nonauth" };
        match &self.data {
            RData::A(addr) => format!("IP\t{}\t{}\t{}", addr, self.ttl, auth),
            RData::Name(target) => {
                format!("{}\t{}\t{}\t{}", type_name(self.rtype), target, self.ttl, auth)
            }
            RData::Mx {
                preference,
                exchange,
            } => format!("MX\t{}\t{}\t{}\t{}", exchange, preference, self.ttl, auth),
            RData::Other(raw) => {
                format!("TYPE {}\tData: {:?}\t{}\t{}", self.rtype, raw, self.ttl, auth)
            }
        }
    }
}

/// Encodes a domain name into DNS label format and appends it to `buffer`.
///
/// `www.example.com` becomes `\x03www\x07example\x03com\x00`: each label is
/// prefixed with its length and the name is terminated by a zero byte.
///
/// # Errors
///
/// Fails if a label is longer than 63 bytes or contains non-ASCII
/// characters; the name is never silently truncated or transliterated.
///
/// ```rust
/// use dnsq::dns::pack_domain_name;
///
/// let mut buffer = Vec::new();
/// pack_domain_name(&mut buffer, "www.example.com").unwrap();
/// assert_eq!(buffer[0], 3);
/// assert_eq!(&buffer[1..4], b"www");
/// assert_eq!(buffer[buffer.len() - 1], 0);
/// ```
pub fn pack_domain_name(buffer: &mut Vec<u8>, name: &str) -> Result<(), WireError> {
    for label in name.split('.') {
        if !label.is_ascii() {
            return Err(WireError::NonAsciiLabel(label.to_string()));
        }
        if label.len() > 63 {
            return Err(WireError::LabelTooLong(label.to_string()));
        }
        buffer.push(label.len() as u8);
        buffer.extend_from_slice(label.as_bytes());
    }
    buffer.push(0);
    Ok(())
}

/// Decodes a domain name at the cursor's position, following compression
/// pointers.
///
/// Labels are read until a zero terminator or a pointer byte (top two bits
/// `11`). A pointer's 14-bit target becomes the new read position, but the
/// cursor's final position is fixed directly after the first pointer
/// encountered; later pointers in the chase do not move it again. Without
/// any pointer the cursor ends directly after the zero terminator.
///
/// The number of pointer hops is capped at the message length, so a crafted
/// message whose pointers form a cycle fails with [`WireError::PointerLimit`]
/// instead of looping.
///
/// ```rust
/// use dnsq::dns::unpack_domain_name;
/// use std::io::Cursor;
///
/// let data = [
///     3, b'w', b'w', b'w', 7, b'e', b'x', b'a', b'm', b'p', b'l', b'e',
///     3, b'c', b'o', b'm', 0,
/// ];
/// let mut cursor = Cursor::new(&data[..]);
/// assert_eq!(unpack_domain_name(&mut cursor).unwrap(), "www.example.com");
/// assert_eq!(cursor.position(), 17);
/// ```
pub fn unpack_domain_name(cursor: &mut Cursor<&[u8]>) -> Result<String, WireError> {
    let hop_limit = cursor.get_ref().len();
    let mut hops = 0usize;
    let mut labels = Vec::new();
    let mut return_position = None;

    loop {
        let mut len_buf = [0u8; 1];
        cursor.read_exact(&mut len_buf)?;
        let len = len_buf[0];

        if len & 0xC0 == 0xC0 {
            let mut low_buf = [0u8; 1];
            cursor.read_exact(&mut low_buf)?;

            // Only the first pointer determines where parsing resumes.
            if return_position.is_none() {
                return_position = Some(cursor.position());
            }

            hops += 1;
            if hops > hop_limit {
                return Err(WireError::PointerLimit);
            }

            let target = (u64::from(len & 0x3F) << 8) | u64::from(low_buf[0]);
            cursor.set_position(target);
            continue;
        }

        if len == 0 {
            break;
        }

        let mut label = vec![0u8; len as usize];
        cursor.read_exact(&mut label)?;
        labels.push(String::from_utf8_lossy(&label).into_owned());
    }

    if let Some(position) = return_position {
        cursor.set_position(position);
    }

    Ok(labels.join("."))
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16, WireError> {
    let mut buf = [0u8; 2];
    cursor.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32, WireError> {
    let mut buf = [0u8; 4];
    cursor.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}
